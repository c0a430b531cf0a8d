pub mod catalog_handlers;
pub mod health_handlers;

use crate::{services::catalog_service::Catalog, sync::orchestrator::ScanOrchestrator};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Root of the filesystem object source, checked by `/readyz`.
    pub storage_root: PathBuf,
    /// Process-wide shutdown token; scans started over HTTP use child tokens.
    pub shutdown: CancellationToken,
}
