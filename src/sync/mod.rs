//! The reconciliation engine.
//!
//! Discovery, bucket validation and quarantine, per-bucket object
//! reconciliation, and scan-job bookkeeping. Components receive their
//! collaborators explicitly; nothing here reaches for global state.

pub mod classify;
pub mod jobs;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconciler;
pub mod validator;

use crate::services::catalog_service::CatalogError;
use classify::{AccessErrorKind, ClassifiedError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("bucket `{bucket}` is not accessible ({error})")]
    Inaccessible {
        bucket: String,
        error: ClassifiedError,
    },
    #[error("listing bucket `{bucket}` failed ({error})")]
    Listing {
        bucket: String,
        error: ClassifiedError,
    },
    #[error("bucket discovery failed ({0})")]
    Discovery(ClassifiedError),
    #[error("scan cancelled")]
    Cancelled,
    #[error("a full sweep is already running")]
    SweepInProgress,
    #[error("bucket `{0}` is already being scanned")]
    BucketBusy(String),
    #[error("no target bucket is configured")]
    NoTargetBucket,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Classification used when aggregating failed buckets.
    pub fn kind(&self) -> AccessErrorKind {
        match self {
            ScanError::Inaccessible { error, .. } | ScanError::Listing { error, .. } => error.kind,
            ScanError::Discovery(error) => error.kind,
            ScanError::Cancelled
            | ScanError::SweepInProgress
            | ScanError::BucketBusy(_)
            | ScanError::Catalog(_) => AccessErrorKind::Temporary,
            ScanError::NoTargetBucket => AccessErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
