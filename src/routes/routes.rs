//! Routes of the catalog status surface.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Catalog reads**
//!   - `GET  /buckets?accessible=`: buckets with their derived status
//!   - `GET  /buckets/{bucket}`: bucket, status, entry count and latest job
//!   - `GET  /buckets/{bucket}/entries?prefix=`: direct children of a folder
//!   - `GET  /buckets/{bucket}/objects/{*key}`: one entry by key
//!
//! - **Scan triggers**
//!   - `POST /scan`: start a full sweep (409 while one is running)
//!   - `POST /buckets/{bucket}/scan`: scan one bucket now

use crate::handlers::{
    AppState,
    catalog_handlers::{
        get_bucket, get_entry, list_buckets, list_entries, scan_bucket, trigger_sweep,
    },
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    routing::{get, post},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/scan", post(trigger_sweep))
        .route("/buckets", get(list_buckets))
        .route("/buckets/{bucket}", get(get_bucket))
        .route("/buckets/{bucket}/entries", get(list_entries))
        .route("/buckets/{bucket}/objects/{*key}", get(get_entry))
        .route("/buckets/{bucket}/scan", post(scan_bucket))
}
