//! Row types for the catalog database.
//!
//! These entities mirror what the reconciliation engine learns about the
//! object store. They map to tables via `sqlx::FromRow` and serialize as
//! JSON via `serde` for the status surface.

pub mod bucket;
pub mod catalog_entry;
pub mod scan_job;
