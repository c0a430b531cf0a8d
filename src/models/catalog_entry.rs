//! Represents a single object or folder mirrored from a bucket listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the catalog: either an object seen in the listing or a folder
/// synthesized from the ancestor segments of an object key.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct CatalogEntry {
    pub id: Uuid,

    /// Owning bucket.
    pub bucket_id: Uuid,

    /// Full object key. Folder keys end with `/`.
    pub key: String,

    /// Size in bytes (always 0 for folders).
    pub size_bytes: i64,

    pub last_modified: Option<DateTime<Utc>>,

    pub etag: Option<String>,

    pub storage_class: Option<String>,

    pub is_folder: bool,

    /// Key of the parent folder (`""` for top-level entries).
    pub prefix: String,

    /// Set during a reconciliation pass until the entry is observed again.
    pub marked_for_deletion: bool,
}
