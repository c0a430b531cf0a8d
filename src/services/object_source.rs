//! src/services/object_source.rs
//!
//! The seam between the reconciliation engine and the object store being
//! mirrored. The engine only needs three calls: enumerate buckets, probe one
//! bucket, and list a bucket's keys one page at a time. Failures carry the
//! raw facts (status, provider code, message) and are classified elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Metadata for one key returned by a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

impl ObjectInfo {
    /// Keys ending in `/` are explicit folder markers.
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// One page of a flat key listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, `None` once the listing is exhausted.
    pub next_continuation: Option<String>,
}

/// A failed call against the object store.
///
/// Adapters fill in whatever they know: an HTTP-like status, a provider
/// error code such as `NoSuchBucket`, and the message text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SourceError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Read access to an object store.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Enumerate every bucket visible to the configured credentials.
    async fn list_buckets(&self) -> SourceResult<Vec<String>>;

    /// Lightweight existence/permission check for one bucket.
    async fn probe_bucket(&self, bucket: &str) -> SourceResult<()>;

    /// List up to `max_keys` keys after `continuation`, in key order.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> SourceResult<ListPage>;
}

/// Lazily page through a bucket listing.
///
/// Each item is one page; only that page is held in memory. The stream ends
/// after the page without a continuation token and can be restarted simply
/// by calling `pages` again.
pub fn pages<'a>(
    source: &'a dyn ObjectSource,
    bucket: &'a str,
    prefix: Option<&'a str>,
    page_size: usize,
) -> impl Stream<Item = SourceResult<Vec<ObjectInfo>>> + Send + 'a {
    enum Cursor {
        Start,
        After(String),
        Exhausted,
    }

    futures::stream::try_unfold(Cursor::Start, move |cursor| async move {
        let token = match cursor {
            Cursor::Exhausted => return Ok(None),
            Cursor::Start => None,
            Cursor::After(token) => Some(token),
        };
        let page = source
            .list_page(bucket, prefix, token.as_deref(), page_size)
            .await?;
        let next = match page.next_continuation {
            Some(token) => Cursor::After(token),
            None => Cursor::Exhausted,
        };
        Ok(Some((page.objects, next)))
    })
}

/// Filesystem-backed object source.
///
/// Every immediate subdirectory of `root` is a bucket; every regular file
/// below it is an object whose key is its `/`-joined relative path. Empty
/// directories are reported as explicit folder markers.
#[derive(Clone, Debug)]
pub struct LocalObjectSource {
    root: PathBuf,
}

impl LocalObjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_root(&self, bucket: &str) -> SourceResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
            return Err(SourceError::new(format!("invalid bucket name `{}`", bucket))
                .with_status(400)
                .with_code("InvalidBucketName"));
        }
        Ok(self.root.join(bucket))
    }

    /// Collect up to `limit` keys that sort after `after` and match
    /// `prefix`, in key order.
    ///
    /// Directories are walked depth first with siblings sorted by key, which
    /// yields keys in global order. Subtrees that sort entirely at or before
    /// `after`, or outside `prefix`, are never opened, and the walk stops as
    /// soon as `limit` keys are found.
    async fn collect_page(
        &self,
        bucket_root: &Path,
        prefix: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> io::Result<Vec<ObjectInfo>> {
        let mut found = Vec::new();
        let mut stack = vec![sorted_children(bucket_root, "").await?];

        while found.len() < limit {
            let Some(level) = stack.last_mut() else {
                break;
            };
            let Some(child) = level.pop() else {
                stack.pop();
                continue;
            };

            if child.is_dir {
                if !subtree_selected(&child.key, prefix, after) {
                    continue;
                }
                let children = sorted_children(&child.path, &child.key).await?;
                if !children.is_empty() {
                    stack.push(children);
                } else if key_selected(&child.key, prefix, after) {
                    found.push(ObjectInfo {
                        key: child.key,
                        size: 0,
                        last_modified: None,
                        etag: None,
                        storage_class: None,
                    });
                }
            } else if key_selected(&child.key, prefix, after) {
                let meta = fs::metadata(&child.path).await?;
                found.push(file_info(child.key, &meta));
            }
        }
        Ok(found)
    }
}

/// A directory entry with the key it maps to (`name/` for directories).
struct Child {
    key: String,
    path: PathBuf,
    is_dir: bool,
}

/// Entries of `dir` sorted by key in descending order, so popping yields the
/// smallest key first.
async fn sorted_children(dir: &Path, dir_key: &str) -> io::Result<Vec<Child>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!("skipping non UTF-8 entry under {}", dir.display());
            continue;
        };
        if name.starts_with(".tmp-") {
            continue;
        }
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            children.push(Child {
                key: format!("{}{}/", dir_key, name),
                path: entry.path(),
                is_dir: true,
            });
        } else if file_type.is_file() {
            children.push(Child {
                key: format!("{}{}", dir_key, name),
                path: entry.path(),
                is_dir: false,
            });
        }
    }
    children.sort_by(|a, b| b.key.cmp(&a.key));
    Ok(children)
}

#[async_trait]
impl ObjectSource for LocalObjectSource {
    async fn list_buckets(&self) -> SourceResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| io_error(err, "object store root"))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_error(err, "object store root"))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn probe_bucket(&self, bucket: &str) -> SourceResult<()> {
        let path = self.bucket_root(bucket)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| io_error(err, bucket))?;
        if !meta.is_dir() {
            return Err(SourceError::new(format!("bucket `{}` does not exist", bucket))
                .with_status(404)
                .with_code("NoSuchBucket"));
        }
        // Opening the directory catches permission problems metadata() misses.
        fs::read_dir(&path)
            .await
            .map_err(|err| io_error(err, bucket))?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> SourceResult<ListPage> {
        let path = self.bucket_root(bucket)?;
        let max_keys = max_keys.max(1);
        let mut objects = self
            .collect_page(&path, prefix, continuation, max_keys + 1)
            .await
            .map_err(|err| io_error(err, bucket))?;

        let next_continuation = if objects.len() > max_keys {
            objects.truncate(max_keys);
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }
}

fn key_selected(key: &str, prefix: Option<&str>, after: Option<&str>) -> bool {
    prefix.is_none_or(|p| key.starts_with(p)) && after.is_none_or(|a| key > a)
}

/// Whether any key under the folder `dir_key` (itself included) can match
/// `prefix` and sort after `after`.
fn subtree_selected(dir_key: &str, prefix: Option<&str>, after: Option<&str>) -> bool {
    prefix.is_none_or(|p| dir_key.starts_with(p) || p.starts_with(dir_key))
        && after.is_none_or(|a| a.starts_with(dir_key) || dir_key > a)
}

fn file_info(key: String, meta: &std::fs::Metadata) -> ObjectInfo {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
    let last_modified = modified.and_then(|d| {
        DateTime::<Utc>::from_timestamp(d.as_secs() as i64, d.subsec_nanos())
    });
    let etag = format!(
        "{:x}-{:x}",
        meta.len(),
        modified.map(|d| d.as_nanos()).unwrap_or_default()
    );
    ObjectInfo {
        key,
        size: meta.len() as i64,
        last_modified,
        etag: Some(etag),
        storage_class: Some("STANDARD".into()),
    }
}

/// Translate an I/O failure into the facts a remote store would report.
fn io_error(err: io::Error, subject: &str) -> SourceError {
    let message = format!("{}: {}", subject, err);
    match err.kind() {
        ErrorKind::NotFound => SourceError::new(message)
            .with_status(404)
            .with_code("NoSuchBucket"),
        ErrorKind::PermissionDenied => SourceError::new(message)
            .with_status(403)
            .with_code("AccessDenied"),
        _ => SourceError::new(message),
    }
}
