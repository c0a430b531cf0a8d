//! src/services/catalog_service.rs
//!
//! Catalog store: the relational mirror of bucket contents, backed by SQLite.
//! Every write is a single independent statement scoped to one bucket id, so
//! concurrent scans of different buckets never contend on the same rows and
//! an interrupted scan leaves the catalog in a state the next pass repairs.

use crate::{
    models::{
        bucket::Bucket,
        catalog_entry::CatalogEntry,
        scan_job::{ScanJob, ScanStats, ScanStatus},
    },
    services::object_source::ObjectInfo,
    sync::classify::ClassifiedError,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Schema applied by [`run_migrations`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const BUCKET_COLUMNS: &str = "id, name, region, created_at, updated_at, marked_for_deletion, \
     last_accessible_at, access_error, access_error_kind";

const ENTRY_COLUMNS: &str = "id, bucket_id, key, size_bytes, last_modified, etag, \
     storage_class, is_folder, prefix, marked_for_deletion";

const JOB_COLUMNS: &str = "id, bucket_id, bucket_name, status, started_at, completed_at, \
     error_message, objects_scanned, objects_created, objects_updated, objects_deleted, \
     buckets_validated, buckets_marked_inaccessible, buckets_cleaned_up, \
     bucket_validation_errors";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("scan job `{0}` not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// What an upsert did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The row existed and its metadata changed.
    Updated,
    /// The row existed with identical metadata; only the stale mark was cleared.
    Unchanged,
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> CatalogResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Handle to the catalog database. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Catalog {
    pub db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Buckets
    // ------------------------------------------------------------------

    /// Explicitly register a bucket without touching its lifecycle marks.
    pub async fn register_bucket(&self, name: &str, region: &str) -> CatalogResult<Bucket> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at, updated_at,
                                  marked_for_deletion, last_accessible_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(region)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        self.bucket(name).await
    }

    pub async fn find_bucket(&self, name: &str) -> CatalogResult<Option<Bucket>> {
        let sql = format!("SELECT {} FROM buckets WHERE name = ?", BUCKET_COLUMNS);
        Ok(sqlx::query_as::<_, Bucket>(&sql)
            .bind(name)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Like [`find_bucket`](Self::find_bucket) but a missing row is an error.
    pub async fn bucket(&self, name: &str) -> CatalogResult<Bucket> {
        self.find_bucket(name)
            .await?
            .ok_or_else(|| CatalogError::BucketNotFound(name.to_string()))
    }

    pub async fn list_buckets(&self) -> CatalogResult<Vec<Bucket>> {
        let sql = format!("SELECT {} FROM buckets ORDER BY name ASC", BUCKET_COLUMNS);
        Ok(sqlx::query_as::<_, Bucket>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Buckets not currently quarantined.
    pub async fn list_accessible_buckets(&self) -> CatalogResult<Vec<Bucket>> {
        let sql = format!(
            "SELECT {} FROM buckets WHERE marked_for_deletion = 0 ORDER BY name ASC",
            BUCKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, Bucket>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Phase A of the bucket lifecycle sweep.
    pub async fn mark_all_buckets(&self) -> CatalogResult<u64> {
        let result = sqlx::query("UPDATE buckets SET marked_for_deletion = 1, updated_at = ?")
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Record a successful probe: create the bucket if needed, clear the
    /// stale mark and any access error, and stamp `last_accessible_at`.
    pub async fn mark_bucket_accessible(&self, name: &str, region: &str) -> CatalogResult<Bucket> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO buckets (id, name, region, created_at, updated_at,
                                  marked_for_deletion, last_accessible_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(name) DO UPDATE SET
                 marked_for_deletion = 0,
                 access_error = NULL,
                 access_error_kind = NULL,
                 last_accessible_at = excluded.last_accessible_at,
                 updated_at = excluded.updated_at
             RETURNING {}",
            BUCKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, Bucket>(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(region)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await?)
    }

    /// Persist a classified access failure. Returns false if the bucket is
    /// not in the catalog.
    pub async fn record_access_error(
        &self,
        name: &str,
        error: &ClassifiedError,
    ) -> CatalogResult<bool> {
        let result = sqlx::query(
            "UPDATE buckets SET access_error = ?, access_error_kind = ?, updated_at = ?
             WHERE name = ?",
        )
        .bind(&error.message)
        .bind(error.kind.as_str())
        .bind(Utc::now())
        .bind(name)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop the access error of a bucket that just scanned cleanly. A
    /// quarantined bucket keeps its error until a lifecycle probe unmarks it.
    pub async fn clear_access_error(&self, bucket_id: Uuid) -> CatalogResult<bool> {
        let result = sqlx::query(
            "UPDATE buckets SET access_error = NULL, access_error_kind = NULL, updated_at = ?
             WHERE id = ? AND marked_for_deletion = 0 AND access_error IS NOT NULL",
        )
        .bind(Utc::now())
        .bind(bucket_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn marked_buckets(&self) -> CatalogResult<Vec<Bucket>> {
        let sql = format!(
            "SELECT {} FROM buckets WHERE marked_for_deletion = 1 ORDER BY name ASC",
            BUCKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, Bucket>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Permanently delete a bucket with its catalog entries and scan jobs.
    /// Returns the number of catalog entries removed.
    pub async fn purge_bucket(&self, bucket_id: Uuid) -> CatalogResult<u64> {
        let mut tx = self.db.begin().await?;
        let entries = sqlx::query("DELETE FROM catalog_entries WHERE bucket_id = ?")
            .bind(bucket_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM scan_jobs WHERE bucket_id = ?")
            .bind(bucket_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Catalog entries
    // ------------------------------------------------------------------

    /// Create a synthesized folder row if missing. With `unmark`, an existing
    /// row also has its stale mark cleared.
    pub async fn upsert_folder(
        &self,
        bucket_id: Uuid,
        key: &str,
        prefix: &str,
        unmark: bool,
    ) -> CatalogResult<UpsertOutcome> {
        let inserted = sqlx::query(
            "INSERT INTO catalog_entries (id, bucket_id, key, size_bytes, is_folder, prefix,
                                          marked_for_deletion)
             VALUES (?, ?, ?, 0, 1, ?, 0)
             ON CONFLICT(bucket_id, key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket_id)
        .bind(key)
        .bind(prefix)
        .execute(&*self.db)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(UpsertOutcome::Created);
        }
        if unmark {
            self.unmark_entry(bucket_id, key).await?;
        }
        Ok(UpsertOutcome::Unchanged)
    }

    /// Create or refresh the row for a listed object and clear its stale mark.
    pub async fn upsert_object(
        &self,
        bucket_id: Uuid,
        object: &ObjectInfo,
        prefix: &str,
    ) -> CatalogResult<UpsertOutcome> {
        let is_folder = object.is_folder_marker();
        let size = if is_folder { 0 } else { object.size };

        let inserted = sqlx::query(
            "INSERT INTO catalog_entries (id, bucket_id, key, size_bytes, last_modified, etag,
                                          storage_class, is_folder, prefix, marked_for_deletion)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(bucket_id, key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket_id)
        .bind(&object.key)
        .bind(size)
        .bind(object.last_modified)
        .bind(&object.etag)
        .bind(&object.storage_class)
        .bind(is_folder)
        .bind(prefix)
        .execute(&*self.db)
        .await?;
        if inserted.rows_affected() > 0 {
            return Ok(UpsertOutcome::Created);
        }

        let updated = sqlx::query(
            "UPDATE catalog_entries
             SET size_bytes = ?, last_modified = ?, etag = ?, storage_class = ?,
                 is_folder = ?, marked_for_deletion = 0
             WHERE bucket_id = ? AND key = ?
               AND (size_bytes != ? OR last_modified IS NOT ? OR etag IS NOT ?
                    OR storage_class IS NOT ? OR is_folder != ?)",
        )
        .bind(size)
        .bind(object.last_modified)
        .bind(&object.etag)
        .bind(&object.storage_class)
        .bind(is_folder)
        .bind(bucket_id)
        .bind(&object.key)
        .bind(size)
        .bind(object.last_modified)
        .bind(&object.etag)
        .bind(&object.storage_class)
        .bind(is_folder)
        .execute(&*self.db)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        self.unmark_entry(bucket_id, &object.key).await?;
        Ok(UpsertOutcome::Unchanged)
    }

    async fn unmark_entry(&self, bucket_id: Uuid, key: &str) -> CatalogResult<()> {
        sqlx::query(
            "UPDATE catalog_entries SET marked_for_deletion = 0
             WHERE bucket_id = ? AND key = ? AND marked_for_deletion = 1",
        )
        .bind(bucket_id)
        .bind(key)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Mark every entry of the bucket stale.
    pub async fn mark_entries_stale(&self, bucket_id: Uuid) -> CatalogResult<u64> {
        let result =
            sqlx::query("UPDATE catalog_entries SET marked_for_deletion = 1 WHERE bucket_id = ?")
                .bind(bucket_id)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_stale_entries(&self, bucket_id: Uuid) -> CatalogResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM catalog_entries
             WHERE bucket_id = ? AND marked_for_deletion = 1",
        )
        .bind(bucket_id)
        .fetch_one(&*self.db)
        .await?)
    }

    /// Delete every entry of the bucket still marked stale.
    pub async fn delete_stale_entries(&self, bucket_id: Uuid) -> CatalogResult<u64> {
        let result = sqlx::query(
            "DELETE FROM catalog_entries WHERE bucket_id = ? AND marked_for_deletion = 1",
        )
        .bind(bucket_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_entries(&self, bucket_id: Uuid) -> CatalogResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM catalog_entries WHERE bucket_id = ?")
                .bind(bucket_id)
                .fetch_one(&*self.db)
                .await?,
        )
    }

    pub async fn find_entry(&self, bucket_id: Uuid, key: &str) -> CatalogResult<Option<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM catalog_entries WHERE bucket_id = ? AND key = ?",
            ENTRY_COLUMNS
        );
        Ok(sqlx::query_as::<_, CatalogEntry>(&sql)
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Direct children of `prefix`, folders first, then by key.
    pub async fn list_entries(
        &self,
        bucket_id: Uuid,
        prefix: &str,
    ) -> CatalogResult<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM catalog_entries WHERE bucket_id = ? AND prefix = ?
             ORDER BY is_folder DESC, key ASC",
            ENTRY_COLUMNS
        );
        Ok(sqlx::query_as::<_, CatalogEntry>(&sql)
            .bind(bucket_id)
            .bind(prefix)
            .fetch_all(&*self.db)
            .await?)
    }

    // ------------------------------------------------------------------
    // Scan jobs
    // ------------------------------------------------------------------

    /// Insert a job already in the running state.
    pub async fn insert_job(&self, bucket: Option<&Bucket>) -> CatalogResult<ScanJob> {
        let sql = format!(
            "INSERT INTO scan_jobs (id, bucket_id, bucket_name, status, started_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {}",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScanJob>(&sql)
            .bind(Uuid::new_v4())
            .bind(bucket.map(|b| b.id))
            .bind(bucket.map(|b| b.name.as_str()))
            .bind(ScanStatus::Running)
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await?)
    }

    /// Overwrite a running job's counters. Returns false once the job is terminal.
    pub async fn update_job_progress(&self, job_id: Uuid, stats: &ScanStats) -> CatalogResult<bool> {
        let result = sqlx::query(
            "UPDATE scan_jobs
             SET objects_scanned = ?, objects_created = ?, objects_updated = ?,
                 objects_deleted = ?, buckets_validated = ?, buckets_marked_inaccessible = ?,
                 buckets_cleaned_up = ?, bucket_validation_errors = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(stats.objects_scanned)
        .bind(stats.objects_created)
        .bind(stats.objects_updated)
        .bind(stats.objects_deleted)
        .bind(stats.buckets_validated)
        .bind(stats.buckets_marked_inaccessible)
        .bind(stats.buckets_cleaned_up)
        .bind(stats.bucket_validation_errors)
        .bind(job_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a running job to a terminal status. Returns false if the job was
    /// not running, so a job can only ever be finalized once.
    pub async fn finalize_job(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        stats: &ScanStats,
        error_message: Option<&str>,
    ) -> CatalogResult<bool> {
        let result = sqlx::query(
            "UPDATE scan_jobs
             SET status = ?, completed_at = ?, error_message = ?,
                 objects_scanned = ?, objects_created = ?, objects_updated = ?,
                 objects_deleted = ?, buckets_validated = ?, buckets_marked_inaccessible = ?,
                 buckets_cleaned_up = ?, bucket_validation_errors = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(error_message)
        .bind(stats.objects_scanned)
        .bind(stats.objects_created)
        .bind(stats.objects_updated)
        .bind(stats.objects_deleted)
        .bind(stats.buckets_validated)
        .bind(stats.buckets_marked_inaccessible)
        .bind(stats.buckets_cleaned_up)
        .bind(stats.bucket_validation_errors)
        .bind(job_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_job(&self, job_id: Uuid) -> CatalogResult<ScanJob> {
        let sql = format!("SELECT {} FROM scan_jobs WHERE id = ?", JOB_COLUMNS);
        sqlx::query_as::<_, ScanJob>(&sql)
            .bind(job_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(CatalogError::JobNotFound(job_id))
    }

    pub async fn latest_job_for_bucket(&self, bucket_id: Uuid) -> CatalogResult<Option<ScanJob>> {
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE bucket_id = ?
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScanJob>(&sql)
            .bind(bucket_id)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Fail every job a previous process left running.
    pub async fn fail_orphaned_jobs(&self, message: &str) -> CatalogResult<u64> {
        let result = sqlx::query(
            "UPDATE scan_jobs SET status = 'failed', completed_at = ?, error_message = ?
             WHERE status = 'running'",
        )
        .bind(Utc::now())
        .bind(message)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sync::classify::AccessErrorKind;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh migrated in-memory catalog. One connection so every query sees
    /// the same database.
    pub(crate) async fn test_catalog() -> Catalog {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Catalog::new(Arc::new(pool))
    }

    fn object(key: &str, size: i64, etag: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.into(),
            size,
            last_modified: None,
            etag: Some(etag.into()),
            storage_class: Some("STANDARD".into()),
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let catalog = test_catalog().await;
        run_migrations(&catalog.db).await.unwrap();
    }

    #[tokio::test]
    async fn upsert_object_reports_outcome() {
        let catalog = test_catalog().await;
        let bucket = catalog.register_bucket("demo", "local").await.unwrap();

        let obj = object("a.txt", 3, "e1");
        assert_eq!(
            catalog.upsert_object(bucket.id, &obj, "").await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            catalog.upsert_object(bucket.id, &obj, "").await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            catalog
                .upsert_object(bucket.id, &object("a.txt", 4, "e2"), "")
                .await
                .unwrap(),
            UpsertOutcome::Updated
        );

        let row = catalog.find_entry(bucket.id, "a.txt").await.unwrap().unwrap();
        assert_eq!(row.size_bytes, 4);
        assert_eq!(row.etag.as_deref(), Some("e2"));
        assert_eq!(catalog.count_entries(bucket.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_rows_survive_until_swept() {
        let catalog = test_catalog().await;
        let bucket = catalog.register_bucket("demo", "local").await.unwrap();
        catalog.upsert_object(bucket.id, &object("a", 1, "x"), "").await.unwrap();
        catalog.upsert_object(bucket.id, &object("b", 1, "y"), "").await.unwrap();

        assert_eq!(catalog.mark_entries_stale(bucket.id).await.unwrap(), 2);
        catalog.upsert_object(bucket.id, &object("a", 1, "x"), "").await.unwrap();

        assert_eq!(catalog.count_stale_entries(bucket.id).await.unwrap(), 1);
        assert_eq!(catalog.delete_stale_entries(bucket.id).await.unwrap(), 1);
        assert!(catalog.find_entry(bucket.id, "b").await.unwrap().is_none());
        assert!(catalog.find_entry(bucket.id, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn folder_upsert_is_create_or_ignore() {
        let catalog = test_catalog().await;
        let bucket = catalog.register_bucket("demo", "local").await.unwrap();

        assert_eq!(
            catalog.upsert_folder(bucket.id, "docs/", "", true).await.unwrap(),
            UpsertOutcome::Created
        );
        catalog.mark_entries_stale(bucket.id).await.unwrap();
        assert_eq!(
            catalog.upsert_folder(bucket.id, "docs/", "", false).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(catalog.count_stale_entries(bucket.id).await.unwrap(), 1);
        catalog.upsert_folder(bucket.id, "docs/", "", true).await.unwrap();
        assert_eq!(catalog.count_stale_entries(bucket.id).await.unwrap(), 0);

        let row = catalog.find_entry(bucket.id, "docs/").await.unwrap().unwrap();
        assert!(row.is_folder);
        assert_eq!(row.size_bytes, 0);
        assert!(row.etag.is_none());
    }

    #[tokio::test]
    async fn list_entries_puts_folders_first() {
        let catalog = test_catalog().await;
        let bucket = catalog.register_bucket("demo", "local").await.unwrap();
        catalog.upsert_object(bucket.id, &object("a.txt", 1, "x"), "").await.unwrap();
        catalog.upsert_folder(bucket.id, "z/", "", true).await.unwrap();
        catalog
            .upsert_object(bucket.id, &object("z/inner.txt", 1, "y"), "z/")
            .await
            .unwrap();

        let keys: Vec<_> = catalog
            .list_entries(bucket.id, "")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["z/", "a.txt"]);
    }

    #[tokio::test]
    async fn bucket_marks_and_errors() {
        let catalog = test_catalog().await;
        catalog.mark_bucket_accessible("demo", "local").await.unwrap();
        assert_eq!(catalog.mark_all_buckets().await.unwrap(), 1);

        let err = ClassifiedError::new(AccessErrorKind::AccessDenied, "forbidden");
        assert!(catalog.record_access_error("demo", &err).await.unwrap());
        assert!(!catalog.record_access_error("ghost", &err).await.unwrap());

        let marked = catalog.marked_buckets().await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].access_error_kind.as_deref(), Some("access_denied"));
        assert!(catalog.list_accessible_buckets().await.unwrap().is_empty());

        let bucket = catalog.mark_bucket_accessible("demo", "local").await.unwrap();
        assert!(!bucket.marked_for_deletion);
        assert!(bucket.access_error.is_none());
        assert_eq!(catalog.list_buckets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_bucket_entries_and_jobs() {
        let catalog = test_catalog().await;
        let bucket = catalog.register_bucket("demo", "local").await.unwrap();
        catalog.upsert_object(bucket.id, &object("a", 1, "x"), "").await.unwrap();
        catalog.insert_job(Some(&bucket)).await.unwrap();

        assert_eq!(catalog.purge_bucket(bucket.id).await.unwrap(), 1);
        assert!(catalog.find_bucket("demo").await.unwrap().is_none());
        assert!(catalog.latest_job_for_bucket(bucket.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jobs_finalize_once() {
        let catalog = test_catalog().await;
        let job = catalog.insert_job(None).await.unwrap();
        assert_eq!(job.status, ScanStatus::Running);
        assert!(job.bucket_id.is_none());

        let stats = ScanStats {
            objects_scanned: 7,
            ..Default::default()
        };
        assert!(catalog.update_job_progress(job.id, &stats).await.unwrap());
        assert!(catalog
            .finalize_job(job.id, ScanStatus::Completed, &stats, None)
            .await
            .unwrap());
        assert!(!catalog
            .finalize_job(job.id, ScanStatus::Failed, &stats, Some("late"))
            .await
            .unwrap());
        assert!(!catalog.update_job_progress(job.id, &stats).await.unwrap());

        let stored = catalog.find_job(job.id).await.unwrap();
        assert_eq!(stored.status, ScanStatus::Completed);
        assert_eq!(stored.stats.objects_scanned, 7);
        assert!(stored.error_message.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn orphaned_jobs_are_failed() {
        let catalog = test_catalog().await;
        let job = catalog.insert_job(None).await.unwrap();
        assert_eq!(catalog.fail_orphaned_jobs("interrupted").await.unwrap(), 1);
        let stored = catalog.find_job(job.id).await.unwrap();
        assert_eq!(stored.status, ScanStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn missing_rows_map_to_not_found_variants() {
        let catalog = test_catalog().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            catalog.find_job(id).await,
            Err(CatalogError::JobNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            catalog.bucket("ghost").await,
            Err(CatalogError::BucketNotFound(name)) if name == "ghost"
        ));
        assert!(catalog.find_bucket("ghost").await.unwrap().is_none());
    }
}
