//! Object-granularity mark-and-sweep for a single bucket.
//!
//! ```text
//! Idle -> MarkingStale -> Listing -> Reconciled -> Sweeping -> Done
//!   \_______________________ Failed _______________________/
//! ```
//!
//! `MarkingStale` and `Sweeping` only run with deletion sync enabled;
//! without it the catalog is append/update only. Each phase completes before
//! the next begins. Writes are independent per-object statements, so a scan
//! cut short leaves rows that the next pass's mark/sweep pair resolves.

use super::{
    ScanError, ScanResult,
    classify::ClassifiedError,
    jobs::{JobProgress, ScanJobTracker},
};
use crate::{
    models::{bucket::Bucket, scan_job::ScanStats},
    services::{
        catalog_service::{Catalog, CatalogResult, UpsertOutcome},
        object_source::{self, ObjectInfo, ObjectSource},
    },
};
use futures::{StreamExt, pin_mut};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Idle,
    MarkingStale,
    Listing,
    Reconciled,
    Sweeping,
    Done,
    Failed,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcilePhase::Idle => "idle",
            ReconcilePhase::MarkingStale => "marking_stale",
            ReconcilePhase::Listing => "listing",
            ReconcilePhase::Reconciled => "reconciled",
            ReconcilePhase::Sweeping => "sweeping",
            ReconcilePhase::Done => "done",
            ReconcilePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub deletion_sync: bool,
    pub page_size: usize,
    pub checkpoint_interval: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            deletion_sync: true,
            page_size: 1000,
            checkpoint_interval: 100,
        }
    }
}

pub struct ObjectReconciler {
    catalog: Catalog,
    source: Arc<dyn ObjectSource>,
    jobs: ScanJobTracker,
    settings: ReconcileSettings,
}

/// State carried through one bucket pass.
struct Pass<'a> {
    bucket: &'a Bucket,
    progress: JobProgress,
    phase: ReconcilePhase,
}

impl Pass<'_> {
    fn enter(&mut self, phase: ReconcilePhase) {
        debug!(bucket = %self.bucket.name, job_id = %self.progress.job_id, %phase, "reconcile phase");
        self.phase = phase;
    }
}

impl ObjectReconciler {
    pub fn new(
        catalog: Catalog,
        source: Arc<dyn ObjectSource>,
        jobs: ScanJobTracker,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            catalog,
            source,
            jobs,
            settings,
        }
    }

    /// Bring the catalog rows of `bucket` into agreement with its listing.
    ///
    /// A scan job is created up front and finalized exactly once whatever
    /// happens: completion, a fatal listing error, a catalog error, or
    /// cancellation (which aborts at the next suspension point).
    pub async fn reconcile(
        &self,
        bucket: &Bucket,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanStats> {
        let job = self.jobs.start(Some(bucket)).await?;
        let mut pass = Pass {
            bucket,
            progress: JobProgress::new(job.id, self.settings.checkpoint_interval),
            phase: ReconcilePhase::Idle,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            outcome = self.run_phases(&mut pass) => outcome,
        };

        if let Err(err) = &outcome {
            warn!(
                bucket = %bucket.name,
                job_id = %job.id,
                phase = %pass.phase,
                "bucket scan failed: {}",
                err
            );
            pass.enter(ReconcilePhase::Failed);
        }
        self.jobs.finish(&pass.progress, &outcome).await?;
        outcome?;

        let stats = pass.progress.stats;
        info!(
            bucket = %bucket.name,
            job_id = %job.id,
            scanned = stats.objects_scanned,
            created = stats.objects_created,
            updated = stats.objects_updated,
            deleted = stats.objects_deleted,
            "bucket scan completed"
        );
        Ok(stats)
    }

    async fn run_phases(&self, pass: &mut Pass<'_>) -> ScanResult<()> {
        let bucket_id = pass.bucket.id;

        if self.settings.deletion_sync {
            pass.enter(ReconcilePhase::MarkingStale);
            let marked = self.catalog.mark_entries_stale(bucket_id).await?;
            debug!(bucket = %pass.bucket.name, marked, "marked catalog entries stale");
        }

        pass.enter(ReconcilePhase::Listing);
        self.list_and_apply(pass).await?;
        pass.enter(ReconcilePhase::Reconciled);

        if self.settings.deletion_sync {
            pass.enter(ReconcilePhase::Sweeping);
            pass.progress.stats.objects_deleted = self.sweep(pass.bucket).await;
        }

        pass.enter(ReconcilePhase::Done);
        Ok(())
    }

    async fn list_and_apply(&self, pass: &mut Pass<'_>) -> ScanResult<()> {
        let bucket = pass.bucket;
        let pages = object_source::pages(
            self.source.as_ref(),
            &bucket.name,
            None,
            self.settings.page_size,
        );
        pin_mut!(pages);

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| ScanError::Listing {
                bucket: bucket.name.clone(),
                error: ClassifiedError::from(&err),
            })?;

            for object in &page {
                pass.progress.stats.objects_scanned += 1;
                if let Err(err) = self
                    .apply_object(bucket.id, object, &mut pass.progress.stats)
                    .await
                {
                    warn!(bucket = %bucket.name, key = %object.key, "skipping object: {}", err);
                }
                self.jobs.checkpoint(&mut pass.progress).await;
            }
        }
        Ok(())
    }

    /// Upsert the folder chain above `object`, then the object itself.
    async fn apply_object(
        &self,
        bucket_id: Uuid,
        object: &ObjectInfo,
        stats: &mut ScanStats,
    ) -> CatalogResult<()> {
        for (folder, parent) in ancestor_folders(&object.key) {
            let outcome = self
                .catalog
                .upsert_folder(bucket_id, folder, parent, self.settings.deletion_sync)
                .await?;
            count(outcome, stats);
        }

        let outcome = self
            .catalog
            .upsert_object(bucket_id, object, parent_prefix(&object.key))
            .await?;
        count(outcome, stats);
        Ok(())
    }

    /// Delete whatever is still stale. Best effort: a failure here reports
    /// zero deletions and the next pass retries.
    async fn sweep(&self, bucket: &Bucket) -> i64 {
        let stale = match self.catalog.count_stale_entries(bucket.id).await {
            Ok(stale) => stale,
            Err(err) => {
                warn!(bucket = %bucket.name, "counting stale entries failed: {}", err);
                return 0;
            }
        };
        if stale == 0 {
            return 0;
        }

        match self.catalog.delete_stale_entries(bucket.id).await {
            Ok(removed) => {
                debug!(bucket = %bucket.name, stale, removed, "swept stale entries");
                stale
            }
            Err(err) => {
                warn!(
                    bucket = %bucket.name,
                    stale,
                    "deleting stale entries failed, leaving them for the next run: {}",
                    err
                );
                0
            }
        }
    }
}

fn count(outcome: UpsertOutcome, stats: &mut ScanStats) {
    match outcome {
        UpsertOutcome::Created => stats.objects_created += 1,
        UpsertOutcome::Updated => stats.objects_updated += 1,
        UpsertOutcome::Unchanged => {}
    }
}

/// Folder keys implied by `key`, outermost first, each paired with its own
/// parent prefix: `a/b/c.txt` yields `("a/", "")` and `("a/b/", "a/")`.
/// A folder key such as `a/b/` yields only its ancestors.
pub fn ancestor_folders(key: &str) -> Vec<(&str, &str)> {
    let body = key.strip_suffix('/').unwrap_or(key);
    let mut folders = Vec::new();
    let mut parent = "";
    for (idx, _) in body.match_indices('/') {
        let folder = &key[..=idx];
        folders.push((folder, parent));
        parent = folder;
    }
    folders
}

/// Key of the folder directly containing `key` (`""` at the top level).
pub fn parent_prefix(key: &str) -> &str {
    let body = key.strip_suffix('/').unwrap_or(key);
    match body.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}
