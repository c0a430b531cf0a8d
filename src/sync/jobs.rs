//! Scan job bookkeeping.
//!
//! A job is inserted as `running` when a scan starts, checkpointed while it
//! runs, and finalized exactly once as `completed` or `failed`. Counters live
//! in a [`JobProgress`] owned by the run that created the job, so concurrent
//! scans never share mutable counters.

use super::{ScanError, ScanResult};
use crate::{
    models::{
        bucket::Bucket,
        scan_job::{ScanJob, ScanStats, ScanStatus},
    },
    services::catalog_service::{Catalog, CatalogResult},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Counters for one in-flight scan plus its checkpoint cadence.
#[derive(Debug)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub stats: ScanStats,
    checkpoint_every: i64,
    last_checkpoint: i64,
}

impl JobProgress {
    pub fn new(job_id: Uuid, checkpoint_every: usize) -> Self {
        Self {
            job_id,
            stats: ScanStats::default(),
            checkpoint_every: checkpoint_every.max(1) as i64,
            last_checkpoint: 0,
        }
    }

    /// True once another `checkpoint_every` objects have been scanned.
    pub fn checkpoint_due(&self) -> bool {
        self.stats.objects_scanned - self.last_checkpoint >= self.checkpoint_every
    }
}

#[derive(Clone)]
pub struct ScanJobTracker {
    catalog: Catalog,
}

impl ScanJobTracker {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Create a running job. `None` starts an aggregate sweep job.
    pub async fn start(&self, bucket: Option<&Bucket>) -> CatalogResult<ScanJob> {
        let job = self.catalog.insert_job(bucket).await?;
        debug!(job_id = %job.id, bucket = ?job.bucket_name, "scan job started");
        Ok(job)
    }

    /// Persist the current counters if a checkpoint is due. Failures are
    /// logged; the scan itself carries on.
    pub async fn checkpoint(&self, progress: &mut JobProgress) {
        if !progress.checkpoint_due() {
            return;
        }
        match self
            .catalog
            .update_job_progress(progress.job_id, &progress.stats)
            .await
        {
            Ok(true) => {
                progress.last_checkpoint = progress.stats.objects_scanned;
                debug!(
                    job_id = %progress.job_id,
                    scanned = progress.stats.objects_scanned,
                    "scan checkpoint"
                );
            }
            Ok(false) => warn!(job_id = %progress.job_id, "checkpoint on a job that is no longer running"),
            Err(err) => warn!(job_id = %progress.job_id, "failed to persist checkpoint: {}", err),
        }
    }

    /// Finalize the job from the scan outcome: `completed` on success,
    /// `failed` with the error text otherwise.
    pub async fn finish(&self, progress: &JobProgress, outcome: &ScanResult<()>) -> CatalogResult<()> {
        let (status, message) = match outcome {
            Ok(()) => (ScanStatus::Completed, None),
            Err(err) => (ScanStatus::Failed, Some(err.to_string())),
        };
        let finalized = self
            .catalog
            .finalize_job(progress.job_id, status, &progress.stats, message.as_deref())
            .await?;
        if finalized {
            debug!(job_id = %progress.job_id, %status, "scan job finalized");
        } else {
            warn!(job_id = %progress.job_id, "scan job was already finalized");
        }
        Ok(())
    }

    /// Record a scan that failed before any work started.
    pub async fn record_failure(&self, bucket: &Bucket, err: &ScanError) -> CatalogResult<ScanJob> {
        let job = self.start(Some(bucket)).await?;
        let progress = JobProgress::new(job.id, 1);
        self.catalog
            .finalize_job(job.id, ScanStatus::Failed, &progress.stats, Some(&err.to_string()))
            .await?;
        self.catalog.find_job(job.id).await
    }
}
