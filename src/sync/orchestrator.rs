//! Top-level scan coordinator.
//!
//! A full sweep runs discovery, then (when enabled and due) the bucket
//! lifecycle sweep, then reconciles each bucket in turn. Buckets are
//! processed sequentially; a failing bucket is logged and classified and the
//! sweep moves on. When a target bucket is pinned by configuration, discovery
//! and lifecycle tracking are bypassed and only that bucket is scanned.

use super::{
    ScanError, ScanResult,
    classify::{AccessErrorKind, ClassifiedError},
    jobs::{JobProgress, ScanJobTracker},
    lifecycle::BucketLifecycleTracker,
    reconciler::{ObjectReconciler, ReconcileSettings},
    validator::{BucketValidator, Validation},
};
use crate::{
    config::SyncSettings,
    models::scan_job::ScanStats,
    services::{catalog_service::Catalog, object_source::ObjectSource},
};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex},
};
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// A bucket that could not be scanned during a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct BucketFailure {
    pub bucket: String,
    pub kind: AccessErrorKind,
    pub message: String,
}

/// Aggregated result of a full sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    /// Aggregate scan job, absent when a pinned bucket was scanned instead.
    pub job_id: Option<Uuid>,
    pub buckets_discovered: usize,
    pub buckets_scanned: usize,
    pub buckets_failed_permanent: usize,
    pub buckets_failed_temporary: usize,
    pub failures: Vec<BucketFailure>,
    /// Object totals over successful buckets plus lifecycle counters.
    pub stats: ScanStats,
}

impl SweepSummary {
    fn record_success(&mut self, stats: &ScanStats) {
        self.buckets_scanned += 1;
        self.stats.absorb(stats);
    }

    fn record_failure(&mut self, bucket: &str, kind: AccessErrorKind, message: String) {
        if kind.is_permanent() {
            self.buckets_failed_permanent += 1;
        } else {
            self.buckets_failed_temporary += 1;
        }
        self.failures.push(BucketFailure {
            bucket: bucket.to_string(),
            kind,
            message,
        });
    }
}

/// Removes a bucket from the in-flight set when the scan ends, however it ends.
struct BucketLease<'a> {
    active: &'a StdMutex<HashSet<String>>,
    bucket: String,
}

impl Drop for BucketLease<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.bucket);
        }
    }
}

pub struct ScanOrchestrator {
    catalog: Catalog,
    source: Arc<dyn ObjectSource>,
    validator: Arc<BucketValidator>,
    lifecycle: BucketLifecycleTracker,
    reconciler: ObjectReconciler,
    jobs: ScanJobTracker,
    settings: SyncSettings,
    sweep_lock: Mutex<()>,
    active_buckets: StdMutex<HashSet<String>>,
    last_lifecycle_sweep: StdMutex<Option<Instant>>,
}

impl ScanOrchestrator {
    pub fn new(catalog: Catalog, source: Arc<dyn ObjectSource>, settings: SyncSettings) -> Self {
        let validator = Arc::new(BucketValidator::new(
            source.clone(),
            settings.skip_bucket_validation,
            settings.max_retries,
            settings.retry_delay,
        ));
        let jobs = ScanJobTracker::new(catalog.clone());
        let lifecycle = BucketLifecycleTracker::new(
            catalog.clone(),
            validator.clone(),
            settings.region.clone(),
            settings.delete_threshold,
        );
        let reconciler = ObjectReconciler::new(
            catalog.clone(),
            source.clone(),
            jobs.clone(),
            ReconcileSettings {
                deletion_sync: settings.enable_deletion_sync,
                page_size: settings.page_size,
                checkpoint_interval: settings.checkpoint_interval,
            },
        );

        Self {
            catalog,
            source,
            validator,
            lifecycle,
            reconciler,
            jobs,
            settings,
            sweep_lock: Mutex::new(()),
            active_buckets: StdMutex::new(HashSet::new()),
            last_lifecycle_sweep: StdMutex::new(None),
        }
    }

    /// True while a full sweep holds the single-flight lock.
    pub fn sweep_running(&self) -> bool {
        self.sweep_lock.try_lock().is_err()
    }

    /// Validate and reconcile one named bucket.
    pub async fn scan_bucket(&self, name: &str, cancel: &CancellationToken) -> ScanResult<ScanStats> {
        let validation = self.validator.validate(name, cancel).await?;
        self.scan_validated(name, &validation, cancel).await
    }

    /// Scan the bucket pinned by configuration.
    pub async fn scan_configured_bucket(&self, cancel: &CancellationToken) -> ScanResult<ScanStats> {
        let target = self
            .settings
            .target_bucket
            .clone()
            .ok_or(ScanError::NoTargetBucket)?;
        self.scan_bucket(&target, cancel).await
    }

    /// Run one full sweep. Only one sweep may run at a time; an overlapping
    /// call returns [`ScanError::SweepInProgress`] without doing anything.
    pub async fn run_full_sweep(&self, cancel: &CancellationToken) -> ScanResult<SweepSummary> {
        let _guard = self
            .sweep_lock
            .try_lock()
            .map_err(|_| ScanError::SweepInProgress)?;

        if let Some(target) = self.settings.target_bucket.clone() {
            info!(bucket = %target, "target bucket pinned, skipping discovery");
            let mut summary = SweepSummary {
                buckets_discovered: 1,
                ..Default::default()
            };
            self.scan_into_summary(&target, None, &mut summary, cancel)
                .await?;
            return Ok(summary);
        }

        let job = self.jobs.start(None).await?;
        let mut progress = JobProgress::new(job.id, self.settings.checkpoint_interval);
        let mut summary = SweepSummary {
            job_id: Some(job.id),
            ..Default::default()
        };

        let outcome = self.sweep_buckets(&mut summary, cancel).await;
        progress.stats = summary.stats;
        self.jobs.finish(&progress, &outcome).await?;
        outcome?;

        info!(
            job_id = %job.id,
            discovered = summary.buckets_discovered,
            scanned = summary.buckets_scanned,
            failed_permanent = summary.buckets_failed_permanent,
            failed_temporary = summary.buckets_failed_temporary,
            created = summary.stats.objects_created,
            updated = summary.stats.objects_updated,
            deleted = summary.stats.objects_deleted,
            "full sweep finished"
        );
        Ok(summary)
    }

    async fn sweep_buckets(
        &self,
        summary: &mut SweepSummary,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let discovered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            listed = self.source.list_buckets() => {
                listed.map_err(|err| ScanError::Discovery(ClassifiedError::from(&err)))?
            }
        };
        summary.buckets_discovered = discovered.len();
        info!(buckets = discovered.len(), "discovered buckets");

        let mut validations = HashMap::new();
        if self.lifecycle_due() {
            let report = self.lifecycle.sweep(&discovered, cancel).await?;
            summary.stats.absorb(&report.stats);
            if !report.purged.is_empty() {
                info!(purged = ?report.purged, "purged inaccessible buckets");
            }
            validations = report.validations;
            if let Ok(mut last) = self.last_lifecycle_sweep.lock() {
                *last = Some(Instant::now());
            }
        }

        // The bucket in flight finalizes its own job on cancellation, so the
        // token is only checked between buckets.
        for name in &discovered {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            self.scan_into_summary(name, validations.remove(name), summary, cancel)
                .await?;
        }
        Ok(())
    }

    /// Scan one bucket and fold the result into `summary`. Only cancellation
    /// and catalog failures escape; everything else is recorded per bucket.
    async fn scan_into_summary(
        &self,
        name: &str,
        validation: Option<Validation>,
        summary: &mut SweepSummary,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let result = match validation {
            Some(validation) => self.scan_validated(name, &validation, cancel).await,
            None => self.scan_bucket(name, cancel).await,
        };

        match result {
            Ok(stats) => summary.record_success(&stats),
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(err) => {
                let kind = err.kind();
                warn!(bucket = name, %kind, "bucket scan failed, continuing: {}", err);
                summary.record_failure(name, kind, err.to_string());
            }
        }
        Ok(())
    }

    async fn scan_validated(
        &self,
        name: &str,
        validation: &Validation,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanStats> {
        let _lease = self.lease(name)?;

        if let Some(error) = &validation.error {
            let err = ScanError::Inaccessible {
                bucket: name.to_string(),
                error: error.clone(),
            };
            if let Some(bucket) = self.catalog.find_bucket(name).await? {
                if error.kind.is_permanent() {
                    self.catalog.record_access_error(name, error).await?;
                }
                self.jobs.record_failure(&bucket, &err).await?;
            }
            return Err(err);
        }

        let bucket = self
            .catalog
            .register_bucket(name, &self.settings.region)
            .await?;
        let stats = self.reconciler.reconcile(&bucket, cancel).await?;
        if bucket.access_error.is_some() && self.catalog.clear_access_error(bucket.id).await? {
            info!(bucket = name, "cleared stale access error after successful scan");
        }
        Ok(stats)
    }

    fn lease(&self, bucket: &str) -> ScanResult<BucketLease<'_>> {
        let mut active = self
            .active_buckets
            .lock()
            .map_err(|_| ScanError::BucketBusy(bucket.to_string()))?;
        if !active.insert(bucket.to_string()) {
            return Err(ScanError::BucketBusy(bucket.to_string()));
        }
        Ok(BucketLease {
            active: &self.active_buckets,
            bucket: bucket.to_string(),
        })
    }

    fn lifecycle_due(&self) -> bool {
        if !self.settings.enable_bucket_sync {
            return false;
        }
        match self.last_lifecycle_sweep.lock() {
            Ok(last) => last.is_none_or(|at| at.elapsed() >= self.settings.sync_threshold),
            Err(_) => true,
        }
    }
}
