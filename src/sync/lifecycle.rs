//! Bucket-granularity mark-and-sweep.
//!
//! Phase A marks every known bucket stale. Phase B probes each discovered
//! bucket: a success unmarks it, a failure leaves it marked, and a permanent
//! failure is also recorded on the row. Phase C purges buckets that failed
//! permanently in this sweep and whose last successful access is older than
//! the delete threshold. One bad probe therefore never deletes anything;
//! only sustained permanent inaccessibility does.

use super::{
    ScanResult,
    classify::{AccessErrorKind, ClassifiedError},
    validator::{BucketValidator, Validation},
};
use crate::{models::scan_job::ScanStats, services::catalog_service::Catalog};
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one lifecycle sweep.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    /// Only the `buckets_*` / `bucket_validation_errors` counters are used.
    pub stats: ScanStats,
    /// Validation result for every discovered bucket, by name.
    pub validations: HashMap<String, Validation>,
    /// Names of buckets purged in Phase C.
    pub purged: Vec<String>,
}

pub struct BucketLifecycleTracker {
    catalog: Catalog,
    validator: Arc<BucketValidator>,
    region: String,
    delete_threshold: Duration,
}

impl BucketLifecycleTracker {
    pub fn new(
        catalog: Catalog,
        validator: Arc<BucketValidator>,
        region: impl Into<String>,
        delete_threshold: Duration,
    ) -> Self {
        Self {
            catalog,
            validator,
            region: region.into(),
            delete_threshold,
        }
    }

    pub async fn sweep(
        &self,
        discovered: &[String],
        cancel: &CancellationToken,
    ) -> ScanResult<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let mut permanent = HashSet::new();

        let marked = self.catalog.mark_all_buckets().await?;
        debug!(marked, "lifecycle phase A: marked known buckets");

        for name in discovered {
            let validation = self.validator.validate(name, cancel).await?;
            if self
                .apply_validation(name, &validation, &mut report.stats)
                .await?
            {
                permanent.insert(name.clone());
            }
            report.validations.insert(name.clone(), validation);
        }

        // Known buckets the store no longer lists are gone as far as we can tell.
        for bucket in self.catalog.marked_buckets().await? {
            if report.validations.contains_key(&bucket.name) {
                continue;
            }
            let error = ClassifiedError::new(
                AccessErrorKind::NotFound,
                format!("bucket `{}` is no longer listed by the object store", bucket.name),
            );
            self.catalog.record_access_error(&bucket.name, &error).await?;
            report.stats.buckets_marked_inaccessible += 1;
            debug!(bucket = %bucket.name, "known bucket missing from discovery");
            permanent.insert(bucket.name);
        }

        report.purged = self.purge_expired(&permanent).await?;
        report.stats.buckets_cleaned_up = report.purged.len() as i64;

        info!(
            validated = report.stats.buckets_validated,
            inaccessible = report.stats.buckets_marked_inaccessible,
            errors = report.stats.bucket_validation_errors,
            purged = report.stats.buckets_cleaned_up,
            "bucket lifecycle sweep finished"
        );
        Ok(report)
    }

    /// Phase B for one bucket. Returns true when the bucket is known and
    /// failed permanently.
    async fn apply_validation(
        &self,
        name: &str,
        validation: &Validation,
        stats: &mut ScanStats,
    ) -> ScanResult<bool> {
        if validation.accessible {
            self.catalog.mark_bucket_accessible(name, &self.region).await?;
            stats.buckets_validated += 1;
            return Ok(false);
        }

        stats.bucket_validation_errors += 1;
        let permanent = match &validation.error {
            Some(error) if error.kind.is_permanent() => {
                self.catalog.record_access_error(name, error).await?
            }
            _ => false,
        };
        if permanent {
            stats.buckets_marked_inaccessible += 1;
            warn!(bucket = name, kind = ?validation.kind(), "bucket marked inaccessible");
        } else {
            debug!(
                bucket = name,
                kind = ?validation.kind(),
                attempts = validation.attempts,
                "bucket validation failed, state left as is"
            );
        }
        Ok(permanent)
    }

    /// Phase C.
    async fn purge_expired(&self, failed_permanently: &HashSet<String>) -> ScanResult<Vec<String>> {
        let threshold = chrono::Duration::from_std(self.delete_threshold)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000));
        let now = Utc::now();
        let mut purged = Vec::new();

        for bucket in self.catalog.marked_buckets().await? {
            if !failed_permanently.contains(&bucket.name) {
                continue;
            }
            let permanent = bucket
                .access_error_kind
                .as_deref()
                .and_then(|k| k.parse::<AccessErrorKind>().ok())
                .is_some_and(|k| k.is_permanent());
            let inaccessible_for = now - bucket.last_accessible_at;
            if !permanent || inaccessible_for <= threshold {
                continue;
            }

            let entries = self.catalog.purge_bucket(bucket.id).await?;
            info!(
                bucket = %bucket.name,
                entries,
                inaccessible_hours = inaccessible_for.num_hours(),
                "purged inaccessible bucket"
            );
            purged.push(bucket.name);
        }
        Ok(purged)
    }
}
