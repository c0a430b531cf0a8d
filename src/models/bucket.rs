//! Represents a bucket known to the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::scan_job::{ScanJob, ScanStatus};

/// A bucket mirrored into the catalog.
///
/// Rows are created on the first successful validation. The
/// `marked_for_deletion` flag is owned by the bucket lifecycle sweep: it is
/// set for every row at the start of a sweep and cleared only by a successful
/// probe within that sweep.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket name as reported by the object store (unique).
    pub name: String,

    /// Region the bucket was registered under.
    pub region: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set while the bucket awaits a successful probe in the current sweep.
    pub marked_for_deletion: bool,

    /// Last time a probe succeeded. Drives the purge threshold.
    pub last_accessible_at: DateTime<Utc>,

    /// Text of the last classified access failure, if any.
    pub access_error: Option<String>,

    /// Classification of the last access failure (`not_found`, `access_denied`, ...).
    pub access_error_kind: Option<String>,
}

/// Derived status shown next to a bucket by the browsing layer.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BucketStatus {
    /// No scan job has ever been recorded for the bucket.
    NeverScanned,
    Scanning,
    /// The latest scan failed; carries its classified error text.
    Failed { error: String },
    /// Quarantined by the lifecycle sweep, pending purge.
    Inaccessible { error: String },
    Ok,
}

impl BucketStatus {
    pub fn derive(bucket: &Bucket, latest_job: Option<&ScanJob>) -> Self {
        if bucket.marked_for_deletion {
            if let Some(error) = &bucket.access_error {
                return BucketStatus::Inaccessible {
                    error: error.clone(),
                };
            }
        }
        match latest_job {
            None => BucketStatus::NeverScanned,
            Some(job) if !job.status.is_terminal() => BucketStatus::Scanning,
            Some(job) => match job.status {
                ScanStatus::Failed => BucketStatus::Failed {
                    error: job
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "scan failed".into()),
                },
                _ => BucketStatus::Ok,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan_job::ScanStats;

    fn bucket() -> Bucket {
        let now = Utc::now();
        Bucket {
            id: Uuid::new_v4(),
            name: "demo".into(),
            region: "local".into(),
            created_at: now,
            updated_at: now,
            marked_for_deletion: false,
            last_accessible_at: now,
            access_error: None,
            access_error_kind: None,
        }
    }

    fn job(status: ScanStatus, error: Option<&str>) -> ScanJob {
        ScanJob {
            id: Uuid::new_v4(),
            bucket_id: None,
            bucket_name: Some("demo".into()),
            status,
            started_at: Utc::now(),
            completed_at: None,
            error_message: error.map(str::to_string),
            stats: ScanStats::default(),
        }
    }

    #[test]
    fn never_scanned_without_jobs() {
        assert_eq!(BucketStatus::derive(&bucket(), None), BucketStatus::NeverScanned);
    }

    #[test]
    fn failed_job_exposes_error_text() {
        let status = BucketStatus::derive(
            &bucket(),
            Some(&job(ScanStatus::Failed, Some("temporary: connection reset"))),
        );
        assert_eq!(
            status,
            BucketStatus::Failed {
                error: "temporary: connection reset".into()
            }
        );
    }

    #[test]
    fn quarantine_wins_over_job_state() {
        let mut b = bucket();
        b.marked_for_deletion = true;
        b.access_error = Some("access_denied: forbidden".into());
        let status = BucketStatus::derive(&b, Some(&job(ScanStatus::Completed, None)));
        assert!(matches!(status, BucketStatus::Inaccessible { .. }));
    }
}
