//! Persistent record of one scan attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a scan job.
///
/// ```text
/// Pending -> Running -> Completed
///               \----> Failed
/// ```
///
/// Jobs are inserted directly as `Running`; `Completed` and `Failed` are
/// terminal and each job reaches exactly one of them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated by a scan.
#[derive(Serialize, Deserialize, Clone, Copy, FromRow, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub objects_scanned: i64,
    pub objects_created: i64,
    pub objects_updated: i64,
    pub objects_deleted: i64,
    pub buckets_validated: i64,
    pub buckets_marked_inaccessible: i64,
    pub buckets_cleaned_up: i64,
    pub bucket_validation_errors: i64,
}

impl ScanStats {
    /// Fold another run's counters into this one.
    pub fn absorb(&mut self, other: &ScanStats) {
        self.objects_scanned += other.objects_scanned;
        self.objects_created += other.objects_created;
        self.objects_updated += other.objects_updated;
        self.objects_deleted += other.objects_deleted;
        self.buckets_validated += other.buckets_validated;
        self.buckets_marked_inaccessible += other.buckets_marked_inaccessible;
        self.buckets_cleaned_up += other.buckets_cleaned_up;
        self.bucket_validation_errors += other.bucket_validation_errors;
    }
}

/// A scan attempt. `bucket_id` is `None` for aggregate sweep jobs.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ScanJob {
    pub id: Uuid,
    pub bucket_id: Option<Uuid>,
    pub bucket_name: Option<String>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub stats: ScanStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }

    #[test]
    fn absorb_sums_every_counter() {
        let mut total = ScanStats {
            objects_created: 2,
            buckets_validated: 1,
            ..Default::default()
        };
        total.absorb(&ScanStats {
            objects_created: 3,
            objects_deleted: 1,
            buckets_validated: 2,
            bucket_validation_errors: 1,
            ..Default::default()
        });
        assert_eq!(total.objects_created, 5);
        assert_eq!(total.objects_deleted, 1);
        assert_eq!(total.buckets_validated, 3);
        assert_eq!(total.bucket_validation_errors, 1);
    }
}
