//! Bucket accessibility probing with retry and classification.

use super::{
    ScanError, ScanResult,
    classify::{AccessErrorKind, ClassifiedError},
};
use crate::services::object_source::ObjectSource;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of probing one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub accessible: bool,
    pub error: Option<ClassifiedError>,
    /// Probe calls made; 0 when validation is skipped.
    pub attempts: u32,
}

impl Validation {
    fn accessible(attempts: u32) -> Self {
        Self {
            accessible: true,
            error: None,
            attempts,
        }
    }

    fn failed(error: ClassifiedError, attempts: u32) -> Self {
        Self {
            accessible: false,
            error: Some(error),
            attempts,
        }
    }

    pub fn kind(&self) -> Option<AccessErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

pub struct BucketValidator {
    source: Arc<dyn ObjectSource>,
    skip_validation: bool,
    max_retries: u32,
    retry_delay: Duration,
}

impl BucketValidator {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        skip_validation: bool,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            skip_validation,
            max_retries,
            retry_delay,
        }
    }

    /// Probe `bucket` until it answers, fails permanently, or `max_retries`
    /// attempts are used up. The n-th retry waits `n * retry_delay`.
    ///
    /// Only cancellation is returned as an error; probe failures are part
    /// of the [`Validation`].
    pub async fn validate(&self, bucket: &str, cancel: &CancellationToken) -> ScanResult<Validation> {
        if self.skip_validation {
            debug!(bucket, "bucket validation skipped");
            return Ok(Validation::accessible(0));
        }

        let max_attempts = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let probe = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                probe = self.source.probe_bucket(bucket) => probe,
            };

            let err = match probe {
                Ok(()) => {
                    debug!(bucket, attempt, "bucket probe succeeded");
                    return Ok(Validation::accessible(attempt));
                }
                Err(err) => ClassifiedError::from(&err),
            };

            if err.kind.is_permanent() {
                warn!(bucket, kind = %err.kind, "bucket probe failed permanently: {}", err.message);
                return Ok(Validation::failed(err, attempt));
            }
            if attempt >= max_attempts {
                warn!(bucket, attempt, kind = %err.kind, "bucket probe retries exhausted: {}", err.message);
                return Ok(Validation::failed(err, attempt));
            }

            let delay = self.retry_delay * attempt;
            debug!(bucket, attempt, ?delay, "bucket probe failed, retrying: {}", err);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_source::SourceError;
    use crate::sync::testing::FakeSource;

    fn validator(source: Arc<FakeSource>, retries: u32) -> BucketValidator {
        BucketValidator::new(source, false, retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn accessible_bucket_passes_first_try() {
        let source = Arc::new(FakeSource::new());
        source.add_bucket("demo");
        let v = validator(source.clone(), 3)
            .validate("demo", &CancellationToken::new())
            .await
            .unwrap();
        assert!(v.accessible);
        assert_eq!(v.attempts, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let source = Arc::new(FakeSource::new());
        source.add_bucket("demo");
        source.fail_probes("demo", 2, SourceError::new("gateway").with_status(503));

        let v = validator(source.clone(), 3)
            .validate("demo", &CancellationToken::new())
            .await
            .unwrap();
        assert!(v.accessible);
        assert_eq!(v.attempts, 3);
        assert_eq!(source.probe_calls("demo"), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_temporary() {
        let source = Arc::new(FakeSource::new());
        source.add_bucket("demo");
        source.fail_probes("demo", 10, SourceError::new("connection reset by peer"));

        let v = validator(source.clone(), 2)
            .validate("demo", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!v.accessible);
        assert_eq!(v.kind(), Some(AccessErrorKind::Temporary));
        assert_eq!(source.probe_calls("demo"), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let source = Arc::new(FakeSource::new());
        source.add_bucket("demo");
        source.deny("demo");

        let v = validator(source.clone(), 5)
            .validate("demo", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v.kind(), Some(AccessErrorKind::AccessDenied));
        assert_eq!(source.probe_calls("demo"), 1);

        let missing = validator(source.clone(), 5)
            .validate("ghost", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(missing.kind(), Some(AccessErrorKind::NotFound));
    }

    #[tokio::test]
    async fn skip_mode_trusts_every_bucket() {
        let source = Arc::new(FakeSource::new());
        let trusting = BucketValidator::new(source.clone(), true, 3, Duration::from_millis(1));
        let v = trusting
            .validate("ghost", &CancellationToken::new())
            .await
            .unwrap();
        assert!(v.accessible);
        assert_eq!(source.probe_calls("ghost"), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let source = Arc::new(FakeSource::new());
        source.add_bucket("demo");
        source.fail_probes("demo", 10, SourceError::new("timeout"));
        let slow = BucketValidator::new(source, false, 10, Duration::from_secs(60));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = slow.validate("demo", &cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
