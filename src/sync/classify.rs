//! Failure classification for object-store calls.
//!
//! Adapters report raw facts; this module folds them into the closed
//! [`AccessErrorKind`] set. The rest of the engine only ever looks at the
//! enum, never at adapter error types.

use crate::services::object_source::SourceError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessErrorKind {
    /// The bucket (or key) does not exist.
    NotFound,
    /// Credentials are valid but not allowed to read the bucket.
    AccessDenied,
    /// Network trouble, timeouts, throttling or 5xx responses.
    Temporary,
    /// Anything else. Treated as non-permanent.
    Unknown,
}

impl AccessErrorKind {
    /// Permanent failures drive bucket quarantine and are not retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AccessErrorKind::NotFound | AccessErrorKind::AccessDenied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessErrorKind::NotFound => "not_found",
            AccessErrorKind::AccessDenied => "access_denied",
            AccessErrorKind::Temporary => "temporary",
            AccessErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AccessErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(AccessErrorKind::NotFound),
            "access_denied" => Ok(AccessErrorKind::AccessDenied),
            "temporary" => Ok(AccessErrorKind::Temporary),
            "unknown" => Ok(AccessErrorKind::Unknown),
            other => Err(format!("unknown access error kind `{}`", other)),
        }
    }
}

/// A classified failure: the kind plus the text shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub kind: AccessErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: AccessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&SourceError> for ClassifiedError {
    fn from(err: &SourceError) -> Self {
        ClassifiedError::new(classify(err), err.message.clone())
    }
}

/// Classify a source error. Status wins over code, code over message text.
pub fn classify(err: &SourceError) -> AccessErrorKind {
    err.status
        .and_then(classify_status)
        .or_else(|| err.code.as_deref().and_then(classify_code))
        .unwrap_or_else(|| classify_message(&err.message))
}

pub fn classify_status(status: u16) -> Option<AccessErrorKind> {
    match status {
        404 => Some(AccessErrorKind::NotFound),
        401 | 403 => Some(AccessErrorKind::AccessDenied),
        408 | 429 => Some(AccessErrorKind::Temporary),
        500..=599 => Some(AccessErrorKind::Temporary),
        _ => None,
    }
}

pub fn classify_code(code: &str) -> Option<AccessErrorKind> {
    match code {
        "NoSuchBucket" | "NotFound" | "NoSuchKey" => Some(AccessErrorKind::NotFound),
        "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
        | "AllAccessDisabled" | "AccountProblem" => Some(AccessErrorKind::AccessDenied),
        "RequestTimeout" | "SlowDown" | "ServiceUnavailable" | "InternalError"
        | "Throttling" | "RequestTimeTooSkewed" => Some(AccessErrorKind::Temporary),
        _ => None,
    }
}

/// Last-resort heuristics on the error text.
pub fn classify_message(message: &str) -> AccessErrorKind {
    let text = message.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if any(&["nosuchbucket", "not found", "does not exist", "no such"]) {
        AccessErrorKind::NotFound
    } else if any(&["access denied", "accessdenied", "forbidden", "permission denied", "unauthorized"]) {
        AccessErrorKind::AccessDenied
    } else if any(&[
        "timeout",
        "timed out",
        "connection",
        "temporarily",
        "unavailable",
        "broken pipe",
        "reset by peer",
        "dns",
        "throttl",
        "slow down",
    ]) {
        AccessErrorKind::Temporary
    } else {
        AccessErrorKind::Unknown
    }
}
