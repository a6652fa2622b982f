//! Error types for the usage pipeline.
//!
//! Only top-level failures surface here. Per-line parse failures, per-file read
//! failures and unknown models are absorbed where they happen and never become
//! a `UsageError`.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::UsageReport;

/// Usage pipeline errors.
#[derive(Error, Debug)]
pub enum UsageError {
    /// The projects root is missing or cannot be listed
    #[error("projects root {} is unavailable: {source}", path.display())]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External processor is configured but not present on disk
    #[error("external processor not found at {}", path.display())]
    ExecutableMissing { path: PathBuf },

    /// External processor could not be started
    #[error("failed to start external processor {}: {source}", path.display())]
    ExternalSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External processor exited unsuccessfully
    #[error("external processor exited with {code:?}: {stderr}")]
    ExternalExit { code: Option<i32>, stderr: String },

    /// External processor exceeded its time budget
    #[error("external processor timed out after {timeout_ms}ms")]
    ExternalTimeout { timeout_ms: u128 },

    /// External processor wrote more than the allowed amount to stdout
    #[error("external processor output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    /// External processor output is not a usage report
    #[error("external processor output is not a valid report: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    /// Hour bounds outside 0-23 or inverted
    #[error("invalid hour range {start:?}..={end:?}: hours must be 0-23 and start <= end")]
    InvalidHourRange { start: Option<u32>, end: Option<u32> },

    /// Date bounds are inverted
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// External and in-process paths both failed
    #[error("external processor failed ({external}); in-process fallback failed: {fallback}")]
    BothPathsFailed {
        external: Box<UsageError>,
        fallback: Box<UsageError>,
    },

    /// IO error outside the per-project isolation boundary
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UsageError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            UsageError::RootUnavailable { .. } => "ROOT_UNAVAILABLE",
            UsageError::ExecutableMissing { .. } => "EXTERNAL_MISSING",
            UsageError::ExternalSpawn { .. } => "EXTERNAL_SPAWN_FAILED",
            UsageError::ExternalExit { .. } => "EXTERNAL_EXIT",
            UsageError::ExternalTimeout { .. } => "EXTERNAL_TIMEOUT",
            UsageError::OutputTooLarge { .. } => "EXTERNAL_OUTPUT_TOO_LARGE",
            UsageError::InvalidOutput(_) => "EXTERNAL_INVALID_OUTPUT",
            UsageError::InvalidHourRange { .. } => "INVALID_HOUR_RANGE",
            UsageError::InvalidDateRange(_) => "INVALID_DATE_RANGE",
            UsageError::BothPathsFailed { .. } => "PROCESSING_FAILED",
            UsageError::Io(_) => "IO_ERROR",
        }
    }

    /// True for failures that belong to the external fast path and are
    /// therefore eligible for the in-process fallback.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            UsageError::ExecutableMissing { .. }
                | UsageError::ExternalSpawn { .. }
                | UsageError::ExternalExit { .. }
                | UsageError::ExternalTimeout { .. }
                | UsageError::OutputTooLarge { .. }
                | UsageError::InvalidOutput(_)
        )
    }
}

/// Result type for usage pipeline operations.
pub type Result<T> = std::result::Result<T, UsageError>;

/// Error body carried by a failed outcome.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&UsageError> for ErrorBody {
    fn from(e: &UsageError) -> Self {
        ErrorBody {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Report plus optional error. A failure is always an empty report with
/// `error` set, never a half-populated aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    #[serde(flatten)]
    pub report: UsageReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ReportOutcome {
    pub fn from_result(result: Result<UsageReport>) -> Self {
        match result {
            Ok(report) => ReportOutcome {
                report,
                error: None,
            },
            Err(e) => ReportOutcome {
                report: UsageReport::default(),
                error: Some(ErrorBody::from(&e)),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_is_empty_with_code() {
        let err = UsageError::RootUnavailable {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let outcome = ReportOutcome::from_result(Err(err));
        assert!(outcome.is_error());
        assert!(outcome.report.daily_usage.is_empty());
        assert_eq!(outcome.report.total_sessions, 0);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"]["code"], "ROOT_UNAVAILABLE");
        assert!(json["dailyUsage"].as_array().unwrap().is_empty());
    }

    #[test]
    fn external_errors_are_classified() {
        assert!(UsageError::ExternalTimeout { timeout_ms: 10 }.is_external());
        assert!(!UsageError::InvalidDateRange("x".into()).is_external());
        let both = UsageError::BothPathsFailed {
            external: Box::new(UsageError::OutputTooLarge { limit: 1 }),
            fallback: Box::new(UsageError::Io(std::io::Error::other("boom"))),
        };
        assert_eq!(both.code(), "PROCESSING_FAILED");
    }
}
