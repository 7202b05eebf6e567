//! Harness error types.
//!
//! Stage-level errors (validation, plan, apply, timeout, lock contention,
//! cancellation) are fatal and abort a scenario. Individual assertion
//! mismatches are not errors; they are collected as
//! [`crate::assertion::AssertionOutcome`] values and only surface here as the
//! aggregate [`HarnessError::AssertionsFailed`].

use crate::plan::ChangeSummary;
use crate::tool::Stage;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Harness error type.
///
/// Messages for tool failures carry the raw tool diagnostic text.
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// Module is syntactically or semantically malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Tool failure during a dry run (or during init for a plan scenario).
    #[error("Plan failed: {0}")]
    Plan(String),

    /// Tool failure while mutating infrastructure. State may be inconsistent.
    #[error("Apply failed: {0}")]
    Apply(String),

    /// A re-plan or re-apply after a successful apply reported changes.
    #[error("Drift detected after apply: {0}")]
    DriftDetected(ChangeSummary),

    /// Output retrieval failed or returned unparseable data.
    #[error("Output collection failed: {0}")]
    Collection(String),

    /// Teardown after a passing scenario failed.
    #[error("Destroy failed: {0}")]
    Destroy(String),

    /// A stage exceeded its wall-clock budget.
    #[error("{stage} timed out after {}s", .timeout.as_secs())]
    Timeout { stage: Stage, timeout: Duration },

    /// Another run holds the state lock for this target.
    #[error("State lock for '{target}' is held by another run")]
    LockContention { target: String },

    /// The host cancelled the scenario. Infrastructure is left as-is.
    #[error("Cancelled during {stage}; infrastructure left as-is for manual reconciliation")]
    Cancelled { stage: Stage },

    /// The tool binary could not be started.
    #[error("Failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// One or more assertions did not hold.
    #[error("{failed} of {total} assertion(s) failed")]
    AssertionsFailed { failed: usize, total: usize },

    /// A plan expected to fail did not fail the expected way.
    #[error("Expected plan to fail with '{expected}', but {actual}")]
    UnexpectedPlanOutcome { expected: String, actual: String },
}

/// Stable, serializable classification of a [`HarnessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationError,
    PlanError,
    ApplyError,
    DriftDetected,
    CollectionError,
    DestroyError,
    Timeout,
    LockContention,
    Cancelled,
    LaunchError,
    AssertionFailed,
    UnexpectedPlanOutcome,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ValidationError => "ValidationError",
            FailureKind::PlanError => "PlanError",
            FailureKind::ApplyError => "ApplyError",
            FailureKind::DriftDetected => "DriftDetected",
            FailureKind::CollectionError => "CollectionError",
            FailureKind::DestroyError => "DestroyError",
            FailureKind::Timeout => "Timeout",
            FailureKind::LockContention => "LockContention",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::LaunchError => "LaunchError",
            FailureKind::AssertionFailed => "AssertionFailed",
            FailureKind::UnexpectedPlanOutcome => "UnexpectedPlanOutcome",
        };
        f.write_str(name)
    }
}

impl HarnessError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Validation(_) => FailureKind::ValidationError,
            HarnessError::Plan(_) => FailureKind::PlanError,
            HarnessError::Apply(_) => FailureKind::ApplyError,
            HarnessError::DriftDetected(_) => FailureKind::DriftDetected,
            HarnessError::Collection(_) => FailureKind::CollectionError,
            HarnessError::Destroy(_) => FailureKind::DestroyError,
            HarnessError::Timeout { .. } => FailureKind::Timeout,
            HarnessError::LockContention { .. } => FailureKind::LockContention,
            HarnessError::Cancelled { .. } => FailureKind::Cancelled,
            HarnessError::Launch { .. } => FailureKind::LaunchError,
            HarnessError::AssertionsFailed { .. } => FailureKind::AssertionFailed,
            HarnessError::UnexpectedPlanOutcome { .. } => FailureKind::UnexpectedPlanOutcome,
        }
    }

    /// Whether this error comes from a lifecycle stage rather than from
    /// assertion evaluation.
    pub fn is_stage_error(&self) -> bool {
        !matches!(self, HarnessError::AssertionsFailed { .. })
    }

    /// Whether real infrastructure may have been left partially changed.
    pub fn may_leave_partial_state(&self) -> bool {
        matches!(
            self,
            HarnessError::Apply(_)
                | HarnessError::Destroy(_)
                | HarnessError::Timeout {
                    stage: Stage::Apply | Stage::Destroy,
                    ..
                }
                | HarnessError::Cancelled {
                    stage: Stage::Apply | Stage::Destroy,
                }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            HarnessError::Validation("x".into()).kind(),
            FailureKind::ValidationError
        );
        assert_eq!(
            HarnessError::DriftDetected(ChangeSummary::default()).kind(),
            FailureKind::DriftDetected
        );
        assert_eq!(
            HarnessError::LockContention {
                target: "mod".into()
            }
            .kind(),
            FailureKind::LockContention
        );
        assert_eq!(
            HarnessError::AssertionsFailed {
                failed: 1,
                total: 2
            }
            .kind(),
            FailureKind::AssertionFailed
        );
    }

    #[test]
    fn test_assertion_failures_are_not_stage_errors() {
        assert!(!HarnessError::AssertionsFailed {
            failed: 1,
            total: 1
        }
        .is_stage_error());
        assert!(HarnessError::Plan("boom".into()).is_stage_error());
        assert!(HarnessError::Timeout {
            stage: Stage::Plan,
            timeout: Duration::from_secs(1)
        }
        .is_stage_error());
    }

    #[test]
    fn test_partial_state_only_for_mutating_stages() {
        assert!(HarnessError::Apply("quota".into()).may_leave_partial_state());
        assert!(HarnessError::Cancelled {
            stage: Stage::Apply
        }
        .may_leave_partial_state());
        assert!(!HarnessError::Cancelled { stage: Stage::Plan }.may_leave_partial_state());
        assert!(!HarnessError::Plan("x".into()).may_leave_partial_state());
    }

    #[test]
    fn test_timeout_message() {
        let err = HarnessError::Timeout {
            stage: Stage::Apply,
            timeout: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "apply timed out after 90s");
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::DriftDetected).unwrap();
        assert_eq!(json, "\"drift_detected\"");
    }
}
