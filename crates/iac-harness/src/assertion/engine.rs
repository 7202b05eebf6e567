//! Assertion evaluation.

use super::{AssertionExpression, Check, OutputPath};
use crate::output::{OutputDocument, OutputValue};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of one expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssertionOutcome {
    Passed,
    Failed { reason: String },
    /// The path did not resolve to a value.
    OutputNotFound,
}

/// One evaluated expression. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionResult {
    pub description: String,
    pub path: String,
    pub expected: String,
    /// Resolved value; omitted for sensitive outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<OutputValue>,
    pub outcome: AssertionOutcome,
}

impl AssertionResult {
    pub fn passed(&self) -> bool {
        self.outcome == AssertionOutcome::Passed
    }
}

/// Results of a batch, in expression order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssertionReport {
    results: Vec<AssertionResult>,
}

impl AssertionReport {
    pub fn results(&self) -> &[AssertionResult] {
        &self.results
    }

    /// True when every result passed (vacuously true for an empty batch).
    pub fn passed(&self) -> bool {
        self.results.iter().all(AssertionResult::passed)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<AssertionResult> {
        self.results
    }
}

/// Evaluates assertion expressions against an output document.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionEngine;

impl AssertionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every expression; one failure never stops the others.
    pub fn evaluate(
        &self,
        document: &OutputDocument,
        expressions: &[AssertionExpression],
    ) -> AssertionReport {
        let results: Vec<AssertionResult> = expressions
            .iter()
            .map(|expression| evaluate_one(document, expression))
            .collect();

        let report = AssertionReport { results };
        if report.passed() {
            info!(
                target: "iac.harness.assertion",
                total = report.len(),
                "All assertions passed"
            );
        } else {
            warn!(
                target: "iac.harness.assertion",
                total = report.len(),
                failed = report.failed_count(),
                "Assertions failed"
            );
        }
        report
    }
}

fn evaluate_one(document: &OutputDocument, expression: &AssertionExpression) -> AssertionResult {
    let mut result = AssertionResult {
        description: expression.description.clone(),
        path: expression.path.clone(),
        expected: expression.check.expected(),
        actual: None,
        outcome: AssertionOutcome::Passed,
    };

    let path = match OutputPath::parse(&expression.path) {
        Ok(path) => path,
        Err(e) => {
            result.outcome = AssertionOutcome::Failed {
                reason: format!("invalid path '{}': {e}", expression.path),
            };
            return result;
        }
    };

    let sensitive = path
        .output_name()
        .is_some_and(|name| document.is_sensitive(name));
    let resolved = document.resolve(&path);

    result.outcome = match (&expression.check, resolved) {
        (Check::Absent, None) => AssertionOutcome::Passed,
        (Check::Absent, Some(value)) => AssertionOutcome::Failed {
            reason: if sensitive {
                "expected path to be absent, but it resolved".to_string()
            } else {
                format!("expected path to be absent, got {value}")
            },
        },
        (_, None) => AssertionOutcome::OutputNotFound,
        (Check::Exists, Some(_)) => AssertionOutcome::Passed,
        (Check::Equals(expected), Some(value)) => {
            if value == expected {
                AssertionOutcome::Passed
            } else if sensitive {
                AssertionOutcome::Failed {
                    reason: "sensitive value differs from expected".to_string(),
                }
            } else {
                AssertionOutcome::Failed {
                    reason: format!("expected {expected}, got {value}"),
                }
            }
        }
        (Check::Predicate(predicate), Some(value)) => match predicate.test(value) {
            Ok(()) => AssertionOutcome::Passed,
            Err(_) if sensitive => AssertionOutcome::Failed {
                reason: format!("sensitive value is not {}", predicate.describe()),
            },
            Err(reason) => AssertionOutcome::Failed { reason },
        },
    };

    if !sensitive {
        result.actual = resolved.cloned();
    }

    debug!(
        target: "iac.harness.assertion",
        path = %expression.path,
        passed = result.passed(),
        "Evaluated assertion"
    );
    result
}
