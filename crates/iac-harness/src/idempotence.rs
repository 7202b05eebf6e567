//! Drift detection after a successful apply.
//!
//! A convergent module produces no further changes when planned or applied
//! again with the same configuration. Any reported change is
//! [`HarnessError::DriftDetected`] with the full change summary; drift is
//! never retried away.

use crate::apply::{ApplyResult, ApplyRunner};
use crate::errors::HarnessError;
use crate::plan::{PlanResult, PlanRunner};
use crate::run_config::RunConfig;
use crate::tool::RunControl;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument, warn};

/// How the second pass is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotenceStrength {
    /// Dry-run only; nothing is mutated.
    Replan,
    /// Full second apply; it must be a no-op.
    #[default]
    Reapply,
}

impl fmt::Display for IdempotenceStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdempotenceStrength::Replan => f.write_str("replan"),
            IdempotenceStrength::Reapply => f.write_str("reapply"),
        }
    }
}

impl FromStr for IdempotenceStrength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replan" | "plan" => Ok(IdempotenceStrength::Replan),
            "reapply" | "apply" => Ok(IdempotenceStrength::Reapply),
            other => Err(format!("unknown idempotence strength '{other}'")),
        }
    }
}

/// Re-plans or re-applies an applied configuration and requires no changes.
#[derive(Debug, Clone)]
pub struct IdempotenceChecker {
    planner: PlanRunner,
    applier: ApplyRunner,
}

impl IdempotenceChecker {
    pub fn new(planner: PlanRunner, applier: ApplyRunner) -> Self {
        Self { planner, applier }
    }

    /// Run the second pass.
    ///
    /// Returns the second apply's result for [`IdempotenceStrength::Reapply`]
    /// (its outputs are the freshest) and `None` for a re-plan.
    ///
    /// # Errors
    ///
    /// - `HarnessError::DriftDetected` - the second pass reported changes
    /// - `HarnessError::Plan` / `HarnessError::Apply` - the second pass failed
    /// - runner errors (`Timeout`, `LockContention`, `Cancelled`, ...)
    #[instrument(skip_all, fields(strength = %strength))]
    pub async fn check(
        &self,
        config: &RunConfig,
        control: &RunControl,
        strength: IdempotenceStrength,
    ) -> Result<Option<ApplyResult>, HarnessError> {
        let (result, applied) = match strength {
            IdempotenceStrength::Replan => (self.planner.plan(config, control).await?, None),
            IdempotenceStrength::Reapply => {
                let applied = self.applier.apply(config, control).await?.into_success()?;
                (applied.change_result(), Some(applied))
            }
        };

        match result {
            PlanResult::NoChanges => {
                info!(target: "iac.harness.idempotence", "No drift after apply");
                Ok(applied)
            }
            PlanResult::ChangesPending { count, summary } => {
                warn!(
                    target: "iac.harness.idempotence",
                    count,
                    summary = %summary,
                    "Drift detected after apply"
                );
                Err(HarnessError::DriftDetected(summary))
            }
            PlanResult::Error { detail } => Err(HarnessError::Plan(detail)),
        }
    }
}
