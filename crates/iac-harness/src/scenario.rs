//! Scenario orchestration.
//!
//! Every scenario kind is a fixed walk through one state machine:
//!
//! | Kind        | Path                                                         |
//! |-------------|--------------------------------------------------------------|
//! | Validate    | Validating                                                   |
//! | Plan        | Planning → Asserting                                         |
//! | Apply       | Applying → Asserting → CheckingIdempotence (re-plan)         |
//! | Idempotence | Applying → CheckingIdempotence (re-apply) → Asserting        |
//!
//! followed by an optional TearingDown and Done. The first stage error
//! ends the walk; assertion mismatches never do. Teardown only runs after a
//! passing walk, so a failed scenario leaves its infrastructure in place.

use crate::apply::ApplyRunner;
use crate::assertion::{
    AssertionEngine, AssertionExpression, AssertionOutcome, AssertionReport, AssertionResult,
};
use crate::config::ConfigError;
use crate::errors::{FailureKind, HarnessError};
use crate::idempotence::{IdempotenceChecker, IdempotenceStrength};
use crate::output::OutputDocument;
use crate::plan::{PlanResult, PlanRunner};
use crate::run_config::RunConfig;
use crate::tool::{ProvisioningTool, RetryPolicy, RunControl, Stage};
use crate::validate::Validator;
use chrono::{DateTime, Utc};
use common::secret::{redact, SecretString};
use common::types::RunId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Default per-state budget.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default state lock wait.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// The four entry scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Validate,
    Plan,
    Apply,
    Idempotence,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::Validate,
        ScenarioKind::Plan,
        ScenarioKind::Apply,
        ScenarioKind::Idempotence,
    ];

    fn steps(self, strength: IdempotenceStrength) -> Vec<Step> {
        match self {
            ScenarioKind::Validate => vec![Step::Validate],
            ScenarioKind::Plan => vec![Step::Plan, Step::Assert],
            ScenarioKind::Apply => vec![
                Step::Apply,
                Step::Assert,
                Step::CheckIdempotence(IdempotenceStrength::Replan),
            ],
            ScenarioKind::Idempotence => vec![
                Step::Apply,
                Step::CheckIdempotence(strength),
                Step::Assert,
            ],
        }
    }

    /// States a fully successful walk passes through, before teardown.
    pub fn path(self) -> Vec<ScenarioState> {
        self.steps(IdempotenceStrength::default())
            .into_iter()
            .map(Step::state)
            .collect()
    }

    /// Whether the scenario changes real infrastructure.
    pub fn mutates(self) -> bool {
        matches!(self, ScenarioKind::Apply | ScenarioKind::Idempotence)
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioKind::Validate => "validate",
            ScenarioKind::Plan => "plan",
            ScenarioKind::Apply => "apply",
            ScenarioKind::Idempotence => "idempotence",
        };
        f.write_str(name)
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" => Ok(ScenarioKind::Validate),
            "plan" => Ok(ScenarioKind::Plan),
            "apply" => Ok(ScenarioKind::Apply),
            "idempotence" => Ok(ScenarioKind::Idempotence),
            other => Err(format!("unknown scenario '{other}'")),
        }
    }
}

/// Scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Idle,
    Validating,
    Planning,
    Applying,
    CheckingIdempotence,
    Asserting,
    TearingDown,
    Done(Verdict),
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioState::Idle => f.write_str("Idle"),
            ScenarioState::Validating => f.write_str("Validating"),
            ScenarioState::Planning => f.write_str("Planning"),
            ScenarioState::Applying => f.write_str("Applying"),
            ScenarioState::CheckingIdempotence => f.write_str("CheckingIdempotence"),
            ScenarioState::Asserting => f.write_str("Asserting"),
            ScenarioState::TearingDown => f.write_str("TearingDown"),
            ScenarioState::Done(verdict) => write!(f, "Done({verdict})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Validate,
    Plan,
    Apply,
    CheckIdempotence(IdempotenceStrength),
    Assert,
}

impl Step {
    fn state(self) -> ScenarioState {
        match self {
            Step::Validate => ScenarioState::Validating,
            Step::Plan => ScenarioState::Planning,
            Step::Apply => ScenarioState::Applying,
            Step::CheckIdempotence(_) => ScenarioState::CheckingIdempotence,
            Step::Assert => ScenarioState::Asserting,
        }
    }

    /// Tool stage reported if the step is cancelled before it starts.
    fn stage(self) -> Stage {
        match self {
            Step::Validate => Stage::Validate,
            Step::Plan | Step::CheckIdempotence(IdempotenceStrength::Replan) => Stage::Plan,
            Step::Apply | Step::CheckIdempotence(IdempotenceStrength::Reapply) => Stage::Apply,
            Step::Assert => Stage::Output,
        }
    }
}

/// What happens to provisioned infrastructure after a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownPolicy {
    /// Leave everything in place.
    #[default]
    Keep,
    /// Destroy after a passing apply or idempotence scenario.
    DestroyOnPass,
}

impl FromStr for TeardownPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "none" => Ok(TeardownPolicy::Keep),
            "destroy-on-pass" | "destroy_on_pass" => Ok(TeardownPolicy::DestroyOnPass),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown teardown policy '{other}' (expected keep or destroy-on-pass)"
            ))),
        }
    }
}

/// Knobs for one orchestrator.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    /// Wall-clock budget for one state, shared by every invocation and
    /// retry inside it.
    pub stage_timeout: Duration,
    pub lock_timeout: Duration,
    /// Replaces the tool's retry policy when set.
    pub retry: Option<RetryPolicy>,
    pub teardown: TeardownPolicy,
    /// Second pass of the idempotence scenario.
    pub idempotence: IdempotenceStrength,
    /// Prefix for the failure message, e.g. "No errors are expected".
    pub failure_message: Option<String>,
    /// The plan scenario passes only if planning fails with this substring.
    pub expected_plan_error: Option<String>,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry: None,
            teardown: TeardownPolicy::default(),
            idempotence: IdempotenceStrength::default(),
            failure_message: None,
            expected_plan_error: None,
        }
    }
}

/// Root cause of a failed scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
    /// Raw tool diagnostic text or drift summary, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl FailureCause {
    fn new(error: &HarnessError, prefix: Option<&str>, secrets: &[SecretString]) -> Self {
        let message = match prefix {
            Some(prefix) => format!("{prefix}: {error}"),
            None => error.to_string(),
        };
        let diagnostics = match error {
            HarnessError::Validation(detail)
            | HarnessError::Plan(detail)
            | HarnessError::Apply(detail)
            | HarnessError::Collection(detail)
            | HarnessError::Destroy(detail) => Some(detail.clone()),
            HarnessError::DriftDetected(summary) => Some(summary.to_string()),
            _ => None,
        };

        Self {
            kind: error.kind(),
            message: redact(&message, secrets),
            diagnostics: diagnostics.map(|d| redact(&d, secrets)),
        }
    }
}

/// Result of one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Failed { kind: FailureKind },
}

/// Timing and outcome of one visited state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub state: ScenarioState,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

impl StageRecord {
    fn new(state: ScenarioState, elapsed: Duration, result: &Result<(), HarnessError>) -> Self {
        Self {
            state,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            outcome: match result {
                Ok(()) => StageOutcome::Completed,
                Err(e) => StageOutcome::Failed { kind: e.kind() },
            },
        }
    }
}

/// Aggregate result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub run_id: RunId,
    pub kind: ScenarioKind,
    pub module_dir: PathBuf,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    #[serde(skip)]
    error: Option<HarnessError>,
    /// Every assertion result gathered before the walk ended.
    pub assertions: Vec<AssertionResult>,
    pub stages: Vec<StageRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// The fatal error, if the scenario failed.
    pub fn error(&self) -> Option<&HarnessError> {
        self.error.as_ref()
    }

    /// States visited, in order.
    pub fn visited(&self) -> Vec<ScenarioState> {
        self.stages.iter().map(|s| s.state).collect()
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} scenario {} for {} (run {})",
            self.kind,
            self.verdict,
            self.module_dir.display(),
            self.run_id.short()
        )];

        if let Some(failure) = &self.failure {
            lines.push(format!("  cause: {}: {}", failure.kind, failure.message));
        }

        if !self.assertions.is_empty() {
            let passed = self.assertions.iter().filter(|r| r.passed()).count();
            lines.push(format!(
                "  assertions: {passed}/{} passed",
                self.assertions.len()
            ));
            for result in self.assertions.iter().filter(|r| !r.passed()) {
                let reason = match &result.outcome {
                    AssertionOutcome::Failed { reason } => reason.as_str(),
                    AssertionOutcome::OutputNotFound => "output not found",
                    AssertionOutcome::Passed => "",
                };
                lines.push(format!(
                    "  - {} [{}]: {reason}",
                    result.description, result.path
                ));
            }
        }

        lines.join("\n")
    }

    /// Collapse the report into a single terminal result.
    ///
    /// # Errors
    ///
    /// Returns a [`ScenarioFailure`] carrying the report when the verdict is
    /// `Fail`.
    pub fn into_result(self) -> Result<Self, ScenarioFailure> {
        match (self.verdict, self.failure.clone()) {
            (Verdict::Pass, _) => Ok(self),
            (Verdict::Fail, cause) => Err(ScenarioFailure {
                kind: self.kind,
                cause: cause.unwrap_or(FailureCause {
                    kind: FailureKind::AssertionFailed,
                    message: "scenario failed".to_string(),
                    diagnostics: None,
                }),
                report: Box::new(self),
            }),
        }
    }
}

/// A failed scenario as an error.
#[derive(Debug, Error)]
#[error("{kind} scenario failed with {}: {}", .cause.kind, .cause.message)]
pub struct ScenarioFailure {
    pub kind: ScenarioKind,
    pub cause: FailureCause,
    pub report: Box<ScenarioReport>,
}

/// State gathered while walking a scenario.
#[derive(Default)]
struct Walk {
    /// Document the next assertion step evaluates against.
    subject: Option<OutputDocument>,
    assertions: Option<AssertionReport>,
    records: Vec<StageRecord>,
}

impl Walk {
    fn record(&mut self, state: ScenarioState, started: Instant, result: &Result<(), HarnessError>) {
        self.records
            .push(StageRecord::new(state, started.elapsed(), result));
    }
}

/// Drives scenarios through the lifecycle state machine.
#[derive(Debug, Clone)]
pub struct ScenarioOrchestrator {
    validator: Validator,
    planner: PlanRunner,
    applier: ApplyRunner,
    idempotence: IdempotenceChecker,
    engine: AssertionEngine,
    tool: ProvisioningTool,
    options: ScenarioOptions,
    cancel: CancellationToken,
}

impl ScenarioOrchestrator {
    pub fn new(tool: ProvisioningTool, options: ScenarioOptions) -> Self {
        let tool = match &options.retry {
            Some(policy) => tool.with_retry_policy(policy.clone()),
            None => tool,
        };
        let planner = PlanRunner::new(tool.clone());
        let applier = ApplyRunner::new(tool.clone());

        Self {
            validator: Validator::new(tool.clone()),
            idempotence: IdempotenceChecker::new(planner.clone(), applier.clone()),
            planner,
            applier,
            engine: AssertionEngine::new(),
            tool,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to cancel scenarios run by this orchestrator.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ScenarioOptions {
        &self.options
    }

    /// Run one scenario to completion and report its verdict.
    ///
    /// Never returns early with an error: every failure is captured in the
    /// report. Use [`ScenarioReport::into_result`] for a single terminal
    /// `Result`.
    pub async fn run(
        &self,
        kind: ScenarioKind,
        config: &RunConfig,
        assertions: &[AssertionExpression],
    ) -> ScenarioReport {
        self.execute(RunId::new(), kind, config, assertions).await
    }

    #[instrument(
        skip_all,
        fields(run_id = %run_id, kind = %kind, module = %config.working_dir().display())
    )]
    async fn execute(
        &self,
        run_id: RunId,
        kind: ScenarioKind,
        config: &RunConfig,
        assertions: &[AssertionExpression],
    ) -> ScenarioReport {
        let started_at = Utc::now();
        let control = RunControl::new(
            self.options.stage_timeout,
            self.options.lock_timeout,
            self.cancel.clone(),
        );
        let mut walk = Walk::default();
        let mut failure: Option<HarnessError> = None;

        info!(
            target: "iac.harness.scenario",
            state = %ScenarioState::Idle,
            assertions = assertions.len(),
            "Starting scenario"
        );

        for step in kind.steps(self.options.idempotence) {
            let state = step.state();
            let started = Instant::now();
            let result = match self.enter(state, step.stage()) {
                Ok(()) => {
                    self.run_step(step, config, &control.for_stage(), assertions, &mut walk)
                        .await
                }
                Err(e) => Err(e),
            };
            walk.record(state, started, &result);
            if let Err(e) = result {
                failure = Some(e);
                break;
            }
        }

        if failure.is_none() {
            if let Some(report) = walk.assertions.as_ref().filter(|r| !r.passed()) {
                failure = Some(HarnessError::AssertionsFailed {
                    failed: report.failed_count(),
                    total: report.len(),
                });
            }
        }

        if failure.is_none()
            && kind.mutates()
            && self.options.teardown == TeardownPolicy::DestroyOnPass
        {
            let state = ScenarioState::TearingDown;
            let started = Instant::now();
            let result = match self.enter(state, Stage::Destroy) {
                Ok(()) => self
                    .applier
                    .destroy(config, &control.for_stage())
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            walk.record(state, started, &result);
            failure = result.err();
        }

        let verdict = if failure.is_none() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        let cause = failure.as_ref().map(|e| {
            FailureCause::new(
                e,
                self.options.failure_message.as_deref(),
                &config.secrets(),
            )
        });

        match &cause {
            None => info!(
                target: "iac.harness.scenario",
                state = %ScenarioState::Done(verdict),
                "Scenario passed"
            ),
            Some(cause) => error!(
                target: "iac.harness.scenario",
                state = %ScenarioState::Done(verdict),
                kind = %cause.kind,
                message = %cause.message,
                "Scenario failed"
            ),
        }
        if failure.as_ref().is_some_and(HarnessError::may_leave_partial_state) {
            warn!(
                target: "iac.harness.scenario",
                module = %config.working_dir().display(),
                "Infrastructure may be partially changed; no rollback is attempted"
            );
        }

        ScenarioReport {
            run_id,
            kind,
            module_dir: config.working_dir().to_path_buf(),
            verdict,
            failure: cause,
            error: failure,
            assertions: walk
                .assertions
                .map(AssertionReport::into_results)
                .unwrap_or_default(),
            stages: walk.records,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Log entry into `state`, unless the scenario was cancelled.
    fn enter(&self, state: ScenarioState, stage: Stage) -> Result<(), HarnessError> {
        if self.cancel.is_cancelled() {
            warn!(target: "iac.harness.scenario", state = %state, "Cancelled before entering state");
            return Err(HarnessError::Cancelled { stage });
        }
        info!(target: "iac.harness.scenario", state = %state, "Entering state");
        Ok(())
    }

    async fn run_step(
        &self,
        step: Step,
        config: &RunConfig,
        control: &RunControl,
        assertions: &[AssertionExpression],
        walk: &mut Walk,
    ) -> Result<(), HarnessError> {
        match step {
            Step::Validate => {
                self.validator.validate(config, control).await?;
            }
            Step::Plan => {
                let result = match self
                    .tool
                    .init(config, control, true, HarnessError::Plan)
                    .await
                {
                    Ok(()) => self.planner.plan(config, control).await?,
                    Err(HarnessError::Plan(detail)) => PlanResult::Error { detail },
                    Err(e) => return Err(e),
                };
                self.check_plan_expectation(&result)?;
                walk.subject = Some(result.to_document());
            }
            Step::Apply => {
                self.tool
                    .init(config, control, true, HarnessError::Apply)
                    .await?;
                let applied = self.applier.apply(config, control).await?.into_success()?;
                walk.subject = Some(applied.outputs);
            }
            Step::CheckIdempotence(strength) => {
                if let Some(second) = self.idempotence.check(config, control, strength).await? {
                    walk.subject = Some(second.outputs);
                }
            }
            Step::Assert => {
                let empty = OutputDocument::new();
                let document = walk.subject.as_ref().unwrap_or(&empty);
                walk.assertions = Some(self.engine.evaluate(document, assertions));
            }
        }
        Ok(())
    }

    fn check_plan_expectation(&self, result: &PlanResult) -> Result<(), HarnessError> {
        match (&self.options.expected_plan_error, result) {
            (None, PlanResult::Error { detail }) => Err(HarnessError::Plan(detail.clone())),
            (None, _) => Ok(()),
            (Some(expected), PlanResult::Error { detail }) if detail.contains(expected.as_str()) => {
                info!(
                    target: "iac.harness.scenario",
                    expected = %expected,
                    "Plan failed as expected"
                );
                Ok(())
            }
            (Some(expected), PlanResult::Error { detail }) => {
                Err(HarnessError::UnexpectedPlanOutcome {
                    expected: expected.clone(),
                    actual: format!("it failed with: {detail}"),
                })
            }
            (Some(expected), other) => Err(HarnessError::UnexpectedPlanOutcome {
                expected: expected.clone(),
                actual: format!("it succeeded ({})", other.label()),
            }),
        }
    }
}
