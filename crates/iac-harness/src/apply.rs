//! Apply and destroy.
//!
//! Apply mutates real infrastructure. A failed apply is reported as an
//! [`ApplyResult`] with `success == false` and the captured tool diagnostic;
//! nothing is rolled back. The tool is not transactional and neither is the
//! harness, so partially-created resources are left for manual or
//! out-of-band cleanup.

use crate::errors::HarnessError;
use crate::output::{OutputCollector, OutputDocument};
use crate::plan::{ChangeSummary, PlanResult, ToolStream};
use crate::run_config::RunConfig;
use crate::tool::{args, ProvisioningTool, RunControl, Stage};
use tracing::{error, info, instrument};

/// Outcome of one apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    pub success: bool,
    /// Outputs collected after a successful apply; empty on failure.
    pub outputs: OutputDocument,
    /// What the apply changed.
    pub changes: ChangeSummary,
    /// Tool diagnostic text of a failed apply.
    pub error: Option<String>,
}

impl ApplyResult {
    fn failed(detail: String, changes: ChangeSummary) -> Self {
        Self {
            success: false,
            outputs: OutputDocument::new(),
            changes,
            error: Some(detail),
        }
    }

    /// The apply's changes classified like a plan, for re-apply checks.
    pub fn change_result(&self) -> PlanResult {
        if self.success {
            PlanResult::from_summary(self.changes.clone())
        } else {
            PlanResult::Error {
                detail: self.error.clone().unwrap_or_default(),
            }
        }
    }

    /// Turn a failed apply into `HarnessError::Apply`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Apply` carrying the tool diagnostic when
    /// `success` is false.
    pub fn into_success(self) -> Result<Self, HarnessError> {
        if self.success {
            Ok(self)
        } else {
            Err(HarnessError::Apply(self.error.unwrap_or_default()))
        }
    }
}

/// Runs the tool's apply and destroy modes.
#[derive(Debug, Clone)]
pub struct ApplyRunner {
    tool: ProvisioningTool,
    collector: OutputCollector,
}

impl ApplyRunner {
    pub fn new(tool: ProvisioningTool) -> Self {
        Self {
            collector: OutputCollector::new(tool.clone()),
            tool,
        }
    }

    /// Apply `config` and, on success, collect its outputs.
    ///
    /// The state lock is held for the apply only; output retrieval is
    /// read-only.
    ///
    /// # Errors
    ///
    /// A failed apply is `Ok` with `success == false`. `Err` is returned for
    /// `Timeout`, `LockContention`, `Cancelled`, `Launch`, and `Collection`
    /// when outputs cannot be read after a successful apply.
    #[instrument(skip_all, fields(module = %config.working_dir().display()))]
    pub async fn apply(
        &self,
        config: &RunConfig,
        control: &RunControl,
    ) -> Result<ApplyResult, HarnessError> {
        let output = {
            let _guard = if config.lock() {
                Some(config.state_lock().acquire(control.lock_timeout).await?)
            } else {
                None
            };

            let invocation = self
                .tool
                .invocation(Stage::Apply, config)
                .args(args::apply(config, control));
            self.tool.invoke(&invocation, control, &[]).await?
        };

        let stream = ToolStream::parse(&output.stdout);
        let changes = stream.change_summary();

        if !output.success() {
            let detail = stream.error_detail(&output.stderr);
            error!(
                target: "iac.harness.apply",
                exit_code = output.exit_code,
                detail = %detail,
                "Apply failed; infrastructure may be partially changed"
            );
            return Ok(ApplyResult::failed(detail, changes));
        }

        info!(target: "iac.harness.apply", changes = %changes, "Apply complete");

        let outputs = self.collector.collect(config, control).await?;
        Ok(ApplyResult {
            success: true,
            outputs,
            changes,
            error: None,
        })
    }

    /// Destroy everything `config` manages.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Destroy` with the tool diagnostic on failure,
    /// or the runner's `Timeout`/`LockContention`/`Cancelled`/`Launch`.
    #[instrument(skip_all, fields(module = %config.working_dir().display()))]
    pub async fn destroy(
        &self,
        config: &RunConfig,
        control: &RunControl,
    ) -> Result<ChangeSummary, HarnessError> {
        let _guard = if config.lock() {
            Some(config.state_lock().acquire(control.lock_timeout).await?)
        } else {
            None
        };

        let invocation = self
            .tool
            .invocation(Stage::Destroy, config)
            .args(args::destroy(config, control));
        let output = self.tool.invoke(&invocation, control, &[]).await?;

        let stream = ToolStream::parse(&output.stdout);
        if !output.success() {
            let detail = stream.error_detail(&output.stderr);
            error!(target: "iac.harness.apply", detail = %detail, "Destroy failed");
            return Err(HarnessError::Destroy(detail));
        }

        let summary = stream.change_summary();
        info!(target: "iac.harness.apply", removed = summary.remove, "Destroy complete");
        Ok(summary)
    }
}
