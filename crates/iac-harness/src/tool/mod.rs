//! Provisioning tool seam.
//!
//! The harness never links against the provisioning engine; it runs it as a
//! subprocess through the [`CommandRunner`] trait. [`ProvisioningTool`] sits on
//! top of a runner and owns everything engine-specific that is not parsing:
//! argument building, retryable-error handling and state-lock detection.

pub mod args;
pub mod process;
pub mod retry;

pub use process::ProcessRunner;
pub use retry::RetryPolicy;

use crate::errors::HarnessError;
use crate::run_config::RunConfig;
use common::secret::{redact, SecretString};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default tool binary.
pub const DEFAULT_TOOL_BINARY: &str = "terraform";

/// Environment applied to every invocation so the tool never prompts.
const AUTOMATION_ENV: [(&str, &str); 2] = [("TF_IN_AUTOMATION", "1"), ("TF_INPUT", "0")];

/// Pattern the tool prints when another process holds the state lock.
const STATE_LOCK_PATTERN: &str = r"(?i)error acquiring the state lock";

/// Lifecycle stage a tool invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Validate,
    Plan,
    Apply,
    Output,
    Destroy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Validate => "validate",
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Output => "output",
            Stage::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// One subprocess call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub stage: Stage,
    /// Values that must never appear in logs.
    pub secrets: Vec<SecretString>,
}

impl ToolInvocation {
    /// Create an invocation with no arguments.
    pub fn new(program: impl Into<String>, stage: Stage, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: AUTOMATION_ENV
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            stage,
            secrets: Vec::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Register values to redact from the rendered command line.
    #[must_use]
    pub fn secrets(mut self, secrets: Vec<SecretString>) -> Self {
        self.secrets = secrets;
        self
    }

    /// The tool subcommand (first argument), if any.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Command line safe for logging.
    pub fn display(&self) -> String {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        redact(&line, &self.secrets)
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if present, otherwise stdout; trimmed.
    pub fn diagnostic_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Execution limits shared by every invocation of a scenario.
///
/// `timeout` is the wall-clock budget of one stage. Without a deadline each
/// invocation gets the full budget; [`RunControl::for_stage`] starts the
/// clock so init, the main command, output retrieval and every retry of a
/// stage draw from the same budget.
#[derive(Debug, Clone)]
pub struct RunControl {
    /// Wall-clock budget for one stage.
    pub timeout: Duration,
    /// How long to wait for the state lock (ours and the tool's).
    pub lock_timeout: Duration,
    pub cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(timeout: Duration, lock_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            timeout,
            lock_timeout,
            cancel,
            deadline: None,
        }
    }

    /// A copy whose stage budget starts now.
    #[must_use]
    pub fn for_stage(&self) -> Self {
        Self {
            deadline: Some(Instant::now() + self.timeout),
            ..self.clone()
        }
    }

    /// Time left in the stage budget, never more than `timeout`.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.timeout),
            None => self.timeout,
        }
    }

    /// Whether the stage budget is used up.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The error for an exhausted budget in `stage`.
    pub fn timeout_error(&self, stage: Stage) -> HarnessError {
        HarnessError::Timeout {
            stage,
            timeout: self.timeout,
        }
    }
}

/// Runs tool invocations (enables mocking).
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one invocation to completion.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Timeout` - the invocation outlived `control.remaining()`
    /// - `HarnessError::Cancelled` - `control.cancel` fired
    /// - `HarnessError::Launch` - the program could not be started
    ///
    /// A non-zero exit is not an error at this level.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        control: &RunControl,
    ) -> Result<ToolOutput, HarnessError>;
}

/// A provisioning tool reachable through a [`CommandRunner`].
#[derive(Clone)]
pub struct ProvisioningTool {
    program: String,
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
}

impl fmt::Debug for ProvisioningTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningTool")
            .field("program", &self.program)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ProvisioningTool {
    /// Create a tool that runs `program` through `runner`.
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
            retry: RetryPolicy::default(),
        }
    }

    /// `terraform` from `PATH`, run as a real subprocess.
    pub fn terraform() -> Self {
        Self::new(DEFAULT_TOOL_BINARY, Arc::new(ProcessRunner::new()))
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Start an invocation for `stage` in the module directory of `config`.
    pub fn invocation(&self, stage: Stage, config: &RunConfig) -> ToolInvocation {
        ToolInvocation::new(self.program.clone(), stage, config.working_dir())
            .secrets(config.secrets())
    }

    /// Run an invocation, retrying transient failures.
    ///
    /// A failed invocation whose output shows the state lock is held by
    /// someone else becomes `LockContention` and is never retried.
    /// `accept_exit` lists extra exit codes that count as success (plan's
    /// "changes present" code).
    #[instrument(skip_all, fields(stage = %invocation.stage))]
    pub async fn invoke(
        &self,
        invocation: &ToolInvocation,
        control: &RunControl,
        accept_exit: &[i32],
    ) -> Result<ToolOutput, HarnessError> {
        let mut attempt: u32 = 0;

        loop {
            if control.expired() {
                warn!(
                    target: "iac.harness.tool",
                    subcommand = invocation.subcommand().unwrap_or_default(),
                    attempt,
                    timeout_secs = control.timeout.as_secs(),
                    "Stage budget exhausted before invocation"
                );
                return Err(control.timeout_error(invocation.stage));
            }

            debug!(
                target: "iac.harness.tool",
                command = %invocation.display(),
                attempt,
                "Invoking provisioning tool"
            );

            let output = self.runner.run(invocation, control).await?;

            if output.success() || accept_exit.contains(&output.exit_code) {
                return Ok(output);
            }

            debug!(
                target: "iac.harness.tool",
                exit_code = output.exit_code,
                stderr = %redact(&output.stderr, &invocation.secrets),
                "Provisioning tool exited with failure"
            );

            if is_lock_contention(&output) {
                warn!(
                    target: "iac.harness.tool",
                    working_dir = %invocation.working_dir.display(),
                    "State lock is held by another run"
                );
                return Err(HarnessError::LockContention {
                    target: invocation.working_dir.display().to_string(),
                });
            }

            let Some(reason) = self.retry.retryable_reason(&output) else {
                return Ok(output);
            };

            if attempt >= self.retry.max_retries() {
                warn!(
                    target: "iac.harness.tool",
                    reason = %reason,
                    attempts = attempt + 1,
                    "Retryable error persisted, giving up"
                );
                return Ok(output);
            }

            let delay = self.retry.delay_for(attempt);
            if delay >= control.remaining() {
                warn!(
                    target: "iac.harness.tool",
                    reason = %reason,
                    attempts = attempt + 1,
                    "Retry delay exceeds the remaining stage budget"
                );
                return Err(control.timeout_error(invocation.stage));
            }
            warn!(
                target: "iac.harness.tool",
                reason = %reason,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retryable error, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = control.cancel.cancelled() => {
                    return Err(HarnessError::Cancelled { stage: invocation.stage });
                }
            }

            attempt += 1;
        }
    }

    /// Initialize the module directory.
    ///
    /// `on_failure` maps the tool diagnostic into the error of the stage the
    /// init serves.
    pub async fn init(
        &self,
        config: &RunConfig,
        control: &RunControl,
        with_backend: bool,
        on_failure: fn(String) -> HarnessError,
    ) -> Result<(), HarnessError> {
        let invocation = self
            .invocation(Stage::Init, config)
            .args(args::init(config, control, with_backend));

        let output = self.invoke(&invocation, control, &[]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(on_failure(format!(
                "init exited with {}: {}",
                output.exit_code,
                output.diagnostic_text()
            )))
        }
    }
}

fn is_lock_contention(output: &ToolOutput) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(STATE_LOCK_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(&output.stderr) || re.is_match(&output.stdout))
}

/// Remove a local artifact, ignoring a missing file.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(target: "iac.harness.tool", path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            target: "iac.harness.tool",
            path = %path.display(),
            error = %e,
            "Failed to remove artifact"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_redacts_secrets() {
        let invocation = ToolInvocation::new("terraform", Stage::Plan, "/tmp/mod")
            .args(["plan", "-var", "password=hunter2"])
            .secrets(vec![SecretString::from("hunter2")]);

        let display = invocation.display();
        assert_eq!(display, "terraform plan -var password=[REDACTED]");
        assert_eq!(invocation.subcommand(), Some("plan"));
    }

    #[test]
    fn test_invocation_sets_automation_env() {
        let invocation = ToolInvocation::new("terraform", Stage::Init, ".");
        assert!(invocation
            .env
            .iter()
            .any(|(k, v)| k == "TF_IN_AUTOMATION" && v == "1"));
        assert!(invocation.env.iter().any(|(k, v)| k == "TF_INPUT" && v == "0"));
    }

    #[test]
    fn test_lock_contention_detection() {
        let output = ToolOutput {
            exit_code: 1,
            stderr: "Error: Error acquiring the state lock\n\nLock Info: ...".to_string(),
            ..ToolOutput::default()
        };
        assert!(is_lock_contention(&output));

        let output = ToolOutput {
            exit_code: 1,
            stderr: "Error: Invalid reference".to_string(),
            ..ToolOutput::default()
        };
        assert!(!is_lock_contention(&output));
    }

    #[test]
    fn test_diagnostic_text_prefers_stderr() {
        let output = ToolOutput {
            exit_code: 1,
            stdout: "stdout text".to_string(),
            stderr: "  stderr text \n".to_string(),
            ..ToolOutput::default()
        };
        assert_eq!(output.diagnostic_text(), "stderr text");

        let output = ToolOutput {
            exit_code: 1,
            stdout: "only stdout\n".to_string(),
            ..ToolOutput::default()
        };
        assert_eq!(output.diagnostic_text(), "only stdout");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Output.to_string(), "output");
        assert_eq!(Stage::Destroy.to_string(), "destroy");
    }
}
