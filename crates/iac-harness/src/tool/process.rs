//! Real subprocess runner.

use super::{CommandRunner, RunControl, ToolInvocation, ToolOutput};
use crate::errors::HarnessError;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs invocations as child processes.
///
/// The child is killed when its future is dropped, so a timeout or a
/// cancellation never leaves a stray tool process holding the state lock.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        control: &RunControl,
    ) -> Result<ToolOutput, HarnessError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| HarnessError::Launch {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        let started = Instant::now();
        let budget = control.remaining();

        tokio::select! {
            result = tokio::time::timeout(budget, child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => {
                        let duration = started.elapsed();
                        let exit_code = output.status.code().unwrap_or(-1);
                        debug!(
                            target: "iac.harness.tool",
                            stage = %invocation.stage,
                            exit_code,
                            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                            "Provisioning tool finished"
                        );
                        Ok(ToolOutput {
                            exit_code,
                            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                            duration,
                        })
                    }
                    Ok(Err(e)) => Err(HarnessError::Launch {
                        program: invocation.program.clone(),
                        reason: format!("failed waiting for process: {e}"),
                    }),
                    Err(_) => {
                        warn!(
                            target: "iac.harness.tool",
                            stage = %invocation.stage,
                            subcommand = invocation.subcommand().unwrap_or_default(),
                            budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                            "Provisioning tool exceeded the stage budget, killing process"
                        );
                        Err(control.timeout_error(invocation.stage))
                    }
                }
            }
            () = control.cancel.cancelled() => {
                warn!(
                    target: "iac.harness.tool",
                    stage = %invocation.stage,
                    "Scenario cancelled, killing provisioning tool without rollback"
                );
                Err(HarnessError::Cancelled { stage: invocation.stage })
            }
        }
    }
}
