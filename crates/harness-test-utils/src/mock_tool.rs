//! Scripted provisioning tool.
//!
//! Responses are queued per [`Stage`]. When a stage's queue is empty the
//! stage's default response is used, and without a default the invocation
//! succeeds with empty output, which every harness parser reads as "nothing
//! to report" (valid module, no changes, no outputs).
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = MockTool::new()
//!     .with(Stage::Apply, MockResponse::apply(2, 0, 0))
//!     .with(Stage::Output, MockResponse::outputs(&[("vpc_id", json!("vpc-123"))]));
//! let tool = mock.tool();
//! // ... run a scenario ...
//! assert_eq!(mock.call_count(Stage::Apply), 1);
//! ```

use crate::fixtures;
use async_trait::async_trait;
use iac_harness::errors::HarnessError;
use iac_harness::tool::{
    CommandRunner, ProvisioningTool, RetryPolicy, RunControl, Stage, ToolInvocation, ToolOutput,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// The process ran and exited.
    Output(ToolOutput),
    /// The runner itself failed (timeout, launch error, ...).
    Error(HarnessError),
    /// Block until the invocation times out or is cancelled.
    Hang,
    /// Take `delay` of the stage budget, then answer with `then`.
    Delayed {
        delay: Duration,
        then: Box<MockResponse>,
    },
}

impl MockResponse {
    /// Exit 0 with `stdout`.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        MockResponse::Output(ToolOutput {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::from_millis(1),
        })
    }

    /// Exit 1 with `stderr`.
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self::exit(1, "", stderr)
    }

    /// Successful plan; exit 2 when anything changes.
    pub fn plan(add: u64, change: u64, remove: u64) -> Self {
        let code = if add + change + remove == 0 { 0 } else { 2 };
        Self::exit(code, fixtures::plan_stream(add, change, remove), "")
    }

    /// Failed plan with one error diagnostic.
    pub fn plan_error(summary: &str, detail: &str) -> Self {
        Self::exit(1, fixtures::plan_error_stream(summary, detail), "")
    }

    pub fn apply(add: u64, change: u64, remove: u64) -> Self {
        Self::success(fixtures::apply_stream(add, change, remove))
    }

    /// Failed apply with one error diagnostic.
    pub fn apply_error(summary: &str, detail: &str) -> Self {
        Self::exit(1, fixtures::apply_error_stream(summary, detail), "")
    }

    pub fn outputs(outputs: &[(&str, Value)]) -> Self {
        Self::success(fixtures::output_json(outputs))
    }

    pub fn validate_ok() -> Self {
        Self::success(fixtures::validate_ok())
    }

    pub fn validate_errors(summaries: &[&str]) -> Self {
        Self::exit(1, fixtures::validate_errors(summaries), "")
    }

    /// The backend lock is held by another process.
    pub fn lock_held() -> Self {
        Self::failure(
            "Error: Error acquiring the state lock\n\nLock Info:\n  ID: 6f1c\n  Who: ci@runner",
        )
    }

    /// A transient registry failure matched by the default retry table.
    pub fn transient() -> Self {
        Self::failure("Error: Failed to query available provider packages")
    }

    /// This response, answered after `delay`.
    pub fn after(self, delay: Duration) -> Self {
        MockResponse::Delayed {
            delay,
            then: Box::new(self),
        }
    }
}

/// Scripted [`CommandRunner`] that records every invocation.
#[derive(Default)]
pub struct MockTool {
    scripts: Mutex<HashMap<Stage, VecDeque<MockResponse>>>,
    defaults: Mutex<HashMap<Stage, MockResponse>>,
    calls: Mutex<Vec<ToolInvocation>>,
    call_count: AtomicUsize,
}

impl MockTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `response` for the next unanswered call of `stage`.
    pub fn with(self: Arc<Self>, stage: Stage, response: MockResponse) -> Arc<Self> {
        self.push(stage, response);
        self
    }

    /// Answer every otherwise unscripted call of `stage` with `response`.
    pub fn with_default(self: Arc<Self>, stage: Stage, response: MockResponse) -> Arc<Self> {
        self.defaults.lock().unwrap().insert(stage, response);
        self
    }

    pub fn push(&self, stage: Stage, response: MockResponse) {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(response);
    }

    /// A `terraform` tool backed by this mock, retrying with a 1ms delay.
    pub fn tool(self: &Arc<Self>) -> ProvisioningTool {
        ProvisioningTool::new("terraform", Arc::clone(self) as Arc<dyn CommandRunner>)
            .with_retry_policy(RetryPolicy::default().with_delay(Duration::from_millis(1)))
    }

    /// Total number of invocations.
    pub fn total_calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .count()
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage: Stage) -> Vec<ToolInvocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.stage == stage)
            .collect()
    }

    /// Stages invoked, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
    }

    fn next_response(&self, stage: Stage) -> MockResponse {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        scripted
            .or_else(|| self.defaults.lock().unwrap().get(&stage).cloned())
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockTool {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        control: &RunControl,
    ) -> Result<ToolOutput, HarnessError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(invocation.clone());

        match self.next_response(invocation.stage) {
            MockResponse::Output(output) => Ok(output),
            MockResponse::Error(error) => Err(error),
            MockResponse::Hang => wait(invocation, control, None).await,
            MockResponse::Delayed { delay, then } => {
                wait(invocation, control, Some(delay)).await?;
                match *then {
                    MockResponse::Output(output) => Ok(output),
                    MockResponse::Error(error) => Err(error),
                    MockResponse::Hang | MockResponse::Delayed { .. } => {
                        wait(invocation, control, None).await
                    }
                }
            }
        }
    }
}

/// Sleep for `delay` (forever when `None`) the way a real process runs:
/// bounded by the remaining stage budget and interrupted by cancellation.
async fn wait(
    invocation: &ToolInvocation,
    control: &RunControl,
    delay: Option<Duration>,
) -> Result<ToolOutput, HarnessError> {
    let budget = control.remaining();
    let runs_out = delay.map_or(true, |delay| delay >= budget);
    tokio::select! {
        () = tokio::time::sleep(delay.unwrap_or(budget).min(budget)) => {
            if runs_out {
                Err(control.timeout_error(invocation.stage))
            } else {
                Ok(ToolOutput::default())
            }
        }
        () = control.cancel.cancelled() => Err(HarnessError::Cancelled {
            stage: invocation.stage,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> RunControl {
        RunControl::new(
            Duration::from_millis(20),
            Duration::from_millis(20),
            Default::default(),
        )
    }

    fn invocation(stage: Stage) -> ToolInvocation {
        ToolInvocation::new("terraform", stage, "/tmp/mod")
    }

    #[tokio::test]
    async fn test_scripted_then_default_then_empty_success() {
        let mock = MockTool::new()
            .with(Stage::Plan, MockResponse::plan(1, 0, 0))
            .with_default(Stage::Plan, MockResponse::plan(0, 0, 0));
        let control = control();

        let first = mock.run(&invocation(Stage::Plan), &control).await.unwrap();
        assert_eq!(first.exit_code, 2);
        let second = mock.run(&invocation(Stage::Plan), &control).await.unwrap();
        assert_eq!(second.exit_code, 0);
        let apply = mock.run(&invocation(Stage::Apply), &control).await.unwrap();
        assert!(apply.stdout.is_empty());

        assert_eq!(mock.total_calls(), 3);
        assert_eq!(mock.call_count(Stage::Plan), 2);
        assert_eq!(mock.stages(), vec![Stage::Plan, Stage::Plan, Stage::Apply]);
    }

    #[tokio::test]
    async fn test_delayed_response_within_budget() {
        let mock = MockTool::new().with(
            Stage::Plan,
            MockResponse::plan(1, 0, 0).after(Duration::from_millis(5)),
        );
        let output = mock.run(&invocation(Stage::Plan), &control()).await.unwrap();
        assert_eq!(output.exit_code, 2);
    }

    #[tokio::test]
    async fn test_delayed_response_past_budget_times_out() {
        let mock = MockTool::new().with(
            Stage::Plan,
            MockResponse::plan(1, 0, 0).after(Duration::from_secs(5)),
        );
        let result = mock.run(&invocation(Stage::Plan), &control()).await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_hang_times_out() {
        let mock = MockTool::new().with(Stage::Apply, MockResponse::Hang);
        let result = mock.run(&invocation(Stage::Apply), &control()).await;
        assert!(matches!(
            result,
            Err(HarnessError::Timeout {
                stage: Stage::Apply,
                ..
            })
        ));
    }
}
