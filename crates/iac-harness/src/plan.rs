//! Dry-run planning and change-set classification.
//!
//! The tool's plan mode is run with machine-readable (JSON lines) output and
//! a detailed exit code: `0` no changes, `2` changes present, anything else
//! an error. The `change_summary` message is authoritative for the counts;
//! a plan reporting zero additions, changes and removals is always
//! [`PlanResult::NoChanges`].

use crate::errors::HarnessError;
use crate::output::{OutputDocument, OutputValue};
use crate::run_config::RunConfig;
use crate::tool::{args, remove_artifact, ProvisioningTool, RunControl, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Exit code the tool uses for "succeeded, changes present".
pub const EXIT_CHANGES_PRESENT: i32 = 2;

/// One resource-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub address: String,
    pub action: String,
}

/// Counts of proposed or applied changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub add: u64,
    pub change: u64,
    pub remove: u64,
    /// Resource-level detail, when the tool reported it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<PlannedChange>,
}

impl ChangeSummary {
    pub fn new(add: u64, change: u64, remove: u64) -> Self {
        Self {
            add,
            change,
            remove,
            resources: Vec::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.add + self.change + self.remove
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.remove
        )?;
        if !self.resources.is_empty() {
            let detail = self
                .resources
                .iter()
                .map(|r| format!("{} ({})", r.address, r.action))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " [{detail}]")?;
        }
        Ok(())
    }
}

/// Classification of one plan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult {
    NoChanges,
    ChangesPending { count: u64, summary: ChangeSummary },
    Error { detail: String },
}

impl PlanResult {
    /// Classify a change summary from a successful run.
    pub fn from_summary(summary: ChangeSummary) -> Self {
        if summary.is_empty() {
            PlanResult::NoChanges
        } else {
            PlanResult::ChangesPending {
                count: summary.total(),
                summary,
            }
        }
    }

    /// Classify a finished plan invocation.
    pub fn classify(exit_code: i32, stream: &ToolStream, stderr: &str) -> Self {
        if exit_code != 0 && exit_code != EXIT_CHANGES_PRESENT {
            return PlanResult::Error {
                detail: stream.error_detail(stderr),
            };
        }

        let summary = stream.change_summary();
        if exit_code == EXIT_CHANGES_PRESENT && summary.is_empty() {
            warn!(
                target: "iac.harness.plan",
                "Tool reported changes but no resource changes; treating as no changes"
            );
        }
        Self::from_summary(summary)
    }

    pub fn is_no_changes(&self) -> bool {
        matches!(self, PlanResult::NoChanges)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlanResult::Error { .. })
    }

    /// Stable name of the classification.
    pub fn label(&self) -> &'static str {
        match self {
            PlanResult::NoChanges => "no_changes",
            PlanResult::ChangesPending { .. } => "changes_pending",
            PlanResult::Error { .. } => "error",
        }
    }

    /// Plan-level facts as a document for plan-scenario assertions:
    /// `add`, `change`, `remove`, `total`, `classification`, `resources`,
    /// `actions` and, for errors, `error`.
    pub fn to_document(&self) -> OutputDocument {
        let empty = ChangeSummary::default();
        let summary = match self {
            PlanResult::ChangesPending { summary, .. } => summary,
            PlanResult::NoChanges | PlanResult::Error { .. } => &empty,
        };

        let actions: BTreeMap<String, OutputValue> = summary
            .resources
            .iter()
            .map(|r| (r.address.clone(), OutputValue::from(r.action.as_str())))
            .collect();
        let resources: Vec<&str> = summary.resources.iter().map(|r| r.address.as_str()).collect();

        let mut document = OutputDocument::new()
            .with("add", summary.add)
            .with("change", summary.change)
            .with("remove", summary.remove)
            .with("total", summary.total())
            .with("classification", self.label())
            .with("resources", resources)
            .with("actions", OutputValue::Map(actions));
        if let PlanResult::Error { detail } = self {
            document.insert("error", detail.as_str());
        }
        document
    }
}

/// Facts extracted from a JSON-lines stream of plan, apply or destroy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolStream {
    /// `change_summary` counts, if the message was present.
    pub summary: Option<ChangeSummary>,
    /// Resource changes from `planned_change` / `apply_complete` messages.
    pub changes: Vec<PlannedChange>,
    /// Summaries (and details) of error diagnostics.
    pub errors: Vec<String>,
}

impl ToolStream {
    /// Parse JSON lines; lines that are not JSON objects are ignored.
    pub fn parse(text: &str) -> Self {
        let mut stream = Self::default();

        for line in text.lines() {
            let Ok(message) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                continue;
            };

            match message.get("type").and_then(serde_json::Value::as_str) {
                Some("change_summary") => {
                    let changes = message.get("changes");
                    let count = |key: &str| {
                        changes
                            .and_then(|c| c.get(key))
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or(0)
                    };
                    stream.summary = Some(ChangeSummary::new(
                        count("add"),
                        count("change"),
                        count("remove"),
                    ));
                }
                Some("planned_change" | "apply_complete") => {
                    let change = message.get("hook").or_else(|| message.get("change"));
                    let address = change
                        .and_then(|c| c.get("resource"))
                        .and_then(|r| r.get("addr"))
                        .and_then(serde_json::Value::as_str);
                    let action = change
                        .and_then(|c| c.get("action"))
                        .and_then(serde_json::Value::as_str);
                    if let (Some(address), Some(action)) = (address, action) {
                        if !stream.changes.iter().any(|c| c.address == address) {
                            stream.changes.push(PlannedChange {
                                address: address.to_string(),
                                action: action.to_string(),
                            });
                        }
                    }
                }
                Some("diagnostic") => {
                    let diagnostic = message.get("diagnostic");
                    let severity = diagnostic
                        .and_then(|d| d.get("severity"))
                        .and_then(serde_json::Value::as_str);
                    if severity == Some("error") {
                        let summary = diagnostic
                            .and_then(|d| d.get("summary"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("unknown error");
                        let detail = diagnostic
                            .and_then(|d| d.get("detail"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("");
                        stream.errors.push(if detail.is_empty() {
                            summary.to_string()
                        } else {
                            format!("{summary}: {detail}")
                        });
                    }
                }
                _ => {}
            }
        }

        stream
    }

    /// Counts with resource detail attached. Without a `change_summary`
    /// message, counts are derived from the resource changes.
    pub fn change_summary(&self) -> ChangeSummary {
        let mut summary = self.summary.clone().unwrap_or_else(|| {
            let mut derived = ChangeSummary::default();
            for change in &self.changes {
                match change.action.as_str() {
                    "create" => derived.add += 1,
                    "update" | "move" => derived.change += 1,
                    "delete" => derived.remove += 1,
                    "replace" => {
                        derived.add += 1;
                        derived.remove += 1;
                    }
                    _ => {}
                }
            }
            derived
        });
        summary.resources.clone_from(&self.changes);
        summary
    }

    /// Error diagnostics, falling back to raw stderr.
    pub fn error_detail(&self, stderr: &str) -> String {
        if self.errors.is_empty() {
            let stderr = stderr.trim();
            if stderr.is_empty() {
                "tool exited with an error and no diagnostics".to_string()
            } else {
                stderr.to_string()
            }
        } else {
            self.errors.join("; ")
        }
    }
}

/// Runs the tool's dry-run mode.
#[derive(Debug, Clone)]
pub struct PlanRunner {
    tool: ProvisioningTool,
}

impl PlanRunner {
    pub fn new(tool: ProvisioningTool) -> Self {
        Self { tool }
    }

    /// Plan `config` and classify the result.
    ///
    /// Holds the state lock for the duration of the plan when the config's
    /// lock flag is set. The local plan file is removed before returning.
    ///
    /// # Errors
    ///
    /// Tool failures are returned as `Ok(PlanResult::Error)`. `Err` is
    /// reserved for `Timeout`, `LockContention`, `Cancelled` and `Launch`.
    #[instrument(skip_all, fields(module = %config.working_dir().display()))]
    pub async fn plan(
        &self,
        config: &RunConfig,
        control: &RunControl,
    ) -> Result<PlanResult, HarnessError> {
        let _guard = if config.lock() {
            Some(config.state_lock().acquire(control.lock_timeout).await?)
        } else {
            None
        };

        let plan_file = config
            .working_dir()
            .join(format!(".iac-harness-{}.tfplan", Uuid::new_v4().simple()));
        let invocation = self
            .tool
            .invocation(Stage::Plan, config)
            .args(args::plan(config, control, &plan_file));

        let result = self
            .tool
            .invoke(&invocation, control, &[EXIT_CHANGES_PRESENT])
            .await;
        remove_artifact(&plan_file).await;
        let output = result?;

        let stream = ToolStream::parse(&output.stdout);
        let result = PlanResult::classify(output.exit_code, &stream, &output.stderr);

        match &result {
            PlanResult::NoChanges => {
                info!(target: "iac.harness.plan", "Plan reports no changes");
            }
            PlanResult::ChangesPending { count, summary } => {
                info!(target: "iac.harness.plan", count, summary = %summary, "Plan reports pending changes");
            }
            PlanResult::Error { detail } => {
                warn!(target: "iac.harness.plan", exit_code = output.exit_code, detail = %detail, "Plan failed");
            }
        }

        Ok(result)
    }
}
