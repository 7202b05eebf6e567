//! Canned provisioning tool output.
//!
//! The JSON shapes match the tool's machine-readable modes closely enough
//! for the harness parsers: `plan -json` / `apply -json` JSON lines,
//! `output -json` and `validate -json` documents.

use iac_harness::run_config::RunConfig;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Variables mirroring a typical GCP module test.
pub const TEST_VARS: [(&str, &str); 3] = [
    ("name_prefix", "t1"),
    ("project", "proj-x"),
    ("org_id", "org-1"),
];

fn line(value: Value) -> String {
    value.to_string()
}

fn version_line() -> String {
    line(json!({
        "@level": "info",
        "@message": "Terraform 1.7.5",
        "type": "version",
        "terraform": "1.7.5",
        "ui": "1.2"
    }))
}

fn change_summary_line(add: u64, change: u64, remove: u64, operation: &str) -> String {
    let verb = if operation == "apply" {
        "Apply complete! Resources"
    } else {
        "Plan"
    };
    line(json!({
        "@level": "info",
        "@message": format!("{verb}: {add} to add, {change} to change, {remove} to destroy."),
        "type": "change_summary",
        "changes": {
            "add": add,
            "change": change,
            "import": 0,
            "remove": remove,
            "operation": operation
        }
    }))
}

/// `plan -json` stream with one `planned_change` per counted change.
pub fn plan_stream(add: u64, change: u64, remove: u64) -> String {
    let mut lines = vec![version_line()];
    let actions = std::iter::repeat("create")
        .take(add as usize)
        .chain(std::iter::repeat("update").take(change as usize))
        .chain(std::iter::repeat("delete").take(remove as usize));
    for (i, action) in actions.enumerate() {
        lines.push(line(json!({
            "@level": "info",
            "type": "planned_change",
            "change": {
                "resource": {
                    "addr": format!("null_resource.r{i}"),
                    "resource_type": "null_resource"
                },
                "action": action
            }
        })));
    }
    lines.push(change_summary_line(add, change, remove, "plan"));
    lines.join("\n")
}

/// Error diagnostic line as the tool emits it in JSON mode.
pub fn diagnostic_line(summary: &str, detail: &str) -> String {
    line(json!({
        "@level": "error",
        "@message": format!("Error: {summary}"),
        "type": "diagnostic",
        "diagnostic": {
            "severity": "error",
            "summary": summary,
            "detail": detail
        }
    }))
}

/// `plan -json` stream of a failed plan.
pub fn plan_error_stream(summary: &str, detail: &str) -> String {
    [version_line(), diagnostic_line(summary, detail)].join("\n")
}

/// `apply -json` stream.
pub fn apply_stream(add: u64, change: u64, remove: u64) -> String {
    [version_line(), change_summary_line(add, change, remove, "apply")].join("\n")
}

/// `apply -json` stream of a failed apply.
pub fn apply_error_stream(summary: &str, detail: &str) -> String {
    [version_line(), diagnostic_line(summary, detail)].join("\n")
}

/// `output -json` document; every output is non-sensitive.
pub fn output_json(outputs: &[(&str, Value)]) -> String {
    output_json_with_sensitive(outputs, &[])
}

/// `output -json` document with the named outputs marked sensitive.
pub fn output_json_with_sensitive(outputs: &[(&str, Value)], sensitive: &[&str]) -> String {
    let document: serde_json::Map<String, Value> = outputs
        .iter()
        .map(|(name, value)| {
            let kind = match value {
                Value::String(_) => json!("string"),
                Value::Number(_) => json!("number"),
                Value::Bool(_) => json!("bool"),
                Value::Array(_) => json!(["list", "dynamic"]),
                Value::Object(_) => json!(["object", {}]),
                Value::Null => json!("dynamic"),
            };
            (
                (*name).to_string(),
                json!({
                    "sensitive": sensitive.contains(name),
                    "type": kind,
                    "value": value
                }),
            )
        })
        .collect();
    Value::Object(document).to_string()
}

/// `validate -json` document for a valid module.
pub fn validate_ok() -> String {
    json!({
        "format_version": "1.0",
        "valid": true,
        "error_count": 0,
        "warning_count": 0,
        "diagnostics": []
    })
    .to_string()
}

/// `validate -json` document with one error diagnostic per summary.
pub fn validate_errors(summaries: &[&str]) -> String {
    let diagnostics: Vec<Value> = summaries
        .iter()
        .map(|summary| {
            json!({
                "severity": "error",
                "summary": summary,
                "detail": ""
            })
        })
        .collect();
    json!({
        "format_version": "1.0",
        "valid": false,
        "error_count": summaries.len(),
        "warning_count": 0,
        "diagnostics": diagnostics
    })
    .to_string()
}

/// Scratch module directory with a minimal module and `example.tfvars`.
pub struct TestModule {
    dir: TempDir,
}

impl TestModule {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create module dir");
        std::fs::write(
            dir.path().join("main.tf"),
            "variable \"name_prefix\" {}\nvariable \"project\" {}\nvariable \"org_id\" {}\n",
        )
        .expect("write main.tf");
        std::fs::write(dir.path().join("example.tfvars"), "name_prefix = \"file\"\n")
            .expect("write example.tfvars");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Files left in the module directory, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.dir.path())
            .expect("read module dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect();
        files.sort();
        files
    }

    /// Run config with `example.tfvars` and [`TEST_VARS`].
    pub fn run_config(&self) -> RunConfig {
        run_config(self.path())
    }
}

impl Default for TestModule {
    fn default() -> Self {
        Self::new()
    }
}

/// Run config for `dir` with `example.tfvars` and [`TEST_VARS`].
pub fn run_config(dir: impl Into<PathBuf>) -> RunConfig {
    RunConfig::builder(dir)
        .var_file("example.tfvars")
        .vars(TEST_VARS)
        .lock(true)
        .build()
}
