//! Output documents and the output collector.
//!
//! The collector runs the tool's output-retrieval mode against an already
//! provisioned module instance and parses the response into an
//! [`OutputDocument`], the substrate assertions are evaluated against.

use crate::assertion::{OutputPath, PathSegment};
use crate::errors::HarnessError;
use crate::run_config::RunConfig;
use crate::tool::{args, ProvisioningTool, RunControl, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, instrument};

/// A typed output value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<OutputValue>),
    Map(BTreeMap<String, OutputValue>),
}

impl OutputValue {
    /// Name of the value's type, for failure messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutputValue::Null => "null",
            OutputValue::Bool(_) => "bool",
            OutputValue::Number(_) => "number",
            OutputValue::String(_) => "string",
            OutputValue::List(_) => "list",
            OutputValue::Map(_) => "map",
        }
    }

    /// Null, `""`, `[]` and `{}` are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            OutputValue::Null => true,
            OutputValue::String(s) => s.is_empty(),
            OutputValue::List(items) => items.is_empty(),
            OutputValue::Map(entries) => entries.is_empty(),
            OutputValue::Bool(_) | OutputValue::Number(_) => false,
        }
    }

    /// Element count for strings (chars), lists and maps.
    pub fn len(&self) -> Option<usize> {
        match self {
            OutputValue::String(s) => Some(s.chars().count()),
            OutputValue::List(items) => Some(items.len()),
            OutputValue::Map(entries) => Some(entries.len()),
            OutputValue::Null | OutputValue::Bool(_) | OutputValue::Number(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OutputValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Follow one path segment.
    pub fn child(&self, segment: &PathSegment) -> Option<&OutputValue> {
        match (self, segment) {
            (OutputValue::Map(entries), PathSegment::Key(key)) => entries.get(key),
            (OutputValue::List(items), PathSegment::Index(i)) => items.get(*i),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for OutputValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => OutputValue::Null,
            serde_json::Value::Bool(b) => OutputValue::Bool(b),
            serde_json::Value::Number(n) => OutputValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => OutputValue::String(s),
            serde_json::Value::Array(items) => {
                OutputValue::List(items.into_iter().map(OutputValue::from).collect())
            }
            serde_json::Value::Object(entries) => OutputValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, OutputValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for OutputValue {
    fn from(value: &str) -> Self {
        OutputValue::String(value.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(value: String) -> Self {
        OutputValue::String(value)
    }
}

impl From<bool> for OutputValue {
    fn from(value: bool) -> Self {
        OutputValue::Bool(value)
    }
}

impl From<f64> for OutputValue {
    fn from(value: f64) -> Self {
        OutputValue::Number(value)
    }
}

impl From<i64> for OutputValue {
    #[allow(clippy::cast_precision_loss)] // Counts and ports, far below 2^52
    fn from(value: i64) -> Self {
        OutputValue::Number(value as f64)
    }
}

impl From<u64> for OutputValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        OutputValue::Number(value as f64)
    }
}

impl From<i32> for OutputValue {
    fn from(value: i32) -> Self {
        OutputValue::Number(f64::from(value))
    }
}

impl<T: Into<OutputValue>> From<Vec<T>> for OutputValue {
    fn from(value: Vec<T>) -> Self {
        OutputValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

/// Named outputs of one module instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputDocument {
    values: BTreeMap<String, OutputValue>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    sensitive: BTreeSet<String>,
}

/// One entry of `output -json`.
#[derive(Debug, Deserialize)]
struct RawOutput {
    value: serde_json::Value,
    #[serde(default)]
    sensitive: bool,
}

impl OutputDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the tool's `output -json` document.
    ///
    /// Blank input is an empty document.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Collection` if the text is not an output map.
    pub fn from_tool_json(text: &str) -> Result<Self, HarnessError> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }

        let raw: BTreeMap<String, RawOutput> = serde_json::from_str(text).map_err(|e| {
            HarnessError::Collection(format!("unparseable output document: {e}"))
        })?;

        let mut document = Self::new();
        for (name, output) in raw {
            if output.sensitive {
                document.sensitive.insert(name.clone());
            }
            document.values.insert(name, OutputValue::from(output.value));
        }
        Ok(document)
    }

    /// Add or replace an output.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OutputValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace an output.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OutputValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    /// Resolve a path, starting at a named output.
    pub fn resolve(&self, path: &OutputPath) -> Option<&OutputValue> {
        let mut segments = path.segments().iter();
        let mut current = match segments.next()? {
            PathSegment::Key(name) => self.values.get(name)?,
            PathSegment::Index(_) => return None,
        };
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name)
    }

    /// Output names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Retrieves the output document of a provisioned module instance.
#[derive(Debug, Clone)]
pub struct OutputCollector {
    tool: ProvisioningTool,
}

impl OutputCollector {
    pub fn new(tool: ProvisioningTool) -> Self {
        Self { tool }
    }

    /// Run output retrieval and parse the result.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Collection` - non-zero exit or unparseable data
    /// - `HarnessError::Timeout` / `Cancelled` / `Launch` from the runner
    #[instrument(skip_all, fields(module = %config.working_dir().display()))]
    pub async fn collect(
        &self,
        config: &RunConfig,
        control: &RunControl,
    ) -> Result<OutputDocument, HarnessError> {
        let invocation = self
            .tool
            .invocation(Stage::Output, config)
            .args(args::output());

        let output = self.tool.invoke(&invocation, control, &[]).await?;
        if !output.success() {
            return Err(HarnessError::Collection(format!(
                "output exited with {}: {}",
                output.exit_code,
                output.diagnostic_text()
            )));
        }

        let document = OutputDocument::from_tool_json(&output.stdout)?;
        info!(
            target: "iac.harness.output",
            outputs = document.len(),
            "Collected module outputs"
        );
        debug!(
            target: "iac.harness.output",
            names = ?document.names().collect::<Vec<_>>(),
            "Output names"
        );
        Ok(document)
    }
}
