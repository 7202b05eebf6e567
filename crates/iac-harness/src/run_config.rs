//! Run configuration for one scenario.
//!
//! A [`RunConfig`] is immutable once built. Variable overrides are applied
//! after variable files, so an override always wins over a file-sourced
//! value for the same name.

use crate::state_lock::{StateLock, StateLockRegistry};
use common::secret::{ExposeSecret, SecretString, REDACTED};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A module input variable value.
#[derive(Clone)]
pub enum VarValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<VarValue>),
    Map(BTreeMap<String, VarValue>),
    /// Passed to the tool verbatim but redacted everywhere else.
    Secret(SecretString),
}

impl VarValue {
    /// Render as a `-var` value. Top-level strings are passed raw; nested
    /// values use the tool's literal syntax.
    pub fn render(&self) -> String {
        match self {
            VarValue::String(s) => s.clone(),
            VarValue::Secret(s) => s.expose_secret().to_string(),
            other => other.render_literal(false),
        }
    }

    fn render_literal(&self, redacted: bool) -> String {
        match self {
            VarValue::String(s) => quote(s),
            VarValue::Secret(_) if redacted => REDACTED.to_string(),
            VarValue::Secret(s) => quote(s.expose_secret()),
            VarValue::Number(n) => n.to_string(),
            VarValue::Bool(b) => b.to_string(),
            VarValue::List(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(|v| v.render_literal(redacted))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            VarValue::Map(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{} = {}", quote(k), v.render_literal(redacted)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn collect_secrets(&self, out: &mut Vec<SecretString>) {
        match self {
            VarValue::Secret(s) => out.push(s.clone()),
            VarValue::List(items) => items.iter().for_each(|v| v.collect_secrets(out)),
            VarValue::Map(entries) => entries.values().for_each(|v| v.collect_secrets(out)),
            VarValue::String(_) | VarValue::Number(_) | VarValue::Bool(_) => {}
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Debug never shows secret values.
impl fmt::Debug for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_literal(true))
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::String(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<i64> for VarValue {
    #[allow(clippy::cast_precision_loss)] // Module inputs are far below 2^52
    fn from(value: i64) -> Self {
        VarValue::Number(value as f64)
    }
}

impl From<i32> for VarValue {
    fn from(value: i32) -> Self {
        VarValue::Number(f64::from(value))
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Number(value)
    }
}

impl From<SecretString> for VarValue {
    fn from(value: SecretString) -> Self {
        VarValue::Secret(value)
    }
}

impl<T: Into<VarValue>> From<Vec<T>> for VarValue {
    fn from(value: Vec<T>) -> Self {
        VarValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// Inputs for one scenario run against one module instance.
#[derive(Debug, Clone)]
pub struct RunConfig {
    working_dir: PathBuf,
    var_files: Vec<PathBuf>,
    vars: BTreeMap<String, VarValue>,
    lock: bool,
    upgrade: bool,
    state_lock: StateLock,
}

impl RunConfig {
    /// Start building a config for the module in `working_dir`.
    pub fn builder(working_dir: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder {
            working_dir: working_dir.into(),
            var_files: Vec::new(),
            vars: BTreeMap::new(),
            lock: true,
            upgrade: false,
            state_lock: None,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Variable files in the order they are applied.
    pub fn var_files(&self) -> &[PathBuf] {
        &self.var_files
    }

    /// Variable overrides, applied after all files.
    pub fn vars(&self) -> &BTreeMap<String, VarValue> {
        &self.vars
    }

    /// Whether plan/apply serialize on the state lock.
    pub fn lock(&self) -> bool {
        self.lock
    }

    /// Whether init refreshes provider and module dependencies.
    pub fn upgrade(&self) -> bool {
        self.upgrade
    }

    /// Handle to the state lock for this target.
    pub fn state_lock(&self) -> &StateLock {
        &self.state_lock
    }

    /// All secret variable values, for redaction.
    pub fn secrets(&self) -> Vec<SecretString> {
        let mut secrets = Vec::new();
        for value in self.vars.values() {
            value.collect_secrets(&mut secrets);
        }
        secrets
    }

    /// `-var-file` arguments followed by `-var` overrides.
    pub fn var_args(&self) -> Vec<String> {
        let files = self
            .var_files
            .iter()
            .map(|f| format!("-var-file={}", f.display()));
        let overrides = self
            .vars
            .iter()
            .flat_map(|(name, value)| ["-var".to_string(), format!("{name}={}", value.render())]);
        files.chain(overrides).collect()
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    working_dir: PathBuf,
    var_files: Vec<PathBuf>,
    vars: BTreeMap<String, VarValue>,
    lock: bool,
    upgrade: bool,
    state_lock: Option<StateLock>,
}

impl RunConfigBuilder {
    /// Append a variable file. Files apply in the order added.
    #[must_use]
    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    /// Set a variable override. A later call for the same name replaces it.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Set several variable overrides.
    #[must_use]
    pub fn vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<VarValue>,
    {
        for (name, value) in vars {
            self.vars.insert(name.into(), value.into());
        }
        self
    }

    #[must_use]
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.upgrade = upgrade;
        self
    }

    /// Share a state lock handle with other configs targeting the same state.
    #[must_use]
    pub fn state_lock(mut self, state_lock: StateLock) -> Self {
        self.state_lock = Some(state_lock);
        self
    }

    /// Build the config. Without an explicit handle the config shares the
    /// process-wide lock for its working directory.
    pub fn build(self) -> RunConfig {
        let state_lock = self
            .state_lock
            .unwrap_or_else(|| StateLockRegistry::global().lock_for(&self.working_dir));
        RunConfig {
            working_dir: self.working_dir,
            var_files: self.var_files,
            vars: self.vars,
            lock: self.lock,
            upgrade: self.upgrade,
            state_lock,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalars() {
        assert_eq!(VarValue::from("proj-x").render(), "proj-x");
        assert_eq!(VarValue::from(3).render(), "3");
        assert_eq!(VarValue::from(1.5).render(), "1.5");
        assert_eq!(VarValue::from(true).render(), "true");
    }

    #[test]
    fn test_render_collections() {
        let list = VarValue::from(vec!["a", "b"]);
        assert_eq!(list.render(), r#"["a", "b"]"#);

        let mut map = BTreeMap::new();
        map.insert("env".to_string(), VarValue::from("test"));
        map.insert("count".to_string(), VarValue::from(2));
        assert_eq!(
            VarValue::Map(map).render(),
            r#"{"count" = 2, "env" = "test"}"#
        );
    }

    #[test]
    fn test_render_escapes_nested_strings() {
        let list = VarValue::from(vec![r#"say "hi""#]);
        assert_eq!(list.render(), r#"["say \"hi\""]"#);
    }

    #[test]
    fn test_later_override_wins() {
        let config = RunConfig::builder("/m")
            .var("name_prefix", "first-")
            .var("name_prefix", "second-")
            .build();
        assert_eq!(config.vars().len(), 1);
        assert!(config
            .var_args()
            .contains(&"name_prefix=second-".to_string()));
    }

    #[test]
    fn test_var_args_files_first_in_order() {
        let config = RunConfig::builder("/m")
            .var_file("base.tfvars")
            .var_file("example.tfvars")
            .vars([("org_id", "org-1"), ("project", "proj-x")])
            .build();

        assert_eq!(
            config.var_args(),
            vec![
                "-var-file=base.tfvars",
                "-var-file=example.tfvars",
                "-var",
                "org_id=org-1",
                "-var",
                "project=proj-x",
            ]
        );
    }

    #[test]
    fn test_secrets_are_collected_and_redacted_in_debug() {
        let mut nested = BTreeMap::new();
        nested.insert(
            "key".to_string(),
            VarValue::Secret(SecretString::from("api-key-1")),
        );
        let config = RunConfig::builder("/m")
            .var("password", SecretString::from("hunter2"))
            .var("auth", VarValue::Map(nested))
            .build();

        assert_eq!(config.secrets().len(), 2);
        assert!(config.var_args().contains(&"password=hunter2".to_string()));

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("api-key-1"));
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::builder("/modules/vpc").build();
        assert!(config.lock());
        assert!(!config.upgrade());
        assert!(config.var_files().is_empty());
        assert_eq!(config.state_lock().target(), "/modules/vpc");
    }

    #[tokio::test]
    async fn test_builds_for_one_dir_share_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunConfig::builder(dir.path()).build();
        let second = RunConfig::builder(dir.path()).lock(false).build();
        let other_dir = tempfile::tempdir().unwrap();
        let other = RunConfig::builder(other_dir.path()).build();

        let _guard = first
            .state_lock()
            .acquire(std::time::Duration::from_millis(50))
            .await
            .unwrap();

        assert!(second.state_lock().is_held());
        assert!(!other.state_lock().is_held());
    }
}
