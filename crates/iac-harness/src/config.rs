//! Harness configuration.
//!
//! Configuration is loaded from environment variables. CLI flags in the
//! binary override what is loaded here.

use crate::context::{Cloud, DEFAULT_NAME_PREFIX};
use crate::idempotence::IdempotenceStrength;
use crate::run_config::{RunConfig, RunConfigBuilder};
use crate::scenario::{ScenarioOptions, TeardownPolicy};
use crate::tool::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::tool::{RetryPolicy, DEFAULT_TOOL_BINARY};
use common::config::{LogFormat, ObservabilityConfig};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default module directory.
pub const DEFAULT_MODULE_DIR: &str = ".";

/// Default variable file, relative to the module directory.
pub const DEFAULT_VAR_FILE: &str = "example.tfvars";

/// Default wall-clock budget per stage in seconds.
pub const DEFAULT_STAGE_TIMEOUT_SECONDS: u64 = 1800;

/// Default state lock wait in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECONDS: u64 = 300;

/// Largest accepted stage timeout (one day).
pub const MAX_STAGE_TIMEOUT_SECONDS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Provisioning tool binary (default: "terraform").
    pub tool_binary: String,

    /// Module directory under test (default: ".").
    pub module_dir: PathBuf,

    /// Variable files, in order (default: "example.tfvars").
    pub var_files: Vec<PathBuf>,

    /// Budget for a single tool invocation.
    pub stage_timeout: Duration,

    /// How long to wait for the state lock.
    pub lock_timeout: Duration,

    /// Retries for transient tool errors.
    pub max_retries: u32,

    /// Delay before the first retry; doubles per attempt.
    pub retry_delay: Duration,

    /// Hold the state lock during plan/apply/destroy.
    pub lock: bool,

    /// Refresh providers and modules during init.
    pub upgrade: bool,

    pub teardown: TeardownPolicy,

    /// Second pass of the idempotence scenario.
    pub idempotence: IdempotenceStrength,

    /// Cloud whose identity variables are generated, if any.
    pub cloud: Option<Cloud>,

    /// Prefix for the generated `name_prefix` variable.
    pub name_prefix: String,

    pub observability: ObservabilityConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tool_binary: DEFAULT_TOOL_BINARY.to_string(),
            module_dir: PathBuf::from(DEFAULT_MODULE_DIR),
            var_files: vec![PathBuf::from(DEFAULT_VAR_FILE)],
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECONDS),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            lock: true,
            upgrade: true,
            teardown: TeardownPolicy::default(),
            idempotence: IdempotenceStrength::default(),
            cloud: None,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tool_binary = vars
            .get("IAC_TOOL_BINARY")
            .cloned()
            .unwrap_or(defaults.tool_binary);

        let module_dir = vars
            .get("IAC_MODULE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.module_dir);

        // An explicitly empty list disables var files
        let var_files = match vars.get("IAC_VAR_FILES") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => defaults.var_files,
        };

        let stage_timeout = Duration::from_secs(parse_seconds(
            vars,
            "IAC_STAGE_TIMEOUT_SECONDS",
            DEFAULT_STAGE_TIMEOUT_SECONDS,
        )?);

        let lock_timeout = Duration::from_secs(parse_seconds(
            vars,
            "IAC_LOCK_TIMEOUT_SECONDS",
            DEFAULT_LOCK_TIMEOUT_SECONDS,
        )?);

        let max_retries = match vars.get("IAC_MAX_RETRIES") {
            Some(value) => value.trim().parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "IAC_MAX_RETRIES must be a non-negative integer, got '{value}': {e}"
                ))
            })?,
            None => defaults.max_retries,
        };

        let retry_delay = match vars.get("IAC_RETRY_DELAY_SECONDS") {
            Some(value) => Duration::from_secs(value.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "IAC_RETRY_DELAY_SECONDS must be a non-negative integer, got '{value}': {e}"
                ))
            })?),
            None => defaults.retry_delay,
        };

        let lock = parse_bool(vars, "IAC_LOCK", defaults.lock)?;
        let upgrade = parse_bool(vars, "IAC_UPGRADE", defaults.upgrade)?;

        let teardown = match vars.get("IAC_TEARDOWN") {
            Some(value) => value.parse()?,
            None => defaults.teardown,
        };

        let idempotence = match vars.get("IAC_IDEMPOTENCE") {
            Some(value) => value.parse().map_err(ConfigError::InvalidValue)?,
            None => defaults.idempotence,
        };

        let cloud = match vars.get("IAC_CLOUD").map(|v| v.trim()) {
            Some(value) if !value.is_empty() => Some(value.parse::<Cloud>()?),
            _ => None,
        };

        let name_prefix = vars
            .get("IAC_NAME_PREFIX")
            .cloned()
            .unwrap_or(defaults.name_prefix);

        let log_format = match vars.get("IAC_LOG_FORMAT") {
            Some(value) => value
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?,
            None => LogFormat::default(),
        };

        let log_level = vars
            .get("IAC_LOG_LEVEL")
            .cloned()
            .unwrap_or(defaults.observability.log_level);

        Ok(HarnessConfig {
            tool_binary,
            module_dir,
            var_files,
            stage_timeout,
            lock_timeout,
            max_retries,
            retry_delay,
            lock,
            upgrade,
            teardown,
            idempotence,
            cloud,
            name_prefix,
            observability: ObservabilityConfig {
                log_level,
                log_format,
            },
        })
    }

    /// Retry policy with the default retryable-error table.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_delay(self.retry_delay)
    }

    pub fn scenario_options(&self) -> ScenarioOptions {
        ScenarioOptions {
            stage_timeout: self.stage_timeout,
            lock_timeout: self.lock_timeout,
            retry: Some(self.retry_policy()),
            teardown: self.teardown,
            idempotence: self.idempotence,
            ..ScenarioOptions::default()
        }
    }

    /// Run config builder for the module directory, with var files (relative
    /// paths resolved against the module directory), lock and upgrade set.
    pub fn run_config_builder(&self) -> RunConfigBuilder {
        self.var_files.iter().fold(
            RunConfig::builder(&self.module_dir)
                .lock(self.lock)
                .upgrade(self.upgrade),
            |builder, file| builder.var_file(file),
        )
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    if value > MAX_STAGE_TIMEOUT_SECONDS {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must not exceed {MAX_STAGE_TIMEOUT_SECONDS} seconds, got {value}"
        )));
    }

    Ok(value)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!(
                "{name} must be true or false, got '{value}'"
            ))),
        },
    }
}
