//! Live environment discovery.
//!
//! [`LiveModule`] checks that the provisioning tool and module directory are
//! available before any scenario runs, so a missing prerequisite fails with
//! an actionable message instead of a tool error halfway through an apply.

use iac_harness::assertion::AssertionExpression;
use iac_harness::config::{ConfigError, HarnessConfig};
use iac_harness::context::TestContext;
use iac_harness::observability::init_tracing;
use iac_harness::run_config::RunConfig;
use iac_harness::scenario::{ScenarioKind, ScenarioOrchestrator, ScenarioReport};
use iac_harness::tool::{ProcessRunner, ProvisioningTool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Failure message for plan scenarios that must not error.
pub const NO_ERRORS_EXPECTED: &str = "No errors are expected";

/// Live environment errors.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Provisioning tool '{program}' not found on PATH. Install it or set IAC_TOOL_BINARY")]
    ToolNotFound { program: String },

    #[error("Module directory '{}' does not exist. Set IAC_MODULE_DIR to a module checkout", .path.display())]
    ModuleNotFound { path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A module directory plus everything needed to run scenarios against it.
#[derive(Debug, Clone)]
pub struct LiveModule {
    pub config: HarnessConfig,
    /// Identity values for the module's cloud, when `IAC_CLOUD` is set.
    pub context: Option<TestContext>,
    pub tool_path: PathBuf,
}

impl LiveModule {
    /// Discover the live environment from process environment variables.
    pub fn from_env() -> Result<Self, EnvironmentError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&env)
    }

    /// Discover the live environment from an explicit variable map.
    pub fn from_vars(env: &HashMap<String, String>) -> Result<Self, EnvironmentError> {
        let config = HarnessConfig::from_vars(env)?;

        if !config.module_dir.is_dir() {
            return Err(EnvironmentError::ModuleNotFound {
                path: config.module_dir.clone(),
            });
        }

        let tool_path = find_tool(&config.tool_binary, env.get("PATH").map(String::as_str))
            .ok_or_else(|| EnvironmentError::ToolNotFound {
                program: config.tool_binary.clone(),
            })?;

        let context = config
            .cloud
            .map(|cloud| TestContext::generate(cloud, &config.name_prefix, env))
            .transpose()?;

        // An earlier test in this binary may have installed the subscriber
        if let Err(e) = init_tracing(&config.observability) {
            debug!(target: "iac.module_tests", error = %e, "Tracing subscriber not installed");
        }

        info!(
            target: "iac.module_tests",
            module = %config.module_dir.display(),
            tool = %tool_path.display(),
            name_prefix = context.as_ref().map(|c| c.name_prefix.as_str()).unwrap_or("-"),
            "Live environment ready"
        );

        Ok(Self {
            config,
            context,
            tool_path,
        })
    }

    /// Run config: var files from the config, then context identity values.
    pub fn run_config(&self) -> RunConfig {
        let builder = self.config.run_config_builder();
        match &self.context {
            Some(context) => builder.vars(context.to_vars()).build(),
            None => builder.build(),
        }
    }

    /// Orchestrator backed by the real tool, using the configured options.
    pub fn orchestrator(&self) -> ScenarioOrchestrator {
        let tool = ProvisioningTool::new(
            self.tool_path.display().to_string(),
            Arc::new(ProcessRunner::new()),
        );
        let mut options = self.config.scenario_options();
        options.failure_message = Some(NO_ERRORS_EXPECTED.to_string());
        ScenarioOrchestrator::new(tool, options)
    }

    /// Run `kind` against the module.
    pub async fn run(
        &self,
        kind: ScenarioKind,
        assertions: &[AssertionExpression],
    ) -> ScenarioReport {
        self.orchestrator()
            .run(kind, &self.run_config(), assertions)
            .await
    }
}

/// Resolve `program` to an executable path: as given when it contains a
/// path separator, else the first match on `path_var`.
fn find_tool(program: &str, path_var: Option<&str>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::split_paths(path_var?)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
