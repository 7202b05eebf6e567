//! IaC Harness
//!
//! Runs one lifecycle scenario against a module directory and prints the
//! report. Exits 0 on pass, 1 on fail.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iac_harness::assertion::AssertionExpression;
use iac_harness::config::HarnessConfig;
use iac_harness::context::TestContext;
use iac_harness::observability::init_tracing;
use iac_harness::output::OutputValue;
use iac_harness::scenario::{ScenarioKind, ScenarioOrchestrator};
use iac_harness::tool::{ProcessRunner, ProvisioningTool};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "iac-harness", version, about = "IaC module lifecycle test harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Module directory (overrides IAC_MODULE_DIR)
    #[arg(long, global = true)]
    module_dir: Option<PathBuf>,

    /// Variable file; repeatable, applied in order (overrides IAC_VAR_FILES)
    #[arg(long = "var-file", global = true)]
    var_files: Vec<PathBuf>,

    /// Variable override as NAME=VALUE; repeatable, wins over var files
    #[arg(long = "var", value_parser = parse_key_value, global = true)]
    vars: Vec<(String, String)>,

    /// Require an output path to be present and not empty; repeatable
    #[arg(long = "expect-not-empty", global = true)]
    expect_not_empty: Vec<String>,

    /// Require PATH=VALUE (VALUE parsed as JSON, else a string); repeatable
    #[arg(long = "expect", value_parser = parse_key_value, global = true)]
    expect: Vec<(String, String)>,

    /// Print the report as JSON instead of a summary
    #[arg(long, global = true)]
    report_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize without backend and validate
    Validate,
    /// Plan and require no errors
    Plan {
        /// Pass only if planning fails with this text
        #[arg(long)]
        expect_error: Option<String>,
    },
    /// Apply, assert on outputs and require a clean re-plan
    Apply,
    /// Apply twice and require the second apply to change nothing
    Idempotence,
}

impl Command {
    fn kind(&self) -> ScenarioKind {
        match self {
            Command::Validate => ScenarioKind::Validate,
            Command::Plan { .. } => ScenarioKind::Plan,
            Command::Apply => ScenarioKind::Apply,
            Command::Idempotence => ScenarioKind::Idempotence,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

fn assertions(cli: &Cli) -> Vec<AssertionExpression> {
    let not_empty = cli
        .expect_not_empty
        .iter()
        .map(|path| AssertionExpression::not_empty(path, format!("{path} is not empty")));
    let equals = cli.expect.iter().map(|(path, raw)| {
        let expected = serde_json::from_str::<serde_json::Value>(raw)
            .map_or_else(|_| OutputValue::from(raw.as_str()), OutputValue::from);
        AssertionExpression::equals(path, expected, format!("{path} == {raw}"))
    });
    not_empty.chain(equals).collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = HarnessConfig::from_env().context("Failed to load configuration")?;
    if let Some(module_dir) = &cli.module_dir {
        config.module_dir.clone_from(module_dir);
    }
    if !cli.var_files.is_empty() {
        config.var_files.clone_from(&cli.var_files);
    }

    init_tracing(&config.observability).context("Failed to initialize tracing")?;

    let kind = cli.command.kind();
    info!(
        target: "iac.harness",
        kind = %kind,
        module = %config.module_dir.display(),
        tool = %config.tool_binary,
        "Starting IaC harness"
    );

    let mut builder = config.run_config_builder();
    if let Some(cloud) = config.cloud {
        let context = TestContext::generate(
            cloud,
            &config.name_prefix,
            &std::env::vars().collect(),
        )
        .context("Failed to generate test context")?;
        info!(
            target: "iac.harness",
            cloud = %cloud,
            name_prefix = %context.name_prefix,
            "Generated test context"
        );
        builder = builder.vars(context.to_vars());
    }
    let run_config = builder.vars(cli.vars.iter().cloned()).build();

    let mut options = config.scenario_options();
    if let Command::Plan { expect_error } = &cli.command {
        options.expected_plan_error.clone_from(expect_error);
        if expect_error.is_none() {
            options.failure_message = Some("No errors are expected".to_string());
        }
    }

    let tool = ProvisioningTool::new(config.tool_binary.clone(), Arc::new(ProcessRunner::new()));
    let orchestrator = ScenarioOrchestrator::new(tool, options);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!(target: "iac.harness", "Received SIGINT, cancelling scenario");
                cancel.cancel();
            }
            Err(e) => error!(target: "iac.harness", error = %e, "Failed to listen for SIGINT"),
        }
    });

    let report = orchestrator
        .run(kind, &run_config, &assertions(&cli))
        .await;

    if cli.report_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report.summary());
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
