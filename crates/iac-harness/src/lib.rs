//! IaC Lifecycle Harness
//!
//! Drives an external provisioning tool through a fixed lifecycle
//! (validate → plan → apply → re-plan/re-apply), collects the module's
//! structured outputs and evaluates declarative assertions against them.
//!
//! # Components
//!
//! - [`tool`]: subprocess seam ([`tool::CommandRunner`]) plus argument building,
//!   retryable-error handling and state-lock detection
//! - [`output`]: [`output::OutputCollector`] and the queryable output document
//! - [`plan`]: [`plan::PlanRunner`] and change-set classification
//! - [`apply`]: [`apply::ApplyRunner`] (apply, output collection, destroy)
//! - [`idempotence`]: [`idempotence::IdempotenceChecker`] drift detection
//! - [`assertion`]: assertion expressions and [`assertion::AssertionEngine`]
//! - [`scenario`]: [`scenario::ScenarioOrchestrator`] state machine
//!
//! # Example
//!
//! ```rust,no_run
//! use iac_harness::assertion::AssertionExpression;
//! use iac_harness::run_config::RunConfig;
//! use iac_harness::scenario::{ScenarioKind, ScenarioOptions, ScenarioOrchestrator};
//! use iac_harness::tool::ProvisioningTool;
//!
//! # async fn example() {
//! let config = RunConfig::builder("./modules/vpc")
//!     .var_file("example.tfvars")
//!     .var("name_prefix", "t1-")
//!     .lock(true)
//!     .build();
//!
//! let orchestrator =
//!     ScenarioOrchestrator::new(ProvisioningTool::terraform(), ScenarioOptions::default());
//! let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];
//!
//! let report = orchestrator
//!     .run(ScenarioKind::Idempotence, &config, &assertions)
//!     .await;
//! assert!(report.passed(), "{}", report.summary());
//! # }
//! ```

pub mod apply;
pub mod assertion;
pub mod config;
pub mod context;
pub mod errors;
pub mod idempotence;
pub mod observability;
pub mod output;
pub mod plan;
pub mod run_config;
pub mod scenario;
pub mod state_lock;
pub mod tool;
pub mod validate;
