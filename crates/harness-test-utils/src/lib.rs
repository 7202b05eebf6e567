//! # Harness Test Utilities
//!
//! Shared test utilities for the IaC harness.
//!
//! This crate provides:
//! - [`MockTool`], a scripted [`CommandRunner`](iac_harness::tool::CommandRunner)
//!   that records every invocation
//! - Canned tool output fixtures (plan/apply streams, output and validate
//!   documents)
//! - [`TestModule`], a scratch module directory, and run-config helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harness_test_utils::*;
//! use iac_harness::tool::Stage;
//!
//! let mock = MockTool::new()
//!     .with(Stage::Plan, MockResponse::plan(1, 0, 0))
//!     .with(Stage::Output, MockResponse::outputs(&[("vpc_id", json!("vpc-123"))]));
//! let orchestrator = ScenarioOrchestrator::new(mock.tool(), ScenarioOptions::default());
//! ```

pub mod fixtures;
pub mod mock_tool;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_tool::*;
