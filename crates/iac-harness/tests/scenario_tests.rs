//! Scenario orchestration tests against a scripted provisioning tool.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use harness_test_utils::{MockResponse, MockTool, TestModule};
use iac_harness::assertion::{AssertionExpression, AssertionOutcome, Predicate};
use iac_harness::errors::{FailureKind, HarnessError};
use iac_harness::idempotence::IdempotenceStrength;
use iac_harness::scenario::{
    ScenarioKind, ScenarioOptions, ScenarioOrchestrator, ScenarioState, TeardownPolicy, Verdict,
};
use iac_harness::tool::Stage;
use serde_json::json;
use std::time::Duration;

fn options() -> ScenarioOptions {
    ScenarioOptions {
        stage_timeout: Duration::from_millis(200),
        lock_timeout: Duration::from_millis(50),
        ..ScenarioOptions::default()
    }
}

fn failure_kind(report: &iac_harness::scenario::ScenarioReport) -> Option<FailureKind> {
    report.failure.as_ref().map(|f| f.kind)
}

// ============================================================================
// Validate
// ============================================================================

#[tokio::test]
async fn test_validate_scenario_passes_for_valid_module() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Validate, MockResponse::validate_ok());
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

    let report = orchestrator
        .run(ScenarioKind::Validate, &module.run_config(), &[])
        .await;

    assert!(report.passed(), "{}", report.summary());
    assert_eq!(report.visited(), vec![ScenarioState::Validating]);
    assert_eq!(mock.stages(), vec![Stage::Init, Stage::Validate]);

    let init = &mock.calls_for(Stage::Init)[0];
    assert!(init.args.contains(&"-backend=false".to_string()));
}

#[tokio::test]
async fn test_validate_scenario_reports_diagnostics() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Validate,
        MockResponse::validate_errors(&["Unsupported argument", "Missing required argument"]),
    );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

    let report = orchestrator
        .run(ScenarioKind::Validate, &module.run_config(), &[])
        .await;

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(failure_kind(&report), Some(FailureKind::ValidationError));
    let diagnostics = report.failure.unwrap().diagnostics.unwrap();
    assert!(diagnostics.contains("Unsupported argument"));
    assert!(diagnostics.contains("Missing required argument"));
}

#[tokio::test]
async fn test_validate_init_failure_is_validation_error() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Init,
        MockResponse::failure("Error: Unsupported block type"),
    );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

    let report = orchestrator
        .run(ScenarioKind::Validate, &module.run_config(), &[])
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::ValidationError));
    assert_eq!(mock.call_count(Stage::Validate), 0);
}

// ============================================================================
// Plan
// ============================================================================

#[tokio::test]
async fn test_plan_scenario_passes_with_no_changes_or_pending_changes() {
    for response in [MockResponse::plan(0, 0, 0), MockResponse::plan(3, 1, 0)] {
        let module = TestModule::new();
        let mock = MockTool::new().with(Stage::Plan, response);
        let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

        let report = orchestrator
            .run(ScenarioKind::Plan, &module.run_config(), &[])
            .await;

        assert!(report.passed(), "{}", report.summary());
        assert!(report.assertions.is_empty());
        assert_eq!(
            report.visited(),
            vec![ScenarioState::Planning, ScenarioState::Asserting]
        );
        assert_eq!(mock.call_count(Stage::Apply), 0);
    }
}

#[tokio::test]
async fn test_plan_scenario_fails_on_plan_error() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Plan,
        MockResponse::plan_error("Invalid reference", "undeclared resource"),
    );
    let options = ScenarioOptions {
        failure_message: Some("No errors are expected".to_string()),
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Plan, &module.run_config(), &[])
        .await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::PlanError);
    assert!(failure.message.starts_with("No errors are expected: Plan failed"));
    assert_eq!(
        failure.diagnostics.as_deref(),
        Some("Invalid reference: undeclared resource")
    );
    assert_eq!(report.visited(), vec![ScenarioState::Planning]);
}

#[tokio::test]
async fn test_plan_assertions_run_against_plan_document() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Plan, MockResponse::plan(2, 0, 1));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![
        AssertionExpression::equals("add", 2, "two resources added"),
        AssertionExpression::equals("remove", 0, "nothing destroyed"),
        AssertionExpression::equals("classification", "changes_pending", "changes pending"),
        AssertionExpression::predicate(
            "resources",
            Predicate::LengthEquals(3),
            "three resources touched",
        ),
    ];

    let report = orchestrator
        .run(ScenarioKind::Plan, &module.run_config(), &assertions)
        .await;

    assert_eq!(report.assertions.len(), 4);
    assert_eq!(failure_kind(&report), Some(FailureKind::AssertionFailed));
    let failed: Vec<_> = report.assertions.iter().filter(|r| !r.passed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, "remove");
}

#[tokio::test]
async fn test_expected_plan_error() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Plan,
        MockResponse::plan_error("Invalid value for variable", "name_prefix too long"),
    );
    let options = ScenarioOptions {
        expected_plan_error: Some("name_prefix too long".to_string()),
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);
    let assertions = vec![AssertionExpression::not_empty("error", "error captured")];

    let report = orchestrator
        .run(ScenarioKind::Plan, &module.run_config(), &assertions)
        .await;

    assert!(report.passed(), "{}", report.summary());
}

#[tokio::test]
async fn test_expected_plan_error_but_plan_succeeds() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Plan, MockResponse::plan(1, 0, 0));
    let options = ScenarioOptions {
        expected_plan_error: Some("name_prefix too long".to_string()),
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Plan, &module.run_config(), &[])
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::UnexpectedPlanOutcome));
}

// ============================================================================
// Apply
// ============================================================================

#[tokio::test]
async fn test_apply_scenario_asserts_outputs_and_replans() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Apply, MockResponse::apply(2, 0, 0))
        .with(
            Stage::Output,
            MockResponse::outputs(&[("vpc_id", json!("vpc-123"))]),
        )
        .with(Stage::Plan, MockResponse::plan(0, 0, 0));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert!(report.passed(), "{}", report.summary());
    assert_eq!(report.visited(), ScenarioKind::Apply.path());
    assert_eq!(report.assertions.len(), 1);
    assert!(report.assertions[0].passed());
    assert_eq!(
        mock.stages(),
        vec![Stage::Init, Stage::Apply, Stage::Output, Stage::Plan]
    );
}

#[tokio::test]
async fn test_failed_apply_never_reaches_assertions() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Apply,
        MockResponse::apply_error("Error creating Network", "quota exceeded"),
    );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::ApplyError));
    assert!(report.assertions.is_empty());
    assert_eq!(report.visited(), vec![ScenarioState::Applying]);
    assert_eq!(mock.call_count(Stage::Output), 0);
    assert_eq!(mock.call_count(Stage::Destroy), 0);
    assert!(report.error().unwrap().may_leave_partial_state());
}

#[tokio::test]
async fn test_output_failure_after_apply_is_collection_error() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Apply, MockResponse::apply(1, 0, 0))
        .with(Stage::Output, MockResponse::failure("Error: state unreadable"));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::CollectionError));
    assert!(report.assertions.is_empty());
    assert_eq!(report.visited(), vec![ScenarioState::Applying]);
    assert_eq!(mock.call_count(Stage::Output), 1);
    assert_eq!(mock.call_count(Stage::Plan), 0);
}

#[tokio::test]
async fn test_unparseable_outputs_after_apply_are_collection_error() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Apply, MockResponse::apply(1, 0, 0))
        .with(Stage::Output, MockResponse::success("not json"));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::CollectionError));
    assert!(report.assertions.is_empty());
    assert!(!report.passed());
    assert_eq!(mock.call_count(Stage::Plan), 0);
}

#[tokio::test]
async fn test_apply_scenario_drift_on_replan() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Plan, MockResponse::plan(0, 1, 0))
        .with(
            Stage::Output,
            MockResponse::outputs(&[("vpc_id", json!("vpc-123"))]),
        );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::not_empty("vpc_id", "VPC is created")];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::DriftDetected));
    // Assertions gathered before the drift check are still reported
    assert_eq!(report.assertions.len(), 1);
    assert!(matches!(
        report.error(),
        Some(HarnessError::DriftDetected(summary)) if summary.change == 1
    ));
}

#[tokio::test]
async fn test_all_assertions_run_without_short_circuit() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Output,
        MockResponse::outputs(&[
            ("vpc_id", json!("vpc-123")),
            ("subnets", json!([{"name": "mgmt", "cidr": "10.0.0.0/24"}])),
        ]),
    );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![
        AssertionExpression::equals("vpc_id", "vpc-999", "wrong VPC id"),
        AssertionExpression::exists("router_id", "router is created"),
        AssertionExpression::equals("subnets[0].cidr", "10.0.0.0/24", "mgmt subnet cidr"),
    ];

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &assertions)
        .await;

    assert_eq!(report.assertions.len(), 3);
    assert!(matches!(
        report.assertions[0].outcome,
        AssertionOutcome::Failed { .. }
    ));
    assert_eq!(report.assertions[1].outcome, AssertionOutcome::OutputNotFound);
    assert!(report.assertions[2].passed());
    assert!(matches!(
        report.error(),
        Some(HarnessError::AssertionsFailed { failed: 2, total: 3 })
    ));
    // Assertion failures do not stop the re-plan
    assert_eq!(mock.call_count(Stage::Plan), 1);
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_idempotence_scenario_passes_when_reapply_is_noop() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Apply, MockResponse::apply(3, 0, 0))
        .with(Stage::Apply, MockResponse::apply(0, 0, 0))
        .with(
            Stage::Output,
            MockResponse::outputs(&[("vpc_id", json!("vpc-123"))]),
        )
        .with(
            Stage::Output,
            MockResponse::outputs(&[("vpc_id", json!("vpc-123")), ("round", json!(2))]),
        );
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());
    let assertions = vec![AssertionExpression::equals("round", 2, "outputs from second apply")];

    let report = orchestrator
        .run(ScenarioKind::Idempotence, &module.run_config(), &assertions)
        .await;

    assert!(report.passed(), "{}", report.summary());
    assert_eq!(report.visited(), ScenarioKind::Idempotence.path());
    assert_eq!(mock.call_count(Stage::Apply), 2);
}

#[tokio::test]
async fn test_idempotence_scenario_detects_drift_on_second_apply() {
    let module = TestModule::new();
    let mock = MockTool::new()
        .with(Stage::Apply, MockResponse::apply(3, 0, 0))
        .with(Stage::Apply, MockResponse::apply(0, 1, 0));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

    let report = orchestrator
        .run(ScenarioKind::Idempotence, &module.run_config(), &[])
        .await;

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(failure_kind(&report), Some(FailureKind::DriftDetected));
    assert!(report
        .failure
        .as_ref()
        .and_then(|f| f.diagnostics.as_deref())
        .is_some_and(|d| d.starts_with("0 to add, 1 to change")));
    assert!(report.assertions.is_empty());
}

#[tokio::test]
async fn test_idempotence_replan_strength() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Plan, MockResponse::plan(0, 0, 0));
    let options = ScenarioOptions {
        idempotence: IdempotenceStrength::Replan,
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Idempotence, &module.run_config(), &[])
        .await;

    assert!(report.passed(), "{}", report.summary());
    assert_eq!(mock.call_count(Stage::Apply), 1);
    assert_eq!(mock.call_count(Stage::Plan), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_destroy_on_pass_runs_after_passing_scenario() {
    let module = TestModule::new();
    let mock = MockTool::new();
    let options = ScenarioOptions {
        teardown: TeardownPolicy::DestroyOnPass,
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &[])
        .await;

    assert!(report.passed(), "{}", report.summary());
    assert_eq!(report.visited().last(), Some(&ScenarioState::TearingDown));
    assert_eq!(mock.call_count(Stage::Destroy), 1);
}

#[tokio::test]
async fn test_no_teardown_after_failure() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Plan, MockResponse::plan(1, 0, 0));
    let options = ScenarioOptions {
        teardown: TeardownPolicy::DestroyOnPass,
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &[])
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::DriftDetected));
    assert_eq!(mock.call_count(Stage::Destroy), 0);
}

#[tokio::test]
async fn test_destroy_failure_fails_scenario() {
    let module = TestModule::new();
    let mock = MockTool::new().with(
        Stage::Destroy,
        MockResponse::apply_error("Error deleting Network", "resource in use"),
    );
    let options = ScenarioOptions {
        teardown: TeardownPolicy::DestroyOnPass,
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Idempotence, &module.run_config(), &[])
        .await;

    assert_eq!(failure_kind(&report), Some(FailureKind::DestroyError));
}

#[tokio::test]
async fn test_plan_scenario_never_tears_down() {
    let module = TestModule::new();
    let mock = MockTool::new();
    let options = ScenarioOptions {
        teardown: TeardownPolicy::DestroyOnPass,
        ..options()
    };
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options);

    let report = orchestrator
        .run(ScenarioKind::Plan, &module.run_config(), &[])
        .await;

    assert!(report.passed());
    assert_eq!(mock.call_count(Stage::Destroy), 0);
}

// ============================================================================
// Into result
// ============================================================================

#[tokio::test]
async fn test_into_result_for_test_runners() {
    let module = TestModule::new();
    let mock = MockTool::new().with(Stage::Apply, MockResponse::apply_error("boom", ""));
    let orchestrator = ScenarioOrchestrator::new(mock.tool(), options());

    let failure = orchestrator
        .run(ScenarioKind::Apply, &module.run_config(), &[])
        .await
        .into_result()
        .unwrap_err();

    assert_eq!(failure.kind, ScenarioKind::Apply);
    assert_eq!(failure.cause.kind, FailureKind::ApplyError);
    assert_eq!(failure.report.verdict, Verdict::Fail);
}
