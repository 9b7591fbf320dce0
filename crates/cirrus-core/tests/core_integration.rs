#![allow(clippy::unwrap_used, clippy::expect_used)]

use cirrus_core::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// 1. Plan serialization keeps step order and advisory dependencies
// ---------------------------------------------------------------------------

#[test]
fn plan_serialization_keeps_order_and_dependencies() {
    let plan = ExecutionPlan::new(vec![
        PlanStep::message("validate", "validating request"),
        PlanStep::sequential("generate").with_dependencies(vec!["validate".into()]),
        PlanStep::parallel("verify").with_dependencies(vec!["generate".into()]),
    ])
    .with_metadata("goal", json!("create a storage account"));

    let json = serde_json::to_string(&plan).unwrap();
    let parsed: ExecutionPlan = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.step_names(), vec!["validate", "generate", "verify"]);
    assert_eq!(parsed.steps[2].dependencies, vec!["generate".to_string()]);
    assert_eq!(parsed.goal(), Some("create a storage account"));
    assert_eq!(parsed, plan);
}

// ---------------------------------------------------------------------------
// 2. Execution results carry per-step outcomes and metadata
// ---------------------------------------------------------------------------

#[test]
fn execution_result_flow() {
    let result = ExecutionResult::success(json!({"deployment_id": "dep-42"}))
        .with_steps(vec![
            StepResult::success("plan", json!("ok")).with_duration(12),
            StepResult::success("apply", json!({"status": "applied"})),
        ])
        .with_duration(40)
        .with_metadata("feedback", json!(0.9));

    assert!(result.success);
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.step_results[0].duration_ms, 12);
    assert_eq!(result.metadata["feedback"], json!(0.9));
    assert_eq!(result.success_ratio(), 1.0);

    let failed = ExecutionResult::failure("quota exceeded");
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("quota exceeded"));
    assert!(failed.result.is_none());
}

// ---------------------------------------------------------------------------
// 3. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let err = CirrusError::Agent("loop crashed".to_string());
    assert_eq!(err.to_string(), "Agent error: loop crashed");

    let err = CirrusError::Config("unknown agent type: wizard".to_string());
    assert_eq!(err.to_string(), "Config error: unknown agent type: wizard");

    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: CirrusError = json_err.into();
    assert!(err.to_string().starts_with("JSON error:"));

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: CirrusError = io_err.into();
    assert_eq!(err.to_string(), "IO error: missing");
}

// ---------------------------------------------------------------------------
// 4. Context snapshot exposes the fields planners need
// ---------------------------------------------------------------------------

#[test]
fn context_snapshot() {
    let ctx = AgentContext::for_user("ops-team")
        .with_environment(Environment::Acc)
        .with_dry_run(false)
        .with_metadata("region", json!("westeurope"));

    let snapshot = ctx.snapshot();
    assert_eq!(snapshot["user_id"], "ops-team");
    assert_eq!(snapshot["environment"], "acc");
    assert_eq!(snapshot["dry_run"], false);
    assert_eq!(snapshot["metadata"]["region"], "westeurope");
}

// ---------------------------------------------------------------------------
// 5. Memory records
// ---------------------------------------------------------------------------

#[test]
fn memory_record_roundtrip() {
    let record = MemoryRecord::new("learning:alice", "deploy web app")
        .with_metadata("feedback", json!(0.75));
    let json = serde_json::to_string(&record).unwrap();
    let parsed: MemoryRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.namespace, "learning:alice");
    assert_eq!(parsed.metadata["feedback"], json!(0.75));
}
