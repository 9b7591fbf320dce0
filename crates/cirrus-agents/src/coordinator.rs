//! Coordinator: an orchestrator wired to a reactive event loop.

use crate::agent::{Agent, AgentStats};
use crate::orchestrator::OrchestratorAgent;
use crate::reactive::{handler_fn, ReactiveAgent};
use async_trait::async_trait;
use cirrus_core::{
    AgentContext, CirrusError, CirrusResult, CompletionService, Event, EventType, ExecutionPlan,
    ExecutionResult, PlanStep,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROVISIONING_KEYWORDS: &[&str] = &["provision", "deploy", "create"];
const COORDINATION_KEYWORDS: &[&str] = &["coordinate", "orchestrate", "workflow"];

/// How a goal is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Provisioning,
    Coordination,
    General,
}

impl Route {
    /// Classify `goal` by keyword. Provisioning wins over coordination.
    pub fn classify(goal: &str) -> Self {
        let lower = goal.to_lowercase();
        if PROVISIONING_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Route::Provisioning
        } else if COORDINATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Route::Coordination
        } else {
            Route::General
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Route::Provisioning => "provisioning",
            Route::Coordination => "coordination",
            Route::General => "general",
        })
    }
}

/// The fixed provisioning pipeline. The apply step is left out in dry-run.
pub fn provisioning_steps(goal: &str, context: &AgentContext) -> Vec<PlanStep> {
    let mut base = Map::new();
    base.insert("request".into(), json!(goal));
    base.insert("environment".into(), json!(context.environment.to_string()));

    let tool = |name: &str, description: &str, depends_on: Option<&str>| {
        PlanStep::tool(name, name, base.clone())
            .with_description(description)
            .with_dependencies(depends_on.map(|d| vec![d.to_string()]).unwrap_or_default())
    };

    let mut steps = vec![
        tool("validate_request", "Validate provisioning request", None),
        tool("check_prerequisites", "Check resource prerequisites", Some("validate_request")),
        tool(
            "generate_infrastructure",
            "Generate infrastructure as code",
            Some("check_prerequisites"),
        ),
    ];
    let verify_after = if context.dry_run {
        "generate_infrastructure"
    } else {
        let mut apply = tool(
            "apply_infrastructure",
            "Apply infrastructure changes",
            Some("generate_infrastructure"),
        );
        if let Some(args) = apply.args.as_mut() {
            args.insert("dry_run".into(), json!(false));
        }
        steps.push(apply);
        "apply_infrastructure"
    };
    steps.push(tool("verify_deployment", "Verify deployment success", Some(verify_after)));
    steps
}

/// Steps suggested by a coordination analysis. Empty when the analysis
/// mentions neither provisioning nor monitoring.
pub fn coordination_steps(goal: &str, analysis: &str) -> Vec<PlanStep> {
    let lower = analysis.to_lowercase();
    let mut steps = Vec::new();
    if lower.contains("provision") {
        let mut args = Map::new();
        args.insert("request".into(), json!(goal));
        steps.push(PlanStep::tool("provision_task", "provision_orchestrator", args));
    }
    if lower.contains("monitor") {
        let depends_on = if steps.is_empty() {
            Vec::new()
        } else {
            vec!["provision_task".to_string()]
        };
        steps.push(
            PlanStep::message("setup_monitoring", "Setting up monitoring").with_dependencies(depends_on),
        );
    }
    steps
}

fn payload_str<'a>(event: &'a Event, key: &str) -> Option<&'a str> {
    event.payload.get(key).and_then(Value::as_str)
}

async fn run_follow_up(orchestrator: &OrchestratorAgent, goal: String) -> CirrusResult<()> {
    let plan = orchestrator.plan(&goal).await?;
    let result = orchestrator.execute(&plan).await?;
    if result.success {
        Ok(())
    } else {
        Err(CirrusError::Orchestrator(format!(
            "'{goal}' failed: {}",
            result.error.unwrap_or_default()
        )))
    }
}

/// Routes goals to the right planner and reacts to deployment events while a
/// plan runs.
pub struct CoordinatorAgent {
    name: String,
    stats: AgentStats,
    orchestrator: Arc<OrchestratorAgent>,
    reactive: Arc<ReactiveAgent>,
    completion: Arc<dyn CompletionService>,
}

impl CoordinatorAgent {
    /// Build a coordinator and register its default event handlers on
    /// `reactive`.
    pub fn new(
        orchestrator: Arc<OrchestratorAgent>,
        reactive: Arc<ReactiveAgent>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        let on_complete = orchestrator.clone();
        reactive.on(
            EventType::DeploymentComplete,
            handler_fn(move |event: Event| {
                let orchestrator = on_complete.clone();
                async move {
                    let target = payload_str(&event, "goal").unwrap_or("latest deployment");
                    run_follow_up(&orchestrator, format!("Verify deployment: {target}")).await
                }
            }),
        );

        let on_failure = orchestrator.clone();
        reactive.on(
            EventType::ResourceFailure,
            handler_fn(move |event: Event| {
                let orchestrator = on_failure.clone();
                async move {
                    let resource = payload_str(&event, "resource").unwrap_or("unknown resource");
                    run_follow_up(&orchestrator, format!("Recover from resource failure: {resource}"))
                        .await
                }
            }),
        );

        Self {
            name: "coordinator".to_string(),
            stats: AgentStats::new(),
            orchestrator,
            reactive,
            completion,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn orchestrator(&self) -> &Arc<OrchestratorAgent> {
        &self.orchestrator
    }

    pub fn reactive(&self) -> &Arc<ReactiveAgent> {
        &self.reactive
    }

    async fn plan_coordination(&self, goal: &str) -> CirrusResult<Option<Vec<PlanStep>>> {
        let prompt = format!("Analyze this coordination request and identify sub-tasks: {goal}");
        let analysis = self.completion.generate(&prompt, self.context()).await?;
        let steps = coordination_steps(goal, &analysis);
        Ok((!steps.is_empty()).then_some(steps))
    }
}

#[async_trait]
impl Agent for CoordinatorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &AgentContext {
        self.orchestrator.context()
    }

    fn stats(&self) -> &AgentStats {
        &self.stats
    }

    async fn plan(&self, goal: &str) -> CirrusResult<ExecutionPlan> {
        let route = Route::classify(goal);
        debug!(coordinator = %self.name, route = %route, "Goal routed");

        let steps = match route {
            Route::Provisioning => Some(provisioning_steps(goal, self.context())),
            Route::Coordination => self.plan_coordination(goal).await?,
            Route::General => None,
        };
        let plan = match steps {
            Some(steps) => ExecutionPlan::new(steps)
                .with_metadata("goal", json!(goal))
                .with_metadata("context", self.context().snapshot()),
            None => self.orchestrator.plan(goal).await?,
        };
        Ok(plan.with_metadata("route", json!(route.to_string())))
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        self.reactive.start().await;

        let outcome = self.orchestrator.execute(plan).await;
        if let Ok(result) = &outcome {
            if result.success {
                let mut event = Event::new(EventType::DeploymentComplete).with_source(self.name.as_str());
                if let Some(goal) = plan.goal() {
                    event = event.with_payload("goal", json!(goal));
                }
                if let Some(correlation_id) = &self.context().correlation_id {
                    event = event.with_correlation_id(correlation_id.as_str());
                }
                self.reactive.emit(event);
            } else {
                warn!(coordinator = %self.name, error = ?result.error, "Plan failed, no completion event");
            }
        }

        self.reactive.stop().await;
        info!(coordinator = %self.name, success = outcome.as_ref().is_ok_and(|r| r.success), "Coordination finished");
        outcome.map(|result| {
            result.with_metadata("events_processed", json!(self.reactive.processed_events()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ReactiveConfig;
    use crate::tools::ToolRegistry;
    use cirrus_core::StepKind;
    use cirrus_llm::StaticCompletion;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(context: AgentContext, replies: Vec<&str>) -> CoordinatorAgent {
        let completion: Arc<dyn CompletionService> = Arc::new(StaticCompletion::scripted(
            replies.into_iter().map(String::from).collect(),
        ));
        let orchestrator = Arc::new(OrchestratorAgent::new(
            context.clone(),
            completion.clone(),
            Arc::new(ToolRegistry::with_simulated_defaults()),
        ));
        let reactive = Arc::new(ReactiveAgent::with_config(
            context,
            ReactiveConfig {
                poll_interval_ms: 20,
                stop_grace_ms: 2_000,
                tool_delay_ms: 1,
            },
        ));
        CoordinatorAgent::new(orchestrator, reactive, completion)
    }

    #[test]
    fn test_route_classification() {
        assert_eq!(Route::classify("Deploy the web app"), Route::Provisioning);
        assert_eq!(Route::classify("coordinate the release workflow"), Route::Coordination);
        assert_eq!(Route::classify("summarise last week's incidents"), Route::General);
    }

    #[test]
    fn test_provisioning_steps_respect_dry_run() {
        let dry = provisioning_steps("create storage", &AgentContext::default());
        let names: Vec<&str> = dry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["validate_request", "check_prerequisites", "generate_infrastructure", "verify_deployment"]
        );
        assert_eq!(dry[3].dependencies, vec!["generate_infrastructure".to_string()]);

        let live = provisioning_steps("create storage", &AgentContext::default().with_dry_run(false));
        assert_eq!(live.len(), 5);
        assert_eq!(live[3].name, "apply_infrastructure");
        assert_eq!(live[3].arg("dry_run"), Some(&json!(false)));
        assert_eq!(live[4].dependencies, vec!["apply_infrastructure".to_string()]);
        assert!(live.iter().all(|s| s.arg("request") == Some(&json!("create storage"))));
    }

    #[test]
    fn test_coordination_steps_from_analysis() {
        let both = coordination_steps("roll out", "First provision the cluster, then monitor it");
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].tool.as_deref(), Some("provision_orchestrator"));
        assert_eq!(both[1].kind, StepKind::Message);
        assert_eq!(both[1].dependencies, vec!["provision_task".to_string()]);

        let monitor_only = coordination_steps("watch", "Monitoring is all that is needed");
        assert_eq!(monitor_only.len(), 1);
        assert!(monitor_only[0].dependencies.is_empty());

        assert!(coordination_steps("x", "nothing to do").is_empty());
    }

    #[tokio::test]
    async fn test_coordination_falls_back_to_orchestrator() {
        let agent = coordinator(
            AgentContext::default(),
            vec![
                "No sub-tasks identified",
                r#"[{"kind": "message", "name": "plan", "content": "handled by orchestrator"}]"#,
            ],
        );
        let plan = agent.plan("coordinate the teams").await.unwrap();
        assert_eq!(plan.step_names(), vec!["plan"]);
        assert_eq!(plan.metadata["route"], "coordination");
    }

    #[tokio::test]
    async fn test_execute_emits_completion_and_stops_loop() {
        let agent = coordinator(AgentContext::default(), vec!["[]"]);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        agent.reactive().on(
            EventType::DeploymentComplete,
            handler_fn(move |_event: Event| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let result = agent.run("deploy web app").await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.step_results.len(), 4);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(result.metadata["events_processed"], json!(1));
        assert!(!agent.reactive().is_running().await);
    }

    #[tokio::test]
    async fn test_failed_plan_emits_nothing_but_still_stops() {
        let agent = coordinator(AgentContext::default(), vec!["[]"]);
        let plan = ExecutionPlan::new(vec![PlanStep::tool("bad", "missing_tool", Map::new())]);
        let result = agent.execute(&plan).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata["events_processed"], json!(0));
        assert!(!agent.reactive().is_running().await);
    }
}
