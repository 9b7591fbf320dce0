//! General-purpose planner and step runner.
//!
//! The [`OrchestratorAgent`] asks the completion service to decompose a goal
//! and then runs the resulting steps in order, calling tools for TOOL steps
//! and delegating AGENT steps to agents registered by name.

use crate::agent::{elapsed_ms, Agent, AgentStats};
use crate::parse::parse_plan_json;
use async_trait::async_trait;
use cirrus_core::{
    AgentContext, CirrusResult, CompletionService, ExecutionPlan, ExecutionResult, PlanStep,
    StepKind, StepResult, ToolExecutor,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Plans with a completion service and executes plans step by step.
pub struct OrchestratorAgent {
    name: String,
    context: AgentContext,
    stats: AgentStats,
    completion: Arc<dyn CompletionService>,
    tools: Arc<dyn ToolExecutor>,
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl OrchestratorAgent {
    pub fn new(
        context: AgentContext,
        completion: Arc<dyn CompletionService>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            name: "orchestrator".to_string(),
            context,
            stats: AgentStats::new(),
            completion,
            tools,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make `agent` reachable from AGENT steps under `name`. Replaces any
    /// agent already registered under that name.
    pub fn register(&self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        let name = name.into();
        debug!(orchestrator = %self.name, agent = %name, "Agent registered");
        self.agents.write().insert(name, agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(name).cloned()
    }

    /// Registered agent names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn planning_prompt(&self, goal: &str) -> String {
        let agents = self.list();
        let agents = if agents.is_empty() {
            "none".to_string()
        } else {
            agents.join(", ")
        };
        format!(
            "Decompose the following goal into an ordered execution plan.\n\
             Goal: {goal}\n\
             Environment: {}\n\
             Dry run: {}\n\
             Available agents: {agents}\n\
             Respond with a JSON array of steps. Each step has \"kind\" \
             (tool, message, sequential, parallel or agent), \"name\" and \"description\", \
             plus \"tool\" and \"args\" for tool steps, \"content\" for message steps \
             and \"agent\" for agent steps.",
            self.context.environment, self.context.dry_run
        )
    }

    async fn run_step(&self, step: &PlanStep) -> StepResult {
        match step.kind {
            StepKind::Tool => {
                let tool = step.tool.as_deref().unwrap_or(&step.name);
                let args = Value::Object(step.args.clone().unwrap_or_default());
                match self.tools.call(tool, args).await {
                    Ok(output) => StepResult::success(&step.name, output),
                    Err(e) => StepResult::failure(&step.name, e.to_string()),
                }
            }
            StepKind::Message => StepResult::success(
                &step.name,
                json!(step.content.as_deref().unwrap_or_default()),
            ),
            StepKind::Sequential | StepKind::Parallel => {
                StepResult::success(&step.name, json!({"skipped": true}))
            }
            StepKind::Agent => self.delegate(step).await,
        }
    }

    async fn delegate(&self, step: &PlanStep) -> StepResult {
        let target = step.agent.as_deref().unwrap_or_default();
        let Some(agent) = self.get(target) else {
            return StepResult::failure(
                &step.name,
                format!(
                    "Unknown agent '{target}'. Available agents: {}",
                    self.list().join(", ")
                ),
            );
        };

        let goal = step
            .description
            .as_deref()
            .or(step.content.as_deref())
            .unwrap_or(&step.name);
        debug!(orchestrator = %self.name, step = %step.name, agent = %target, "Delegating step");

        let outcome = match agent.plan(goal).await {
            Ok(plan) => agent.execute(&plan).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) if result.success => StepResult::success(
                &step.name,
                json!({"agent": target, "result": result.result}),
            ),
            Ok(result) => StepResult::failure(
                &step.name,
                result
                    .error
                    .unwrap_or_else(|| format!("Agent '{target}' reported failure")),
            ),
            Err(e) => StepResult::failure(&step.name, e.to_string()),
        }
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &AgentContext {
        &self.context
    }

    fn stats(&self) -> &AgentStats {
        &self.stats
    }

    async fn plan(&self, goal: &str) -> CirrusResult<ExecutionPlan> {
        let text = self
            .completion
            .generate(&self.planning_prompt(goal), &self.context)
            .await?;

        let steps = parse_plan_json(&text).unwrap_or_else(|| {
            warn!(orchestrator = %self.name, "Completion did not contain a plan, using a single message step");
            vec![PlanStep::message("step_0", format!("Plan for goal: {goal}"))]
        });

        Ok(ExecutionPlan::new(steps)
            .with_metadata("goal", json!(goal))
            .with_metadata("planner", json!(self.name))
            .with_metadata("context", self.context.snapshot()))
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        let started = Instant::now();
        let mut step_results = Vec::with_capacity(plan.steps.len());
        let mut outputs = Map::new();

        for step in &plan.steps {
            let step_started = Instant::now();
            let result = self.run_step(step).await.with_duration(elapsed_ms(step_started));
            debug!(
                orchestrator = %self.name,
                step = %step.name,
                kind = %step.kind,
                success = result.success,
                duration_ms = result.duration_ms,
                "Step finished"
            );

            if !result.success {
                let error = format!(
                    "Step '{}' failed: {}",
                    step.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                step_results.push(result);
                warn!(orchestrator = %self.name, error = %error, "Execution stopped");
                return Ok(ExecutionResult::failure(error)
                    .with_steps(step_results)
                    .with_duration(elapsed_ms(started)));
            }

            outputs.insert(
                step.name.clone(),
                result.output.clone().unwrap_or(Value::Null),
            );
            step_results.push(result);
        }

        info!(orchestrator = %self.name, steps = step_results.len(), "Plan executed");
        Ok(ExecutionResult::success(json!({
            "completed": step_results.len(),
            "outputs": outputs,
        }))
        .with_steps(step_results)
        .with_duration(elapsed_ms(started)))
    }
}
