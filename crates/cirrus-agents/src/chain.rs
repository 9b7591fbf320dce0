//! Sequential value pipeline.
//!
//! A [`ChainAgent`] threads one JSON value through its middleware and then
//! through each [`ChainLink`] in registration order. Links may be skipped by
//! a condition, may transform their output, and may recover from their own
//! failure through an error handler.

use crate::agent::{elapsed_ms, Agent, AgentStats};
use async_trait::async_trait;
use cirrus_core::{
    AgentContext, CirrusError, CirrusResult, ExecutionPlan, ExecutionResult, PlanStep, StepResult,
};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Boxed future produced by link processors, error handlers and middleware.
pub type ValueFuture = BoxFuture<'static, CirrusResult<Value>>;

type Processor = Arc<dyn Fn(Value) -> ValueFuture + Send + Sync>;
type Condition = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(CirrusError) -> ValueFuture + Send + Sync>;
type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One stage of a chain.
#[derive(Clone)]
pub struct ChainLink {
    name: String,
    processor: Processor,
    condition: Option<Condition>,
    error_handler: Option<ErrorHandler>,
    transform: Option<Transform>,
}

impl ChainLink {
    pub fn new<F, Fut>(name: impl Into<String>, processor: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CirrusResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            processor: Arc::new(move |value| Box::pin(processor(value))),
            condition: None,
            error_handler: None,
            transform: None,
        }
    }

    /// Run the link only when `condition` holds for the current value.
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Recover from a processor failure; the handler's output becomes the
    /// running value.
    pub fn on_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CirrusError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CirrusResult<Value>> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |err| Box::pin(handler(err))));
        self
    }

    /// Post-process successful processor output.
    pub fn map_output<T>(mut self, transform: T) -> Self
    where
        T: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs [`ChainLink`]s strictly in registration order.
pub struct ChainAgent {
    name: String,
    context: AgentContext,
    stats: AgentStats,
    links: Vec<ChainLink>,
    middleware: Vec<Processor>,
}

impl ChainAgent {
    pub fn new(context: AgentContext) -> Self {
        Self {
            name: "chain".to_string(),
            context,
            stats: AgentStats::new(),
            links: Vec::new(),
            middleware: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_link(mut self, link: ChainLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn add_link(&mut self, link: ChainLink) {
        self.links.push(link);
    }

    /// Add middleware. Middleware runs once, in order, before the first link.
    pub fn with_middleware<F, Fut>(mut self, middleware: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CirrusResult<Value>> + Send + 'static,
    {
        self.middleware
            .push(Arc::new(move |value| Box::pin(middleware(value))));
        self
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Plan `goal` with an explicit starting value instead of `{"goal": goal}`.
    pub fn plan_with_input(&self, goal: &str, input: Value) -> ExecutionPlan {
        let steps = self
            .links
            .iter()
            .map(|link| {
                PlanStep::sequential(link.name.clone())
                    .with_description(format!("Process: {}", link.name))
            })
            .collect();

        ExecutionPlan::new(steps)
            .with_metadata("goal", json!(goal))
            .with_metadata("chain_length", json!(self.links.len()))
            .with_metadata("initial_value", input)
            .with_metadata("context", self.context.snapshot())
    }

    async fn run_links(&self, value: &mut Value, step_results: &mut Vec<StepResult>) -> CirrusResult<()> {
        for middleware in &self.middleware {
            *value = middleware(value.take()).await?;
        }

        for link in &self.links {
            if let Some(condition) = &link.condition {
                if !condition(&*value) {
                    debug!(chain = %self.name, link = %link.name, "Condition false, skipping link");
                    continue;
                }
            }

            let started = Instant::now();
            match (link.processor)(value.clone()).await {
                Ok(output) => {
                    let output = match &link.transform {
                        Some(transform) => transform(output),
                        None => output,
                    };
                    *value = output.clone();
                    step_results.push(
                        StepResult::success(&link.name, output).with_duration(elapsed_ms(started)),
                    );
                }
                Err(err) => {
                    let Some(handler) = &link.error_handler else {
                        warn!(chain = %self.name, link = %link.name, error = %err, "Link failed");
                        return Err(err);
                    };
                    let note = format!("Handled: {err}");
                    warn!(chain = %self.name, link = %link.name, error = %err, "Link failed, running error handler");
                    let recovered = handler(err).await?;
                    *value = recovered.clone();
                    let mut step = StepResult::success(&link.name, recovered)
                        .with_duration(elapsed_ms(started));
                    step.error = Some(note);
                    step_results.push(step);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for ChainAgent {
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
        Ok(self.plan_with_input(goal, json!({"goal": goal})))
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        let started = Instant::now();
        let mut value = plan
            .metadata
            .get("initial_value")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let mut step_results = Vec::new();

        let result = match self.run_links(&mut value, &mut step_results).await {
            Ok(()) => ExecutionResult::success(value),
            Err(err) => ExecutionResult::failure(err.to_string()),
        };
        Ok(result
            .with_steps(step_results)
            .with_duration(elapsed_ms(started)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn add(n: i64) -> ChainLink {
        ChainLink::new(format!("add_{n}"), move |v: Value| async move {
            Ok(json!(v.as_i64().unwrap_or(0) + n))
        })
    }

    #[tokio::test]
    async fn test_plan_has_one_sequential_step_per_link() {
        let chain = ChainAgent::new(AgentContext::default())
            .with_link(add(1))
            .with_link(add(2));
        let plan = chain.plan("sum").await.unwrap();
        assert_eq!(plan.step_names(), vec!["add_1", "add_2"]);
        assert!(plan
            .steps
            .iter()
            .all(|s| s.kind == cirrus_core::StepKind::Sequential));
        assert_eq!(plan.metadata["initial_value"], json!({"goal": "sum"}));
    }

    #[tokio::test]
    async fn test_links_run_in_order_with_transform() {
        let chain = ChainAgent::new(AgentContext::default())
            .with_link(add(1))
            .with_link(add(10).map_output(|v| json!(v.as_i64().unwrap() * 2)));
        let plan = chain.plan_with_input("sum", json!(1));
        let result = chain.execute(&plan).await.unwrap();

        assert!(result.success);
        assert_eq!(result.result, Some(json!(24)));
        assert_eq!(result.step_results[0].output, Some(json!(2)));
        assert_eq!(result.step_results[1].output, Some(json!(24)));
    }

    #[tokio::test]
    async fn test_middleware_runs_before_links() {
        let chain = ChainAgent::new(AgentContext::default())
            .with_middleware(|_v: Value| async move { Ok(json!(100)) })
            .with_link(add(1));
        let plan = chain.plan_with_input("sum", json!(0));
        let result = chain.execute(&plan).await.unwrap();
        assert_eq!(result.result, Some(json!(101)));
        assert_eq!(result.step_results.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_error_handler_aborts() {
        let chain = ChainAgent::new(AgentContext::default())
            .with_link(
                ChainLink::new("broken", |_v: Value| async move {
                    Err(CirrusError::Agent("primary failed".into()))
                })
                .on_error(|_e| async move { Err(CirrusError::Agent("fallback failed".into())) }),
            )
            .with_link(add(1));
        let plan = chain.plan_with_input("x", json!(0));
        let result = chain.execute(&plan).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("fallback failed"));
        assert!(result.step_results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_initial_value_starts_empty() {
        let chain = ChainAgent::new(AgentContext::default()).with_link(ChainLink::new(
            "echo",
            |v: Value| async move { Ok(v) },
        ));
        let result = chain.execute(&ExecutionPlan::new(Vec::new())).await.unwrap();
        assert_eq!(result.result, Some(json!({})));
    }
}
