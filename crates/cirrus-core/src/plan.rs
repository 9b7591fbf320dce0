use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Kind of work a [`PlanStep`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Invoke a registered tool with an argument map.
    Tool,
    /// Emit literal content.
    Message,
    /// Grouping marker for steps meant to run one after another.
    Sequential,
    /// Grouping marker for steps meant to run concurrently.
    Parallel,
    /// Delegate the step to a named agent.
    Agent,
}

impl StepKind {
    /// Parse a step kind case-insensitively, accepting the common aliases
    /// planners produce.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "tool" | "tool_call" => Some(StepKind::Tool),
            "message" | "msg" => Some(StepKind::Message),
            "sequential" | "sequence" => Some(StepKind::Sequential),
            "parallel" => Some(StepKind::Parallel),
            "agent" => Some(StepKind::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Tool => write!(f, "tool"),
            StepKind::Message => write!(f, "message"),
            StepKind::Sequential => write!(f, "sequential"),
            StepKind::Parallel => write!(f, "parallel"),
            StepKind::Agent => write!(f, "agent"),
        }
    }
}

/// One planned unit of work.
///
/// `dependencies` names other steps this one logically follows. It is
/// advisory: executors record it but run steps in plan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub kind: StepKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Target agent for [`StepKind::Agent`] steps.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_step_timeout() -> f64 {
    60.0
}

fn default_max_retries() -> u32 {
    3
}

impl PlanStep {
    pub fn new(kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: None,
            tool: None,
            args: None,
            content: None,
            dependencies: Vec::new(),
            agent: None,
            timeout_seconds: default_step_timeout(),
            max_retries: default_max_retries(),
        }
    }

    /// A TOOL step calling `tool` with `args`.
    pub fn tool(name: impl Into<String>, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        let mut step = Self::new(StepKind::Tool, name);
        step.tool = Some(tool.into());
        step.args = Some(args);
        step
    }

    /// A MESSAGE step carrying literal content.
    pub fn message(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut step = Self::new(StepKind::Message, name);
        step.content = Some(content.into());
        step
    }

    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(StepKind::Sequential, name)
    }

    pub fn parallel(name: impl Into<String>) -> Self {
        Self::new(StepKind::Parallel, name)
    }

    /// An AGENT step handing `goal` to the agent registered as `agent`.
    pub fn agent(name: impl Into<String>, agent: impl Into<String>, goal: impl Into<String>) -> Self {
        let mut step = Self::new(StepKind::Agent, name);
        step.agent = Some(agent.into());
        step.description = Some(goal.into());
        step
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Look up a single argument.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.as_ref().and_then(|args| args.get(key))
    }
}

/// Ordered sequence of steps produced by an agent's `plan`.
///
/// Plans are treated as immutable values once produced; agents that want a
/// variation clone and derive a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            steps,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The goal text this plan was produced for, if recorded.
    pub fn goal(&self) -> Option<&str> {
        self.metadata.get("goal").and_then(Value::as_str)
    }

    /// The strategy tag this plan was produced with, if recorded.
    pub fn strategy(&self) -> Option<&str> {
        self.metadata.get("strategy").and_then(Value::as_str)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Outcome of one attempted [`PlanStep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step_name: impl Into<String>, output: Value) -> Self {
        Self {
            step_name: step_name.into(),
            success: true,
            output: Some(output),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Aggregate outcome of executing an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            duration_ms: 0,
            step_results: Vec::new(),
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms: 0,
            step_results: Vec::new(),
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn with_steps(mut self, step_results: Vec<StepResult>) -> Self {
        self.step_results = step_results;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fraction of step results that succeeded; `1.0` when no steps ran.
    pub fn success_ratio(&self) -> f64 {
        if self.step_results.is_empty() {
            return 1.0;
        }
        let ok = self.step_results.iter().filter(|s| s.success).count();
        ok as f64 / self.step_results.len() as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_kind_parse_aliases() {
        assert_eq!(StepKind::parse("TOOL"), Some(StepKind::Tool));
        assert_eq!(StepKind::parse(" sequence "), Some(StepKind::Sequential));
        assert_eq!(StepKind::parse("decision"), None);
    }

    #[test]
    fn test_tool_step_args() {
        let mut args = Map::new();
        args.insert("resource_type".into(), json!("storage_account"));
        let step = PlanStep::tool("validate", "validation_tool", args);
        assert_eq!(step.kind, StepKind::Tool);
        assert_eq!(step.arg("resource_type"), Some(&json!("storage_account")));
        assert_eq!(step.timeout_seconds, 60.0);
        assert_eq!(step.max_retries, 3);
    }

    #[test]
    fn test_plan_goal_and_strategy() {
        let plan = ExecutionPlan::new(vec![PlanStep::message("hello", "hi")])
            .with_metadata("goal", json!("deploy a vm"))
            .with_metadata("strategy", json!("explore"));
        assert_eq!(plan.goal(), Some("deploy a vm"));
        assert_eq!(plan.strategy(), Some("explore"));
        assert_eq!(plan.step_names(), vec!["hello"]);
    }

    #[test]
    fn test_step_defaults_when_deserializing() {
        let step: PlanStep =
            serde_json::from_str(r#"{"kind": "message", "name": "note", "content": "x"}"#).unwrap();
        assert!(step.dependencies.is_empty());
        assert_eq!(step.max_retries, 3);
    }

    #[test]
    fn test_success_ratio() {
        let result = ExecutionResult::success(json!(null)).with_steps(vec![
            StepResult::success("a", json!(1)),
            StepResult::failure("b", "boom"),
        ]);
        assert!((result.success_ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(ExecutionResult::failure("x").success_ratio(), 1.0);
    }
}
