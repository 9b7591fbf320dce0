//! Skill- and load-aware fan-out over a pool of worker agents.

use crate::agent::{elapsed_ms, Agent, AgentStats};
use crate::config::SupervisionStrategy;
use crate::monitor::WorkerMonitor;
use async_trait::async_trait;
use cirrus_core::{
    AgentContext, CirrusResult, ExecutionPlan, ExecutionResult, PlanStep, StepResult,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// An agent plus the scheduling metadata a supervisor needs.
pub struct WorkerAgent {
    pub agent: Arc<dyn Agent>,
    pub skills: BTreeSet<String>,
    pub priority: i32,
    pub max_concurrent: usize,
    pub current_load: usize,
    slot: usize,
}

impl WorkerAgent {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            skills: BTreeSet::new(),
            priority: 0,
            max_concurrent: 3,
            current_load: 0,
            slot: 0,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Below its concurrency cap and sharing a skill with `required`
    /// (any worker qualifies when nothing is required).
    pub fn is_eligible(&self, required: &BTreeSet<String>) -> bool {
        self.current_load < self.max_concurrent
            && (required.is_empty() || !self.skills.is_disjoint(required))
    }

    fn overlap(&self, required: &BTreeSet<String>) -> usize {
        self.skills.intersection(required).count()
    }
}

/// Index of the worker `strategy` picks for a task requiring `required`,
/// or `None` when no worker is eligible. Ties go to the earliest worker.
pub fn select_worker(
    workers: &[WorkerAgent],
    required: &BTreeSet<String>,
    strategy: SupervisionStrategy,
) -> Option<usize> {
    let mut eligible = workers
        .iter()
        .enumerate()
        .filter(|(_, w)| w.is_eligible(required));

    match strategy {
        SupervisionStrategy::RoundRobin => eligible.next(),
        SupervisionStrategy::LeastLoaded => eligible.min_by_key(|(_, w)| w.current_load),
        SupervisionStrategy::PriorityBased => eligible.min_by_key(|(_, w)| Reverse(w.priority)),
        SupervisionStrategy::SkillBased => eligible.min_by_key(|(_, w)| Reverse(w.overlap(required))),
    }
    .map(|(idx, _)| idx)
}

/// Gives a reserved unit of capacity back when dropped.
struct LoadGuard<'a> {
    workers: &'a Mutex<Vec<WorkerAgent>>,
    index: usize,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.workers.lock().get_mut(self.index) {
            worker.current_load = worker.current_load.saturating_sub(1);
        }
    }
}

#[allow(clippy::expect_used)]
static TASK_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*;\s*|\s+(?:and\s+then|then|and)\s+").expect("valid task separator")
});

const SKILL_KEYWORDS: &[(&str, &str)] = &[
    ("provision", "provisioning"),
    ("deploy", "provisioning"),
    ("create", "provisioning"),
    ("monitor", "monitoring"),
    ("cost", "cost"),
    ("budget", "cost"),
    ("secur", "security"),
    ("vulnerab", "security"),
];

/// Split a goal into `(description, skills, priority)` tasks.
fn decompose(goal: &str) -> Vec<(String, Vec<String>, i32)> {
    let mut parts: Vec<&str> = TASK_SEPARATOR
        .split(goal)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        parts.push(goal.trim());
    }

    parts
        .into_iter()
        .map(|part| {
            let lower = part.to_lowercase();
            let skills: BTreeSet<String> = SKILL_KEYWORDS
                .iter()
                .filter(|(needle, _)| lower.contains(needle))
                .map(|(_, skill)| skill.to_string())
                .collect();
            let priority = if lower.contains("urgent") || lower.contains("critical") {
                10
            } else if lower.contains("asap") || lower.contains("high priority") {
                5
            } else {
                0
            };
            (part.to_string(), skills.into_iter().collect(), priority)
        })
        .collect()
}

fn required_skills(step: &PlanStep) -> BTreeSet<String> {
    step.arg("skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn task_goal(step: &PlanStep) -> String {
    step.arg("task")
        .and_then(Value::as_str)
        .or(step.description.as_deref())
        .unwrap_or(&step.name)
        .to_string()
}

/// Dispatches every planned task concurrently to the worker its strategy
/// selects.
pub struct SupervisorAgent {
    name: String,
    context: AgentContext,
    stats: AgentStats,
    strategy: SupervisionStrategy,
    workers: Mutex<Vec<WorkerAgent>>,
    monitor: WorkerMonitor,
}

impl SupervisorAgent {
    pub fn new(context: AgentContext, strategy: SupervisionStrategy) -> Self {
        Self {
            name: "supervisor".to_string(),
            context,
            stats: AgentStats::new(),
            strategy,
            workers: Mutex::new(Vec::new()),
            monitor: WorkerMonitor::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub async fn add_worker(&self, mut worker: WorkerAgent) {
        let skills: Vec<String> = worker.skills.iter().cloned().collect();
        worker.slot = self.monitor.register(worker.agent.name(), skills).await;
        info!(
            supervisor = %self.name,
            worker = %worker.agent.name(),
            priority = worker.priority,
            max_concurrent = worker.max_concurrent,
            "Worker added"
        );
        self.workers.lock().push(worker);
    }

    pub fn strategy(&self) -> SupervisionStrategy {
        self.strategy
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Current load of each worker, in registration order.
    pub fn worker_loads(&self) -> Vec<usize> {
        self.workers.lock().iter().map(|w| w.current_load).collect()
    }

    pub fn monitor(&self) -> &WorkerMonitor {
        &self.monitor
    }

    /// Select a worker and take one unit of its capacity in one critical
    /// section.
    fn reserve(&self, required: &BTreeSet<String>) -> Option<(Arc<dyn Agent>, usize, LoadGuard<'_>)> {
        let mut workers = self.workers.lock();
        let index = select_worker(&workers, required, self.strategy)?;
        let worker = &mut workers[index];
        worker.current_load += 1;
        Some((
            worker.agent.clone(),
            worker.slot,
            LoadGuard {
                workers: &self.workers,
                index,
            },
        ))
    }

    async fn run_task(&self, step: &PlanStep) -> StepResult {
        let started = Instant::now();
        let required = required_skills(step);
        let goal = task_goal(step);

        let Some((agent, slot, _guard)) = self.reserve(&required) else {
            warn!(supervisor = %self.name, task = %step.name, required = ?required, "No eligible worker");
            return StepResult::failure(
                &step.name,
                format!(
                    "No eligible worker for task '{}' (required skills: {:?})",
                    step.name, required
                ),
            );
        };

        debug!(supervisor = %self.name, task = %step.name, worker = %agent.name(), "Task dispatched");
        self.monitor.start_task(slot, &goal).await;
        let outcome = agent.run(&goal).await;
        let duration_ms = elapsed_ms(started);

        let step_result = match outcome {
            Ok(result) if result.success => StepResult::success(
                &step.name,
                json!({"worker": agent.name(), "result": result.result}),
            ),
            Ok(result) => StepResult::failure(
                &step.name,
                result
                    .error
                    .unwrap_or_else(|| format!("Worker '{}' reported failure", agent.name())),
            ),
            Err(e) => StepResult::failure(&step.name, e.to_string()),
        };
        self.monitor
            .finish_task(slot, duration_ms, step_result.success)
            .await;
        step_result.with_duration(duration_ms)
    }
}

#[async_trait]
impl Agent for SupervisorAgent {
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
        let tasks = decompose(goal);
        let steps: Vec<PlanStep> = tasks
            .iter()
            .enumerate()
            .map(|(i, (description, skills, priority))| {
                let mut args = Map::new();
                args.insert("task".into(), json!(description));
                args.insert("skills".into(), json!(skills));
                args.insert("priority".into(), json!(priority));
                PlanStep::parallel(format!("task_{i}"))
                    .with_description(description.clone())
                    .with_args(args)
            })
            .collect();

        Ok(ExecutionPlan::new(steps)
            .with_metadata("goal", json!(goal))
            .with_metadata("total_tasks", json!(tasks.len()))
            .with_metadata("strategy", json!(self.strategy.to_string())))
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        let started = Instant::now();
        let step_results: Vec<StepResult> =
            join_all(plan.steps.iter().map(|step| self.run_task(step))).await;

        let failed = step_results.iter().filter(|s| !s.success).count();
        let outputs: Vec<Value> = step_results
            .iter()
            .map(|s| s.output.clone().unwrap_or(Value::Null))
            .collect();
        info!(
            supervisor = %self.name,
            tasks = step_results.len(),
            failed,
            "Fan-out finished"
        );

        let result = if failed == 0 {
            ExecutionResult::success(json!({"completed": step_results.len(), "tasks": outputs}))
        } else {
            ExecutionResult::failure(format!(
                "{failed} of {} tasks failed",
                step_results.len()
            ))
        };
        Ok(result
            .with_steps(step_results)
            .with_duration(elapsed_ms(started))
            .with_metadata("workers", self.monitor.to_json().await))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cirrus_core::CirrusError;

    struct EchoAgent {
        name: String,
        context: AgentContext,
        stats: AgentStats,
        fail: bool,
    }

    impl EchoAgent {
        fn new(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                name: name.into(),
                context: AgentContext::default(),
                stats: AgentStats::new(),
                fail: false,
            })
        }

        fn failing(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                name: name.into(),
                context: AgentContext::default(),
                stats: AgentStats::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
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
            Ok(ExecutionPlan::new(Vec::new()).with_metadata("goal", json!(goal)))
        }
        async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
            if self.fail {
                return Err(CirrusError::Tool("quota exceeded".into()));
            }
            Ok(ExecutionResult::success(json!(plan.goal())))
        }
    }

    fn skills(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn worker(name: &str, load: usize, skill_names: &[&str], priority: i32) -> WorkerAgent {
        let mut w = WorkerAgent::new(EchoAgent::new(name))
            .with_skills(skill_names.iter().copied())
            .with_priority(priority);
        w.current_load = load;
        w
    }

    #[test]
    fn test_round_robin_picks_first_eligible() {
        let workers = vec![worker("a", 3, &[], 0), worker("b", 2, &[], 0), worker("c", 0, &[], 0)];
        assert_eq!(select_worker(&workers, &skills(&[]), SupervisionStrategy::RoundRobin), Some(1));
    }

    #[test]
    fn test_least_loaded_ties_go_to_first() {
        let workers = vec![worker("a", 1, &[], 0), worker("b", 0, &[], 0), worker("c", 0, &[], 0)];
        assert_eq!(select_worker(&workers, &skills(&[]), SupervisionStrategy::LeastLoaded), Some(1));
    }

    #[test]
    fn test_priority_based_picks_highest() {
        let workers = vec![worker("a", 0, &[], 1), worker("b", 0, &[], 7), worker("c", 0, &[], 7)];
        assert_eq!(select_worker(&workers, &skills(&[]), SupervisionStrategy::PriorityBased), Some(1));
    }

    #[test]
    fn test_skill_based_prefers_largest_overlap() {
        let workers = vec![
            worker("a", 0, &["cost"], 0),
            worker("b", 0, &["cost", "security"], 0),
        ];
        let required = skills(&["cost", "security"]);
        assert_eq!(select_worker(&workers, &required, SupervisionStrategy::SkillBased), Some(1));
    }

    #[test]
    fn test_no_eligible_worker() {
        let workers = vec![worker("a", 0, &["monitoring"], 0), worker("b", 3, &["cost"], 0)];
        assert_eq!(
            select_worker(&workers, &skills(&["cost"]), SupervisionStrategy::LeastLoaded),
            None
        );
        assert_eq!(select_worker(&[], &skills(&[]), SupervisionStrategy::RoundRobin), None);
    }

    #[test]
    fn test_decompose_tags_skills_and_priority() {
        let tasks = decompose("Deploy the api and monitor costs; urgent: patch security holes");
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].0, "Deploy the api");
        assert_eq!(tasks[0].1, vec!["provisioning".to_string()]);
        assert_eq!(tasks[1].1, vec!["cost".to_string(), "monitoring".to_string()]);
        assert_eq!(tasks[2].1, vec!["security".to_string()]);
        assert_eq!(tasks[2].2, 10);
    }

    #[test]
    fn test_decompose_does_not_split_inside_words() {
        let tasks = decompose("expand the android fleet");
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_emits_parallel_steps() {
        let supervisor = SupervisorAgent::new(AgentContext::default(), SupervisionStrategy::LeastLoaded);
        let plan = supervisor.plan("create a vm then monitor it").await.unwrap();
        assert_eq!(plan.step_names(), vec!["task_0", "task_1"]);
        assert!(plan.steps.iter().all(|s| s.kind == cirrus_core::StepKind::Parallel));
        assert_eq!(plan.steps[1].arg("skills"), Some(&json!(["monitoring"])));
        assert_eq!(plan.metadata["total_tasks"], json!(2));
    }

    #[tokio::test]
    async fn test_load_is_released_after_failure() {
        let supervisor = SupervisorAgent::new(AgentContext::default(), SupervisionStrategy::RoundRobin);
        supervisor
            .add_worker(WorkerAgent::new(EchoAgent::failing("flaky")))
            .await;

        let result = supervisor.run("restart api").await.unwrap();
        assert!(!result.success);
        assert!(result.step_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("quota exceeded"));
        assert_eq!(supervisor.worker_loads(), vec![0]);

        let state = supervisor.monitor().get_state(0).await.unwrap();
        assert_eq!(state.metrics.errors, 1);
    }

    #[tokio::test]
    async fn test_empty_pool_fails_each_task() {
        let supervisor = SupervisorAgent::new(AgentContext::default(), SupervisionStrategy::LeastLoaded);
        let result = supervisor.run("deploy api and monitor it").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.step_results.len(), 2);
        assert!(result
            .step_results
            .iter()
            .all(|s| s.error.as_deref().unwrap().contains("No eligible worker")));
        assert_eq!(result.error.as_deref(), Some("2 of 2 tasks failed"));
    }
}
