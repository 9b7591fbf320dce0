use async_trait::async_trait;
use cirrus_core::{AgentContext, CirrusResult, ExecutionPlan, ExecutionResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Smoothing factor for the timing averages kept in [`AgentMetrics`].
const TIMING_ALPHA: f64 = 0.1;

/// Lifecycle state of an agent, as last observed by [`Agent::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Planning => write!(f, "planning"),
            AgentStatus::Executing => write!(f, "executing"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Execution counters and exponentially weighted timing averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_planning_ms: f64,
    pub avg_execution_ms: f64,
}

/// Status and metrics cell owned by every agent and updated by [`Agent::run`].
#[derive(Debug)]
pub struct AgentStats {
    inner: Mutex<(AgentStatus, AgentMetrics)>,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((AgentStatus::Idle, AgentMetrics::default())),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.lock().0
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.inner.lock().1.clone()
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.inner.lock().0 = status;
    }

    pub fn record_planning(&self, planning_ms: u64) {
        let mut inner = self.inner.lock();
        let m = &mut inner.1;
        m.avg_planning_ms = TIMING_ALPHA * planning_ms as f64 + (1.0 - TIMING_ALPHA) * m.avg_planning_ms;
    }

    /// Count one finished run. `execution_ms` is `None` when the run never
    /// reached execution.
    pub fn record_outcome(&self, success: bool, execution_ms: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.0 = if success {
            AgentStatus::Completed
        } else {
            AgentStatus::Failed
        };
        let m = &mut inner.1;
        m.total_executions += 1;
        if success {
            m.successful_executions += 1;
        } else {
            m.failed_executions += 1;
        }
        if let Some(ms) = execution_ms {
            m.avg_execution_ms = TIMING_ALPHA * ms as f64 + (1.0 - TIMING_ALPHA) * m.avg_execution_ms;
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The capability every agent variant implements: turn a goal into a plan,
/// then carry the plan out.
///
/// Implementations report business failures as `Ok` results with
/// `success == false`. An `Err` from `plan` or `execute` is either a fatal
/// error (see [`cirrus_core::CirrusError::is_fatal`]) or an outage in a
/// collaborator; [`Agent::run`] forwards the former and folds the latter into
/// a failed result.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name used in logs, registries and worker monitors.
    fn name(&self) -> &str;

    fn context(&self) -> &AgentContext;

    fn stats(&self) -> &AgentStats;

    async fn plan(&self, goal: &str) -> CirrusResult<ExecutionPlan>;

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult>;

    /// Plan then execute `goal`, keeping [`AgentStats`] current.
    async fn run(&self, goal: &str) -> CirrusResult<ExecutionResult> {
        let stats = self.stats();
        stats.set_status(AgentStatus::Planning);
        info!(agent = %self.name(), goal = %goal, "Agent run started");

        let planning_started = Instant::now();
        let plan = match self.plan(goal).await {
            Ok(plan) => plan,
            Err(e) => {
                let planning_ms = elapsed_ms(planning_started);
                stats.record_planning(planning_ms);
                stats.record_outcome(false, None);
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(agent = %self.name(), error = %e, "Planning failed");
                return Ok(ExecutionResult::failure(format!("Planning failed: {e}"))
                    .with_duration(planning_ms));
            }
        };
        stats.record_planning(elapsed_ms(planning_started));

        stats.set_status(AgentStatus::Executing);
        let execution_started = Instant::now();
        let outcome = self.execute(&plan).await;
        let execution_ms = elapsed_ms(execution_started);

        match outcome {
            Ok(mut result) => {
                if result.duration_ms == 0 {
                    result.duration_ms = execution_ms;
                }
                stats.record_outcome(result.success, Some(execution_ms));
                info!(
                    agent = %self.name(),
                    success = result.success,
                    steps = result.step_results.len(),
                    duration_ms = result.duration_ms,
                    "Agent run finished"
                );
                Ok(result)
            }
            Err(e) => {
                stats.record_outcome(false, Some(execution_ms));
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(agent = %self.name(), error = %e, "Execution failed");
                Ok(ExecutionResult::failure(e.to_string()).with_duration(execution_ms))
            }
        }
    }
}
