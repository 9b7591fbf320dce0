use cirrus_core::{AgentContext, CirrusError, CirrusResult};
use serde::{Deserialize, Serialize};

/// How a supervisor picks among eligible workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionStrategy {
    /// First eligible worker in registration order.
    RoundRobin,
    /// Eligible worker with the lowest current load.
    #[default]
    LeastLoaded,
    /// Eligible worker with the highest priority.
    PriorityBased,
    /// Eligible worker sharing the most skills with the task.
    SkillBased,
}

impl std::fmt::Display for SupervisionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisionStrategy::RoundRobin => write!(f, "round_robin"),
            SupervisionStrategy::LeastLoaded => write!(f, "least_loaded"),
            SupervisionStrategy::PriorityBased => write!(f, "priority_based"),
            SupervisionStrategy::SkillBased => write!(f, "skill_based"),
        }
    }
}

/// Declarative description of one agent, as accepted by
/// [`crate::AgentFactory::from_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Registry name; defaults to the agent type.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: AgentContext,
    #[serde(default)]
    pub strategy: SupervisionStrategy,
    /// Skills advertised when the agent is used as a supervised worker.
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Relative capacity share when used as a worker; scales `max_concurrent`.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_weight() -> f64 {
    1.0
}

impl AgentConfig {
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            name: None,
            context: AgentContext::default(),
            strategy: SupervisionStrategy::default(),
            skills: Vec::new(),
            priority: 0,
            max_concurrent: default_max_concurrent(),
            weight: default_weight(),
        }
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: SupervisionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Name the agent is registered under.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.agent_type)
    }

    /// Worker capacity after applying `weight`; never below one.
    pub fn effective_capacity(&self) -> usize {
        let scaled = (self.max_concurrent as f64 * self.weight).round();
        if scaled.is_finite() && scaled >= 1.0 {
            scaled as usize
        } else {
            1
        }
    }

    /// Reject configurations no agent could be built from.
    pub fn validate(&self) -> CirrusResult<()> {
        if self.agent_type.trim().is_empty() {
            return Err(CirrusError::Config("agent type must be a non-empty string".into()));
        }
        let timeout = self.context.timeout_seconds;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(CirrusError::Config(format!(
                "timeout_seconds must be positive, got {timeout}"
            )));
        }
        if self.max_concurrent == 0 {
            return Err(CirrusError::Config("max_concurrent must be at least 1".into()));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(CirrusError::Config(format!(
                "weight must be positive, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// One worker of an ensemble. Fields set here override the agent's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl WorkerConfig {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            skills: None,
            priority: None,
            max_concurrent: None,
        }
    }

    pub fn skills(&self) -> &[String] {
        self.skills.as_deref().unwrap_or(&self.agent.skills)
    }

    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(self.agent.priority)
    }

    pub fn capacity(&self) -> usize {
        match self.max_concurrent {
            Some(n) => n.max(1),
            None => self.agent.effective_capacity(),
        }
    }
}

/// A supervisor plus its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub context: AgentContext,
    #[serde(default)]
    pub strategy: SupervisionStrategy,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

/// Tuning for [`crate::LearningAgent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// EWMA smoothing for per-strategy scores.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default = "default_initial_exploration")]
    pub initial_exploration: f64,
    #[serde(default = "default_min_exploration")]
    pub min_exploration: f64,
    #[serde(default = "default_max_exploration")]
    pub max_exploration: f64,
    /// How many similar experiences to fetch when planning.
    #[serde(default = "default_similarity_limit")]
    pub similarity_limit: usize,
    /// Runs faster than this earn the latency bonus.
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,
    /// Runs slower than this take the latency penalty.
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
    #[serde(default = "default_fast_bonus")]
    pub fast_bonus: f64,
    #[serde(default = "default_slow_penalty")]
    pub slow_penalty: f64,
    /// Seed for the exploration coin; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_history_capacity() -> usize {
    100
}
fn default_smoothing() -> f64 {
    0.1
}
fn default_initial_exploration() -> f64 {
    0.1
}
fn default_min_exploration() -> f64 {
    0.01
}
fn default_max_exploration() -> f64 {
    0.3
}
fn default_similarity_limit() -> usize {
    5
}
fn default_fast_ms() -> u64 {
    1_000
}
fn default_slow_ms() -> u64 {
    30_000
}
fn default_fast_bonus() -> f64 {
    1.2
}
fn default_slow_penalty() -> f64 {
    0.7
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            smoothing: default_smoothing(),
            initial_exploration: default_initial_exploration(),
            min_exploration: default_min_exploration(),
            max_exploration: default_max_exploration(),
            similarity_limit: default_similarity_limit(),
            fast_ms: default_fast_ms(),
            slow_ms: default_slow_ms(),
            fast_bonus: default_fast_bonus(),
            slow_penalty: default_slow_penalty(),
            seed: None,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> CirrusResult<()> {
        if !(0.0 < self.min_exploration && self.min_exploration <= self.max_exploration && self.max_exploration <= 1.0) {
            return Err(CirrusError::Config(format!(
                "exploration bounds must satisfy 0 < min <= max <= 1, got [{}, {}]",
                self.min_exploration, self.max_exploration
            )));
        }
        if !(self.min_exploration..=self.max_exploration).contains(&self.initial_exploration) {
            return Err(CirrusError::Config(format!(
                "initial_exploration must be within [{}, {}], got {}",
                self.min_exploration, self.max_exploration, self.initial_exploration
            )));
        }
        if !(0.0 < self.smoothing && self.smoothing <= 1.0) {
            return Err(CirrusError::Config(format!(
                "smoothing must be within (0, 1], got {}",
                self.smoothing
            )));
        }
        if self.history_capacity == 0 {
            return Err(CirrusError::Config("history_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Timing knobs for [`crate::ReactiveAgent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactiveConfig {
    /// Longest the consumer waits on an empty queue before re-checking for stop.
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    /// Grace period `stop` gives the consumer before aborting it.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Simulated latency of a monitoring/alert configuration step.
    #[serde(default = "default_tool_delay_ms")]
    pub tool_delay_ms: u64,
}

fn default_poll_ms() -> u64 {
    1_000
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
fn default_tool_delay_ms() -> u64 {
    100
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            tool_delay_ms: default_tool_delay_ms(),
        }
    }
}
