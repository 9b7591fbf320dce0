//! Experience-replay agent.
//!
//! A [`LearningAgent`] wraps another agent. Each plan is either an
//! adaptation of the best past plan for a similar goal (exploit) or a fresh
//! strategy from the completion service (explore). After every execution it
//! scores the outcome, remembers it, and nudges its exploration rate.

use crate::agent::{elapsed_ms, Agent, AgentStats};
use crate::config::LearningConfig;
use crate::parse::{parse_plan_json, parse_strategy_lines};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_core::{
    AgentContext, CirrusError, CirrusResult, CompletionService, ExecutionPlan, ExecutionResult,
    ExperienceStore, MemoryRecord, PlanStep,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const STRATEGY_EXPLORE: &str = "explore";
const STRATEGY_EXPLOIT: &str = "exploit";
const MAX_EXPLORED_STEPS: usize = 10;
/// Argument keys whose value is the goal itself.
const GOAL_KEYS: &[&str] = &["goal", "request", "task", "query"];

/// One remembered run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub goal: String,
    pub plan: ExecutionPlan,
    pub result: ExecutionResult,
    /// Outcome score in `[-1, 1]`.
    pub feedback: f64,
    pub strategy: String,
    pub recorded_at: DateTime<Utc>,
}

/// Score an outcome: `-1` for a failure, otherwise the latency factor times
/// the fraction of successful steps, clamped to `[-1, 1]`.
pub fn compute_feedback(result: &ExecutionResult, duration_ms: u64, config: &LearningConfig) -> f64 {
    if !result.success {
        return -1.0;
    }
    let latency = if duration_ms < config.fast_ms {
        config.fast_bonus
    } else if duration_ms > config.slow_ms {
        config.slow_penalty
    } else {
        1.0
    };
    (latency * result.success_ratio()).clamp(-1.0, 1.0)
}

/// Exploration rate after observing `feedback`: good outcomes shrink it,
/// anything else grows it, always within the configured bounds.
pub fn next_exploration_rate(rate: f64, feedback: f64, config: &LearningConfig) -> f64 {
    let factor = if feedback > 0.5 { 0.95 } else { 1.05 };
    (rate * factor).clamp(config.min_exploration, config.max_exploration)
}

fn substitute_goal(value: &mut Value, old_goal: &str, new_goal: &str) {
    match value {
        Value::String(s) if !old_goal.is_empty() && s.contains(old_goal) => {
            *s = s.replace(old_goal, new_goal);
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| substitute_goal(v, old_goal, new_goal)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| substitute_goal(v, old_goal, new_goal)),
        _ => {}
    }
}

/// Derive a plan for `goal` from a past plan without touching the original.
fn adapt_plan(past: &Experience, goal: &str) -> Vec<PlanStep> {
    past.plan
        .steps
        .iter()
        .cloned()
        .map(|mut step| {
            if let Some(args) = step.args.as_mut() {
                for (key, value) in args.iter_mut() {
                    if GOAL_KEYS.contains(&key.as_str()) && value.is_string() {
                        *value = json!(goal);
                    } else {
                        substitute_goal(value, &past.goal, goal);
                    }
                }
            }
            if !past.goal.is_empty() {
                for text in [step.content.as_mut(), step.description.as_mut()]
                    .into_iter()
                    .flatten()
                {
                    *text = text.replace(&past.goal, goal);
                }
            }
            step
        })
        .collect()
}

struct LearningState {
    history: VecDeque<Experience>,
    strategy_scores: HashMap<String, f64>,
    exploration_rate: f64,
    rng: StdRng,
}

/// Agent that learns which plans work from its own history.
pub struct LearningAgent {
    name: String,
    context: AgentContext,
    stats: AgentStats,
    base: Arc<dyn Agent>,
    completion: Arc<dyn CompletionService>,
    memory: Arc<dyn ExperienceStore>,
    config: LearningConfig,
    state: Mutex<LearningState>,
}

impl LearningAgent {
    pub fn new(
        base: Arc<dyn Agent>,
        completion: Arc<dyn CompletionService>,
        memory: Arc<dyn ExperienceStore>,
        config: LearningConfig,
    ) -> CirrusResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            name: format!("learning({})", base.name()),
            context: base.context().clone(),
            stats: AgentStats::new(),
            base,
            completion,
            memory,
            state: Mutex::new(LearningState {
                history: VecDeque::with_capacity(config.history_capacity),
                strategy_scores: HashMap::new(),
                exploration_rate: config.initial_exploration,
                rng,
            }),
            config,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Memory namespace for this agent's user.
    pub fn namespace(&self) -> String {
        format!("learning:{}", self.context.user_id)
    }

    pub fn exploration_rate(&self) -> f64 {
        self.state.lock().exploration_rate
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<Experience> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn strategy_score(&self, strategy: &str) -> Option<f64> {
        self.state.lock().strategy_scores.get(strategy).copied()
    }

    async fn similar_experiences(&self, goal: &str) -> Vec<Experience> {
        let records = match self
            .memory
            .search(&self.namespace(), goal, self.config.similarity_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Experience search failed");
                return Vec::new();
            }
        };
        records
            .into_iter()
            .filter_map(|record| {
                let raw = record.metadata.get("experience")?.clone();
                serde_json::from_value(raw)
                    .map_err(|e| debug!(record = %record.id, error = %e, "Skipping unreadable experience"))
                    .ok()
            })
            .collect()
    }

    async fn explore(&self, goal: &str) -> CirrusResult<Vec<PlanStep>> {
        let prompt = format!(
            "Propose a new strategy to achieve this goal: {goal}\n\
             Environment: {}. Dry run: {}.\n\
             Answer with one step per line, each starting with TOOL, MESSAGE, SEQUENTIAL or PARALLEL.",
            self.context.environment, self.context.dry_run
        );
        let text = self.completion.generate(&prompt, &self.context).await?;
        let steps = parse_plan_json(&text)
            .unwrap_or_else(|| parse_strategy_lines(&text, goal, MAX_EXPLORED_STEPS));
        if steps.is_empty() {
            return Ok(vec![PlanStep::message("step_0", format!("Plan for goal: {goal}"))]);
        }
        Ok(steps)
    }

    /// Append to history, update scores and exploration. Returns the new
    /// exploration rate.
    fn remember(&self, experience: Experience) -> f64 {
        let mut state = self.state.lock();
        let alpha = self.config.smoothing;
        let score = state
            .strategy_scores
            .entry(experience.strategy.clone())
            .or_insert(0.0);
        *score = alpha * experience.feedback + (1.0 - alpha) * *score;

        state.exploration_rate =
            next_exploration_rate(state.exploration_rate, experience.feedback, &self.config);

        if state.history.len() == self.config.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(experience);
        state.exploration_rate
    }
}

#[async_trait]
impl Agent for LearningAgent {
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
        let similar = self.similar_experiences(goal).await;
        let explore = {
            let mut state = self.state.lock();
            let roll: f64 = state.rng.gen();
            roll < state.exploration_rate
        };

        let best = similar
            .iter()
            .filter(|e| e.result.success)
            .reduce(|best, e| if e.feedback > best.feedback { e } else { best });

        let (steps, strategy, adapted_from) = match best {
            Some(past) if !explore => {
                debug!(agent = %self.name, past_goal = %past.goal, feedback = past.feedback, "Exploiting past plan");
                (adapt_plan(past, goal), STRATEGY_EXPLOIT, Some(past.goal.clone()))
            }
            _ => {
                debug!(agent = %self.name, similar = similar.len(), "Exploring new strategy");
                (self.explore(goal).await?, STRATEGY_EXPLORE, None)
            }
        };

        let mut plan = ExecutionPlan::new(steps)
            .with_metadata("goal", json!(goal))
            .with_metadata("strategy", json!(strategy))
            .with_metadata("similar_experiences", json!(similar.len()))
            .with_metadata("context", self.context.snapshot());
        if let Some(past_goal) = adapted_from {
            plan = plan.with_metadata("adapted_from", json!(past_goal));
        }
        Ok(plan)
    }

    async fn execute(&self, plan: &ExecutionPlan) -> CirrusResult<ExecutionResult> {
        let started = Instant::now();
        let result = match self.base.execute(plan).await {
            Ok(result) => result,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ExecutionResult::failure(e.to_string()),
        };
        let duration_ms = if result.duration_ms > 0 {
            result.duration_ms
        } else {
            elapsed_ms(started)
        };

        let feedback = compute_feedback(&result, duration_ms, &self.config);
        let strategy = plan.strategy().unwrap_or(STRATEGY_EXPLORE).to_string();
        let goal = plan.goal().unwrap_or_default().to_string();
        let experience = Experience {
            goal: goal.clone(),
            plan: plan.clone(),
            result: result.clone(),
            feedback,
            strategy: strategy.clone(),
            recorded_at: Utc::now(),
        };

        let record = MemoryRecord::new(self.namespace(), goal)
            .with_metadata("feedback", json!(feedback))
            .with_metadata("strategy", json!(strategy))
            .with_metadata(
                "experience",
                serde_json::to_value(&experience).map_err(CirrusError::from)?,
            );
        let exploration_rate = self.remember(experience);
        if let Err(e) = self.memory.store(record).await {
            warn!(agent = %self.name, error = %e, "Failed to persist experience");
        }

        info!(
            agent = %self.name,
            strategy = %strategy,
            feedback,
            exploration_rate,
            "Learning feedback recorded"
        );

        let (history_len, scores) = {
            let state = self.state.lock();
            (state.history.len(), state.strategy_scores.clone())
        };
        Ok(result
            .with_metadata("feedback", json!(feedback))
            .with_metadata("strategy", json!(strategy))
            .with_metadata("exploration_rate", json!(exploration_rate))
            .with_metadata(
                "learning",
                json!({"history_len": history_len, "strategy_scores": scores}),
            ))
    }
}
