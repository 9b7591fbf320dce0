//! Agents for Cirrus.
//!
//! Every agent implements [`Agent`]: `plan` turns a goal into an
//! [`cirrus_core::ExecutionPlan`], `execute` carries it out, and `run` does
//! both while tracking status and timing.
//!
//! # Main types
//!
//! - [`ChainAgent`]: runs links in order over one running value.
//! - [`ReactiveAgent`]: dispatches emitted events to handlers on a background loop.
//! - [`SupervisorAgent`]: fans tasks out to skill- and load-aware workers.
//! - [`LearningAgent`]: reuses or replaces plans based on past feedback.
//! - [`OrchestratorAgent`]: plans with a completion service and runs steps in order.
//! - [`CoordinatorAgent`]: routes goals and reacts to deployment events.
//! - [`AgentFactory`]: builds all of the above from [`AgentConfig`].

/// The agent contract, status and metrics.
pub mod agent;
/// Chain agent and links.
pub mod chain;
/// Typed agent configuration.
pub mod config;
/// Coordinator agent and goal routing.
pub mod coordinator;
/// Agent factory and instance cache.
pub mod factory;
/// Experience-replay learning agent.
pub mod learning;
/// Per-worker state tracking for supervisors.
pub mod monitor;
/// Orchestrator agent.
pub mod orchestrator;
/// Plan parsing from completion text.
pub mod parse;
/// Event-driven agent.
pub mod reactive;
/// Supervisor agent and worker selection.
pub mod supervisor;
/// Tool trait and registry.
pub mod tools;

pub use agent::{Agent, AgentMetrics, AgentStats, AgentStatus};
pub use chain::{ChainAgent, ChainLink};
pub use config::{
    AgentConfig, EnsembleConfig, LearningConfig, ReactiveConfig, SupervisionStrategy, WorkerConfig,
};
pub use coordinator::{CoordinatorAgent, Route};
pub use factory::{AgentConstructor, AgentFactory, Collaborators, SPECIALIZATIONS};
pub use learning::{compute_feedback, Experience, LearningAgent};
pub use monitor::{WorkerMetrics, WorkerMonitor, WorkerState, WorkerStatus};
pub use orchestrator::OrchestratorAgent;
pub use parse::{parse_plan_json, parse_strategy_lines};
pub use reactive::{handler_fn, EventHandler, HandlerId, ReactiveAgent};
pub use supervisor::{select_worker, SupervisorAgent, WorkerAgent};
pub use tools::{SimulatedTool, Tool, ToolDescriptor, ToolRegistry};
