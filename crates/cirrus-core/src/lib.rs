//! Core types and error definitions for the Cirrus agent runtime.
//!
//! This crate provides the vocabulary shared by every Cirrus crate: the
//! goal → plan → result data model, the event types flowing through reactive
//! agents, and the narrow collaborator traits agents call out to.
//!
//! # Main types
//!
//! - [`CirrusError`]: Unified error enum for all Cirrus subsystems.
//! - [`CirrusResult`]: Convenience alias for `Result<T, CirrusError>`.
//! - [`AgentContext`]: Immutable per-invocation configuration.
//! - [`ExecutionPlan`] / [`PlanStep`]: Structured decomposition of a goal.
//! - [`ExecutionResult`] / [`StepResult`]: Outcome of executing a plan.
//! - [`Event`] / [`EventType`]: Notifications consumed by reactive agents.
//! - [`CompletionService`], [`ToolExecutor`], [`ExperienceStore`]: External collaborators.

/// Per-invocation agent configuration.
pub mod context;
/// Event types for the reactive loop.
pub mod event;
/// Plan and result data model.
pub mod plan;
/// Collaborator capability traits.
pub mod services;

pub use context::{AgentContext, Environment};
pub use event::{Event, EventType};
pub use plan::{ExecutionPlan, ExecutionResult, PlanStep, StepKind, StepResult};
pub use services::{CompletionService, ExperienceStore, MemoryRecord, ToolExecutor};

// --- Error types ---

/// Top-level error type for the Cirrus runtime.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CirrusError {
    /// An error raised while an agent plans or executes.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The text-completion collaborator failed or returned unusable output.
    #[error("Completion error: {0}")]
    Completion(String),

    /// A tool invocation failed.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The experience/memory store failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// Invalid configuration (unknown agent type, malformed options).
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from agent-graph orchestration (registry, delegation).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

impl CirrusError {
    /// Whether this error is a programming or configuration failure that must
    /// reach the caller instead of being folded into a failed result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CirrusError::Config(_))
    }
}

/// A convenience `Result` alias using [`CirrusError`].
pub type CirrusResult<T> = Result<T, CirrusError>;
