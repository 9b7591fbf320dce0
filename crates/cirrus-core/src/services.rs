//! Narrow capabilities the agents consume from the outside world.
//!
//! Agents never talk to an LLM provider, a tool runtime, or a database
//! directly; they go through these traits so hosts can plug in real
//! backends and tests can plug in scripted ones.

use crate::{AgentContext, CirrusResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Text completion: turns a prompt into free text.
///
/// Any error is treated by callers as a plan-generation failure.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, prompt: &str, context: &AgentContext) -> CirrusResult<String>;
}

/// Tool execution keyed by registered tool name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, tool: &str, args: serde_json::Value) -> CirrusResult<serde_json::Value>;
}

/// A record held by an [`ExperienceStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    /// Namespace the record belongs to (per agent and user).
    pub namespace: String,
    /// Searchable text.
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(namespace: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            content: content.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Durable experience/memory store, namespaced per agent and user.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    /// Persist a record.
    async fn store(&self, record: MemoryRecord) -> CirrusResult<()>;

    /// Return up to `limit` records in `namespace` most relevant to `query`,
    /// best match first.
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> CirrusResult<Vec<MemoryRecord>>;
}
