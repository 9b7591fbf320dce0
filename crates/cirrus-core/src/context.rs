use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deployment environment an agent operates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development.
    #[default]
    Dev,
    /// Test.
    Tst,
    /// Acceptance.
    Acc,
    /// Production.
    Prod,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Tst => write!(f, "tst"),
            Environment::Acc => write!(f, "acc"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

/// Immutable per-invocation configuration handed to an agent at construction.
///
/// `timeout_seconds` is a hint only: no agent enforces it, callers that need a
/// deadline wrap `run` themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_user_id() -> String {
    "system".to_string()
}

fn default_dry_run() -> bool {
    true
}

fn default_timeout_seconds() -> f64 {
    300.0
}

impl Default for AgentContext {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            environment: Environment::default(),
            dry_run: default_dry_run(),
            timeout_seconds: default_timeout_seconds(),
            correlation_id: None,
            metadata: HashMap::new(),
        }
    }
}

impl AgentContext {
    /// Create a context for the given user with all other fields defaulted.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// JSON snapshot embedded into plan metadata.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "user_id": self.user_id,
            "environment": self.environment,
            "dry_run": self.dry_run,
            "metadata": self.metadata,
        })
    }
}
