use async_trait::async_trait;
use cirrus_core::{CirrusError, CirrusResult, ToolExecutor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata describing a tool's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema: json!({"type": "object"}),
        }
    }
}

/// A named capability an agent can invoke from a TOOL step.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn call(&self, args: Value) -> CirrusResult<Value>;
}

/// Tool that performs no side effect and reports what it would have done.
///
/// Stands in for provisioning and monitoring backends in dry runs.
pub struct SimulatedTool {
    descriptor: ToolDescriptor,
}

impl SimulatedTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, description),
        }
    }
}

#[async_trait]
impl Tool for SimulatedTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, args: Value) -> CirrusResult<Value> {
        debug!(tool = %self.descriptor.name, "Simulating tool call");
        Ok(json!({
            "tool": self.descriptor.name,
            "status": "simulated",
            "args": args,
        }))
    }
}

/// Central registry for all callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with simulated versions of the tools the built-in
    /// planners emit.
    pub fn with_simulated_defaults() -> Self {
        let mut registry = Self::new();
        for (name, description) in [
            ("validate_request", "Validate a provisioning request"),
            ("check_prerequisites", "Check quotas, permissions and naming"),
            ("generate_infrastructure", "Render infrastructure-as-code"),
            ("apply_infrastructure", "Apply rendered infrastructure"),
            ("verify_deployment", "Verify deployed resources are healthy"),
            ("provision_orchestrator", "Hand a request to the provisioning pipeline"),
            ("configure_monitoring", "Configure metrics and health checks"),
            ("configure_alerts", "Configure alert rules"),
        ] {
            registry.register(Arc::new(SimulatedTool::new(name, description)));
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Descriptors sorted by name.
    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<&ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn call(&self, tool: &str, args: Value) -> CirrusResult<Value> {
        let handle = self
            .tools
            .get(tool)
            .ok_or_else(|| CirrusError::Tool(format!("Unknown tool: {tool}")))?;
        handle.call(args).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct FailingTool {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }
        async fn call(&self, _args: Value) -> CirrusResult<Value> {
            Err(CirrusError::Tool("quota exceeded".into()))
        }
    }

    #[tokio::test]
    async fn test_call_registered_tool() {
        let registry = ToolRegistry::with_simulated_defaults();
        let out = registry
            .call("validate_request", json!({"request": "create vm"}))
            .await
            .unwrap();
        assert_eq!(out["status"], "simulated");
        assert_eq!(out["args"]["request"], "create vm");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let registry = ToolRegistry::new();
        let err = registry.call("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, CirrusError::Tool(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_tool_errors_pass_through() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool {
            descriptor: ToolDescriptor::new("scale", "Scale a pool"),
        }));
        let err = registry.call("scale", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_descriptors_sorted() {
        let registry = ToolRegistry::with_simulated_defaults();
        let names: Vec<&str> = registry
            .list_descriptors()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(registry.tool_count(), 8);
        assert_eq!(names[0], "apply_infrastructure");
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }
}
