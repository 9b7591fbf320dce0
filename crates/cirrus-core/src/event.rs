use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of notification carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeploymentStarted,
    DeploymentComplete,
    DeploymentFailed,
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,
    ResourceFailure,
    CostThreshold,
    SecurityAlert,
    HealthCheck,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 10] = [
        EventType::DeploymentStarted,
        EventType::DeploymentComplete,
        EventType::DeploymentFailed,
        EventType::ResourceCreated,
        EventType::ResourceUpdated,
        EventType::ResourceDeleted,
        EventType::ResourceFailure,
        EventType::CostThreshold,
        EventType::SecurityAlert,
        EventType::HealthCheck,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::DeploymentStarted => "deployment_started",
            EventType::DeploymentComplete => "deployment_complete",
            EventType::DeploymentFailed => "deployment_failed",
            EventType::ResourceCreated => "resource_created",
            EventType::ResourceUpdated => "resource_updated",
            EventType::ResourceDeleted => "resource_deleted",
            EventType::ResourceFailure => "resource_failure",
            EventType::CostThreshold => "cost_threshold",
            EventType::SecurityAlert => "security_alert",
            EventType::HealthCheck => "health_check",
        };
        f.write_str(name)
    }
}

/// A fire-and-forget notification. Events are plain values; nobody owns them
/// after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload: HashMap::new(),
            timestamp: Utc::now(),
            source: None,
            correlation_id: None,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
