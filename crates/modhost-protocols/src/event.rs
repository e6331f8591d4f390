//! Event envelopes and well-known kernel topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A published event, delivered to every subscriber of its topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    pub source_id: String,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            data: serde_json::Map::new(),
            timestamp: Utc::now(),
            trace_id: None,
            source_id: source_id.into(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Topics the kernel itself publishes or listens on.
pub mod topics {
    /// Published when a deprecated capability is invoked.
    pub const SYSTEM_WARNING: &str = "system.warning";
    /// Execution journal entries.
    pub const LOG_INTERNAL: &str = "system.log.internal";
    /// A kernel setting changed; cached settings must be refreshed.
    pub const SETTINGS_CHANGED: &str = "system.settings.changed";
    pub const JOB_COMPLETED: &str = "system.job.completed";
    pub const JOB_FAILED: &str = "system.job.failed";
    pub const MODULE_LOADED: &str = "system.module.loaded";
    pub const MODULE_UNLOADED: &str = "system.module.unloaded";
}
