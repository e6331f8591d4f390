//! Wire frames exchanged with a process module.
//!
//! One JSON object per line. The host sends [`Request`]s; the module answers
//! each with a [`Response`] carrying the same `id`. The module may also emit
//! [`Notification`]s (no `id`) at any time, e.g. to publish an event.
//!
//! ```text
//! host  -> {"id":1,"method":"describe","params":{}}
//! module-> {"id":1,"result":[{"kind":"command","name":"Echo.Say",...}]}
//! module-> {"method":"publish","params":{"topic":"echo.pong",...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use modhost_protocols::{
    CapabilityMetadata, CommandEnvelope, ContractKind, EventEnvelope, ScheduleSpec, TraceContext,
};

pub mod methods {
    pub const DESCRIBE: &str = "describe";
    pub const INITIALIZE: &str = "initialize";
    pub const COMMAND: &str = "command";
    pub const VALIDATE: &str = "validate";
    pub const EVENT: &str = "event";
    pub const JOB: &str = "job";
    pub const SHUTDOWN: &str = "shutdown";

    /// Module to host: publish an event on the kernel bus.
    pub const PUBLISH: &str = "publish";
    /// Module to host: forward a log line.
    pub const LOG: &str = "log";
}

/// Host to module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Module to host, answering the request with the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RemoteError {
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
}

/// Unsolicited module to host frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Any frame the host can read from a module.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
}

/// A capability as described over the wire. The handler lives in the module
/// process and is addressed by `handler_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCapability {
    pub kind: ContractKind,
    pub name: String,
    pub handler_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "CapabilityMetadata::new")]
    pub metadata: CapabilityMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub module_id: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParams {
    pub handler_id: String,
    pub command: CommandEnvelope,
    pub trace: TraceContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParams {
    pub handler_id: String,
    pub event: EventEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub handler_id: String,
    pub job_name: String,
    pub trace_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogParams {
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
