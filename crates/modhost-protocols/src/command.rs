//! Command and result envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::trace::{TraceContext, TraceHop};

/// Named command parameters.
pub type Parameters = serde_json::Map<String, Value>;

/// A named request routed by the dispatcher to exactly one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    #[serde(default)]
    pub history: Vec<TraceHop>,
}

impl CommandEnvelope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
            trace_id: None,
            history: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Issue this command as a continuation of an existing trace.
    pub fn within(mut self, trace: &TraceContext) -> Self {
        self.trace_id = Some(trace.trace_id);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Get a parameter converted to `T`, or `None` if absent or of the wrong shape.
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Outcome of a dispatched command.
///
/// Handlers build results with [`ResultEnvelope::success`] or
/// [`ResultEnvelope::failure`]; the dispatcher stamps `trace_id` and `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub trace_id: Uuid,
    #[serde(default)]
    pub history: Vec<TraceHop>,
}

impl ResultEnvelope {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            trace_id: Uuid::nil(),
            history: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(message)
        }
    }

    /// Successful result carrying a payload.
    pub fn ok(data: Value) -> Self {
        Self::success("ok").with_data(data)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Record a hop made inside the handler; the dispatcher splices it into
    /// the command's history.
    pub fn with_hop(mut self, component: impl Into<String>, message: impl Into<String>) -> Self {
        self.history.push(TraceHop::new(component, message));
        self
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Finalize this result against the trace it was produced under.
    pub fn finish(mut self, trace: &TraceContext) -> Self {
        self.trace_id = trace.trace_id;
        self.history = trace.history.clone();
        self
    }
}
