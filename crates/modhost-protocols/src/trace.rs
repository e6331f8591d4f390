//! Trace context and hop records.
//!
//! A [`TraceContext`] is a plain value threaded through every traced call as an
//! explicit argument. Nothing in the kernel reads trace state from task-local
//! or thread-local storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit record of which component touched a command and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHop {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub message: String,
}

impl TraceHop {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Per-call correlation identifier plus ordered hop history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: Uuid,
    #[serde(default)]
    pub history: Vec<TraceHop>,
}

impl TraceContext {
    /// Start a fresh trace.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Adopt an existing trace id.
    pub fn with_id(trace_id: Uuid) -> Self {
        Self {
            trace_id,
            history: Vec::new(),
        }
    }

    /// Adopt `trace_id` when present, otherwise mint a new one.
    pub fn continue_or_new(trace_id: Option<Uuid>) -> Self {
        match trace_id {
            Some(id) if !id.is_nil() => Self::with_id(id),
            _ => Self::new(),
        }
    }

    /// Append a hop. Hops are only ever appended.
    pub fn add_hop(&mut self, component: impl Into<String>, message: impl Into<String>) {
        self.history.push(TraceHop::new(component, message));
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}
