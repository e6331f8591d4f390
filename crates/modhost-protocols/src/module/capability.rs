//! Capabilities a module contributes to the kernel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityKey, CapabilityMetadata};
use crate::handler::{CommandHandler, CommandValidator, EventHandler, HandlerRef, JobHandler};

/// When a job should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Five-field cron expression (minute hour day-of-month month day-of-week).
    Cron(String),
    /// Fixed interval in seconds.
    Every { seconds: u64 },
}

impl ScheduleSpec {
    pub fn cron(expr: impl Into<String>) -> Self {
        ScheduleSpec::Cron(expr.into())
    }

    pub fn every(interval: Duration) -> Self {
        ScheduleSpec::Every {
            seconds: interval.as_secs().max(1),
        }
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleSpec::Cron(expr) => f.write_str(expr),
            ScheduleSpec::Every { seconds } => write!(f, "every {}s", seconds),
        }
    }
}

/// A single handler contribution, as described by a module after initialization.
#[derive(Clone, Debug)]
pub struct Capability {
    pub key: CapabilityKey,
    /// Unique within the module; the loader qualifies it with the module id.
    pub handler_id: String,
    pub handler: HandlerRef,
    pub priority: i32,
    pub metadata: CapabilityMetadata,
    /// Only meaningful for jobs.
    pub schedule: Option<ScheduleSpec>,
}

impl Capability {
    fn new(key: CapabilityKey, handler: HandlerRef) -> Self {
        Self {
            handler_id: key.name.clone(),
            key,
            handler,
            priority: 0,
            metadata: CapabilityMetadata::new(),
            schedule: None,
        }
    }

    pub fn command(name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self::new(CapabilityKey::command(name), HandlerRef::Command(handler))
    }

    pub fn event(topic: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self::new(CapabilityKey::event(topic), HandlerRef::Event(handler))
    }

    pub fn job(
        name: impl Into<String>,
        schedule: ScheduleSpec,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let mut cap = Self::new(CapabilityKey::job(name), HandlerRef::Job(handler));
        cap.schedule = Some(schedule);
        cap
    }

    /// A validator for the command named `command`.
    pub fn validator(command: impl Into<String>, handler: Arc<dyn CommandValidator>) -> Self {
        Self::new(CapabilityKey::validator(command), HandlerRef::Validator(handler))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_handler_id(mut self, handler_id: impl Into<String>) -> Self {
        self.handler_id = handler_id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: CapabilityMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.metadata = self.metadata.deprecated(message);
        self
    }

    pub fn obsolete(mut self, message: impl Into<String>) -> Self {
        self.metadata = self.metadata.obsolete(message);
        self
    }
}
