//! Command dispatcher: the single entry point for issuing a command.
//!
//! `dispatch` never fails. Every outcome, including routing misses, obsolete
//! capabilities, validation rejections and handler faults, comes back as a
//! [`ResultEnvelope`] whose history holds at least a routing hop and a
//! terminal `returning` or `crash` hop.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modhost_protocols::event::topics;
use modhost_protocols::{
    CapabilityKey, CapabilityStatus, CommandEnvelope, CommandSender, EventEnvelope, HandlerError,
    ResultEnvelope, TraceContext,
};

use crate::bus::EventBus;
use crate::fault::contain;
use crate::inflight::InflightTracker;
use crate::journal::ExecutionJournal;
use crate::registry::{CapabilityRegistry, HandlerRegistration};

/// Component name on kernel trace hops, and source module of built-ins.
pub const KERNEL: &str = "Kernel";

/// How many handlers a dispatch may try.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Only the head handler is invoked.
    #[default]
    Strict,
    /// On a handler fault, try the next handler in priority order.
    Fallback,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DispatchMode::Strict),
            "fallback" => Ok(DispatchMode::Fallback),
            other => Err(format!("unknown dispatch mode: {}", other)),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    journal: Option<Arc<ExecutionJournal>>,
    inflight: Option<Arc<InflightTracker>>,
    mode: DispatchMode,
    validation: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            journal: None,
            inflight: None,
            mode: DispatchMode::default(),
            validation: true,
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or skip the validator stage.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    pub fn with_journal(mut self, journal: Arc<ExecutionJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_inflight(mut self, inflight: Arc<InflightTracker>) -> Self {
        self.inflight = Some(inflight);
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub async fn dispatch(&self, command: CommandEnvelope) -> ResultEnvelope {
        let started = Instant::now();

        let mut trace = TraceContext::continue_or_new(command.trace_id);
        trace.history = command.history.clone();
        trace.add_hop(KERNEL, "routing");

        let command = CommandEnvelope {
            trace_id: Some(trace.trace_id),
            ..command
        };
        debug!(command = %command.name, trace_id = %trace.trace_id, mode = ?self.mode, "Dispatching");

        let result = match self.mode {
            DispatchMode::Strict => self.dispatch_strict(&command, &mut trace).await,
            DispatchMode::Fallback => self.dispatch_fallback(&command, &mut trace).await,
        };

        if let Some(journal) = &self.journal {
            journal.record(&command, &result, started.elapsed()).await;
        }
        result
    }

    async fn dispatch_strict(
        &self,
        command: &CommandEnvelope,
        trace: &mut TraceContext,
    ) -> ResultEnvelope {
        let key = CapabilityKey::command(&command.name);
        let Some(registration) = self.registry.get_best_handler(&key) else {
            return reject(trace, not_found(&command.name));
        };

        if registration.is_obsolete() {
            warn!(command = %command.name, module = %registration.source_module, "Blocked obsolete command");
            return reject(trace, obsolete_message(&command.name, &registration));
        }

        self.warn_if_deprecated(command, &registration, trace);

        if let Err(message) = self.validate(command, trace).await {
            return reject(trace, message);
        }

        match self.invoke(&registration, command, trace).await {
            Ok(result) => complete(trace, result),
            Err(e) => {
                trace.add_hop(KERNEL, format!("crash: {}", e));
                ResultEnvelope::failure(format!(
                    "kernel trapped error in '{}': {}",
                    command.name, e
                ))
                .finish(trace)
            }
        }
    }

    async fn dispatch_fallback(
        &self,
        command: &CommandEnvelope,
        trace: &mut TraceContext,
    ) -> ResultEnvelope {
        let key = CapabilityKey::command(&command.name);
        let handlers = self.registry.get_all_handlers(&key);
        let Some(head) = handlers.first() else {
            return reject(trace, not_found(&command.name));
        };

        // The status gate applies to the resolved head, same as strict mode.
        if head.is_obsolete() {
            warn!(command = %command.name, module = %head.source_module, "Blocked obsolete command");
            return reject(trace, obsolete_message(&command.name, head));
        }

        self.warn_if_deprecated(command, head, trace);

        if let Err(message) = self.validate(command, trace).await {
            return reject(trace, message);
        }

        // Lower-priority obsolete entries are never invoked as fallbacks.
        for registration in handlers.iter().filter(|r| !r.is_obsolete()) {
            match self.invoke(registration, command, trace).await {
                Ok(result) => return complete(trace, result),
                Err(e) => {
                    warn!(
                        command = %command.name,
                        handler = %registration.handler_id,
                        error = %e,
                        "Handler faulted, falling back"
                    );
                    trace.add_hop(
                        KERNEL,
                        format!("crash: {} ({})", e, registration.handler_id),
                    );
                }
            }
        }

        ResultEnvelope::failure(format!("no handler succeeded for {}", command.name))
            .finish(trace)
    }

    /// Run the command's validators in priority order. The first rejection wins.
    async fn validate(
        &self,
        command: &CommandEnvelope,
        trace: &mut TraceContext,
    ) -> Result<(), String> {
        if !self.validation {
            return Ok(());
        }

        let validators = self
            .registry
            .get_all_handlers(&CapabilityKey::validator(&command.name));
        for registration in validators.iter() {
            let Some(validator) = registration.handler.as_validator() else {
                continue;
            };

            if let Err(e) = contain(validator.validate(command, trace)).await {
                trace.add_hop(KERNEL, format!("validation: {}", registration.handler_id));
                return Err(e.to_string());
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        registration: &HandlerRegistration,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let Some(handler) = registration.handler.as_command() else {
            return Err(HandlerError::Custom(format!(
                "{} is not a command handler",
                registration.handler_id
            )));
        };

        let _guard = self
            .inflight
            .as_ref()
            .map(|t| t.enter(&registration.source_module));
        contain(handler.handle(command, trace)).await
    }

    fn warn_if_deprecated(
        &self,
        command: &CommandEnvelope,
        registration: &HandlerRegistration,
        trace: &TraceContext,
    ) {
        if registration.status() != CapabilityStatus::Deprecated {
            return;
        }

        let message = registration
            .metadata
            .deprecation_message
            .clone()
            .unwrap_or_else(|| format!("'{}' is deprecated", command.name));
        warn!(command = %command.name, module = %registration.source_module, %message, "Deprecated command invoked");

        self.bus.publish_detached(
            EventEnvelope::new(topics::SYSTEM_WARNING, KERNEL)
                .with_data("message", message)
                .with_data("source", registration.source_module.clone())
                .with_data("command", command.name.clone())
                .with_trace_id(trace.trace_id),
        );
    }
}

#[async_trait]
impl CommandSender for Dispatcher {
    async fn send(&self, command: CommandEnvelope) -> ResultEnvelope {
        self.dispatch(command).await
    }
}

fn not_found(name: &str) -> String {
    format!("{} not found", name)
}

fn obsolete_message(name: &str, registration: &HandlerRegistration) -> String {
    match &registration.metadata.deprecation_message {
        Some(reason) => format!("blocked obsolete command {}: {}", name, reason),
        None => format!("blocked obsolete command {}", name),
    }
}

fn reject(trace: &mut TraceContext, message: String) -> ResultEnvelope {
    trace.add_hop(KERNEL, "returning");
    ResultEnvelope::failure(message).finish(trace)
}

fn complete(trace: &mut TraceContext, mut result: ResultEnvelope) -> ResultEnvelope {
    trace.history.append(&mut result.history);
    trace.add_hop(KERNEL, "returning");
    result.finish(trace)
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
