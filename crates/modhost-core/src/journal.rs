//! Execution journal: one structured record per dispatch, published on the
//! event bus as `system.log.internal` and mirrored to `tracing`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use modhost_protocols::event::topics;
use modhost_protocols::{
    CommandEnvelope, DataStore, EventEnvelope, ResultEnvelope, TraceHop, event_fn,
};

use crate::bus::{EventBus, SubscriptionId};
use crate::dispatcher::KERNEL;

/// Store key of the verbose-journal setting.
pub const VERBOSE_SETTING_KEY: &str = "Settings.VerboseLogging";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub command: String,
    pub success: bool,
    pub duration_ms: u64,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<TraceHop>>,
}

pub struct ExecutionJournal {
    bus: Arc<EventBus>,
    store: Option<Arc<dyn DataStore>>,
    /// `None` until first read, and again after invalidation.
    verbose: RwLock<Option<bool>>,
    /// Bumped on every invalidation; a store read only fills the cache if no
    /// invalidation happened while it was in flight.
    generation: AtomicU64,
}

impl ExecutionJournal {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            store: None,
            verbose: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Drop the cached verbose flag when `system.settings.changed` names it.
    pub fn watch_settings(self: &Arc<Self>) -> SubscriptionId {
        let journal: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(
            topics::SETTINGS_CHANGED,
            KERNEL,
            event_fn(move |event| {
                let journal = journal.clone();
                async move {
                    let names_us = event
                        .get("key")
                        .and_then(Value::as_str)
                        .is_none_or(|key| key == VERBOSE_SETTING_KEY);
                    if names_us {
                        if let Some(journal) = journal.upgrade() {
                            journal.invalidate();
                        }
                    }
                    Ok(())
                }
            }),
        )
    }

    pub fn invalidate(&self) {
        let mut cached = self.verbose.write();
        *cached = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(cached);
        debug!("Journal settings invalidated");
    }

    pub async fn is_verbose(&self) -> bool {
        if let Some(cached) = *self.verbose.read() {
            return cached;
        }
        let generation = self.generation.load(Ordering::Acquire);

        let verbose = match &self.store {
            Some(store) => match store.retrieve(VERBOSE_SETTING_KEY).await {
                Ok(entry) => entry.and_then(|e| e.value.as_bool()).unwrap_or(false),
                Err(e) => {
                    warn!("Failed to read {}: {}", VERBOSE_SETTING_KEY, e);
                    false
                }
            },
            None => false,
        };

        let mut cached = self.verbose.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *cached = Some(verbose);
        }
        verbose
    }

    pub async fn record(
        &self,
        command: &CommandEnvelope,
        result: &ResultEnvelope,
        duration: Duration,
    ) {
        let verbose = self.is_verbose().await;
        let duration_ms = duration.as_millis() as u64;

        if result.success {
            info!(command = %command.name, trace_id = %result.trace_id, duration_ms, "Command dispatched");
        } else {
            warn!(
                command = %command.name,
                trace_id = %result.trace_id,
                duration_ms,
                error = %result.message,
                "Command failed"
            );
        }

        let entry = LogEntry {
            level: if result.success { "info" } else { "warn" }.to_string(),
            message: format!("executed {}", command.name),
            command: command.name.clone(),
            success: result.success,
            duration_ms,
            trace_id: result.trace_id.to_string(),
            error: (!result.success).then(|| result.message.clone()),
            history: verbose.then(|| result.history.clone()),
        };

        let mut event =
            EventEnvelope::new(topics::LOG_INTERNAL, KERNEL).with_trace_id(result.trace_id);
        if let Ok(Value::Object(data)) = serde_json::to_value(&entry) {
            event.data = data;
        }
        self.bus.publish(event).await;
    }
}
