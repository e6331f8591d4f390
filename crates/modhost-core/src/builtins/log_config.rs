//! `System.Log.Config {verbose: bool}`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use modhost_protocols::event::topics;
use modhost_protocols::{
    CommandEnvelope, CommandHandler, DataStore, Durability, EventEnvelope, HandlerError,
    ResultEnvelope, TraceContext,
};

use crate::bus::EventBus;
use crate::dispatcher::KERNEL;
use crate::journal::VERBOSE_SETTING_KEY;

const INVALID_PARAMETERS: &str = "invalid parameters: expected 'verbose' (bool)";

#[derive(Debug, Deserialize)]
struct LogConfigParams {
    verbose: bool,
}

/// Persists the verbose-journal flag and broadcasts the change.
pub struct LogConfigCommand {
    store: Option<Arc<dyn DataStore>>,
    bus: Weak<EventBus>,
}

impl LogConfigCommand {
    pub fn new(store: Option<Arc<dyn DataStore>>, bus: Weak<EventBus>) -> Self {
        Self { store, bus }
    }
}

#[async_trait]
impl CommandHandler for LogConfigCommand {
    async fn handle(
        &self,
        command: &CommandEnvelope,
        trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let Ok(params) =
            serde_json::from_value::<LogConfigParams>(Value::Object(command.parameters.clone()))
        else {
            return Ok(ResultEnvelope::failure(INVALID_PARAMETERS));
        };

        let Some(store) = &self.store else {
            return Ok(ResultEnvelope::failure("no data store attached"));
        };
        store
            .store(
                VERBOSE_SETTING_KEY,
                json!(params.verbose),
                Durability::Persistent,
                KERNEL,
            )
            .await
            .map_err(HandlerError::execution)?;

        if let Some(bus) = self.bus.upgrade() {
            bus.publish(
                EventEnvelope::new(topics::SETTINGS_CHANGED, KERNEL)
                    .with_data("key", VERBOSE_SETTING_KEY)
                    .with_data("value", params.verbose)
                    .with_trace_id(trace.trace_id),
            )
            .await;
        }

        Ok(
            ResultEnvelope::success(format!("verbose logging set to {}", params.verbose))
                .with_data(json!({ "verbose": params.verbose })),
        )
    }
}
