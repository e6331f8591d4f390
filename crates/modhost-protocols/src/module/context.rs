//! Module context for initialization.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{CommandEnvelope, ResultEnvelope};
use crate::event::EventEnvelope;
use crate::store::DataStore;

use super::ServiceProvider;

/// Publish access to the kernel event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EventEnvelope);
}

/// Dispatch access to the kernel command dispatcher.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, command: CommandEnvelope) -> ResultEnvelope;
}

/// Context passed to modules during initialization.
#[derive(Clone)]
pub struct ModuleContext {
    pub module_id: String,

    /// Configuration from the module's manifest.
    pub config: serde_json::Value,

    /// Services registered by all modules in load phase 1.
    pub services: Arc<ServiceProvider>,

    pub events: Arc<dyn EventPublisher>,

    pub commands: Arc<dyn CommandSender>,

    pub store: Option<Arc<dyn DataStore>>,

    /// Directory the module's manifest was read from.
    pub module_dir: PathBuf,
}

impl ModuleContext {
    pub fn new(
        module_id: impl Into<String>,
        config: serde_json::Value,
        services: Arc<ServiceProvider>,
        events: Arc<dyn EventPublisher>,
        commands: Arc<dyn CommandSender>,
        module_dir: PathBuf,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            config,
            services,
            events,
            commands,
            store: None,
            module_dir,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Get a configuration value.
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
