//! Kernel-owned system commands.
//!
//! Registered under source module [`KERNEL`] at priority 100, so a module
//! can still override one by registering above that.

mod help;
mod inventory;
mod log_config;

pub use help::HelpCommand;
pub use inventory::{JobsCommand, ModulesCommand};
pub use log_config::LogConfigCommand;

use std::sync::{Arc, Weak};

use modhost_protocols::{
    CapabilityKey, CapabilityMetadata, CommandHandler, DataStore, HandlerRef,
};
use modhost_scheduler::JobScheduler;

use crate::bus::EventBus;
use crate::dispatcher::KERNEL;
use crate::loader::ModuleLoader;
use crate::registry::{CapabilityRegistry, HandlerRegistration, RegistryError};

pub const HELP: &str = "System.Help";
pub const GET_REGISTRY_MANIFEST: &str = "System.GetRegistryManifest";
pub const LOG_CONFIG: &str = "System.Log.Config";
pub const MODULES: &str = "System.Modules";
pub const JOBS: &str = "System.Jobs";

pub const SYSTEM_PRIORITY: i32 = 100;

/// Collaborators the system commands read from.
///
/// Handlers hold weak references, since the registry they live in is one of
/// the things they point at.
pub struct SystemCommands {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    store: Option<Arc<dyn DataStore>>,
    loader: Option<Weak<ModuleLoader>>,
    scheduler: Option<Arc<JobScheduler>>,
}

impl SystemCommands {
    pub fn new(registry: Arc<CapabilityRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            store: None,
            loader: None,
            scheduler: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_loader(mut self, loader: &Arc<ModuleLoader>) -> Self {
        self.loader = Some(Arc::downgrade(loader));
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Register every system command. Returns how many were registered.
    pub fn register(self) -> Result<usize, RegistryError> {
        let help: Arc<dyn CommandHandler> =
            Arc::new(HelpCommand::new(Arc::downgrade(&self.registry)));
        let log_config: Arc<dyn CommandHandler> = Arc::new(LogConfigCommand::new(
            self.store.clone(),
            Arc::downgrade(&self.bus),
        ));
        let modules: Arc<dyn CommandHandler> = Arc::new(ModulesCommand::new(self.loader.clone()));
        let jobs: Arc<dyn CommandHandler> = Arc::new(JobsCommand::new(self.scheduler.clone()));

        let commands = [
            (HELP, "List every registered capability", Arc::clone(&help)),
            (GET_REGISTRY_MANIFEST, "Alias of System.Help", help),
            (LOG_CONFIG, "Toggle verbose execution journaling", log_config),
            (MODULES, "List modules and their load state", modules),
            (JOBS, "List scheduled jobs", jobs),
        ];

        let count = commands.len();
        for (name, description, handler) in commands {
            self.registry.register(
                HandlerRegistration::new(
                    CapabilityKey::command(name),
                    format!("{}::{}", KERNEL, name),
                    HandlerRef::Command(handler),
                    KERNEL,
                )
                .with_priority(SYSTEM_PRIORITY)
                .with_metadata(CapabilityMetadata::new().with_description(description)),
            )?;
        }
        Ok(count)
    }
}

#[cfg(test)]
#[path = "builtins_tests.rs"]
mod tests;
