//! Kernel composition root.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use modhost_protocols::{
    BoundaryFactory, CommandEnvelope, CommandSender, DataStore, EventEnvelope, EventPublisher,
    ManifestEntry, Module, ModuleError, ModuleManifest, ResultEnvelope,
};
use modhost_scheduler::{JobScheduler, SchedulerConfig, SchedulerError, TriggerOutcome};

use crate::builtins::SystemCommands;
use crate::bus::{EventBus, PublishReport};
use crate::dispatcher::{DispatchMode, Dispatcher};
use crate::inflight::InflightTracker;
use crate::journal::ExecutionJournal;
use crate::lifecycle::{
    KernelState, LifecycleHook, LifecycleManager, ModulesLifecycleHook, SchedulerLifecycleHook,
    ShutdownSignal,
};
use crate::loader::{BuiltinBoundaryFactory, BuiltinCatalog, ModuleFilter, ModuleLoader};
use crate::registry::CapabilityRegistry;
use crate::store::MemoryDataStore;

/// Runtime settings of a [`Kernel`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub modules_root: PathBuf,
    pub filter: ModuleFilter,
    pub dispatch_mode: DispatchMode,
    pub validation: bool,
    /// `None` runs without a scheduler.
    pub scheduler: Option<SchedulerConfig>,
    pub shutdown_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            modules_root: PathBuf::from("modules"),
            filter: ModuleFilter::default(),
            dispatch_mode: DispatchMode::Strict,
            validation: true,
            scheduler: Some(SchedulerConfig::default()),
            shutdown_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Default)]
pub struct KernelBuilder {
    config: KernelConfig,
    store: Option<Arc<dyn DataStore>>,
    factories: Vec<Arc<dyn BoundaryFactory>>,
    catalog: BuiltinCatalog,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an in-memory store.
    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_boundary_factory(mut self, factory: Arc<dyn BoundaryFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Link a module into the host under a builtin catalog entry.
    pub fn with_builtin<F>(mut self, entry: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ModuleManifest) -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.catalog = self.catalog.with(entry, constructor);
        self
    }

    pub async fn build(self) -> Result<Kernel, ModuleError> {
        let config = self.config;
        let store: Arc<dyn DataStore> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDataStore::new()));

        let inflight = Arc::new(InflightTracker::new());
        let registry = Arc::new(CapabilityRegistry::new());
        let bus = Arc::new(EventBus::new().with_inflight(Arc::clone(&inflight)));

        let journal =
            Arc::new(ExecutionJournal::new(Arc::clone(&bus)).with_store(Arc::clone(&store)));
        journal.watch_settings();

        let dispatcher = Arc::new(
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&bus))
                .with_mode(config.dispatch_mode)
                .with_validation(config.validation)
                .with_journal(Arc::clone(&journal))
                .with_inflight(Arc::clone(&inflight)),
        );

        let scheduler = config.scheduler.clone().map(|scheduler_config| {
            Arc::new(
                JobScheduler::new(scheduler_config)
                    .with_events(Arc::clone(&bus) as Arc<dyn EventPublisher>),
            )
        });

        let mut loader = ModuleLoader::new(
            config.modules_root.clone(),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&dispatcher) as Arc<dyn CommandSender>,
        )
        .with_filter(config.filter.clone())
        .with_inflight(Arc::clone(&inflight))
        .with_store(Arc::clone(&store))
        .with_drain_timeout(config.drain_timeout)
        .with_factory(Arc::new(BuiltinBoundaryFactory::new(self.catalog)));
        for factory in self.factories {
            loader = loader.with_factory(factory);
        }
        if let Some(scheduler) = &scheduler {
            loader = loader.with_scheduler(Arc::clone(scheduler));
        }
        let loader = Arc::new(loader);

        let mut system = SystemCommands::new(Arc::clone(&registry), Arc::clone(&bus))
            .with_store(Arc::clone(&store))
            .with_loader(&loader);
        if let Some(scheduler) = &scheduler {
            system = system.with_scheduler(Arc::clone(scheduler));
        }
        system
            .register()
            .map_err(|e| ModuleError::Custom(e.to_string()))?;

        let lifecycle = Arc::new(LifecycleManager::new(config.shutdown_timeout));
        lifecycle
            .register_hook(Arc::new(ModulesLifecycleHook::new(Arc::clone(&loader))))
            .await;
        if let Some(scheduler) = &scheduler {
            lifecycle
                .register_hook(Arc::new(SchedulerLifecycleHook::new(Arc::clone(scheduler))))
                .await;
        }

        info!(
            modules_root = %config.modules_root.display(),
            mode = ?config.dispatch_mode,
            boundaries = ?loader.boundary_kinds(),
            "Kernel built"
        );

        Ok(Kernel {
            config,
            registry,
            bus,
            dispatcher,
            loader,
            scheduler,
            journal,
            store,
            lifecycle,
        })
    }
}

/// The running kernel: registry, bus, dispatcher, loader and scheduler wired
/// together.
pub struct Kernel {
    config: KernelConfig,
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    loader: Arc<ModuleLoader>,
    scheduler: Option<Arc<JobScheduler>>,
    journal: Arc<ExecutionJournal>,
    store: Arc<dyn DataStore>,
    lifecycle: Arc<LifecycleManager>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// Load modules, then start the scheduler.
    pub async fn start(&self) -> Result<(), ModuleError> {
        self.lifecycle.start().await
    }

    /// Stop the scheduler, then unload modules in reverse load order.
    pub async fn stop(&self) -> Result<(), ModuleError> {
        info!("Stopping kernel...");
        self.lifecycle.stop().await
    }

    pub fn state(&self) -> KernelState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        self.lifecycle.shutdown_signal()
    }

    pub async fn register_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.lifecycle.register_hook(hook).await;
    }

    pub async fn dispatch(&self, command: CommandEnvelope) -> ResultEnvelope {
        self.dispatcher.dispatch(command).await
    }

    pub async fn publish(&self, event: EventEnvelope) -> PublishReport {
        self.bus.publish(event).await
    }

    /// Run a job now, outside its schedule.
    pub async fn trigger_job(&self, name: &str) -> Result<TriggerOutcome, SchedulerError> {
        match &self.scheduler {
            Some(scheduler) => scheduler.trigger(name).await,
            None => Err(SchedulerError::JobNotFound(name.to_string())),
        }
    }

    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.registry.list_manifest()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn scheduler(&self) -> Option<&Arc<JobScheduler>> {
        self.scheduler.as_ref()
    }

    pub fn journal(&self) -> &Arc<ExecutionJournal> {
        &self.journal
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
