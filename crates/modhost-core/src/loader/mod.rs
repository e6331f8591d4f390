//! Module loader.
//!
//! Discovers module artifacts under the modules root, creates one boundary
//! per module, and drives the two load phases:
//!
//! 1. [`ModuleLoader::discover_and_configure`] instantiates a throwaway
//!    module to let it contribute services before the container is frozen.
//! 2. [`ModuleLoader::initialize_all`] initializes a fresh instance with the
//!    frozen [`ServiceProvider`] and feeds its capabilities into the
//!    registry, the event bus and the scheduler.
//!
//! A failure in one module marks only that module `Error`.

mod builtin;
mod discovery;
mod info;

pub use builtin::{BuiltinBoundaryFactory, BuiltinCatalog, ModuleConstructor};
pub use discovery::{DiscoveredModule, manifest_path, read_manifest, scan};
pub use info::{HandlerSummary, ModuleInfo, ModuleSummary};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use modhost_protocols::event::topics;
use modhost_protocols::{
    BoundaryError, BoundaryFactory, Capability, CommandSender, DataStore, EventEnvelope,
    EventPublisher, HandlerError, HandlerRef, Module, ModuleBoundary, ModuleContext, ModuleError,
    ModuleManifest, ModuleState, ScheduleSpec, ServiceCollection, ServiceProvider,
};
use modhost_scheduler::{JobRegistration, JobResolver, JobScheduler};

use crate::bus::{EventBus, SubscriptionId};
use crate::fault::contain_lifecycle;
use crate::inflight::InflightTracker;
use crate::registry::{CapabilityRegistry, HandlerRegistration};

const LOADER: &str = "ModuleLoader";

/// Allow/deny lists applied at discovery.
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    /// When non-empty, only these ids load.
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl ModuleFilter {
    pub fn allows(&self, id: &str) -> bool {
        (self.enabled.is_empty() || self.enabled.iter().any(|e| e == id))
            && !self.disabled.iter().any(|d| d == id)
    }
}

/// Outcome of a load pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What a module contributed so far, kept so a failed load can be undone.
#[derive(Default)]
struct Applied {
    handlers: Vec<HandlerSummary>,
    jobs: Vec<(String, ScheduleSpec)>,
    subscriptions: Vec<(String, SubscriptionId)>,
}

pub struct ModuleLoader {
    root: PathBuf,
    filter: ModuleFilter,
    factories: HashMap<String, Arc<dyn BoundaryFactory>>,
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    commands: Arc<dyn CommandSender>,
    scheduler: Option<Arc<JobScheduler>>,
    inflight: Arc<InflightTracker>,
    store: Option<Arc<dyn DataStore>>,
    drain_timeout: Duration,
    modules: Mutex<BTreeMap<String, ModuleInfo>>,
    services: RwLock<Arc<ServiceProvider>>,
    sequence: AtomicU64,
}

impl ModuleLoader {
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<CapabilityRegistry>,
        bus: Arc<EventBus>,
        commands: Arc<dyn CommandSender>,
    ) -> Self {
        Self {
            root: root.into(),
            filter: ModuleFilter::default(),
            factories: HashMap::new(),
            registry,
            bus,
            commands,
            scheduler: None,
            inflight: Arc::new(InflightTracker::new()),
            store: None,
            drain_timeout: Duration::from_millis(2000),
            modules: Mutex::new(BTreeMap::new()),
            services: RwLock::new(Arc::new(ServiceProvider::empty())),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a boundary factory. A later factory for the same kind wins.
    pub fn with_factory(mut self, factory: Arc<dyn BoundaryFactory>) -> Self {
        self.factories.insert(factory.kind().to_string(), factory);
        self
    }

    pub fn with_filter(mut self, filter: ModuleFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_inflight(mut self, inflight: Arc<InflightTracker>) -> Self {
        self.inflight = inflight;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn boundary_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Run both phases for every discovered module.
    pub async fn load_all(&self) -> LoadReport {
        let mut services = self.services.read().to_collection();
        let mut report = self.discover_and_configure(&mut services).await;
        let initialized = self.initialize_all(Arc::new(services.build())).await;
        report.loaded = initialized.loaded;
        report.failed.extend(initialized.failed);
        report
    }

    /// Phase 1: discover modules and let each contribute services.
    ///
    /// Modules that pass are left in `Loading`, waiting for
    /// [`initialize_all`](Self::initialize_all). `report.loaded` stays empty.
    pub async fn discover_and_configure(&self, services: &mut ServiceCollection) -> LoadReport {
        let mut report = LoadReport::default();

        let discovered = match scan(&self.root).await {
            Ok(found) => found,
            Err(e) => {
                error!("Failed to scan modules root {}: {}", self.root.display(), e);
                return report;
            }
        };
        info!(
            "Discovered {} module(s) under {}",
            discovered.len(),
            self.root.display()
        );

        for module in discovered {
            if !self.filter.allows(&module.id) {
                debug!(module = %module.id, "Module filtered out");
                continue;
            }
            if let Err(e) = self.begin_loading(&module.id, module.dir.clone()) {
                debug!(module = %module.id, "Skipping discovery: {}", e);
                continue;
            }
            if let Err(e) = self.configure(&module.id, &module.dir, services).await {
                self.fail(&module.id, &e).await;
                report.failed.push((module.id, e.to_string()));
            }
        }
        report
    }

    /// Phase 2: initialize every module left in `Loading` by phase 1.
    pub async fn initialize_all(&self, services: Arc<ServiceProvider>) -> LoadReport {
        *self.services.write() = Arc::clone(&services);

        let pending: Vec<String> = self
            .modules
            .lock()
            .values()
            .filter(|m| m.state == ModuleState::Loading && m.boundary.is_some())
            .map(|m| m.id.clone())
            .collect();

        let mut report = LoadReport::default();
        for id in pending {
            match self.activate(&id, Arc::clone(&services)).await {
                Ok(()) => report.loaded.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        info!(
            "Module load complete: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// Load one module by id, running both phases for it alone.
    pub async fn load(&self, id: &str) -> Result<(), ModuleError> {
        if !self.filter.allows(id) {
            return Err(ModuleError::Custom(format!("Module {} is disabled", id)));
        }

        let dir = self.root.join(id);
        self.begin_loading(id, dir.clone())?;

        let mut services = self.services.read().to_collection();
        if let Err(e) = self.configure(id, &dir, &mut services).await {
            self.fail(id, &e).await;
            return Err(e);
        }

        let services = Arc::new(services.build());
        *self.services.write() = Arc::clone(&services);
        self.activate(id, services).await
    }

    /// Unload then load again from the artifact on disk.
    pub async fn reload(&self, id: &str) -> Result<(), ModuleError> {
        info!(module = %id, "Reloading module");
        if matches!(
            self.state(id),
            Some(ModuleState::Loaded) | Some(ModuleState::Error)
        ) {
            self.unload(id).await?;
        }
        self.load(id).await
    }

    /// Remove a module and everything it contributed.
    ///
    /// Calls already holding one of its handlers finish normally.
    pub async fn unload(&self, id: &str) -> Result<(), ModuleError> {
        let (instance, boundary, jobs) = {
            let mut modules = self.modules.lock();
            let module = modules
                .get_mut(id)
                .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
            if !matches!(module.state, ModuleState::Loaded | ModuleState::Error) {
                return Err(ModuleError::InvalidState {
                    module: id.to_string(),
                    state: module.state.to_string(),
                    operation: "unload".to_string(),
                });
            }
            module.state = ModuleState::Unloading;
            module.subscriptions.clear();
            module.handlers.clear();
            (
                module.instance.take(),
                module.boundary.take(),
                std::mem::take(&mut module.jobs),
            )
        };

        info!(module = %id, "Unloading module");

        let unsubscribed = self.bus.unsubscribe_owner(id);
        self.release_jobs(id, &jobs);
        let removed = self.registry.unregister_by_source(id);

        if !self.inflight.drain(id, self.drain_timeout).await {
            warn!(
                module = %id,
                inflight = self.inflight.count(id),
                "Unloading with calls still in flight"
            );
        }
        self.inflight.forget(id);

        if let Some(instance) = instance {
            if let Err(e) = contain_lifecycle(instance.shutdown(), ModuleError::ShutdownFailed).await
            {
                warn!(module = %id, "Module shutdown failed: {}", e);
            }
        }
        if let Some(boundary) = boundary {
            if let Err(e) = boundary.release().await {
                warn!(module = %id, "Failed to release boundary: {}", e);
            }
        }

        self.modules.lock().remove(id);

        self.bus
            .publish(EventEnvelope::new(topics::MODULE_UNLOADED, LOADER).with_data("module", id))
            .await;

        info!(
            module = %id,
            handlers = removed,
            subscriptions = unsubscribed,
            "Module unloaded"
        );
        Ok(())
    }

    /// Unload every loaded module, most recently loaded first.
    pub async fn unload_all(&self) {
        let mut loaded: Vec<(u64, String)> = self
            .modules
            .lock()
            .values()
            .filter(|m| matches!(m.state, ModuleState::Loaded | ModuleState::Error))
            .map(|m| (m.sequence, m.id.clone()))
            .collect();
        loaded.sort_by(|a, b| b.cmp(a));

        for (_, id) in loaded {
            if let Err(e) = self.unload(&id).await {
                warn!("Failed to unload {}: {}", id, e);
            }
        }
    }

    pub fn state(&self, id: &str) -> Option<ModuleState> {
        self.modules.lock().get(id).map(|m| m.state)
    }

    pub fn get_module(&self, id: &str) -> Option<ModuleSummary> {
        self.modules.lock().get(id).map(ModuleInfo::summary)
    }

    /// Modules currently in `Loaded`, by id.
    pub fn get_loaded_modules(&self) -> Vec<ModuleSummary> {
        self.modules
            .lock()
            .values()
            .filter(|m| m.state == ModuleState::Loaded)
            .map(ModuleInfo::summary)
            .collect()
    }

    /// Every module the loader tracks, including failed ones.
    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        self.modules.lock().values().map(ModuleInfo::summary).collect()
    }

    /// Services frozen by the most recent phase 2.
    pub fn services(&self) -> Arc<ServiceProvider> {
        self.services.read().clone()
    }

    /// Claim `id` for loading. Absent ids start fresh.
    fn begin_loading(&self, id: &str, dir: PathBuf) -> Result<(), ModuleError> {
        let mut modules = self.modules.lock();
        if let Some(existing) = modules.get(id) {
            if !existing.state.can_load() {
                return Err(ModuleError::InvalidState {
                    module: id.to_string(),
                    state: existing.state.to_string(),
                    operation: "load".to_string(),
                });
            }
        }

        let mut module = ModuleInfo::discovered(id, dir);
        module.state = ModuleState::Loading;
        modules.insert(id.to_string(), module);
        Ok(())
    }

    async fn configure(
        &self,
        id: &str,
        dir: &Path,
        services: &mut ServiceCollection,
    ) -> Result<(), ModuleError> {
        let manifest = read_manifest(dir, id).await?;
        let factory = self
            .factories
            .get(&manifest.boundary.kind)
            .cloned()
            .ok_or_else(|| BoundaryError::UnknownKind(manifest.boundary.kind.clone()))?;
        let boundary = factory.create(&manifest, dir)?;

        debug!(
            module = %id,
            boundary = %boundary.kind(),
            "Configuring {} v{}",
            manifest.display_name(),
            manifest.version
        );

        if let Some(module) = self.modules.lock().get_mut(id) {
            module.manifest = Some(manifest);
            module.boundary = Some(Arc::clone(&boundary));
        }

        let probe = boundary.instantiate().await?;
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            probe.configure_services(services)
        }))
        .map_err(|payload| {
            ModuleError::ConfigurationFailed(HandlerError::from_panic(payload).to_string())
        })??;
        Ok(())
    }

    async fn activate(&self, id: &str, services: Arc<ServiceProvider>) -> Result<(), ModuleError> {
        let (dir, manifest, boundary) = {
            let modules = self.modules.lock();
            let module = modules
                .get(id)
                .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
            match (&module.manifest, &module.boundary) {
                (Some(manifest), Some(boundary)) if module.state == ModuleState::Loading => {
                    (module.dir.clone(), manifest.clone(), Arc::clone(boundary))
                }
                _ => {
                    return Err(ModuleError::InvalidState {
                        module: id.to_string(),
                        state: module.state.to_string(),
                        operation: "initialize".to_string(),
                    });
                }
            }
        };

        let mut applied = Applied::default();
        let instance = match self
            .bring_up(id, &dir, &manifest, &boundary, services, &mut applied)
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                self.bus.unsubscribe_owner(id);
                self.release_jobs(id, &applied.jobs);
                self.registry.unregister_by_source(id);
                self.fail(id, &e).await;
                return Err(e);
            }
        };

        let handlers = applied.handlers.len();
        {
            let mut modules = self.modules.lock();
            if let Some(module) = modules.get_mut(id) {
                module.state = ModuleState::Loaded;
                module.error = None;
                module.handlers = applied.handlers;
                module.jobs = applied.jobs;
                module.subscriptions = applied.subscriptions;
                module.instance = Some(instance);
                module.loaded_at = Some(Utc::now());
                module.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.bus
            .publish(EventEnvelope::new(topics::MODULE_LOADED, LOADER).with_data("module", id))
            .await;

        info!(module = %id, handlers, "Module loaded: {} v{}", manifest.display_name(), manifest.version);
        Ok(())
    }

    async fn bring_up(
        &self,
        id: &str,
        dir: &Path,
        manifest: &ModuleManifest,
        boundary: &Arc<dyn ModuleBoundary>,
        services: Arc<ServiceProvider>,
        applied: &mut Applied,
    ) -> Result<Arc<dyn Module>, ModuleError> {
        let mut module = boundary.instantiate().await?;

        let mut ctx = ModuleContext::new(
            id,
            manifest.config.clone(),
            services,
            Arc::clone(&self.bus) as Arc<dyn EventPublisher>,
            Arc::clone(&self.commands),
            dir.to_path_buf(),
        );
        if let Some(store) = &self.store {
            ctx = ctx.with_store(Arc::clone(store));
        }

        contain_lifecycle(module.initialize(ctx), ModuleError::InitializationFailed).await?;
        let module: Arc<dyn Module> = Arc::from(module);

        let described = async {
            let capabilities =
                contain_lifecycle(module.capabilities(), ModuleError::DescribeFailed).await?;
            for capability in capabilities {
                self.apply(id, capability, applied)?;
            }
            Ok::<_, ModuleError>(())
        }
        .await;

        if let Err(e) = described {
            if let Err(shutdown) =
                contain_lifecycle(module.shutdown(), ModuleError::ShutdownFailed).await
            {
                warn!(module = %id, "Shutdown after failed load also failed: {}", shutdown);
            }
            return Err(e);
        }
        Ok(module)
    }

    fn apply(
        &self,
        id: &str,
        capability: Capability,
        applied: &mut Applied,
    ) -> Result<(), ModuleError> {
        let Capability {
            key,
            handler_id,
            handler,
            priority,
            metadata,
            schedule,
        } = capability;

        let schedule = match (&handler, schedule) {
            (HandlerRef::Job(_), None) => {
                return Err(ModuleError::DescribeFailed(format!(
                    "job '{}' declares no schedule",
                    key.name
                )));
            }
            (_, schedule) => schedule,
        };

        let handler_id = format!("{}::{}", id, handler_id);
        let registration = HandlerRegistration::new(key.clone(), &handler_id, handler.clone(), id)
            .with_priority(priority)
            .with_metadata(metadata);
        self.registry
            .register(registration)
            .map_err(|e| ModuleError::DescribeFailed(e.to_string()))?;
        applied.handlers.push(HandlerSummary {
            key: key.clone(),
            handler_id,
            priority,
        });

        match handler {
            HandlerRef::Event(handler) => {
                let subscription = self.bus.subscribe(key.name.clone(), id, handler);
                applied.subscriptions.push((key.name, subscription));
            }
            HandlerRef::Job(_) => {
                if let Some(spec) = schedule {
                    self.schedule_job(&key.name, &spec, id)?;
                    applied.jobs.push((key.name, spec));
                }
            }
            HandlerRef::Command(_) | HandlerRef::Validator(_) => {}
        }
        Ok(())
    }

    fn schedule_job(&self, name: &str, spec: &ScheduleSpec, owner: &str) -> Result<(), ModuleError> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(());
        };
        let resolver: Arc<dyn JobResolver> = Arc::clone(&self.registry) as Arc<dyn JobResolver>;
        scheduler
            .register_job(
                JobRegistration::new(name, spec.clone()).with_owner(owner),
                resolver,
            )
            .map_err(|e| ModuleError::DescribeFailed(e.to_string()))
    }

    /// Drop `owner`'s jobs from the scheduler. A job another loaded module
    /// also declares is handed over to that module's schedule.
    fn release_jobs(&self, owner: &str, jobs: &[(String, ScheduleSpec)]) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        scheduler.deregister_owner(owner);

        for (name, _) in jobs {
            let successor = self
                .modules
                .lock()
                .values()
                .filter(|m| m.id != owner && m.state == ModuleState::Loaded)
                .find_map(|m| {
                    m.jobs
                        .iter()
                        .find(|(job, _)| job == name)
                        .map(|(_, spec)| (m.id.clone(), spec.clone()))
                });

            if let Some((module, spec)) = successor {
                if scheduler.get_job(name).is_none() {
                    if let Err(e) = self.schedule_job(name, &spec, &module) {
                        warn!(job = %name, module = %module, "Failed to hand over job: {}", e);
                    }
                }
            }
        }
    }

    async fn fail(&self, id: &str, err: &ModuleError) {
        error!(module = %id, "Module failed: {}", err);

        let boundary = {
            let mut modules = self.modules.lock();
            modules.get_mut(id).and_then(|module| {
                module.fail(err);
                module.boundary.take()
            })
        };
        if let Some(boundary) = boundary {
            if let Err(e) = boundary.release().await {
                warn!(module = %id, "Failed to release boundary: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("root", &self.root)
            .field("modules", &self.modules.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
