//! Kernel components wrapped as [`LifecycleHook`]s.

use std::sync::Arc;

use tracing::{debug, warn};

use modhost_protocols::ModuleError;
use modhost_scheduler::JobScheduler;

use super::{LifecycleHook, priority};
use crate::loader::ModuleLoader;

/// Runs the scheduler tick loop while the kernel is running.
pub struct SchedulerLifecycleHook {
    scheduler: Arc<JobScheduler>,
}

impl SchedulerLifecycleHook {
    pub fn new(scheduler: Arc<JobScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait::async_trait]
impl LifecycleHook for SchedulerLifecycleHook {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn on_start(&self) -> Result<(), ModuleError> {
        debug!("Starting scheduler...");
        self.scheduler
            .start()
            .map_err(|e| ModuleError::InitializationFailed(e.to_string()))
    }

    async fn on_stop(&self) -> Result<(), ModuleError> {
        debug!("Stopping scheduler...");
        self.scheduler.stop().await;
        Ok(())
    }

    fn priority(&self) -> i32 {
        priority::SCHEDULER
    }
}

/// Loads every module on start and unloads them on stop.
///
/// Individual module failures are recorded on the module and never fail the
/// kernel start.
pub struct ModulesLifecycleHook {
    loader: Arc<ModuleLoader>,
}

impl ModulesLifecycleHook {
    pub fn new(loader: Arc<ModuleLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait::async_trait]
impl LifecycleHook for ModulesLifecycleHook {
    fn name(&self) -> &str {
        "modules"
    }

    async fn on_start(&self) -> Result<(), ModuleError> {
        debug!("Loading modules from {}...", self.loader.root().display());
        let report = self.loader.load_all().await;
        for (id, reason) in &report.failed {
            warn!(module = %id, "Module left in error state: {}", reason);
        }
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), ModuleError> {
        debug!("Unloading modules...");
        self.loader.unload_all().await;
        Ok(())
    }

    fn priority(&self) -> i32 {
        priority::MODULES
    }
}
