//! Kernel wiring: configuration to kernel settings, boundary factories and
//! builtin modules.

use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use modhost_boundary_process::ProcessBoundaryFactory;
use modhost_config::Config;
use modhost_core::{DispatchMode, Kernel, KernelConfig, ModuleFilter};
use modhost_module_diagnostics::DiagnosticsModule;
use modhost_protocols::{DataStore, Module};
use modhost_scheduler::SchedulerConfig;
use modhost_store_file::FileDataStore;

/// How the kernel will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Long-running host: scheduler ticks.
    Serve,
    /// Single command then exit: no scheduler loop.
    OneShot,
}

pub(crate) fn kernel_config(config: &Config, mode: Mode) -> Result<KernelConfig, Box<dyn Error>> {
    let dispatch_mode = DispatchMode::from_str(&config.dispatch.mode)?;

    let scheduler = (mode == Mode::Serve && config.scheduler.enabled).then(|| SchedulerConfig {
        tick: config.scheduler.tick(),
        align_to_minute: config.scheduler.align_to_minute,
    });

    Ok(KernelConfig {
        modules_root: config.modules.root.clone(),
        filter: ModuleFilter {
            enabled: config.modules.enabled.clone(),
            disabled: config.modules.disabled.clone(),
        },
        dispatch_mode,
        validation: config.dispatch.validation,
        scheduler,
        shutdown_timeout: config.lifecycle.shutdown_timeout(),
        drain_timeout: config.lifecycle.drain_timeout(),
    })
}

/// Build a kernel with the file store, the process boundary and the builtin
/// module catalog.
pub(crate) async fn build_kernel(config: &Config, mode: Mode) -> Result<Kernel, Box<dyn Error>> {
    let kernel_config = kernel_config(config, mode)?;
    let store = FileDataStore::open(&config.store.path).await?;
    info!(path = %store.path().display(), "Data store opened");

    let process = ProcessBoundaryFactory::new()
        .with_response_timeout(config.lifecycle.process_response_timeout());

    let kernel = Kernel::builder()
        .with_config(kernel_config)
        .with_store(Arc::new(store) as Arc<dyn DataStore>)
        .with_boundary_factory(Arc::new(process))
        .with_builtin(modhost_module_diagnostics::ENTRY, |manifest| {
            Box::new(DiagnosticsModule::new(manifest)) as Box<dyn Module>
        })
        .build()
        .await?;
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kernel_config_mapping() {
        let mut config = Config::default();
        config.modules.enabled = vec!["echo".into()];
        config.dispatch.mode = "fallback".into();
        config.dispatch.validation = false;
        config.scheduler.tick_seconds = 15;
        config.lifecycle.unload_drain_timeout_ms = 250;

        let kc = kernel_config(&config, Mode::Serve).unwrap();
        assert_eq!(kc.dispatch_mode, DispatchMode::Fallback);
        assert!(!kc.validation);
        assert!(kc.filter.allows("echo"));
        assert!(!kc.filter.allows("other"));
        assert_eq!(kc.scheduler.unwrap().tick, Duration::from_secs(15));
        assert_eq!(kc.drain_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_one_shot_has_no_scheduler() {
        let kc = kernel_config(&Config::default(), Mode::OneShot).unwrap();
        assert!(kc.scheduler.is_none());

        let mut config = Config::default();
        config.scheduler.enabled = false;
        assert!(kernel_config(&config, Mode::Serve).unwrap().scheduler.is_none());
    }

    #[test]
    fn test_bad_dispatch_mode() {
        let mut config = Config::default();
        config.dispatch.mode = "random".into();
        let err = kernel_config(&config, Mode::Serve).unwrap_err();
        assert!(err.to_string().contains("random"));
    }

    #[tokio::test]
    async fn test_build_kernel_loads_builtin_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let modules = dir.path().join("modules");
        std::fs::create_dir_all(modules.join("diagnostics")).unwrap();
        std::fs::write(
            modules.join("diagnostics").join("diagnostics.toml"),
            "id = \"diagnostics\"\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.modules.root = modules;
        config.store.path = dir.path().join("store.json");

        let kernel = build_kernel(&config, Mode::OneShot).await.unwrap();
        kernel.start().await.unwrap();

        let result = kernel
            .dispatch(modhost_protocols::CommandEnvelope::new(
                modhost_module_diagnostics::PING,
            ))
            .await;
        assert!(result.success, "{}", result.message);
        assert!(kernel.scheduler().is_none());

        kernel.stop().await.unwrap();
    }
}
