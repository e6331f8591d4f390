//! Kernel lifecycle.
//!
//! Hooks start in descending priority and stop in the reverse order. The
//! module loader starts before the scheduler so jobs exist by the first tick,
//! and the scheduler stops before modules unload.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::timeout;
use tracing::{error, info, warn};

use modhost_protocols::ModuleError;

#[path = "lifecycle_adapters.rs"]
mod lifecycle_adapters;
pub use lifecycle_adapters::*;

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelState {
    Created = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl From<u8> for KernelState {
    fn from(v: u8) -> Self {
        match v {
            1 => KernelState::Starting,
            2 => KernelState::Running,
            3 => KernelState::ShuttingDown,
            4 => KernelState::Stopped,
            _ => KernelState::Created,
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KernelState::Created => "created",
            KernelState::Starting => "starting",
            KernelState::Running => "running",
            KernelState::ShuttingDown => "shutting down",
            KernelState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Broadcast fired once when the kernel begins shutting down.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A component started and stopped with the kernel.
#[async_trait::async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_start(&self) -> Result<(), ModuleError>;

    async fn on_stop(&self) -> Result<(), ModuleError>;

    /// Higher starts earlier and stops later.
    fn priority(&self) -> i32 {
        priority::DEFAULT
    }
}

pub struct LifecycleManager {
    state: AtomicU8,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    shutdown_signal: ShutdownSignal,
    shutdown_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(KernelState::Created as u8),
            hooks: RwLock::new(Vec::new()),
            shutdown_signal: ShutdownSignal::new(),
            shutdown_timeout,
        }
    }

    pub fn state(&self) -> KernelState {
        KernelState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == KernelState::Running
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown_signal
    }

    /// Add a hook. Equal priorities keep registration order.
    pub async fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.write().await;
        hooks.push(hook);
        hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    pub async fn hook_names(&self) -> Vec<String> {
        self.hooks
            .read()
            .await
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// Start every hook. On failure the hooks already started are stopped
    /// again and the manager ends in `Stopped`.
    pub async fn start(&self) -> Result<(), ModuleError> {
        self.transition(KernelState::Created, KernelState::Starting, "start")?;
        info!("Kernel starting...");

        let hooks = self.hooks.read().await;
        for (i, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook.on_start().await {
                error!("Failed to start {}: {}", hook.name(), e);
                for started in hooks.iter().take(i).rev() {
                    if let Err(stop) = started.on_stop().await {
                        warn!("Rollback of {} failed: {}", started.name(), stop);
                    }
                }
                self.state.store(KernelState::Stopped as u8, Ordering::SeqCst);
                return Err(e);
            }
        }

        self.state.store(KernelState::Running as u8, Ordering::SeqCst);
        info!("Kernel started with {} component(s)", hooks.len());
        Ok(())
    }

    /// Stop every hook, each bounded by the shutdown timeout. Every hook is
    /// attempted even when an earlier one fails.
    pub async fn stop(&self) -> Result<(), ModuleError> {
        self.transition(KernelState::Running, KernelState::ShuttingDown, "stop")?;
        info!("Kernel shutting down...");

        self.shutdown_signal.trigger();

        let hooks = self.hooks.read().await;
        let mut failed = Vec::new();

        for hook in hooks.iter().rev() {
            match timeout(self.shutdown_timeout, hook.on_stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("{} failed to stop: {}", hook.name(), e);
                    failed.push(hook.name().to_string());
                }
                Err(_) => {
                    warn!(
                        "{} did not stop within {:?}",
                        hook.name(),
                        self.shutdown_timeout
                    );
                    failed.push(hook.name().to_string());
                }
            }
        }

        self.state.store(KernelState::Stopped as u8, Ordering::SeqCst);
        info!("Kernel stopped");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::ShutdownFailed(failed.join(", ")))
        }
    }

    fn transition(
        &self,
        from: KernelState,
        to: KernelState,
        operation: &str,
    ) -> Result<(), ModuleError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|current| {
                ModuleError::Custom(format!(
                    "Cannot {} kernel while {}",
                    operation,
                    KernelState::from(current)
                ))
            })
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Start order of kernel components.
pub mod priority {
    pub const INFRASTRUCTURE: i32 = 1000;
    pub const MODULES: i32 = 800;
    pub const SCHEDULER: i32 = 600;
    pub const DEFAULT: i32 = 0;
}
