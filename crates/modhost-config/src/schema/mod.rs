//! Configuration schema. Every section and field has a default, so an empty
//! file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[modules]`: where modules live and which of them load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_modules_root")]
    pub root: PathBuf,

    /// When non-empty, only these module ids load.
    #[serde(default)]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub disabled: Vec<String>,
}

fn default_modules_root() -> PathBuf {
    PathBuf::from("modules")
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            root: default_modules_root(),
            enabled: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

/// `[dispatch]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// `"strict"` or `"fallback"`.
    #[serde(default = "default_dispatch_mode")]
    pub mode: String,

    #[serde(default = "default_true")]
    pub validation: bool,
}

fn default_dispatch_mode() -> String {
    "strict".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            validation: true,
        }
    }
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    #[serde(default = "default_true")]
    pub align_to_minute: bool,
}

fn default_tick_seconds() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: default_tick_seconds(),
            align_to_minute: true,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

/// `[lifecycle]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// How long unload waits for a module's in-flight calls.
    #[serde(default = "default_drain_timeout")]
    pub unload_drain_timeout_ms: u64,

    /// Per-request limit for process-boundary modules.
    #[serde(default = "default_process_timeout")]
    pub process_response_timeout_ms: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    2000
}

fn default_process_timeout() -> u64 {
    30_000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: default_shutdown_timeout(),
            unload_drain_timeout_ms: default_drain_timeout(),
            process_response_timeout_ms: default_process_timeout(),
        }
    }
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.unload_drain_timeout_ms)
    }

    pub fn process_response_timeout(&self) -> Duration {
        Duration::from_millis(self.process_response_timeout_ms)
    }
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("~/.modhost/store.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// Daily-rolling log files go here when set.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: None,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
