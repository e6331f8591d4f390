//! Per-module bookkeeping held by the loader.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modhost_protocols::{CapabilityKey, Module, ModuleBoundary, ModuleManifest, ModuleState, ScheduleSpec};

use crate::bus::SubscriptionId;

/// A module known to the loader.
pub struct ModuleInfo {
    pub id: String,
    pub dir: PathBuf,
    pub manifest: Option<ModuleManifest>,
    pub state: ModuleState,
    pub error: Option<String>,
    pub handlers: Vec<HandlerSummary>,
    pub jobs: Vec<(String, ScheduleSpec)>,
    pub subscriptions: Vec<(String, SubscriptionId)>,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Monotonic load sequence, for reverse-order shutdown.
    pub(crate) sequence: u64,
    pub(crate) boundary: Option<Arc<dyn ModuleBoundary>>,
    pub(crate) instance: Option<Arc<dyn Module>>,
}

impl ModuleInfo {
    pub(crate) fn discovered(id: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            dir,
            manifest: None,
            state: ModuleState::Discovered,
            error: None,
            handlers: Vec::new(),
            jobs: Vec::new(),
            subscriptions: Vec::new(),
            loaded_at: None,
            sequence: 0,
            boundary: None,
            instance: None,
        }
    }

    pub(crate) fn fail(&mut self, error: impl ToString) {
        self.state = ModuleState::Error;
        self.error = Some(error.to_string());
        self.handlers.clear();
        self.jobs.clear();
        self.subscriptions.clear();
        self.instance = None;
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.id.clone(),
            name: self
                .manifest
                .as_ref()
                .map(|m| m.display_name().to_string())
                .unwrap_or_else(|| self.id.clone()),
            version: self.manifest.as_ref().map(|m| m.version.to_string()),
            boundary: self.manifest.as_ref().map(|m| m.boundary.kind.clone()),
            state: self.state,
            error: self.error.clone(),
            handlers: self.handlers.clone(),
            jobs: self.jobs.iter().map(|(name, _)| name.clone()).collect(),
            subscriptions: self.subscriptions.iter().map(|(topic, _)| topic.clone()).collect(),
            loaded_at: self.loaded_at,
        }
    }
}

/// A registration contributed by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerSummary {
    pub key: CapabilityKey,
    pub handler_id: String,
    pub priority: i32,
}

/// Serializable view of a [`ModuleInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub boundary: Option<String>,
    pub state: ModuleState,
    pub error: Option<String>,
    pub handlers: Vec<HandlerSummary>,
    pub jobs: Vec<String>,
    pub subscriptions: Vec<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}
