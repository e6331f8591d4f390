//! Module boundary contracts.
//!
//! A boundary is the isolation mechanism a module is loaded through. The
//! loader only ever talks to [`ModuleBoundary`], so how module code is
//! reached (linked in, a child process) stays pluggable.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BoundaryError;
use crate::module::{Module, ModuleManifest};

/// Boundary kind for modules compiled into the host.
pub const BUILTIN: &str = "builtin";
/// Boundary kind for modules running as a child process.
pub const PROCESS: &str = "process";

/// `[boundary]` table of a module manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundarySpec {
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Catalog entry for builtin modules; defaults to the module id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Executable for process modules, relative to the module directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

fn default_kind() -> String {
    BUILTIN.to_string()
}

impl Default for BoundarySpec {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            entry: None,
            command: None,
            args: Vec::new(),
            env: Default::default(),
        }
    }
}

impl BoundarySpec {
    pub fn builtin(entry: impl Into<String>) -> Self {
        Self {
            entry: Some(entry.into()),
            ..Self::default()
        }
    }

    pub fn process(command: impl Into<String>) -> Self {
        Self {
            kind: PROCESS.to_string(),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// An isolation domain holding one module's code.
#[async_trait]
pub trait ModuleBoundary: Send + Sync {
    fn kind(&self) -> &str;

    /// Create a new module instance.
    ///
    /// Called twice per load: once for the service configuration phase
    /// and once for the instance that is initialized and kept.
    async fn instantiate(&self) -> Result<Box<dyn Module>, BoundaryError>;

    /// Release everything held by this boundary. Instances created by it must
    /// not be used afterwards.
    async fn release(&self) -> Result<(), BoundaryError>;
}

/// Creates boundaries of one kind from manifests.
pub trait BoundaryFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn create(
        &self,
        manifest: &ModuleManifest,
        module_dir: &Path,
    ) -> Result<Arc<dyn ModuleBoundary>, BoundaryError>;
}
