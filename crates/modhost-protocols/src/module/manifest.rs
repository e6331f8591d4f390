//! Module manifest types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::boundary::BoundarySpec;
use crate::types::{Metadata, Version};

/// Module manifest, read from `<modules-root>/<id>/<id>.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub boundary: BoundarySpec,
    /// Free-form module configuration handed to `initialize`.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ModuleManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            description: String::new(),
            boundary: BoundarySpec::default(),
            config: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_boundary(mut self, boundary: BoundarySpec) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Load state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Discovered,
    Loading,
    Loaded,
    Unloading,
    Unloaded,
    Error,
}

impl ModuleState {
    /// Whether a load may start from this state.
    pub fn can_load(&self) -> bool {
        matches!(
            self,
            ModuleState::Discovered | ModuleState::Unloaded | ModuleState::Error
        )
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
            ModuleState::Unloaded => "unloaded",
            ModuleState::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
