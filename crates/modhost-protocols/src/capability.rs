//! Capability keys, metadata and manifest entries.

use serde::{Deserialize, Serialize};

/// The contract family a capability belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Command,
    Event,
    Job,
    Validator,
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContractKind::Command => "command",
            ContractKind::Event => "event",
            ContractKind::Job => "job",
            ContractKind::Validator => "validator",
        };
        f.write_str(s)
    }
}

/// Registry key: contract kind plus command name, event topic or job name.
///
/// Validators are keyed by the command they guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityKey {
    pub kind: ContractKind,
    pub name: String,
}

impl CapabilityKey {
    pub fn new(kind: ContractKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn command(name: impl Into<String>) -> Self {
        Self::new(ContractKind::Command, name)
    }

    pub fn event(topic: impl Into<String>) -> Self {
        Self::new(ContractKind::Event, topic)
    }

    pub fn job(name: impl Into<String>) -> Self {
        Self::new(ContractKind::Job, name)
    }

    pub fn validator(command: impl Into<String>) -> Self {
        Self::new(ContractKind::Validator, command)
    }
}

impl std::fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Lifecycle status of a capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    #[default]
    Active,
    /// Still callable; each invocation publishes a warning.
    Deprecated,
    /// Resolvable but never invoked.
    Obsolete,
    Experimental,
}

/// Descriptive metadata attached to a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub status: CapabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_message: Option<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl CapabilityMetadata {
    pub fn new() -> Self {
        Self {
            description: String::new(),
            version: default_version(),
            status: CapabilityStatus::Active,
            deprecation_message: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.status = CapabilityStatus::Deprecated;
        self.deprecation_message = Some(message.into());
        self
    }

    pub fn obsolete(mut self, message: impl Into<String>) -> Self {
        self.status = CapabilityStatus::Obsolete;
        self.deprecation_message = Some(message.into());
        self
    }

    pub fn experimental(mut self) -> Self {
        self.status = CapabilityStatus::Experimental;
        self
    }
}

impl Default for CapabilityMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the registry manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    pub kind: ContractKind,
    pub description: String,
    pub version: String,
    pub status: CapabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_message: Option<String>,
    pub priority: i32,
    pub owning_module: String,
    pub handler_id: String,
    /// True only for the head of each key's ordered list.
    pub is_active: bool,
}
