//! `System.Help` / `System.GetRegistryManifest`.

use std::sync::Weak;

use async_trait::async_trait;

use modhost_protocols::{
    CommandEnvelope, CommandHandler, HandlerError, ResultEnvelope, TraceContext,
};

use crate::registry::CapabilityRegistry;

/// Returns the full registry manifest as data.
pub struct HelpCommand {
    registry: Weak<CapabilityRegistry>,
}

impl HelpCommand {
    pub fn new(registry: Weak<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(
        &self,
        _command: &CommandEnvelope,
        _trace: &TraceContext,
    ) -> Result<ResultEnvelope, HandlerError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| HandlerError::execution("registry is gone"))?;

        let manifest = registry.list_manifest();
        let data = serde_json::to_value(&manifest).map_err(HandlerError::execution)?;
        Ok(ResultEnvelope::success(format!("{} capabilities", manifest.len())).with_data(data))
    }
}
