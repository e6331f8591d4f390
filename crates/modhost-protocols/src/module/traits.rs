//! Module trait definitions.

use async_trait::async_trait;

use super::{Capability, ModuleContext, ModuleManifest, ServiceCollection};
use crate::error::ModuleError;

/// Core trait every loadable module implements.
///
/// The loader drives a module through two phases:
///
/// 1. A throwaway instance is asked to [`configure_services`](Module::configure_services).
/// 2. A fresh instance is [`initialize`](Module::initialize)d and then asked
///    for its [`capabilities`](Module::capabilities).
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn manifest(&self) -> &ModuleManifest;

    /// Contribute services to the shared collection. Runs before any module
    /// is initialized.
    fn configure_services(&self, _services: &mut ServiceCollection) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn initialize(&mut self, ctx: ModuleContext) -> Result<(), ModuleError>;

    /// Enumerate the handlers this module provides.
    async fn capabilities(&self) -> Result<Vec<Capability>, ModuleError>;

    async fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}
