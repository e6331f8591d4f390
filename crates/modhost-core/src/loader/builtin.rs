//! In-process boundary for modules linked into the host binary.
//!
//! Weakest isolation: a builtin module shares the host's address space and
//! cannot be unmapped. Releasing the boundary only stops it from producing
//! new instances.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use modhost_protocols::boundary::BUILTIN;
use modhost_protocols::{BoundaryError, BoundaryFactory, Module, ModuleBoundary, ModuleManifest};

/// Builds a module instance from its manifest.
pub type ModuleConstructor = Arc<dyn Fn(&ModuleManifest) -> Box<dyn Module> + Send + Sync>;

/// Named constructors for builtin modules.
#[derive(Clone, Default)]
pub struct BuiltinCatalog {
    entries: HashMap<String, ModuleConstructor>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, entry: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ModuleManifest) -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.entries.insert(entry.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    pub fn entries(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct BuiltinBoundaryFactory {
    catalog: BuiltinCatalog,
}

impl BuiltinBoundaryFactory {
    pub fn new(catalog: BuiltinCatalog) -> Self {
        Self { catalog }
    }
}

impl BoundaryFactory for BuiltinBoundaryFactory {
    fn kind(&self) -> &str {
        BUILTIN
    }

    fn create(
        &self,
        manifest: &ModuleManifest,
        _module_dir: &Path,
    ) -> Result<Arc<dyn ModuleBoundary>, BoundaryError> {
        let entry = manifest
            .boundary
            .entry
            .clone()
            .unwrap_or_else(|| manifest.id.clone());
        let constructor = self
            .catalog
            .entries
            .get(&entry)
            .cloned()
            .ok_or(BoundaryError::EntryNotFound(entry))?;

        Ok(Arc::new(BuiltinBoundary {
            manifest: manifest.clone(),
            constructor,
            released: AtomicBool::new(false),
        }))
    }
}

struct BuiltinBoundary {
    manifest: ModuleManifest,
    constructor: ModuleConstructor,
    released: AtomicBool,
}

#[async_trait]
impl ModuleBoundary for BuiltinBoundary {
    fn kind(&self) -> &str {
        BUILTIN
    }

    async fn instantiate(&self) -> Result<Box<dyn Module>, BoundaryError> {
        if self.released.load(Ordering::Acquire) {
            return Err(BoundaryError::Released);
        }
        Ok((self.constructor)(&self.manifest))
    }

    async fn release(&self) -> Result<(), BoundaryError> {
        self.released.store(true, Ordering::Release);
        Ok(())
    }
}
