//! Capability registry.
//!
//! Maps a [`CapabilityKey`] to a priority-ordered list of competing handler
//! registrations. Each bucket is an immutable `Arc<Vec<_>>` replaced
//! wholesale on write, so readers always see a fully sorted list and never
//! hold a lock while running handler code.

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use modhost_protocols::{
    CapabilityKey, CapabilityMetadata, CapabilityStatus, ContractKind, HandlerRef, JobHandler,
    ManifestEntry,
};
use modhost_scheduler::JobResolver;

/// One handler competing for a capability key.
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    pub key: CapabilityKey,
    /// Unique per key; the loader qualifies it as `<module>::<id>`.
    pub handler_id: String,
    pub handler: HandlerRef,
    pub priority: i32,
    pub source_module: String,
    pub metadata: CapabilityMetadata,
}

impl HandlerRegistration {
    pub fn new(
        key: CapabilityKey,
        handler_id: impl Into<String>,
        handler: HandlerRef,
        source_module: impl Into<String>,
    ) -> Self {
        Self {
            key,
            handler_id: handler_id.into(),
            handler,
            priority: 0,
            source_module: source_module.into(),
            metadata: CapabilityMetadata::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: CapabilityMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> CapabilityStatus {
        self.metadata.status
    }

    pub fn is_obsolete(&self) -> bool {
        self.metadata.status == CapabilityStatus::Obsolete
    }
}

/// Priority descending, then owning module ascending, then handler id.
fn resolution_order(a: &HandlerRegistration, b: &HandlerRegistration) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.source_module.cmp(&b.source_module))
        .then_with(|| a.handler_id.cmp(&b.handler_id))
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Handler kind {handler} does not match capability {key}")]
    KindMismatch { key: CapabilityKey, handler: ContractKind },
}

type Bucket = Arc<Vec<Arc<HandlerRegistration>>>;

/// Thread-safe, priority-ordered catalog of capability handlers.
#[derive(Default)]
pub struct CapabilityRegistry {
    buckets: DashMap<CapabilityKey, Bucket>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a registration, replacing any existing one with the same
    /// `(key, handler_id)`. Returns whether an entry was replaced.
    pub fn register(&self, registration: HandlerRegistration) -> Result<bool, RegistryError> {
        if registration.handler.kind() != registration.key.kind {
            return Err(RegistryError::KindMismatch {
                key: registration.key,
                handler: registration.handler.kind(),
            });
        }

        let key = registration.key.clone();
        let mut bucket = self.buckets.entry(key.clone()).or_default();

        let mut list: Vec<Arc<HandlerRegistration>> = bucket
            .iter()
            .filter(|r| r.handler_id != registration.handler_id)
            .cloned()
            .collect();
        let replaced = list.len() != bucket.len();

        debug!(
            key = %key,
            handler = %registration.handler_id,
            module = %registration.source_module,
            priority = registration.priority,
            replaced,
            "Registering capability"
        );

        list.push(Arc::new(registration));
        list.sort_by(|a, b| resolution_order(a, b));
        *bucket = Arc::new(list);
        Ok(replaced)
    }

    /// The head of the key's ordered list.
    pub fn get_best_handler(&self, key: &CapabilityKey) -> Option<Arc<HandlerRegistration>> {
        self.buckets.get(key).and_then(|bucket| bucket.first().cloned())
    }

    /// Snapshot of the key's ordered list; empty if unknown.
    pub fn get_all_handlers(&self, key: &CapabilityKey) -> Bucket {
        self.buckets
            .get(key)
            .map(|bucket| Arc::clone(bucket.value()))
            .unwrap_or_default()
    }

    /// Remove one registration. Drops the bucket if it becomes empty.
    pub fn unregister(&self, key: &CapabilityKey, handler_id: &str) -> bool {
        let mut removed = false;
        self.buckets.remove_if_mut(key, |_, bucket| {
            let list: Vec<_> = bucket
                .iter()
                .filter(|r| r.handler_id != handler_id)
                .cloned()
                .collect();
            removed = list.len() != bucket.len();
            *bucket = Arc::new(list);
            bucket.is_empty()
        });
        removed
    }

    /// Remove every registration owned by `module_id`, across all keys.
    /// Buckets left empty are dropped. Returns the number removed.
    pub fn unregister_by_source(&self, module_id: &str) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            if bucket.iter().any(|r| r.source_module == module_id) {
                let list: Vec<_> = bucket
                    .iter()
                    .filter(|r| r.source_module != module_id)
                    .cloned()
                    .collect();
                removed += bucket.len() - list.len();
                *bucket = Arc::new(list);
            }
            !bucket.is_empty()
        });

        if removed > 0 {
            debug!(module = %module_id, removed, "Unregistered module capabilities");
        }
        removed
    }

    /// Every registration, with exactly the head of each key marked active.
    /// Sorted by key, then resolution order.
    pub fn list_manifest(&self) -> Vec<ManifestEntry> {
        let mut buckets: Vec<(CapabilityKey, Bucket)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        buckets.sort_by(|a, b| a.0.cmp(&b.0));

        buckets
            .into_iter()
            .flat_map(|(key, bucket)| {
                bucket
                    .iter()
                    .enumerate()
                    .map(|(index, reg)| ManifestEntry {
                        key: key.name.clone(),
                        kind: key.kind,
                        description: reg.metadata.description.clone(),
                        version: reg.metadata.version.clone(),
                        status: reg.metadata.status,
                        deprecation_message: reg.metadata.deprecation_message.clone(),
                        priority: reg.priority,
                        owning_module: reg.source_module.clone(),
                        handler_id: reg.handler_id.clone(),
                        is_active: index == 0,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Keys of one kind, sorted.
    pub fn keys(&self, kind: ContractKind) -> Vec<String> {
        let mut keys: Vec<String> = self
            .buckets
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| entry.key().name.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &CapabilityKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl JobResolver for CapabilityRegistry {
    fn resolve(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.get_best_handler(&CapabilityKey::job(job_name))
            .and_then(|reg| reg.handler.as_job().cloned())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
