//! In-memory [`DataStore`], used when no persistent store is configured and
//! in tests. Persistent entries are kept in memory too.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use modhost_protocols::{DataEntry, DataStore, Durability, StoreError};

#[derive(Default)]
pub struct MemoryDataStore {
    entries: DashMap<String, DataEntry>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn store(
        &self,
        key: &str,
        value: Value,
        durability: Durability,
        source_id: &str,
    ) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), DataEntry::new(value, durability, source_id));
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<DataEntry>, StoreError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }
}
