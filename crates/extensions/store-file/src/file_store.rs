//! File-backed data store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use modhost_protocols::{DataEntry, DataStore, Durability, StoreError};

pub struct FileDataStore {
    path: PathBuf,
    entries: DashMap<String, DataEntry>,
    /// Serializes file rewrites.
    write_lock: Mutex<()>,
}

impl FileDataStore {
    /// Open the store at `path`, loading persistent entries if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = DashMap::new();

        if tokio::fs::try_exists(&path).await? {
            let json = tokio::fs::read_to_string(&path).await?;
            if !json.trim().is_empty() {
                let persisted: BTreeMap<String, DataEntry> = serde_json::from_str(&json)?;
                for (key, entry) in persisted {
                    entries.insert(key, entry);
                }
            }
            info!(path = %path.display(), count = entries.len(), "Loaded persistent entries");
        }

        Ok(Self {
            path,
            entries,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the file with the current persistent entries.
    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let snapshot: BTreeMap<String, DataEntry> = self
            .entries
            .iter()
            .filter(|e| e.durability == Durability::Persistent)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = snapshot.len(), "Flushed store");
        Ok(())
    }
}

#[async_trait]
impl DataStore for FileDataStore {
    async fn store(
        &self,
        key: &str,
        value: Value,
        durability: Durability,
        source_id: &str,
    ) -> Result<(), StoreError> {
        let previous = self
            .entries
            .insert(key.to_string(), DataEntry::new(value, durability, source_id));

        let was_persistent = previous.is_some_and(|p| p.durability == Durability::Persistent);
        if durability == Durability::Persistent || was_persistent {
            self.flush().await?;
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<DataEntry>, StoreError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                if entry.durability == Durability::Persistent {
                    self.flush().await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for FileDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDataStore")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "file_store_tests.rs"]
mod tests;
