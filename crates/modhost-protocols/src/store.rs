//! External key/value store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// How long a stored value must live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Lives for the process lifetime only.
    #[default]
    Transient,
    /// Survives restarts.
    Persistent,
}

/// A stored value plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub value: Value,
    pub durability: Durability,
    pub updated_at: DateTime<Utc>,
    pub source_id: String,
}

impl DataEntry {
    pub fn new(value: Value, durability: Durability, source_id: impl Into<String>) -> Self {
        Self {
            value,
            durability,
            updated_at: Utc::now(),
            source_id: source_id.into(),
        }
    }

    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// Key/value persistence collaborator.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn store(
        &self,
        key: &str,
        value: Value,
        durability: Durability,
        source_id: &str,
    ) -> Result<(), StoreError>;

    async fn retrieve(&self, key: &str) -> Result<Option<DataEntry>, StoreError>;

    /// Remove a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.retrieve(key).await?.is_some())
    }
}
