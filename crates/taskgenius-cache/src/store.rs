//! Versioned persistent store
//!
//! Wraps a [`CacheStorage`] backend so every blob is written inside a
//! [`CacheEnvelope`] carrying the format version it was produced with.
//! Readers check [`PersistentStore::is_version_compatible`] before trusting
//! the payload; an incompatible blob is dropped, never partially migrated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CacheError, CacheResult, CacheStorage};

/// Stored blob plus the format version that produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope {
    pub data: serde_json::Value,
    pub format_version: String,
    pub saved_at: DateTime<Utc>,
}

impl CacheEnvelope {
    /// Decode the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> CacheResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| CacheError::Deserialization {
            message: e.to_string(),
        })
    }
}

/// Versioned key-value cache keyed by logical cache name
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load the envelope stored under `name`, if any
    async fn load(&self, name: &str) -> CacheResult<Option<CacheEnvelope>>;

    /// Store `data` under `name`, stamped with the current format version
    async fn store(&self, name: &str, data: serde_json::Value) -> CacheResult<()>;

    /// Remove everything this store holds
    async fn clear(&self) -> CacheResult<()>;

    /// Whether a loaded envelope was written by a compatible format version
    fn is_version_compatible(&self, loaded: &CacheEnvelope) -> bool;

    /// Format version written by this store
    fn format_version(&self) -> &str;
}

/// [`PersistentStore`] over any [`CacheStorage`] backend
pub struct VersionedStore {
    storage: Arc<dyn CacheStorage>,
    format_version: String,
}

impl VersionedStore {
    /// Create a store that stamps blobs with `format_version`
    pub fn new(storage: Arc<dyn CacheStorage>, format_version: impl Into<String>) -> Self {
        Self {
            storage,
            format_version: format_version.into(),
        }
    }

    /// Underlying storage backend
    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }
}

#[async_trait]
impl PersistentStore for VersionedStore {
    async fn load(&self, name: &str) -> CacheResult<Option<CacheEnvelope>> {
        let Some(raw) = self.storage.get(name).await? else {
            debug!(name, "no persisted cache");
            return Ok(None);
        };

        match serde_json::from_value::<CacheEnvelope>(raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                // Blobs without an envelope predate versioning; treat as absent
                warn!(name, error = %e, "discarding malformed cache envelope");
                Ok(None)
            }
        }
    }

    async fn store(&self, name: &str, data: serde_json::Value) -> CacheResult<()> {
        let envelope = CacheEnvelope {
            data,
            format_version: self.format_version.clone(),
            saved_at: Utc::now(),
        };
        let value = serde_json::to_value(&envelope)?;
        self.storage.set(name, &value).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.storage.clear().await
    }

    fn is_version_compatible(&self, loaded: &CacheEnvelope) -> bool {
        loaded.format_version == self.format_version
    }

    fn format_version(&self) -> &str {
        &self.format_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[tokio::test]
    async fn test_store_and_load_envelope() {
        let store = VersionedStore::new(Arc::new(MemoryStorage::new()), "3");
        store
            .store("tasks", serde_json::json!({"ids": ["a", "b"]}))
            .await
            .unwrap();

        let loaded = store.load("tasks").await.unwrap().unwrap();
        assert_eq!(loaded.format_version, "3");
        assert!(store.is_version_compatible(&loaded));
        assert_eq!(loaded.data["ids"][1], "b");
    }

    #[tokio::test]
    async fn test_incompatible_version_detected() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let old = VersionedStore::new(storage.clone(), "1");
        old.store("tasks", serde_json::json!([])).await.unwrap();

        let current = VersionedStore::new(storage, "2");
        let loaded = current.load("tasks").await.unwrap().unwrap();
        assert!(!current.is_version_compatible(&loaded));
    }

    #[tokio::test]
    async fn test_malformed_blob_is_absent() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        storage
            .set("tasks", &serde_json::json!({"unexpected": true}))
            .await
            .unwrap();

        let store = VersionedStore::new(storage, "1");
        assert!(store.load("tasks").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_envelope_uses_camel_case_version_field() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let store = VersionedStore::new(storage.clone(), "7");
        store.store("k", serde_json::json!(1)).await.unwrap();

        let raw = storage.get("k").await.unwrap().unwrap();
        assert_eq!(raw["formatVersion"], "7");
    }
}
