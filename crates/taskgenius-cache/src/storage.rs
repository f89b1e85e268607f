//! Cache storage backends

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::{CacheError, CacheResult};

/// Cache storage trait
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Store a value
    async fn set(&self, key: &str, value: &serde_json::Value) -> CacheResult<()>;

    /// Retrieve a value
    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>>;

    /// Remove a value
    async fn remove(&self, key: &str) -> CacheResult<bool>;

    /// Check if key exists
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Clear all entries
    async fn clear(&self) -> CacheResult<()>;

    /// Get number of entries
    async fn len(&self) -> CacheResult<usize>;

    /// Get total size in bytes
    async fn size_bytes(&self) -> CacheResult<u64>;

    /// Get all keys
    async fn keys(&self) -> CacheResult<Vec<String>>;
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// In-memory cache storage
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryStorage {
    /// Create new in-memory storage
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn set(&self, key: &str, value: &serde_json::Value) -> CacheResult<()> {
        validate_key(key)?;
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut data = self.data.write().await;
        data.clear();
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        let data = self.data.read().await;
        Ok(data.len())
    }

    async fn size_bytes(&self) -> CacheResult<u64> {
        let data = self.data.read().await;
        let mut total_size = 0u64;
        for value in data.values() {
            if let Ok(size) = serde_json::to_string(value).map(|s| s.len() as u64) {
                total_size += size;
            }
        }
        Ok(total_size)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let data = self.data.read().await;
        Ok(data.keys().cloned().collect())
    }
}

/// Disk-based cache storage
///
/// One file per key under `base_path`. With compression enabled the JSON is
/// gzipped and the file uses the `.cache.gz` suffix instead of `.cache`.
pub struct DiskStorage {
    base_path: PathBuf,
    compress: bool,
}

impl DiskStorage {
    /// Create new disk storage with base path
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            compress: false,
        }
    }

    /// Enable or disable gzip compression of stored values
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    fn suffix(&self) -> &'static str {
        if self.compress {
            ".cache.gz"
        } else {
            ".cache"
        }
    }

    /// Get file path for a key
    fn key_path(&self, key: &str) -> PathBuf {
        // Sanitize key for filesystem
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.base_path.join(format!("{}{}", safe_key, self.suffix()))
    }

    fn key_from_file_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name.strip_suffix(self.suffix())
    }

    /// Ensure base directory exists
    async fn ensure_base_dir(&self) -> CacheResult<()> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    fn encode(&self, json: String) -> CacheResult<Vec<u8>> {
        if !self.compress {
            return Ok(json.into_bytes());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| CacheError::Compression {
                message: e.to_string(),
            })?;
        encoder.finish().map_err(|e| CacheError::Compression {
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: Vec<u8>) -> CacheResult<String> {
        if !self.compress {
            return String::from_utf8(bytes).map_err(|e| CacheError::Deserialization {
                message: e.to_string(),
            });
        }
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| CacheError::Compression {
                message: e.to_string(),
            })?;
        Ok(out)
    }

    async fn entries(&self) -> CacheResult<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        if !self.base_path.exists() {
            return Ok(found);
        }
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.key_from_file_name(n))
                .map(str::to_string);
            if let Some(key) = key {
                found.push((key, path));
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn set(&self, key: &str, value: &serde_json::Value) -> CacheResult<()> {
        validate_key(key)?;
        self.ensure_base_dir().await?;

        let file_path = self.key_path(key);
        let json_data = serde_json::to_string(value).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        let bytes = self.encode(json_data)?;

        // Write to a sibling temp file first so a crash never leaves half a blob
        let tmp_path = file_path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &file_path).await?;
        debug!(key, path = %file_path.display(), "stored cache entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        let file_path = self.key_path(key);

        if !file_path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&file_path).await?;
        let json_data = self.decode(bytes)?;
        let value: serde_json::Value =
            serde_json::from_str(&json_data).map_err(|e| CacheError::Deserialization {
                message: e.to_string(),
            })?;

        Ok(Some(value))
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let file_path = self.key_path(key);

        if file_path.exists() {
            fs::remove_file(&file_path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.key_path(key).exists())
    }

    async fn clear(&self) -> CacheResult<()> {
        for (_, path) in self.entries().await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries().await?.len())
    }

    async fn size_bytes(&self) -> CacheResult<u64> {
        let mut total_size = 0u64;
        for (_, path) in self.entries().await? {
            if let Ok(metadata) = fs::metadata(&path).await {
                total_size += metadata.len();
            }
        }
        Ok(total_size)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        let value = serde_json::json!({"tasks": 3});

        storage.set("test_key", &value).await.unwrap();
        assert_eq!(storage.get("test_key").await.unwrap(), Some(value));

        assert!(storage.contains("test_key").await.unwrap());
        assert!(!storage.contains("nonexistent").await.unwrap());

        assert!(storage.remove("test_key").await.unwrap());
        assert!(!storage.contains("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_storage_rejects_blank_key() {
        let storage = MemoryStorage::new();
        let err = storage.set("  ", &serde_json::json!(1)).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_disk_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path());
        let value = serde_json::json!({"name": "task-cache"});

        storage.set("test_key", &value).await.unwrap();
        assert_eq!(storage.get("test_key").await.unwrap(), Some(value));
        assert!(storage.contains("test_key").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["test_key".to_string()]);

        assert!(storage.remove("test_key").await.unwrap());
        assert!(!storage.contains("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_storage_compressed_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path()).with_compression(true);
        let value = serde_json::json!({"content": "a".repeat(4096)});

        storage.set("big", &value).await.unwrap();
        assert_eq!(storage.get("big").await.unwrap(), Some(value));
        // 4 KiB of repeated text compresses well below its raw size
        assert!(storage.size_bytes().await.unwrap() < 1024);
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disk_storage_clear() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path());

        storage.set("a", &serde_json::json!(1)).await.unwrap();
        storage.set("b", &serde_json::json!(2)).await.unwrap();
        assert_eq!(storage.len().await.unwrap(), 2);

        storage.clear().await.unwrap();
        assert_eq!(storage.len().await.unwrap(), 0);
    }
}
