//! File data manager
//!
//! Leaf data source of the index. Keeps a snapshot (front-matter, mtime,
//! size) of every supported vault file and turns vault change notifications
//! into bus events for the managers above it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use taskgenius_parsers::dates::now_millis;
use taskgenius_parsers::{FileFrontmatter, FrontmatterExtractor};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::events::{EventBus, EventKind, EventPayload};
use crate::lifecycle::{DataManager, ManagerCore, MemoryStats};
use crate::vault::{extension_of, FileStat, VaultAdapter, VaultEvent, VaultEventKind};

/// Cached snapshot of one supported file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub extension: String,
    pub mtime: i64,
    pub size: u64,
    pub frontmatter: FileFrontmatter,
    /// When this snapshot was taken (ms)
    pub cached_at: i64,
}

impl FileInfo {
    fn estimated_size(&self) -> usize {
        let fields: usize = self
            .frontmatter
            .fields
            .iter()
            .map(|(k, v)| k.len() + v.to_string().len())
            .sum();
        let tags: usize = self.frontmatter.tags.iter().map(String::len).sum();
        std::mem::size_of::<FileInfo>() + self.path.len() + self.extension.len() + fields + tags
    }
}

pub struct FileDataManager {
    core: ManagerCore,
    config: Arc<IndexConfig>,
    vault: Arc<dyn VaultAdapter>,
    extensions: HashSet<String>,
    files: RwLock<HashMap<String, FileInfo>>,
    extractor: FrontmatterExtractor,
    me: Weak<FileDataManager>,
}

impl FileDataManager {
    pub fn new(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        vault: Arc<dyn VaultAdapter>,
        bus: EventBus,
    ) -> Arc<Self> {
        let id = id.into();
        let extensions = config.tracked_extensions().into_iter().collect();
        Arc::new_cyclic(|me| Self {
            core: ManagerCore::new(id, config.lifecycle.clone(), bus),
            config,
            vault,
            extensions,
            files: RwLock::new(HashMap::new()),
            extractor: FrontmatterExtractor::new(),
            me: me.clone(),
        })
    }

    /// Whether a path has a tracked extension and is not hidden or ignored
    pub fn is_supported(&self, path: &str) -> bool {
        if !self.extensions.contains(&extension_of(path)) {
            return false;
        }
        let files = &self.config.files;
        if files.ignore_hidden && path.split('/').any(|segment| segment.starts_with('.')) {
            return false;
        }
        !files.ignored_folders.iter().any(|folder| {
            let folder = folder.trim_matches('/');
            !folder.is_empty()
                && (path == folder || path.starts_with(&format!("{}/", folder)))
        })
    }

    /// Every tracked file, sorted by path
    pub fn get_supported_files(&self) -> IndexResult<Vec<FileInfo>> {
        self.core.ensure_initialized()?;
        let mut files: Vec<FileInfo> = self.files.read().values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    pub fn get_file_metadata(&self, path: &str) -> IndexResult<Option<FileFrontmatter>> {
        self.core.ensure_initialized()?;
        Ok(self.files.read().get(path).map(|info| info.frontmatter.clone()))
    }

    pub fn get_file_info(&self, path: &str) -> IndexResult<Option<FileInfo>> {
        self.core.ensure_initialized()?;
        Ok(self.files.read().get(path).cloned())
    }

    pub fn is_file_cached(&self, path: &str) -> IndexResult<bool> {
        self.core.ensure_initialized()?;
        Ok(self.files.read().contains_key(path))
    }

    pub fn get_all_cached_files(&self) -> IndexResult<Vec<String>> {
        self.core.ensure_initialized()?;
        let mut paths: Vec<String> = self.files.read().keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    /// Current mtime straight from the vault
    pub async fn stat(&self, path: &str) -> IndexResult<Option<FileStat>> {
        self.core.ensure_initialized()?;
        self.vault.stat(path).await
    }

    /// Raw file content straight from the vault
    pub async fn read_content(&self, path: &str) -> IndexResult<String> {
        self.core.ensure_initialized()?;
        self.vault.read(path).await
    }

    /// Front-matter of any vault file, from the snapshot when tracked
    pub async fn load_frontmatter(&self, path: &str) -> IndexResult<Option<FileFrontmatter>> {
        if let Some(frontmatter) = self.get_file_metadata(path)? {
            return Ok(Some(frontmatter));
        }
        if self.vault.stat(path).await?.is_none() {
            return Ok(None);
        }
        let content = self.vault.read(path).await?;
        Ok(Some(self.extract_frontmatter(&content, path)))
    }

    fn extract_frontmatter(&self, content: &str, path: &str) -> FileFrontmatter {
        if extension_of(path) != "md" {
            return FileFrontmatter::default();
        }
        self.extractor.extract(content, path).unwrap_or_else(|e| {
            warn!(path, error = %e, "Invalid front-matter, using empty snapshot");
            FileFrontmatter::default()
        })
    }

    async fn snapshot(&self, stat: FileStat) -> IndexResult<FileInfo> {
        let content = self.vault.read(&stat.path).await?;
        let frontmatter = self.extract_frontmatter(&content, &stat.path);
        Ok(FileInfo {
            extension: stat.extension(),
            frontmatter,
            mtime: stat.mtime,
            size: stat.size,
            cached_at: now_millis(),
            path: stat.path,
        })
    }

    /// Re-read one file and publish what changed
    pub async fn refresh_file(&self, path: &str) -> IndexResult<()> {
        self.core.ensure_initialized()?;
        if !self.is_supported(path) {
            return Ok(());
        }
        let Some(stat) = self.vault.stat(path).await? else {
            self.remove_file(path);
            return Ok(());
        };

        let info = self.snapshot(stat).await?;
        let previous = self.files.write().insert(path.to_string(), info.clone());

        match previous {
            None => self.core.emit(EventKind::FileCreated, EventPayload::file(path)),
            Some(previous) => {
                if previous.frontmatter != info.frontmatter {
                    self.core
                        .emit(EventKind::MetadataChanged, EventPayload::file(path));
                }
                self.core.emit(EventKind::FileModified, EventPayload::file(path));
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) {
        if self.files.write().remove(path).is_some() {
            debug!(path, "File removed from snapshot");
            self.core.emit(EventKind::FileDeleted, EventPayload::file(path));
        }
    }

    async fn handle_vault_event(&self, event: VaultEvent) {
        if !self.core.is_initialized() {
            return;
        }
        let result = match event.kind {
            VaultEventKind::Created | VaultEventKind::Modified => {
                self.refresh_file(&event.path).await
            }
            VaultEventKind::Deleted => {
                self.remove_file(&event.path);
                Ok(())
            }
            VaultEventKind::Renamed => {
                if let Some(old_path) = &event.old_path {
                    self.remove_file(old_path);
                }
                self.refresh_file(&event.path).await
            }
        };
        if let Err(e) = result {
            warn!(path = %event.path, error = %e, "Failed to apply vault change");
        }
    }

    fn spawn_vault_listener(&self) {
        let mut receiver = self.vault.subscribe();
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Some(manager) = me.upgrade() else {
                            break;
                        };
                        manager.handle_vault_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Vault listener lagged, changes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.core.track_listener(handle);
    }
}

#[async_trait]
impl DataManager for FileDataManager {
    fn core(&self) -> &ManagerCore {
        &self.core
    }

    async fn initialize(&self) -> IndexResult<()> {
        // Subscribe first so changes during the scan are not lost
        self.spawn_vault_listener();

        let mut snapshot = HashMap::new();
        for stat in self.vault.list_files().await? {
            if !self.is_supported(&stat.path) {
                continue;
            }
            let path = stat.path.clone();
            match self.snapshot(stat).await {
                Ok(info) => {
                    snapshot.insert(path, info);
                }
                Err(e) => warn!(path = %path, error = %e, "Skipping unreadable file"),
            }
        }

        info!(manager = %self.core.id(), files = snapshot.len(), "File snapshot built");
        *self.files.write() = snapshot;
        Ok(())
    }

    async fn cleanup(&self) -> IndexResult<()> {
        self.files.write().clear();
        Ok(())
    }

    fn memory_stats(&self) -> MemoryStats {
        let files = self.files.read();
        let bytes = files.values().map(FileInfo::estimated_size).sum();
        self.core.stats(files.len(), bytes)
    }

    /// Drop snapshots of files the vault no longer has
    async fn perform_memory_cleanup(&self) -> IndexResult<()> {
        let paths: Vec<String> = self.files.read().keys().cloned().collect();
        let mut pruned = 0usize;
        for path in paths {
            if self.vault.stat(&path).await?.is_none() {
                self.remove_file(&path);
                pruned += 1;
            }
        }
        debug!(manager = %self.core.id(), pruned, "File snapshot cleanup");
        Ok(())
    }
}
