//! Project data manager
//!
//! Caches, per file, the resolved project identity and the enhanced
//! metadata. Reacts to file events: an ordinary file is re-resolved on its
//! own, a project config file invalidates every file it governs.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use taskgenius_parsers::ProjectIdentity;
use tracing::{debug, info, warn};

use super::resolver::{MetadataMap, ProjectConfigResolver, VaultProjectResolver};
use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::events::{EventBus, EventKind, EventPayload, ManagerEvent};
use crate::file_manager::FileDataManager;
use crate::lifecycle::{DataManager, ManagerCore, MemoryStats};

/// Enhanced metadata older than this is purged once its file is gone
const ORPHAN_METADATA_TTL_MINUTES: i64 = 60;

/// Merged metadata for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMetadata {
    pub data: MetadataMap,
    pub timestamp: DateTime<Utc>,
}

pub struct ProjectDataManager {
    core: ManagerCore,
    config: Arc<IndexConfig>,
    files: Arc<FileDataManager>,
    resolver: Arc<dyn ProjectConfigResolver>,
    file_projects: RwLock<HashMap<String, Option<ProjectIdentity>>>,
    enhanced: RwLock<HashMap<String, EnhancedMetadata>>,
    me: Weak<ProjectDataManager>,
}

impl ProjectDataManager {
    /// Manager using the default vault-backed resolver
    pub fn new(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        files: Arc<FileDataManager>,
        bus: EventBus,
    ) -> Arc<Self> {
        let resolver = Arc::new(VaultProjectResolver::new(config.projects.clone(), files.clone()));
        Self::with_resolver(id, config, files, resolver, bus)
    }

    pub fn with_resolver(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        files: Arc<FileDataManager>,
        resolver: Arc<dyn ProjectConfigResolver>,
        bus: EventBus,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|me| Self {
            core: ManagerCore::new(id, config.lifecycle.clone(), bus),
            config,
            files,
            resolver,
            file_projects: RwLock::new(HashMap::new()),
            enhanced: RwLock::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Cached project for a file, resolving on a miss
    pub async fn get_project_info(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        self.core.ensure_initialized()?;
        if let Some(cached) = self.file_projects.read().get(path) {
            return Ok(cached.clone());
        }
        self.resolve_file(path).await
    }

    /// Cached enhanced metadata for a file, resolving on a miss
    pub async fn get_enhanced_metadata(&self, path: &str) -> IndexResult<Option<EnhancedMetadata>> {
        self.core.ensure_initialized()?;
        if !self.config.projects.enable_enhanced_metadata {
            return Ok(None);
        }
        if let Some(cached) = self.enhanced.read().get(path) {
            return Ok(Some(cached.clone()));
        }
        self.resolve_file(path).await?;
        Ok(self.enhanced.read().get(path).cloned())
    }

    pub async fn get_project_config(&self, path: &str) -> IndexResult<Option<MetadataMap>> {
        self.core.ensure_initialized()?;
        self.resolver.get_project_config(path).await
    }

    /// Resolve a file from scratch and store the result
    pub async fn resolve_file(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        self.core.ensure_initialized()?;
        self.resolve_into_cache(path).await
    }

    async fn resolve_into_cache(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        let identity = self.resolver.determine_project(path).await?;
        self.file_projects
            .write()
            .insert(path.to_string(), identity.clone());

        if self.config.projects.enable_enhanced_metadata {
            let data = self.resolver.get_enhanced_metadata(path).await?;
            self.enhanced.write().insert(
                path.to_string(),
                EnhancedMetadata {
                    data,
                    timestamp: Utc::now(),
                },
            );
        }
        Ok(identity)
    }

    async fn refresh_and_notify(&self, path: &str) {
        match self.resolve_into_cache(path).await {
            Ok(identity) => self.core.emit(
                EventKind::ProjectDataUpdated,
                EventPayload::Project {
                    path: path.to_string(),
                    project: identity.map(|p| p.name),
                },
            ),
            Err(e) => warn!(path, error = %e, "Project resolution failed"),
        }
    }

    /// Cached files governed by a config file
    fn governed_files(&self, config_path: &str) -> IndexResult<Vec<String>> {
        Ok(self
            .files
            .get_all_cached_files()?
            .into_iter()
            .filter(|file| file != config_path && self.resolver.config_governs(config_path, file))
            .collect())
    }

    fn forget(&self, path: &str) {
        self.file_projects.write().remove(path);
        self.enhanced.write().remove(path);
    }

    async fn on_file_changed(&self, path: &str) {
        if !self.resolver.is_config_file(path) {
            self.resolver.clear_cache(Some(path));
            self.refresh_and_notify(path).await;
            return;
        }
        self.cascade(path).await;
        self.refresh_and_notify(path).await;
    }

    async fn on_file_deleted(&self, path: &str) {
        self.forget(path);
        if self.resolver.is_config_file(path) {
            self.cascade(path).await;
        } else {
            self.resolver.clear_cache(Some(path));
        }
    }

    /// Re-resolve every file a config file governs
    async fn cascade(&self, config_path: &str) {
        self.resolver.clear_cache(Some(config_path));
        let affected = match self.governed_files(config_path) {
            Ok(files) => files,
            Err(e) => {
                warn!(path = config_path, error = %e, "Cannot list files for config change");
                return;
            }
        };
        debug!(path = config_path, files = affected.len(), "Project config changed");
        for file in affected {
            self.forget(&file);
            self.refresh_and_notify(&file).await;
        }
    }

    async fn handle_event(&self, event: ManagerEvent) {
        if !self.core.is_initialized() {
            return;
        }
        let Some(path) = event.path().map(str::to_string) else {
            return;
        };
        match event.kind {
            EventKind::FileCreated | EventKind::FileModified => self.on_file_changed(&path).await,
            EventKind::FileDeleted => self.on_file_deleted(&path).await,
            _ => {}
        }
    }
}

#[async_trait]
impl DataManager for ProjectDataManager {
    fn core(&self) -> &ManagerCore {
        &self.core
    }

    async fn initialize(&self) -> IndexResult<()> {
        let me = self.me.clone();
        let handle = self.core.bus().listen(
            // Front-matter changes always arrive with a FileModified as well
            &[
                EventKind::FileCreated,
                EventKind::FileModified,
                EventKind::FileDeleted,
            ],
            move |event| {
                let me = me.clone();
                async move {
                    if let Some(manager) = me.upgrade() {
                        manager.handle_event(event).await;
                    }
                }
            },
        );
        self.core.track_listener(handle);

        let files = self.files.get_all_cached_files()?;
        for path in &files {
            if let Err(e) = self.resolve_into_cache(path).await {
                warn!(path = %path, error = %e, "Initial project resolution failed");
            }
        }
        info!(manager = %self.core.id(), files = files.len(), "Project data resolved");
        Ok(())
    }

    async fn cleanup(&self) -> IndexResult<()> {
        self.file_projects.write().clear();
        self.enhanced.write().clear();
        self.resolver.clear_cache(None);
        Ok(())
    }

    fn memory_stats(&self) -> MemoryStats {
        let projects = self.file_projects.read();
        let enhanced = self.enhanced.read();
        let project_bytes: usize = projects
            .iter()
            .map(|(path, p)| path.len() + p.as_ref().map_or(0, |p| p.name.len() + 32))
            .sum();
        let enhanced_bytes: usize = enhanced
            .iter()
            .map(|(path, m)| {
                path.len()
                    + m.data
                        .iter()
                        .map(|(k, v)| k.len() + v.to_string().len())
                        .sum::<usize>()
            })
            .sum();
        self.core
            .stats(projects.len() + enhanced.len(), project_bytes + enhanced_bytes)
    }

    /// Purge stale metadata of files that are gone, and the resolver cache
    async fn perform_memory_cleanup(&self) -> IndexResult<()> {
        let cutoff = Utc::now() - ChronoDuration::minutes(ORPHAN_METADATA_TTL_MINUTES);
        let candidates: Vec<String> = self
            .enhanced
            .read()
            .iter()
            .filter(|(_, m)| m.timestamp < cutoff)
            .map(|(path, _)| path.clone())
            .collect();

        let mut purged = 0usize;
        for path in candidates {
            if !self.files.is_file_cached(&path)? {
                self.forget(&path);
                purged += 1;
            }
        }
        self.resolver.clear_cache(None);
        debug!(manager = %self.core.id(), purged, "Project cache cleanup");
        Ok(())
    }
}
