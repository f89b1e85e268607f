//! Unified data parsing manager
//!
//! The single entry point for views and commands. Builds the three data
//! managers in dependency order (files, projects, tasks), loads them in
//! that order and unloads them in reverse. It also relays their events:
//!
//! | bus event | reaction |
//! |---|---|
//! | `ProjectDataUpdated` | invalidate the file's stamp, re-index it |
//! | `TaskDataUpdated` | schedule a debounced persist, relay outward |
//! | `FileDeleted` | relay outward (the task manager drops the tasks) |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskgenius_cache::PersistentStore;
use taskgenius_parsers::{FileFrontmatter, ProjectIdentity, Task};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::events::{EventBus, EventKind, EventPayload, ManagerEvent, TaskAction};
use crate::file_manager::FileDataManager;
use crate::lifecycle::{DataManager, ManagerCore, ManagerLifecycle, MemoryStats};
use crate::project::{EnhancedMetadata, ProjectDataManager};
use crate::task::{SortCriterion, TaskDataManager, TaskFilter};
use crate::vault::VaultAdapter;

const OUTWARD_CHANNEL_CAPACITY: usize = 256;

/// Change notification for views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    TasksUpdated {
        action: TaskAction,
        path: Option<String>,
        task_ids: Vec<String>,
    },
    ProjectUpdated {
        path: String,
        project: Option<String>,
    },
    FileDeleted {
        path: String,
    },
}

/// Whole-system memory view plus the per-manager breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedMemoryStats {
    pub unified: MemoryStats,
    pub task: MemoryStats,
    pub project: MemoryStats,
    pub file: MemoryStats,
}

pub struct UnifiedDataParsingManager {
    core: ManagerCore,
    config: Arc<IndexConfig>,
    files: Arc<FileDataManager>,
    projects: Arc<ProjectDataManager>,
    tasks: Arc<TaskDataManager>,
    outward: broadcast::Sender<IndexEvent>,
    // Set by an explicit unload so API calls fail instead of reloading
    unloaded: AtomicBool,
    persist_generation: Arc<AtomicU64>,
    persist_timer: Mutex<Option<JoinHandle<()>>>,
    me: Weak<UnifiedDataParsingManager>,
}

impl UnifiedDataParsingManager {
    /// Build the façade and its sub-managers; nothing runs until `load()`
    pub fn new(
        id: impl Into<String>,
        config: IndexConfig,
        vault: Arc<dyn VaultAdapter>,
        store: Option<Arc<dyn PersistentStore>>,
    ) -> IndexResult<Arc<Self>> {
        config.validate()?;
        Ok(Self::with_bus(id, Arc::new(config), vault, store, EventBus::new()))
    }

    pub fn with_bus(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        vault: Arc<dyn VaultAdapter>,
        store: Option<Arc<dyn PersistentStore>>,
        bus: EventBus,
    ) -> Arc<Self> {
        let id = id.into();
        let files = FileDataManager::new(format!("{}-files", id), config.clone(), vault, bus.clone());
        let projects = ProjectDataManager::new(
            format!("{}-projects", id),
            config.clone(),
            files.clone(),
            bus.clone(),
        );
        let tasks = TaskDataManager::new(
            format!("{}-tasks", id),
            config.clone(),
            files.clone(),
            projects.clone(),
            store,
            bus.clone(),
        );
        let (outward, _) = broadcast::channel(OUTWARD_CHANNEL_CAPACITY);
        Arc::new_cyclic(|me| Self {
            core: ManagerCore::new(id, config.lifecycle.clone(), bus),
            config,
            files,
            projects,
            tasks,
            outward,
            unloaded: AtomicBool::new(false),
            persist_generation: Arc::new(AtomicU64::new(0)),
            persist_timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// `managersInitialized`
    pub fn is_ready(&self) -> bool {
        self.core.is_initialized()
    }

    pub fn files(&self) -> &Arc<FileDataManager> {
        &self.files
    }

    pub fn projects(&self) -> &Arc<ProjectDataManager> {
        &self.projects
    }

    pub fn tasks(&self) -> &Arc<TaskDataManager> {
        &self.tasks
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.outward.subscribe()
    }

    /// Finish a pending lazy initialization, or fail
    pub async fn ensure_managers_ready(&self) -> IndexResult<()> {
        if self.core.is_initialized() {
            return Ok(());
        }
        if !self.unloaded.load(Ordering::SeqCst) {
            if let Some(me) = self.me.upgrade() {
                me.load().await?;
            }
        }
        self.core.ensure_initialized()
    }

    pub async fn get_tasks(&self, filter: Option<&TaskFilter>) -> IndexResult<Vec<Task>> {
        self.ensure_managers_ready().await?;
        self.tasks.get_tasks(filter)
    }

    pub async fn get_task_by_id(&self, id: &str) -> IndexResult<Option<Task>> {
        self.ensure_managers_ready().await?;
        self.tasks.get_task_by_id(id)
    }

    pub async fn update_task(&self, task: Task) -> IndexResult<()> {
        self.ensure_managers_ready().await?;
        self.tasks.update_task(task)
    }

    pub async fn delete_task(&self, id: &str) -> IndexResult<Task> {
        self.ensure_managers_ready().await?;
        self.tasks.delete_task(id)
    }

    pub async fn index_file(&self, path: &str) -> IndexResult<Vec<Task>> {
        self.ensure_managers_ready().await?;
        self.tasks.index_file(path).await
    }

    pub async fn index_all_files(&self) -> IndexResult<usize> {
        self.ensure_managers_ready().await?;
        self.tasks.index_all_files().await
    }

    pub async fn query_tasks(
        &self,
        filter: &TaskFilter,
        sort_by: &[SortCriterion],
    ) -> IndexResult<Vec<Task>> {
        self.ensure_managers_ready().await?;
        self.tasks.query_tasks(filter, sort_by)
    }

    /// Clean every manager, drop the task cache and re-scan the vault
    pub async fn force_reindex(&self) -> IndexResult<usize> {
        self.ensure_managers_ready().await?;
        info!(manager = %self.core.id(), "Forced reindex");
        self.clean_all().await?;
        self.tasks.reset()?;
        self.tasks.index_all_files().await
    }

    pub async fn get_tasks_by_file(&self, path: &str) -> IndexResult<Vec<Task>> {
        self.ensure_managers_ready().await?;
        self.tasks.get_tasks_by_file(path)
    }

    pub async fn get_file_metadata(&self, path: &str) -> IndexResult<Option<FileFrontmatter>> {
        self.ensure_managers_ready().await?;
        self.files.get_file_metadata(path)
    }

    pub async fn get_project_info(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        self.ensure_managers_ready().await?;
        self.projects.get_project_info(path).await
    }

    pub async fn get_enhanced_metadata(&self, path: &str) -> IndexResult<Option<EnhancedMetadata>> {
        self.ensure_managers_ready().await?;
        self.projects.get_enhanced_metadata(path).await
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        self.memory_stats()
    }

    pub fn get_detailed_memory_stats(&self) -> DetailedMemoryStats {
        DetailedMemoryStats {
            unified: self.memory_stats(),
            task: self.tasks.memory_stats(),
            project: self.projects.memory_stats(),
            file: self.files.memory_stats(),
        }
    }

    /// Persist the task cache now
    pub async fn save_cache(&self) -> IndexResult<()> {
        self.tasks.save_cache().await
    }

    /// Persist after `persist_debounce_ms` of quiet
    fn schedule_persist(&self) {
        let generation = self.persist_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.persist_generation.clone();
        let tasks = Arc::downgrade(&self.tasks);
        let delay = Duration::from_millis(self.config.indexing.persist_debounce_ms);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let Some(tasks) = tasks.upgrade() else {
                return;
            };
            if !tasks.is_initialized() {
                return;
            }
            if let Err(e) = tasks.save_cache().await {
                warn!(error = %e, "Debounced task cache persist failed");
            }
        });
        // Superseded timers exit on their own after the generation check
        *self.persist_timer.lock() = Some(handle);
    }

    fn cancel_persist(&self) {
        self.persist_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.persist_timer.lock().take() {
            handle.abort();
        }
    }

    fn relay(&self, event: IndexEvent) {
        // No receivers is normal when no view is open
        let _ = self.outward.send(event);
    }

    async fn handle_event(&self, event: ManagerEvent) {
        match event.data {
            EventPayload::Project { path, project } => {
                self.tasks.on_project_data_updated(&path);
                if let Err(e) = self.tasks.index_file(&path).await {
                    warn!(path = %path, error = %e, "Re-index after project change failed");
                }
                self.relay(IndexEvent::ProjectUpdated { path, project });
            }
            EventPayload::Tasks {
                action,
                path,
                task_ids,
            } => {
                if action != TaskAction::CacheLoaded {
                    self.schedule_persist();
                }
                self.relay(IndexEvent::TasksUpdated {
                    action,
                    path,
                    task_ids,
                });
            }
            EventPayload::File { path } if event.kind == EventKind::FileDeleted => {
                self.relay(IndexEvent::FileDeleted { path });
            }
            EventPayload::File { .. } => {}
        }
    }

    /// File and project sweeps are independent; the task sweep prunes
    /// against the file snapshot, so it runs after them
    async fn clean_all(&self) -> IndexResult<()> {
        futures::try_join!(self.files.force_cleanup(), self.projects.force_cleanup())?;
        self.tasks.force_cleanup().await
    }

    async fn unload_children(&self) {
        self.tasks.unload().await;
        self.projects.unload().await;
        self.files.unload().await;
    }
}

#[async_trait]
impl DataManager for UnifiedDataParsingManager {
    fn core(&self) -> &ManagerCore {
        &self.core
    }

    async fn initialize(&self) -> IndexResult<()> {
        self.unloaded.store(false, Ordering::SeqCst);

        let me = self.me.clone();
        let handle = self.core.bus().listen(
            &[
                EventKind::ProjectDataUpdated,
                EventKind::TaskDataUpdated,
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

        let loaded = async {
            self.files.load().await?;
            self.projects.load().await?;
            self.tasks.load().await?;
            self.tasks.index_all_files().await
        }
        .await;

        match loaded {
            Ok(indexed) => {
                info!(manager = %self.core.id(), files = indexed, "Index ready");
                Ok(())
            }
            Err(e) => {
                // No partially ready sub-manager outlives a failed start
                self.cancel_persist();
                self.unload_children().await;
                Err(IndexError::InitializationFailed {
                    manager: self.core.id().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn cleanup(&self) -> IndexResult<()> {
        self.unloaded.store(true, Ordering::SeqCst);
        self.cancel_persist();
        // Task cleanup persists the cache
        self.unload_children().await;
        debug!(manager = %self.core.id(), "Sub-managers unloaded");
        Ok(())
    }

    fn memory_stats(&self) -> MemoryStats {
        let parts = [
            self.tasks.memory_stats(),
            self.projects.memory_stats(),
            self.files.memory_stats(),
        ];
        let mut stats = MemoryStats::aggregate(&parts);
        stats.active_listeners += self.core.listener_count();
        stats
    }

    /// Run every sub-manager's cleanup hook
    async fn perform_memory_cleanup(&self) -> IndexResult<()> {
        self.clean_all().await
    }
}
