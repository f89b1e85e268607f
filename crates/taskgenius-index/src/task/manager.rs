//! Task data manager
//!
//! Owns the [`TaskCache`]. A file is parsed by `parse_file`:
//!
//! 1. an in-flight guard drops a second concurrent parse of the same path
//! 2. the file's [`IndexStamp`] short-circuits unchanged files
//! 3. content goes to the parse executor (in process or on the pool)
//! 4. the result replaces the file's previous tasks in one synchronous step
//!
//! Upstream managers never call in here. File and project events only
//! invalidate the file's stamp so the next parse cannot short-circuit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use taskgenius_cache::PersistentStore;
use taskgenius_parsers::dates::now_millis;
use taskgenius_parsers::{ParseContext, ParserConfig, Task};
use tracing::{debug, info, warn};

use super::cache::{DateField, TaskCache};
use super::executor::{build_executor, ParseExecutor};
use super::query::{query, SortCriterion, TaskFilter};
use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::events::{EventBus, EventKind, EventPayload, ManagerEvent, TaskAction};
use crate::file_manager::FileDataManager;
use crate::lifecycle::{DataManager, ManagerCore, MemoryStats};
use crate::project::ProjectDataManager;

/// Version stamped on persisted task caches; bump on any shape change
pub const CACHE_FORMAT_VERSION: &str = "1";

/// Coarsest modification-time resolution among supported filesystems
const MTIME_GRANULARITY_MS: i64 = 1000;

/// What a file looked like when it was last parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStamp {
    pub indexed_at: i64,
    pub mtime: i64,
    /// Hex SHA-256 of the parsed content
    pub content_hash: String,
}

/// Outcome of comparing a file against its stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    /// Same granularity window as the last parse; content decides
    Ambiguous,
    Stale,
}

impl IndexStamp {
    fn freshness(&self, mtime: i64) -> Freshness {
        if mtime > self.indexed_at {
            Freshness::Stale
        } else if self.indexed_at - mtime > MTIME_GRANULARITY_MS {
            Freshness::Fresh
        } else {
            Freshness::Ambiguous
        }
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persisted payload
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    cache: TaskCache,
    stamps: HashMap<String, IndexStamp>,
}

/// Removes the path from the in-flight set when dropped
struct InFlight<'a> {
    paths: &'a Mutex<HashSet<String>>,
    path: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.paths.lock().remove(&self.path);
    }
}

pub struct TaskDataManager {
    core: ManagerCore,
    config: Arc<IndexConfig>,
    files: Arc<FileDataManager>,
    projects: Arc<ProjectDataManager>,
    store: Option<Arc<dyn PersistentStore>>,
    executor: Arc<dyn ParseExecutor>,
    cache: RwLock<TaskCache>,
    stamps: RwLock<HashMap<String, IndexStamp>>,
    in_flight: Mutex<HashSet<String>>,
    /// Bumped per path whenever its tasks are dropped; a parse that
    /// started under an older value must not resurrect them
    removals: Mutex<HashMap<String, u64>>,
    parse_count: AtomicUsize,
    me: Weak<TaskDataManager>,
}

impl TaskDataManager {
    /// Build the manager; the executor is chosen here, once
    pub fn new(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        files: Arc<FileDataManager>,
        projects: Arc<ProjectDataManager>,
        store: Option<Arc<dyn PersistentStore>>,
        bus: EventBus,
    ) -> Arc<Self> {
        let executor = build_executor(&config.workers, Arc::new(config.parsing.clone()));
        Self::with_executor(id, config, files, projects, store, executor, bus)
    }

    pub fn with_executor(
        id: impl Into<String>,
        config: Arc<IndexConfig>,
        files: Arc<FileDataManager>,
        projects: Arc<ProjectDataManager>,
        store: Option<Arc<dyn PersistentStore>>,
        executor: Arc<dyn ParseExecutor>,
        bus: EventBus,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|me| Self {
            core: ManagerCore::new(id, config.lifecycle.clone(), bus),
            config,
            files,
            projects,
            store,
            executor,
            cache: RwLock::new(TaskCache::new()),
            stamps: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            removals: Mutex::new(HashMap::new()),
            parse_count: AtomicUsize::new(0),
            me: me.clone(),
        })
    }

    pub fn parser_config(&self) -> &ParserConfig {
        &self.config.parsing
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Number of parses handed to the executor since construction
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }

    pub fn task_count(&self) -> usize {
        self.cache.read().len()
    }

    pub fn stamp(&self, path: &str) -> Option<IndexStamp> {
        self.stamps.read().get(path).cloned()
    }

    /// Whether every secondary index matches a fresh rebuild
    pub fn is_cache_consistent(&self) -> bool {
        self.cache.read().is_consistent()
    }

    fn try_begin(&self, path: &str) -> Option<InFlight<'_>> {
        if !self.in_flight.lock().insert(path.to_string()) {
            return None;
        }
        Some(InFlight {
            paths: &self.in_flight,
            path: path.to_string(),
        })
    }

    fn removal_generation(&self, path: &str) -> u64 {
        self.removals.lock().get(path).copied().unwrap_or(0)
    }

    fn emit_tasks(&self, action: TaskAction, path: Option<&str>, task_ids: Vec<String>) {
        self.core.emit(
            EventKind::TaskDataUpdated,
            EventPayload::tasks(action, path.map(str::to_string), task_ids),
        );
    }

    // ---- queries ----

    /// All tasks, optionally filtered, ordered by file and line
    pub fn get_tasks(&self, filter: Option<&TaskFilter>) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        let cache = self.cache.read();
        let filter = filter.cloned().unwrap_or_default();
        Ok(query(cache.tasks(), &filter, &[]))
    }

    pub fn get_task_by_id(&self, id: &str) -> IndexResult<Option<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().get(id).cloned())
    }

    pub fn get_tasks_by_file(&self, path: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().tasks_for_file(path))
    }

    pub fn query_tasks(&self, filter: &TaskFilter, sort_by: &[SortCriterion]) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        let cache = self.cache.read();
        Ok(query(cache.tasks(), filter, sort_by))
    }

    pub fn get_tasks_by_tag(&self, tag: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        let tag = if tag.starts_with('#') {
            tag.to_string()
        } else {
            format!("#{}", tag)
        };
        Ok(self.cache.read().by_tag(&tag))
    }

    pub fn get_tasks_by_project(&self, project: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().by_project(project))
    }

    pub fn get_tasks_by_context(&self, context: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().by_context(context))
    }

    pub fn get_tasks_by_priority(&self, priority: u8) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().by_priority(priority))
    }

    pub fn get_tasks_by_status(&self, completed: bool) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().by_status(completed))
    }

    /// Tasks whose date `field` falls on `day` (`YYYY-MM-DD`, UTC)
    pub fn get_tasks_by_date(&self, field: DateField, day: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().by_date(field, day))
    }

    pub fn get_dependents(&self, id: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        Ok(self.cache.read().dependents(id))
    }

    // ---- mutations ----

    /// Upsert a task into the cache; the source file is left untouched
    pub fn update_task(&self, task: Task) -> IndexResult<()> {
        self.core.ensure_initialized()?;
        let id = task.id.clone();
        let path = task.file_path.clone();
        self.cache.write().upsert(task);
        self.emit_tasks(TaskAction::TaskUpdated, Some(&path), vec![id]);
        Ok(())
    }

    pub fn delete_task(&self, id: &str) -> IndexResult<Task> {
        self.core.ensure_initialized()?;
        let removed = self.cache.write().remove(id);
        let task = removed.ok_or_else(|| IndexError::TaskNotFound { id: id.to_string() })?;
        self.emit_tasks(
            TaskAction::TaskDeleted,
            Some(&task.file_path),
            vec![task.id.clone()],
        );
        Ok(task)
    }

    /// Drop every task of a file; returns the removed ids
    pub fn remove_file_tasks(&self, path: &str) -> IndexResult<Vec<String>> {
        self.core.ensure_initialized()?;
        let removed = {
            let mut cache = self.cache.write();
            *self.removals.lock().entry(path.to_string()).or_insert(0) += 1;
            self.stamps.write().remove(path);
            cache.remove_file(path)
        };
        let ids: Vec<String> = removed.into_iter().map(|t| t.id).collect();
        if !ids.is_empty() {
            debug!(path, count = ids.len(), "Removed file tasks");
            self.emit_tasks(TaskAction::FileRemoved, Some(path), ids.clone());
        }
        Ok(ids)
    }

    /// Forget every stamp so the next scan re-parses everything
    pub fn invalidate_all(&self) {
        self.stamps.write().clear();
    }

    /// Empty the cache and stamps
    pub fn reset(&self) -> IndexResult<()> {
        self.core.ensure_initialized()?;
        self.cache.write().clear();
        self.stamps.write().clear();
        self.emit_tasks(TaskAction::CacheCleared, None, Vec::new());
        Ok(())
    }

    /// A file changed: its stamp no longer proves anything
    pub fn on_file_updated(&self, path: &str) {
        self.stamps.write().remove(path);
    }

    /// A file's project identity changed: force the next parse
    pub fn on_project_data_updated(&self, path: &str) {
        self.stamps.write().remove(path);
    }

    // ---- parsing ----

    /// (Re)parse one file and return its tasks
    pub async fn index_file(&self, path: &str) -> IndexResult<Vec<Task>> {
        self.parse_file(path).await
    }

    /// Parse one file unless it is already in flight or unchanged
    pub async fn parse_file(&self, path: &str) -> IndexResult<Vec<Task>> {
        self.core.ensure_initialized()?;
        if !self.files.is_supported(path) {
            return Ok(Vec::new());
        }
        let Some(_in_flight) = self.try_begin(path) else {
            debug!(path, "Parse already in flight, dropping request");
            return Ok(Vec::new());
        };
        let generation = self.removal_generation(path);

        let Some(stat) = self.files.stat(path).await? else {
            self.remove_file_tasks(path)?;
            return Ok(Vec::new());
        };

        let freshness = self
            .stamp(path)
            .map_or(Freshness::Stale, |stamp| stamp.freshness(stat.mtime));
        if freshness == Freshness::Fresh {
            debug!(path, "Unchanged since last index");
            return Ok(self.cache.read().tasks_for_file(path));
        }

        let content = self.files.read_content(path).await?;
        let hash = content_hash(&content);
        if freshness == Freshness::Ambiguous
            && self.stamp(path).is_some_and(|stamp| stamp.content_hash == hash)
        {
            debug!(path, "Content hash unchanged");
            return Ok(self.cache.read().tasks_for_file(path));
        }

        let ctx = self.parse_context(path).await?;
        self.parse_count.fetch_add(1, Ordering::SeqCst);
        let output = self.executor.parse(content, ctx).await?;
        for warning in &output.warnings {
            debug!(path, parser = %warning.parser, message = %warning.message, "Parser skipped");
        }

        // Single synchronous step: no reader sees a half-applied diff, and a
        // removal either lands before the check or after the stamp
        let applied = {
            let mut cache = self.cache.write();
            if self.removal_generation(path) != generation {
                None
            } else {
                let diff = cache.replace_file(path, output.tasks);
                self.stamps.write().insert(
                    path.to_string(),
                    IndexStamp {
                        indexed_at: now_millis(),
                        mtime: stat.mtime,
                        content_hash: hash,
                    },
                );
                Some((diff, cache.tasks_for_file(path)))
            }
        };
        let Some((diff, tasks)) = applied else {
            debug!(path, "File removed during parse, discarding result");
            return Ok(Vec::new());
        };

        debug!(
            path,
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "File indexed"
        );
        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        self.emit_tasks(TaskAction::FileIndexed, Some(path), ids);
        Ok(tasks)
    }

    async fn parse_context(&self, path: &str) -> IndexResult<ParseContext> {
        let frontmatter = self.files.load_frontmatter(path).await?.unwrap_or_default();
        let project = match self.projects.get_project_info(path).await {
            Ok(project) => project,
            Err(e) => {
                warn!(path, error = %e, "Project lookup failed, indexing without project");
                None
            }
        };
        Ok(ParseContext::new(path)
            .with_frontmatter(frontmatter)
            .with_project(project))
    }

    /// Scan every tracked file in batches, yielding between batches
    ///
    /// Tasks of files that are no longer tracked are dropped first. A file
    /// that fails is logged and skipped. Returns the number of files that
    /// were parsed or confirmed fresh.
    pub async fn index_all_files(&self) -> IndexResult<usize> {
        self.core.ensure_initialized()?;
        let paths = self.files.get_all_cached_files()?;
        self.prune_untracked(&paths)?;

        let batch_size = self.config.indexing.batch_size.max(1);
        let mut indexed = 0usize;
        for batch in paths.chunks(batch_size) {
            for path in batch {
                match self.parse_file(path).await {
                    Ok(_) => indexed += 1,
                    Err(e) if e.is_not_initialized() => return Err(e),
                    Err(e) => warn!(path = %path, error = %e, "Failed to index file"),
                }
            }
            tokio::task::yield_now().await;
        }
        info!(
            manager = %self.core.id(),
            files = indexed,
            tasks = self.task_count(),
            "Full index complete"
        );
        Ok(indexed)
    }

    fn prune_untracked(&self, tracked: &[String]) -> IndexResult<()> {
        let tracked: HashSet<&str> = tracked.iter().map(String::as_str).collect();
        let orphaned: Vec<String> = self
            .cache
            .read()
            .file_paths()
            .into_iter()
            .filter(|path| !tracked.contains(path.as_str()))
            .collect();
        for path in orphaned {
            self.remove_file_tasks(&path)?;
        }
        Ok(())
    }

    // ---- persistence ----

    /// Write the cache and stamps to the persistent store
    pub async fn save_cache(&self) -> IndexResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = PersistedIndex {
            cache: self.cache.read().clone(),
            stamps: self.stamps.read().clone(),
        };
        let value = serde_json::to_value(&snapshot)?;
        store.store(&self.config.indexing.cache_key, value).await?;
        debug!(manager = %self.core.id(), tasks = snapshot.cache.len(), "Task cache persisted");
        Ok(())
    }

    /// Restore a compatible persisted cache; returns whether one was used
    ///
    /// An incompatible or unreadable blob is discarded and the cache stays
    /// empty, leaving a full reindex to rebuild it.
    pub async fn load_cache(&self) -> IndexResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(envelope) = store.load(&self.config.indexing.cache_key).await? else {
            return Ok(false);
        };
        if !store.is_version_compatible(&envelope) {
            warn!(
                found = %envelope.format_version,
                expected = %store.format_version(),
                "Discarding incompatible task cache"
            );
            store.clear().await?;
            return Ok(false);
        }

        let mut restored: PersistedIndex = match envelope.decode() {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable task cache");
                return Ok(false);
            }
        };
        restored.cache.rebuild_indexes();
        let count = restored.cache.len();
        *self.cache.write() = restored.cache;
        *self.stamps.write() = restored.stamps;

        info!(manager = %self.core.id(), tasks = count, "Task cache restored");
        self.emit_tasks(TaskAction::CacheLoaded, None, Vec::new());
        Ok(true)
    }

    async fn handle_event(&self, event: ManagerEvent) {
        if !self.core.is_initialized() {
            return;
        }
        let Some(path) = event.path().map(str::to_string) else {
            return;
        };
        match event.kind {
            EventKind::FileCreated | EventKind::FileModified => self.on_file_updated(&path),
            EventKind::FileDeleted => {
                if let Err(e) = self.remove_file_tasks(&path) {
                    warn!(path = %path, error = %e, "Failed to drop tasks of deleted file");
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl DataManager for TaskDataManager {
    fn core(&self) -> &ManagerCore {
        &self.core
    }

    async fn initialize(&self) -> IndexResult<()> {
        let me = self.me.clone();
        let handle = self.core.bus().listen(
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

        if let Err(e) = self.load_cache().await {
            warn!(manager = %self.core.id(), error = %e, "Task cache unavailable, starting empty");
        }
        info!(
            manager = %self.core.id(),
            executor = self.executor.name(),
            tasks = self.task_count(),
            "Task manager ready"
        );
        Ok(())
    }

    async fn cleanup(&self) -> IndexResult<()> {
        let saved = self.save_cache().await;
        self.cache.write().clear();
        self.stamps.write().clear();
        self.in_flight.lock().clear();
        saved
    }

    fn memory_stats(&self) -> MemoryStats {
        let cache = self.cache.read();
        self.core.stats(cache.len(), cache.estimated_size())
    }

    /// Drop tasks of untracked files, then persist
    async fn perform_memory_cleanup(&self) -> IndexResult<()> {
        if self.files.is_initialized() {
            let tracked = self.files.get_all_cached_files()?;
            self.prune_untracked(&tracked)?;
        }
        self.save_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ManagerLifecycle;
    use crate::task::InProcessExecutor;
    use crate::vault::MemoryVault;
    use taskgenius_cache::{MemoryStorage, VersionedStore};

    struct Fixture {
        vault: Arc<MemoryVault>,
        files: Arc<FileDataManager>,
        projects: Arc<ProjectDataManager>,
        tasks: Arc<TaskDataManager>,
    }

    async fn fixture(seed: &[(&str, &str)], store: Option<Arc<dyn PersistentStore>>) -> Fixture {
        let vault = Arc::new(MemoryVault::new());
        for (path, content) in seed {
            vault.insert(*path, *content, 1);
        }
        let config = Arc::new(IndexConfig::default());
        let bus = EventBus::new();
        let files = FileDataManager::new("files", config.clone(), vault.clone(), bus.clone());
        let projects = ProjectDataManager::new("projects", config.clone(), files.clone(), bus.clone());
        let tasks = TaskDataManager::new("tasks", config, files.clone(), projects.clone(), store, bus);
        files.load().await.unwrap();
        projects.load().await.unwrap();
        tasks.load().await.unwrap();
        Fixture {
            vault,
            files,
            projects,
            tasks,
        }
    }

    fn memory_store(version: &str, storage: Arc<MemoryStorage>) -> Arc<dyn PersistentStore> {
        Arc::new(VersionedStore::new(storage, version))
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_reparsed() {
        let f = fixture(&[("a.md", "- [ ] one\n")], None).await;
        let first = f.tasks.index_file("a.md").await.unwrap();
        let second = f.tasks.index_file("a.md").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.tasks.parse_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidation_forces_reparse() {
        let f = fixture(&[("a.md", "- [ ] one\n")], None).await;
        f.tasks.index_file("a.md").await.unwrap();
        f.tasks.on_project_data_updated("a.md");
        f.tasks.index_file("a.md").await.unwrap();
        assert_eq!(f.tasks.parse_count(), 2);
    }

    #[tokio::test]
    async fn test_same_second_edit_is_detected_by_hash() {
        let f = fixture(&[("a.md", "- [ ] one\n")], None).await;
        f.tasks.index_file("a.md").await.unwrap();

        // Same-granularity mtime, different content: must not be skipped
        let indexed_at = f.tasks.stamp("a.md").unwrap().indexed_at;
        f.vault.insert("a.md", "- [ ] one\n- [ ] two\n", indexed_at);
        let tasks = f.tasks.index_file("a.md").await.unwrap();
        assert_eq!(tasks.len(), 2);

        // Same window, same content: short-circuits on the hash
        let indexed_at = f.tasks.stamp("a.md").unwrap().indexed_at;
        f.vault.insert("a.md", "- [ ] one\n- [ ] two\n", indexed_at);
        f.tasks.index_file("a.md").await.unwrap();
        assert_eq!(f.tasks.parse_count(), 2);
    }

    #[tokio::test]
    async fn test_diff_on_reparse() {
        let f = fixture(&[("a.md", "- [ ] A #alpha\n- [ ] B\n")], None).await;
        f.tasks.index_file("a.md").await.unwrap();
        let a_id = Task::markdown_id("a.md", 0);
        assert!(f.tasks.get_task_by_id(&a_id).unwrap().is_some());

        f.vault.insert("a.md", "- [ ] B\n- [ ] C\n", now_millis() + 10_000);
        let tasks = f.tasks.index_file("a.md").await.unwrap();
        let contents: Vec<&str> = tasks.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["B", "C"]);
        assert!(f.tasks.get_tasks_by_tag("alpha").unwrap().is_empty());
        assert!(f.tasks.is_cache_consistent());
    }

    #[tokio::test]
    async fn test_concurrent_parse_runs_once() {
        let f = fixture(&[("a.md", "- [ ] one\n")], None).await;
        let (a, b) = tokio::join!(f.tasks.parse_file("a.md"), f.tasks.parse_file("a.md"));
        a.unwrap();
        b.unwrap();
        assert_eq!(f.tasks.parse_count(), 1);
        // Guard released afterwards
        f.tasks.invalidate_all();
        f.tasks.parse_file("a.md").await.unwrap();
        assert_eq!(f.tasks.parse_count(), 2);
    }

    /// Parses in process after a fixed delay
    struct SlowExecutor {
        inner: InProcessExecutor,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl ParseExecutor for SlowExecutor {
        async fn parse(
            &self,
            content: String,
            ctx: ParseContext,
        ) -> IndexResult<taskgenius_parsers::ParseOutput> {
            tokio::time::sleep(self.delay).await;
            self.inner.parse(content, ctx).await
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_file_deleted_mid_parse_leaves_no_tasks() {
        let vault = Arc::new(MemoryVault::new());
        vault.insert("a.md", "- [ ] ghost\n", 1);
        let config = Arc::new(IndexConfig::default());
        let bus = EventBus::new();
        let files = FileDataManager::new("files", config.clone(), vault.clone(), bus.clone());
        let projects = ProjectDataManager::new("projects", config.clone(), files.clone(), bus.clone());
        let executor = Arc::new(SlowExecutor {
            inner: InProcessExecutor::new(Arc::new(config.parsing.clone())),
            delay: std::time::Duration::from_millis(200),
        });
        let tasks = TaskDataManager::with_executor(
            "tasks",
            config,
            files.clone(),
            projects.clone(),
            None,
            executor,
            bus,
        );
        files.load().await.unwrap();
        projects.load().await.unwrap();
        tasks.load().await.unwrap();

        let (parsed, _) = tokio::join!(tasks.parse_file("a.md"), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(vault.remove("a.md"));
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(!files.is_file_cached("a.md").unwrap());
        });

        assert!(parsed.unwrap().is_empty());
        assert!(tasks.get_tasks(None).unwrap().is_empty());
        assert!(tasks.stamp("a.md").is_none());
        assert!(tasks.is_cache_consistent());

        // A later file at the same path indexes normally
        vault.insert("a.md", "- [ ] back\n", now_millis() + 10_000);
        let back = tasks.index_file("a.md").await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].content, "back");
    }

    #[tokio::test]
    async fn test_update_and_delete_emit() {
        let f = fixture(&[("a.md", "- [ ] one\n")], None).await;
        let mut rx = f.files.core().bus().subscribe();
        let mut task = f.tasks.index_file("a.md").await.unwrap().remove(0);
        task.metadata.priority = Some(5);
        f.tasks.update_task(task.clone()).unwrap();
        assert_eq!(f.tasks.get_tasks_by_priority(5).unwrap().len(), 1);

        f.tasks.delete_task(&task.id).unwrap();
        assert!(f.tasks.get_tasks(None).unwrap().is_empty());
        assert!(matches!(
            f.tasks.delete_task(&task.id),
            Err(IndexError::TaskNotFound { .. })
        ));

        let mut actions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(action) = event.task_action() {
                actions.push(action);
            }
        }
        assert_eq!(
            actions,
            vec![TaskAction::FileIndexed, TaskAction::TaskUpdated, TaskAction::TaskDeleted]
        );
    }

    #[tokio::test]
    async fn test_index_all_prunes_untracked_files() {
        let f = fixture(&[("a.md", "- [ ] one\n"), ("b.md", "- [ ] two\n")], None).await;
        assert_eq!(f.tasks.index_all_files().await.unwrap(), 2);
        assert_eq!(f.tasks.task_count(), 2);

        let mut ghost = f.tasks.get_task_by_id(&Task::markdown_id("a.md", 0)).unwrap().unwrap();
        ghost.id = "gone.md-L0".to_string();
        ghost.file_path = "gone.md".to_string();
        f.tasks.update_task(ghost).unwrap();
        assert_eq!(f.tasks.task_count(), 3);

        f.tasks.index_all_files().await.unwrap();
        assert_eq!(f.tasks.task_count(), 2);
    }

    #[tokio::test]
    async fn test_inherits_project_from_config_file() {
        let f = fixture(
            &[
                ("work/project.md", "---\nproject: Apollo\n---\n"),
                ("work/plan.md", "- [ ] ship it\n"),
            ],
            None,
        )
        .await;
        f.tasks.index_file("work/plan.md").await.unwrap();
        let tasks = f.tasks.get_tasks_by_project("Apollo").unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(f.projects.is_initialized());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let storage = Arc::new(MemoryStorage::new());
        let seed = [("a.md", "- [ ] one #tag\n")];
        let f = fixture(&seed, Some(memory_store(CACHE_FORMAT_VERSION, storage.clone()))).await;
        f.tasks.index_all_files().await.unwrap();
        f.tasks.unload().await;

        let g = fixture(&seed, Some(memory_store(CACHE_FORMAT_VERSION, storage))).await;
        assert_eq!(g.tasks.task_count(), 1);
        assert_eq!(g.tasks.get_tasks_by_tag("#tag").unwrap().len(), 1);
        assert!(g.tasks.is_cache_consistent());

        // Restored stamps keep the unchanged file from being parsed again
        g.tasks.index_all_files().await.unwrap();
        assert_eq!(g.tasks.parse_count(), 0);
    }

    #[tokio::test]
    async fn test_incompatible_cache_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        let seed = [("a.md", "- [ ] one\n")];
        let f = fixture(&seed, Some(memory_store("0", storage.clone()))).await;
        f.tasks.index_all_files().await.unwrap();
        f.tasks.unload().await;

        let g = fixture(&seed, Some(memory_store(CACHE_FORMAT_VERSION, storage))).await;
        assert_eq!(g.tasks.task_count(), 0);
        g.tasks.index_all_files().await.unwrap();
        assert_eq!(g.tasks.task_count(), 1);
    }

    #[tokio::test]
    async fn test_api_fails_after_unload() {
        let f = fixture(&[], None).await;
        f.tasks.unload().await;
        assert!(f.tasks.get_tasks(None).unwrap_err().is_not_initialized());
        assert!(f.tasks.index_file("a.md").await.unwrap_err().is_not_initialized());
    }
}
