//! End-to-end tests: vault on disk, persistent cache on disk, full façade

use std::sync::Arc;
use std::time::Duration;

use taskgenius_cache::{DiskStorage, PersistentStore, VersionedStore};
use taskgenius_index::{
    DataManager, EventBus, FileDataManager, FsVault, IndexConfig, ManagerLifecycle, MemoryVault,
    ProjectDataManager, SortCriterion, SortField, TaskDataManager, TaskFilter,
    UnifiedDataParsingManager, CACHE_FORMAT_VERSION,
};
use tempfile::TempDir;

fn disk_store(dir: &TempDir, version: &str) -> Arc<dyn PersistentStore> {
    let storage = Arc::new(DiskStorage::new(dir.path().join("cache")).with_compression(true));
    Arc::new(VersionedStore::new(storage, version))
}

fn write_note(vault: &TempDir, path: &str, content: &str) {
    let absolute = vault.path().join(path);
    if let Some(parent) = absolute.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(absolute, content).unwrap();
}

#[tokio::test]
async fn test_single_task_lifecycle_scenario() {
    let vault = Arc::new(MemoryVault::new());
    let mut config = IndexConfig::default();
    config.workers.use_workers = false;
    let config = Arc::new(config);
    let bus = EventBus::new();
    let files = FileDataManager::new("files", config.clone(), vault.clone(), bus.clone());
    let projects = ProjectDataManager::new("projects", config.clone(), files.clone(), bus.clone());
    let tasks = TaskDataManager::new("t1", config, files.clone(), projects.clone(), None, bus);
    files.load().await.unwrap();
    projects.load().await.unwrap();

    tasks.load().await.unwrap();
    assert!(tasks.is_initialized());
    assert_eq!(tasks.executor_name(), "in-process");
    assert!(tasks.get_tasks(None).unwrap().is_empty());

    vault.insert("inbox.md", "- [ ] Water the plants\n", 1);
    let indexed = tasks.index_file("inbox.md").await.unwrap();
    assert_eq!(indexed.len(), 1);
    let all = tasks.get_tasks(None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].content, "Water the plants");

    tasks.delete_task(&all[0].id).unwrap();
    assert!(tasks.get_tasks(None).unwrap().is_empty());

    tasks.unload().await;
    let err = tasks.get_tasks(None).unwrap_err();
    assert!(err.is_not_initialized());
    assert!(err.to_string().contains("not initialized"));
}

#[tokio::test]
async fn test_facade_reload_matches_fresh_index() {
    let vault = Arc::new(MemoryVault::new());
    vault.insert("a.md", "- [ ] one\n- [ ] two\n", 1);
    vault.insert("b.canvas", r#"{"nodes":[{"id":"n1","type":"text","text":"- [ ] card"}]}"#, 1);
    let mut config = IndexConfig::default();
    config.lifecycle.cleanup_interval_secs = 1;
    let unified = UnifiedDataParsingManager::new("unified", config, vault, None).unwrap();

    unified.load().await.unwrap();
    let fresh = unified.get_tasks(None).await.unwrap().len();
    assert_eq!(fresh, 3);

    // Let a cleanup tick come due, then tear down underneath it
    tokio::time::sleep(Duration::from_millis(1100)).await;
    unified.unload().await;
    unified.unload().await;
    assert!(!unified.is_ready());

    unified.load().await.unwrap();
    assert!(unified.is_ready());
    assert_eq!(unified.get_tasks(None).await.unwrap().len(), fresh);
    assert_eq!(unified.tasks().core().listener_count(), 1);
    assert_eq!(unified.core().listener_count(), 1);
}

#[tokio::test]
async fn test_disk_cache_survives_restart() {
    let vault_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_note(&vault_dir, "work/plan.md", "- [ ] draft 📅 2024-06-01 #writing\n- [x] research\n");
    write_note(&vault_dir, "home.md", "- [ ] groceries @store\n");

    let first = UnifiedDataParsingManager::new(
        "first",
        IndexConfig::default(),
        Arc::new(FsVault::new(vault_dir.path())),
        Some(disk_store(&cache_dir, CACHE_FORMAT_VERSION)),
    )
    .unwrap();
    first.load().await.unwrap();
    let mut before: Vec<String> = first
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    before.sort();
    first.unload().await;

    let second = UnifiedDataParsingManager::new(
        "second",
        IndexConfig::default(),
        Arc::new(FsVault::new(vault_dir.path())),
        Some(disk_store(&cache_dir, CACHE_FORMAT_VERSION)),
    )
    .unwrap();
    second.load().await.unwrap();
    let mut after: Vec<String> = second
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    after.sort();
    assert_eq!(before, after);
    assert_eq!(second.tasks().parse_count(), 0);
    assert_eq!(second.tasks().get_tasks_by_tag("writing").unwrap().len(), 1);
    assert!(second.tasks().is_cache_consistent());
    second.unload().await;
}

#[tokio::test]
async fn test_incompatible_disk_cache_triggers_full_reindex() {
    let vault_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_note(&vault_dir, "a.md", "- [ ] one\n");

    let old = UnifiedDataParsingManager::new(
        "old",
        IndexConfig::default(),
        Arc::new(FsVault::new(vault_dir.path())),
        Some(disk_store(&cache_dir, "0")),
    )
    .unwrap();
    old.load().await.unwrap();
    old.unload().await;

    let new = UnifiedDataParsingManager::new(
        "new",
        IndexConfig::default(),
        Arc::new(FsVault::new(vault_dir.path())),
        Some(disk_store(&cache_dir, CACHE_FORMAT_VERSION)),
    )
    .unwrap();
    new.load().await.unwrap();
    assert_eq!(new.tasks().parse_count(), 1);
    assert_eq!(new.get_tasks(None).await.unwrap().len(), 1);
    new.unload().await;
}

#[tokio::test]
async fn test_query_through_facade() {
    let vault = Arc::new(MemoryVault::new());
    vault.insert(
        "tasks.md",
        "- [ ] later 📅 2024-09-01\n- [ ] soon 📅 2024-02-01 ⏫\n- [ ] someday\n- [x] done 📅 2024-01-01\n",
        1,
    );
    let unified =
        UnifiedDataParsingManager::new("unified", IndexConfig::default(), vault, None).unwrap();

    let open = TaskFilter {
        completed: Some(false),
        ..Default::default()
    };
    let sorted = unified
        .query_tasks(&open, &[SortCriterion::asc(SortField::DueDate)])
        .await
        .unwrap();
    let contents: Vec<&str> = sorted.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["soon", "later", "someday"]);
    assert_eq!(unified.tasks().get_tasks_by_priority(4).unwrap().len(), 1);
}

#[tokio::test]
async fn test_config_file_drives_facade() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("index.yaml");
    std::fs::write(
        &config_path,
        "files:\n  supported_extensions: [md]\nindexing:\n  batch_size: 1\n",
    )
    .unwrap();
    let config = IndexConfig::load(&config_path).unwrap();

    let vault = Arc::new(MemoryVault::new());
    vault.insert("a.md", "- [ ] one\n", 1);
    vault.insert("b.md", "- [ ] two\n", 1);
    vault.insert("board.canvas", r#"{"nodes":[{"id":"n","type":"text","text":"- [ ] card"}]}"#, 1);
    let unified = UnifiedDataParsingManager::new("unified", config, vault, None).unwrap();
    assert_eq!(unified.index_all_files().await.unwrap(), 2);
    assert_eq!(unified.get_tasks(None).await.unwrap().len(), 2);
}
