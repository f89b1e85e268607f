//! # TaskGenius Index
//!
//! Incremental task indexing over a vault of notes.
//!
//! ## Managers
//!
//! - [`FileDataManager`]: snapshot of every supported file (front-matter,
//!   mtime) fed by vault change notifications
//! - [`ProjectDataManager`]: per-file project identity and enhanced
//!   metadata, invalidated when a project config file changes
//! - [`TaskDataManager`]: the multi-index [`TaskCache`], parser dispatch,
//!   staleness checks and versioned persistence
//! - [`UnifiedDataParsingManager`]: owns the three above and exposes the
//!   public API
//!
//! All four share the [`DataManager`] / [`ManagerLifecycle`] contract and
//! talk to each other only through the [`EventBus`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use taskgenius_index::{IndexConfig, ManagerLifecycle, MemoryVault, UnifiedDataParsingManager};
//!
//! # tokio_test::block_on(async {
//! let vault = Arc::new(MemoryVault::new());
//! vault.insert("inbox.md", "- [ ] Call the plumber 📅 2024-05-01\n", 1);
//!
//! let index = UnifiedDataParsingManager::new("index", IndexConfig::default(), vault, None).unwrap();
//! index.load().await.unwrap();
//!
//! let tasks = index.get_tasks(None).await.unwrap();
//! assert_eq!(tasks[0].content, "Call the plumber");
//! index.unload().await;
//! # });
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod file_manager;
pub mod lifecycle;
pub mod logging;
pub mod project;
pub mod task;
pub mod unified;
pub mod vault;

pub use config::{
    DefaultNaming, FilesConfig, IndexConfig, IndexingConfig, LifecycleConfig, LoggingConfig,
    MetadataMapping, PathMapping, ProjectsConfig, WorkersConfig,
};
pub use error::{IndexError, IndexResult};
pub use events::{EventBus, EventKind, EventPayload, ManagerEvent, TaskAction};
pub use file_manager::{FileDataManager, FileInfo};
pub use lifecycle::{DataManager, ManagerCore, ManagerLifecycle, MemoryStats};
pub use logging::init_tracing;
pub use project::{
    EnhancedMetadata, MetadataMap, ProjectConfigResolver, ProjectDataManager, VaultProjectResolver,
};
pub use task::{
    DateField, SortCriterion, SortField, SortOrder, TaskCache, TaskDataManager, TaskFilter,
    CACHE_FORMAT_VERSION,
};
pub use unified::{DetailedMemoryStats, IndexEvent, UnifiedDataParsingManager};
pub use vault::{FileStat, FsVault, MemoryVault, VaultAdapter, VaultEvent, VaultEventKind};
