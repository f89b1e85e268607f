//! Vault access
//!
//! The managers never touch the filesystem directly. They go through a
//! [`VaultAdapter`], which lists files, reads them and reports changes.
//! [`FsVault`] serves a directory on disk; [`MemoryVault`] keeps everything in
//! memory with caller-controlled modification times.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use taskgenius_parsers::dates::now_millis;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::{IndexError, IndexResult};

const VAULT_CHANNEL_CAPACITY: usize = 1024;

/// Size and modification time of a vault file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    /// Vault-relative path with `/` separators
    pub path: String,
    /// Milliseconds since the Unix epoch
    pub mtime: i64,
    pub size: u64,
}

impl FileStat {
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }
}

/// Lower-cased extension of a vault path, empty when there is none
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// Change notification from the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEvent {
    pub kind: VaultEventKind,
    pub path: String,
    /// Previous path of a rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl VaultEvent {
    pub fn new(kind: VaultEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: VaultEventKind::Renamed,
            path: to.into(),
            old_path: Some(from.into()),
        }
    }
}

/// Host file access used by the managers
#[async_trait]
pub trait VaultAdapter: Send + Sync {
    /// Every file in the vault
    async fn list_files(&self) -> IndexResult<Vec<FileStat>>;

    /// Stat one file; `None` when it does not exist
    async fn stat(&self, path: &str) -> IndexResult<Option<FileStat>>;

    async fn read(&self, path: &str) -> IndexResult<String>;

    /// Receive future change events
    fn subscribe(&self) -> broadcast::Receiver<VaultEvent>;
}

/// Vault rooted at a directory on disk
pub struct FsVault {
    root: PathBuf,
    sender: broadcast::Sender<VaultEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FsVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let (sender, _) = broadcast::channel(VAULT_CHANNEL_CAPACITY);
        Self {
            root: root.as_ref().to_path_buf(),
            sender,
            watcher: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> IndexResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(IndexError::vault(path, "path must stay inside the vault"));
        }
        Ok(self.root.join(relative))
    }

    fn start_watcher(&self) {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return;
        }

        let sender = self.sender.clone();
        let root = self.root.clone();
        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for vault_event in translate_event(&root, &event) {
                        let _ = sender.send(vault_event);
                    }
                }
                Err(e) => {
                    error!("File watching error: {}", e);
                }
            },
            notify::Config::default(),
        );

        match watcher {
            Ok(mut watcher) => match watcher.watch(&self.root, RecursiveMode::Recursive) {
                Ok(()) => {
                    debug!(root = %self.root.display(), "Watching vault");
                    *slot = Some(watcher);
                }
                Err(e) => warn!(root = %self.root.display(), error = %e, "Could not watch vault"),
            },
            Err(e) => warn!(error = %e, "Could not create vault watcher"),
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn translate_event(root: &Path, event: &notify::Event) -> Vec<VaultEvent> {
    let paths: Vec<String> = event
        .paths
        .iter()
        .filter_map(|p| relative_path(root, p))
        .collect();

    let kind = match event.kind {
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            return vec![VaultEvent::renamed(paths[0].clone(), paths[1].clone())];
        }
        NotifyKind::Modify(ModifyKind::Name(RenameMode::From)) => VaultEventKind::Deleted,
        NotifyKind::Modify(ModifyKind::Name(RenameMode::To)) => VaultEventKind::Created,
        NotifyKind::Create(_) => VaultEventKind::Created,
        NotifyKind::Modify(_) => VaultEventKind::Modified,
        NotifyKind::Remove(_) => VaultEventKind::Deleted,
        _ => return Vec::new(),
    };
    paths
        .into_iter()
        .map(|path| VaultEvent::new(kind, path))
        .collect()
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

#[async_trait]
impl VaultAdapter for FsVault {
    async fn list_files(&self) -> IndexResult<Vec<FileStat>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let path = relative_path(&root, entry.path())?;
                    let metadata = entry.metadata().ok()?;
                    Some(FileStat {
                        path,
                        mtime: mtime_millis(&metadata),
                        size: metadata.len(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| IndexError::vault(self.root.display().to_string(), e))?;
        Ok(files)
    }

    async fn stat(&self, path: &str) -> IndexResult<Option<FileStat>> {
        let absolute = self.absolute(path)?;
        match tokio::fs::metadata(&absolute).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(FileStat {
                path: path.to_string(),
                mtime: mtime_millis(&metadata),
                size: metadata.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IndexError::vault(path, e)),
        }
    }

    async fn read(&self, path: &str) -> IndexResult<String> {
        let absolute = self.absolute(path)?;
        tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| IndexError::vault(path, e))
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        let receiver = self.sender.subscribe();
        self.start_watcher();
        receiver
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    mtime: i64,
}

/// In-memory vault for embedders and tests
///
/// Writes, removals and renames emit the same events a watched directory
/// would. Modification times are whatever the caller says they are.
pub struct MemoryVault {
    files: RwLock<HashMap<String, MemoryFile>>,
    sender: broadcast::Sender<VaultEvent>,
    reads: AtomicUsize,
}

impl MemoryVault {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(VAULT_CHANNEL_CAPACITY);
        Self {
            files: RwLock::new(HashMap::new()),
            sender,
            reads: AtomicUsize::new(0),
        }
    }

    /// Add a file without emitting an event, for seeding before load
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>, mtime: i64) {
        self.files.write().insert(
            path.into(),
            MemoryFile {
                content: content.into(),
                mtime,
            },
        );
    }

    /// Create or overwrite a file stamped with the current time
    pub fn write(&self, path: &str, content: impl Into<String>) {
        self.write_with_mtime(path, content, now_millis());
    }

    pub fn write_with_mtime(&self, path: &str, content: impl Into<String>, mtime: i64) {
        let existed = self
            .files
            .write()
            .insert(
                path.to_string(),
                MemoryFile {
                    content: content.into(),
                    mtime,
                },
            )
            .is_some();
        let kind = if existed {
            VaultEventKind::Modified
        } else {
            VaultEventKind::Created
        };
        let _ = self.sender.send(VaultEvent::new(kind, path));
    }

    pub fn remove(&self, path: &str) -> bool {
        let removed = self.files.write().remove(path).is_some();
        if removed {
            let _ = self.sender.send(VaultEvent::new(VaultEventKind::Deleted, path));
        }
        removed
    }

    pub fn rename(&self, from: &str, to: &str) -> bool {
        let moved = {
            let mut files = self.files.write();
            match files.remove(from) {
                Some(file) => {
                    files.insert(to.to_string(), file);
                    true
                }
                None => false,
            }
        };
        if moved {
            let _ = self.sender.send(VaultEvent::renamed(from, to));
        }
        moved
    }

    /// Number of `read` calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultAdapter for MemoryVault {
    async fn list_files(&self) -> IndexResult<Vec<FileStat>> {
        let mut files: Vec<FileStat> = self
            .files
            .read()
            .iter()
            .map(|(path, file)| FileStat {
                path: path.clone(),
                mtime: file.mtime,
                size: file.content.len() as u64,
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn stat(&self, path: &str) -> IndexResult<Option<FileStat>> {
        Ok(self.files.read().get(path).map(|file| FileStat {
            path: path.to_string(),
            mtime: file.mtime,
            size: file.content.len() as u64,
        }))
    }

    async fn read(&self, path: &str) -> IndexResult<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .read()
            .get(path)
            .map(|file| file.content.clone())
            .ok_or_else(|| IndexError::vault(path, "file not found"))
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_vault_events() {
        let vault = MemoryVault::new();
        let mut events = vault.subscribe();

        vault.write_with_mtime("a.md", "- [ ] one", 10);
        vault.write_with_mtime("a.md", "- [ ] two", 20);
        vault.rename("a.md", "b.md");
        vault.remove("b.md");

        let kinds: Vec<_> = (0..4).map(|_| events.try_recv().unwrap()).collect();
        assert_eq!(kinds[0].kind, VaultEventKind::Created);
        assert_eq!(kinds[1].kind, VaultEventKind::Modified);
        assert_eq!(kinds[2], VaultEvent::renamed("a.md", "b.md"));
        assert_eq!(kinds[3].kind, VaultEventKind::Deleted);
        assert!(vault.stat("b.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_vault_read_and_stat() {
        let vault = MemoryVault::new();
        vault.insert("x/y.md", "hello", 42);
        assert_eq!(vault.read("x/y.md").await.unwrap(), "hello");
        assert_eq!(vault.read_count(), 1);
        assert_eq!(vault.stat("x/y.md").await.unwrap().unwrap().mtime, 42);
        assert!(vault.read("missing.md").await.is_err());
    }

    #[tokio::test]
    async fn test_fs_vault_lists_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Projects/Apollo")).unwrap();
        std::fs::write(dir.path().join("Projects/Apollo/plan.md"), "- [ ] launch").unwrap();
        std::fs::write(dir.path().join("inbox.md"), "").unwrap();

        let vault = FsVault::new(dir.path());
        let mut paths: Vec<_> = vault
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["Projects/Apollo/plan.md", "inbox.md"]);

        let stat = vault.stat("Projects/Apollo/plan.md").await.unwrap().unwrap();
        assert_eq!(stat.size, 12);
        assert!(stat.mtime > 0);
        assert_eq!(vault.read("Projects/Apollo/plan.md").await.unwrap(), "- [ ] launch");
        assert!(vault.stat("nope.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_vault_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let vault = FsVault::new(dir.path());
        assert!(vault.read("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_translate_rename_event() {
        let root = Path::new("/vault");
        let event = notify::Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/vault/a.md"))
            .add_path(PathBuf::from("/vault/dir/b.md"));
        assert_eq!(
            translate_event(root, &event),
            vec![VaultEvent::renamed("a.md", "dir/b.md")]
        );
    }
}
