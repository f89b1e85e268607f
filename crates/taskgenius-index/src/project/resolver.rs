//! Project identity resolution
//!
//! Resolution order for a file:
//!
//! 1. enabled path mappings (longest matching prefix wins)
//! 2. the nearest project config file in the file's folder, or in any
//!    ancestor when `search_recursively` is set
//! 3. the file's own front-matter key (`project` by default)
//! 4. the default naming strategy

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use taskgenius_parsers::{ProjectIdentity, ProjectSource};
use tracing::debug;

use crate::config::{DefaultNaming, ProjectsConfig};
use crate::error::IndexResult;
use crate::file_manager::FileDataManager;

/// Metadata dictionary keyed by front-matter field
pub type MetadataMap = Map<String, Value>;

/// Project lookups consumed by the project manager
#[async_trait]
pub trait ProjectConfigResolver: Send + Sync {
    async fn determine_project(&self, path: &str) -> IndexResult<Option<ProjectIdentity>>;

    /// Inherited project config merged with the file's own front-matter,
    /// then with the configured key mappings applied
    async fn get_enhanced_metadata(&self, path: &str) -> IndexResult<MetadataMap>;

    /// Front-matter of the config file governing `path`
    async fn get_project_config(&self, path: &str) -> IndexResult<Option<MetadataMap>>;

    /// Forget cached lookups for one path (or a config file's subtree), or all
    fn clear_cache(&self, path: Option<&str>);

    fn is_config_file(&self, path: &str) -> bool;

    /// Whether a config file at `config_path` governs `path`
    fn config_governs(&self, config_path: &str, path: &str) -> bool;
}

/// Parent folder of a vault path, `""` for the vault root
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn file_stem(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn folder_name(dir: &str) -> Option<String> {
    dir.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct ConfigFile {
    path: String,
    fields: MetadataMap,
}

/// Resolver reading project config files and front-matter from the vault
pub struct VaultProjectResolver {
    config: ProjectsConfig,
    files: Arc<FileDataManager>,
    projects: RwLock<HashMap<String, Option<ProjectIdentity>>>,
    // Folder -> nearest governing config file
    config_files: RwLock<HashMap<String, Option<ConfigFile>>>,
}

impl VaultProjectResolver {
    pub fn new(config: ProjectsConfig, files: Arc<FileDataManager>) -> Self {
        Self {
            config,
            files,
            projects: RwLock::new(HashMap::new()),
            config_files: RwLock::new(HashMap::new()),
        }
    }

    fn from_path_mapping(&self, path: &str) -> Option<ProjectIdentity> {
        self.config
            .path_mappings
            .iter()
            .filter(|m| m.enabled && !m.project_name.trim().is_empty())
            .filter(|m| {
                let folder = m.path_pattern.trim_matches('/');
                !folder.is_empty()
                    && (path == folder || path.starts_with(&format!("{}/", folder)))
            })
            .max_by_key(|m| m.path_pattern.len())
            .map(|m| ProjectIdentity {
                name: m.project_name.clone(),
                source: ProjectSource::PathMapping,
                source_path: Some(m.path_pattern.clone()),
                read_only: true,
            })
    }

    /// Nearest config file for a folder, memoized per folder
    async fn config_file_for_dir(&self, dir: &str) -> IndexResult<Option<ConfigFile>> {
        if let Some(cached) = self.config_files.read().get(dir) {
            return Ok(cached.clone());
        }

        let mut current = dir.to_string();
        let found = loop {
            let candidate = join(&current, &self.config.config_file_name);
            if let Some(frontmatter) = self.files.load_frontmatter(&candidate).await? {
                break Some(ConfigFile {
                    path: candidate,
                    fields: frontmatter.fields,
                });
            }
            if !self.config.search_recursively || current.is_empty() {
                break None;
            }
            current = parent_dir(&current).to_string();
        };

        self.config_files
            .write()
            .insert(dir.to_string(), found.clone());
        Ok(found)
    }

    fn project_from_config_file(&self, config: &ConfigFile) -> Option<ProjectIdentity> {
        let name = config
            .fields
            .get(&self.config.metadata_key)
            .or_else(|| config.fields.get("name"))
            .and_then(scalar)
            .or_else(|| folder_name(parent_dir(&config.path)))
            .or_else(|| file_stem(&config.path))?;
        Some(ProjectIdentity {
            name,
            source: ProjectSource::ConfigFile,
            source_path: Some(config.path.clone()),
            read_only: true,
        })
    }

    async fn resolve(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        if !self.config.enabled {
            return Ok(None);
        }
        if let Some(identity) = self.from_path_mapping(path) {
            return Ok(Some(identity));
        }

        // A config file describes its folder, it does not belong to itself
        if !self.is_config_file(path) {
            if let Some(config) = self.config_file_for_dir(parent_dir(path)).await? {
                if let Some(identity) = self.project_from_config_file(&config) {
                    return Ok(Some(identity));
                }
            }
        }

        let frontmatter = self.files.load_frontmatter(path).await?.unwrap_or_default();
        let from_metadata = frontmatter
            .get(&self.config.metadata_key)
            .and_then(scalar)
            .map(|name| ProjectIdentity {
                name,
                source: ProjectSource::Metadata,
                source_path: Some(path.to_string()),
                read_only: false,
            });
        if from_metadata.is_some() {
            return Ok(from_metadata);
        }

        let default_name = match self.config.default_naming {
            DefaultNaming::None | DefaultNaming::Metadata => None,
            DefaultNaming::Filename => file_stem(path),
            DefaultNaming::Foldername => folder_name(parent_dir(path)),
        };
        Ok(default_name.map(|name| ProjectIdentity {
            name,
            source: ProjectSource::Default,
            source_path: None,
            read_only: true,
        }))
    }
}

#[async_trait]
impl ProjectConfigResolver for VaultProjectResolver {
    async fn determine_project(&self, path: &str) -> IndexResult<Option<ProjectIdentity>> {
        if let Some(cached) = self.projects.read().get(path) {
            return Ok(cached.clone());
        }
        let identity = self.resolve(path).await?;
        debug!(path, project = ?identity.as_ref().map(|p| &p.name), "Resolved project");
        self.projects
            .write()
            .insert(path.to_string(), identity.clone());
        Ok(identity)
    }

    async fn get_enhanced_metadata(&self, path: &str) -> IndexResult<MetadataMap> {
        let mut merged = if self.is_config_file(path) {
            MetadataMap::new()
        } else {
            self.get_project_config(path).await?.unwrap_or_default()
        };

        let own = self.files.load_frontmatter(path).await?.unwrap_or_default();
        for (key, value) in own.fields {
            merged.insert(key, value);
        }

        for mapping in self.config.metadata_mappings.iter().filter(|m| m.enabled) {
            if mapping.target_key.is_empty() {
                continue;
            }
            if let Some(value) = merged.get(&mapping.source_key).cloned() {
                merged.insert(mapping.target_key.clone(), value);
            }
        }
        Ok(merged)
    }

    async fn get_project_config(&self, path: &str) -> IndexResult<Option<MetadataMap>> {
        Ok(self
            .config_file_for_dir(parent_dir(path))
            .await?
            .map(|config| config.fields))
    }

    fn clear_cache(&self, path: Option<&str>) {
        let Some(path) = path else {
            self.projects.write().clear();
            self.config_files.write().clear();
            return;
        };

        if self.is_config_file(path) {
            self.config_files
                .write()
                .retain(|dir, _| !self.config_governs(path, &join(dir, "_")));
            self.projects
                .write()
                .retain(|file, _| file != path && !self.config_governs(path, file));
        } else {
            self.projects.write().remove(path);
        }
    }

    fn is_config_file(&self, path: &str) -> bool {
        path.rsplit('/').next() == Some(self.config.config_file_name.as_str())
    }

    fn config_governs(&self, config_path: &str, path: &str) -> bool {
        let dir = parent_dir(config_path);
        let file_dir = parent_dir(path);
        if self.config.search_recursively {
            dir.is_empty() || file_dir == dir || file_dir.starts_with(&format!("{}/", dir))
        } else {
            file_dir == dir
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, MetadataMapping, PathMapping};
    use crate::events::EventBus;
    use crate::lifecycle::ManagerLifecycle;
    use crate::vault::MemoryVault;

    async fn resolver_with(
        files: &[(&str, &str)],
        configure: impl FnOnce(&mut ProjectsConfig),
    ) -> VaultProjectResolver {
        let vault = Arc::new(MemoryVault::new());
        for (path, content) in files {
            vault.insert(*path, *content, 1);
        }
        let mut config = IndexConfig::default();
        configure(&mut config.projects);
        let projects = config.projects.clone();
        let manager = FileDataManager::new("files", Arc::new(config), vault, EventBus::new());
        manager.load().await.unwrap();
        VaultProjectResolver::new(projects, manager)
    }

    #[tokio::test]
    async fn test_config_file_in_ancestor() {
        let resolver = resolver_with(
            &[
                ("Work/project.md", "---\nproject: Apollo\nowner: sam\n---\n"),
                ("Work/sub/deep/a.md", "- [ ] t"),
            ],
            |_| {},
        )
        .await;

        let identity = resolver.determine_project("Work/sub/deep/a.md").await.unwrap().unwrap();
        assert_eq!(identity.name, "Apollo");
        assert_eq!(identity.source, ProjectSource::ConfigFile);
        assert_eq!(identity.source_path.as_deref(), Some("Work/project.md"));

        let enhanced = resolver.get_enhanced_metadata("Work/sub/deep/a.md").await.unwrap();
        assert_eq!(enhanced.get("owner"), Some(&Value::String("sam".into())));
    }

    #[tokio::test]
    async fn test_non_recursive_only_checks_own_folder() {
        let resolver = resolver_with(
            &[
                ("Work/project.md", "---\nproject: Apollo\n---\n"),
                ("Work/sub/a.md", "- [ ] t"),
                ("Work/b.md", "- [ ] t"),
            ],
            |p| p.search_recursively = false,
        )
        .await;

        assert!(resolver.determine_project("Work/sub/a.md").await.unwrap().is_none());
        assert_eq!(
            resolver.determine_project("Work/b.md").await.unwrap().unwrap().name,
            "Apollo"
        );
        assert!(!resolver.config_governs("Work/project.md", "Work/sub/a.md"));
        assert!(resolver.config_governs("Work/project.md", "Work/b.md"));
    }

    #[tokio::test]
    async fn test_path_mapping_wins_and_longest_prefix() {
        let resolver = resolver_with(
            &[
                ("Work/project.md", "---\nproject: Apollo\n---\n"),
                ("Work/Clients/a.md", "- [ ] t"),
            ],
            |p| {
                p.path_mappings = vec![
                    PathMapping {
                        path_pattern: "Work/".into(),
                        project_name: "Job".into(),
                        enabled: true,
                    },
                    PathMapping {
                        path_pattern: "Work/Clients/".into(),
                        project_name: "Clients".into(),
                        enabled: true,
                    },
                ];
            },
        )
        .await;
        let identity = resolver.determine_project("Work/Clients/a.md").await.unwrap().unwrap();
        assert_eq!(identity.name, "Clients");
        assert_eq!(identity.source, ProjectSource::PathMapping);
    }

    #[tokio::test]
    async fn test_path_mapping_stops_at_folder_boundary() {
        let resolver = resolver_with(
            &[
                ("Work/a.md", "- [ ] t"),
                ("Workshop/a.md", "- [ ] t"),
                ("Projects/A/x.md", "- [ ] t"),
                ("Projects/AB/x.md", "- [ ] t"),
            ],
            |p| {
                p.path_mappings = vec![
                    PathMapping {
                        path_pattern: "Work".into(),
                        project_name: "Job".into(),
                        enabled: true,
                    },
                    PathMapping {
                        path_pattern: "Projects/A/".into(),
                        project_name: "Alpha".into(),
                        enabled: true,
                    },
                ];
            },
        )
        .await;

        assert_eq!(resolver.determine_project("Work/a.md").await.unwrap().unwrap().name, "Job");
        assert!(resolver.determine_project("Workshop/a.md").await.unwrap().is_none());
        assert_eq!(
            resolver.determine_project("Projects/A/x.md").await.unwrap().unwrap().name,
            "Alpha"
        );
        assert!(resolver.determine_project("Projects/AB/x.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_then_default_naming() {
        let resolver = resolver_with(
            &[
                ("Home/a.md", "---\nproject: Garden\n---\n"),
                ("Home/b.md", "- [ ] t"),
            ],
            |p| p.default_naming = DefaultNaming::Foldername,
        )
        .await;
        let a = resolver.determine_project("Home/a.md").await.unwrap().unwrap();
        assert_eq!((a.name.as_str(), a.source), ("Garden", ProjectSource::Metadata));
        let b = resolver.determine_project("Home/b.md").await.unwrap().unwrap();
        assert_eq!((b.name.as_str(), b.source), ("Home", ProjectSource::Default));
    }

    #[tokio::test]
    async fn test_metadata_mappings_and_file_override() {
        let resolver = resolver_with(
            &[
                ("P/project.md", "---\nproject: X\nstatus: active\n---\n"),
                ("P/a.md", "---\nstatus: paused\ndue: 2024-01-01\n---\n"),
            ],
            |p| {
                p.metadata_mappings = vec![MetadataMapping {
                    source_key: "due".into(),
                    target_key: "dueDate".into(),
                    enabled: true,
                }];
            },
        )
        .await;
        let enhanced = resolver.get_enhanced_metadata("P/a.md").await.unwrap();
        assert_eq!(enhanced.get("status"), Some(&Value::String("paused".into())));
        assert_eq!(enhanced.get("dueDate"), enhanced.get("due"));
        assert_eq!(enhanced.get("project"), Some(&Value::String("X".into())));
    }

    #[tokio::test]
    async fn test_clear_cache_for_config_drops_subtree() {
        let resolver = resolver_with(
            &[
                ("W/project.md", "---\nproject: A\n---\n"),
                ("W/x/a.md", ""),
                ("Other/b.md", ""),
            ],
            |_| {},
        )
        .await;
        resolver.determine_project("W/x/a.md").await.unwrap();
        resolver.determine_project("Other/b.md").await.unwrap();
        assert_eq!(resolver.projects.read().len(), 2);

        resolver.clear_cache(Some("W/project.md"));
        let projects = resolver.projects.read();
        assert!(!projects.contains_key("W/x/a.md"));
        assert!(projects.contains_key("Other/b.md"));
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("a/b/c.md"), "a/b");
        assert_eq!(parent_dir("c.md"), "");
    }
}
