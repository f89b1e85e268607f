//! Index configuration
//!
//! Every section defaults sensibly, so a partial YAML or JSON document only
//! needs to name the values it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskgenius_parsers::ParserConfig;

use crate::error::{IndexError, IndexResult};

/// Periodic memory-cleanup thresholds shared by every manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub cleanup_interval_secs: u64,
    /// Entry count above which `perform_memory_cleanup` runs
    pub max_cache_size: usize,
    /// Estimated bytes above which `perform_memory_cleanup` runs
    pub memory_limit_bytes: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            max_cache_size: 1000,
            memory_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

impl LifecycleConfig {
    /// Timer period, never shorter than one second
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Which vault files are tracked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Extensions without the leading dot
    pub supported_extensions: Vec<String>,
    /// Skip files and folders whose name starts with `.`
    pub ignore_hidden: bool,
    /// Vault-relative folder prefixes never tracked
    pub ignored_folders: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            supported_extensions: vec!["md".to_string(), "canvas".to_string()],
            ignore_hidden: true,
            ignored_folders: Vec::new(),
        }
    }
}

/// Path prefix that pins every file below it to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathMapping {
    pub path_pattern: String,
    pub project_name: String,
    pub enabled: bool,
}

impl Default for PathMapping {
    fn default() -> Self {
        Self {
            path_pattern: String::new(),
            project_name: String::new(),
            enabled: true,
        }
    }
}

/// Copies a front-matter value to another key in enhanced metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataMapping {
    pub source_key: String,
    pub target_key: String,
    pub enabled: bool,
}

impl Default for MetadataMapping {
    fn default() -> Self {
        Self {
            source_key: String::new(),
            target_key: String::new(),
            enabled: true,
        }
    }
}

/// Fallback project naming when nothing else matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultNaming {
    #[default]
    None,
    /// File stem
    Filename,
    /// Name of the containing folder
    Foldername,
    /// Front-matter `metadata_key`, same as the metadata step
    Metadata,
}

/// Project resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub enabled: bool,
    pub config_file_name: String,
    /// Look for a config file in every ancestor, not just the file's folder
    pub search_recursively: bool,
    pub metadata_key: String,
    pub path_mappings: Vec<PathMapping>,
    pub metadata_mappings: Vec<MetadataMapping>,
    pub default_naming: DefaultNaming,
    pub enable_enhanced_metadata: bool,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config_file_name: "project.md".to_string(),
            search_recursively: true,
            metadata_key: "project".to_string(),
            path_mappings: Vec::new(),
            metadata_mappings: Vec::new(),
            default_naming: DefaultNaming::None,
            enable_enhanced_metadata: true,
        }
    }
}

/// Off-thread parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub use_workers: bool,
    pub max_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            use_workers: false,
            max_workers: cpus.saturating_sub(1).max(1),
        }
    }
}

/// Full scans and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Files parsed between cooperative yields during a full scan
    pub batch_size: usize,
    pub persist_debounce_ms: u64,
    /// Persistent store key for the task cache
    pub cache_key: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            persist_debounce_ms: 1000,
            cache_key: "task-cache".to_string(),
        }
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// Include target, thread ids, file and line in each record
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

/// Complete index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub lifecycle: LifecycleConfig,
    pub files: FilesConfig,
    pub projects: ProjectsConfig,
    pub parsing: ParserConfig,
    pub workers: WorkersConfig,
    pub indexing: IndexingConfig,
    pub logging: LoggingConfig,
}

impl IndexConfig {
    pub fn from_yaml_str(content: &str) -> IndexResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> IndexResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, choosing the format by extension
    pub fn load<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content),
            "json" => Self::from_json_str(&content),
            other => Err(IndexError::config(format!(
                "Unsupported config format '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.indexing.batch_size == 0 {
            return Err(IndexError::config("indexing.batch_size must be greater than 0"));
        }
        if self.lifecycle.cleanup_interval_secs == 0 {
            return Err(IndexError::config(
                "lifecycle.cleanup_interval_secs must be greater than 0",
            ));
        }
        if self.files.supported_extensions.is_empty() {
            return Err(IndexError::config("files.supported_extensions must not be empty"));
        }
        if self.indexing.cache_key.trim().is_empty() {
            return Err(IndexError::config("indexing.cache_key must not be empty"));
        }
        Ok(())
    }

    /// Extensions the file manager tracks, including `ics` when enabled
    pub fn tracked_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self
            .files
            .supported_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        if self.parsing.enable_ics && !extensions.iter().any(|e| e == "ics") {
            extensions.push("ics".to_string());
        }
        extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.lifecycle.cleanup_interval(), Duration::from_secs(300));
        let zero = LifecycleConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(zero.cleanup_interval(), Duration::from_secs(1));
        assert_eq!(config.lifecycle.max_cache_size, 1000);
        assert_eq!(config.lifecycle.memory_limit_bytes, 10 * 1024 * 1024);
        assert_eq!(config.indexing.batch_size, 50);
        assert!(!config.workers.use_workers);
        assert!(config.workers.max_workers >= 1);
        assert_eq!(config.projects.config_file_name, "project.md");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = IndexConfig::from_yaml_str(
            "indexing:\n  batch_size: 5\nprojects:\n  search_recursively: false\n  path_mappings:\n    - path_pattern: Work/\n      project_name: Work\n",
        )
        .unwrap();
        assert_eq!(config.indexing.batch_size, 5);
        assert_eq!(config.indexing.cache_key, "task-cache");
        assert!(!config.projects.search_recursively);
        assert!(config.projects.path_mappings[0].enabled);
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let err = IndexConfig::from_json_str(r#"{"indexing": {"batch_size": 0}}"#).unwrap_err();
        assert!(matches!(err, IndexError::Config { .. }));
    }

    #[test]
    fn test_load_by_extension() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug"}}}}"#).unwrap();
        let config = IndexConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        let toml = Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(IndexConfig::load(toml.path()).is_err());
    }

    #[test]
    fn test_tracked_extensions_include_ics_when_enabled() {
        let mut config = IndexConfig::default();
        assert_eq!(config.tracked_extensions(), vec!["md", "canvas"]);
        config.parsing.enable_ics = true;
        assert_eq!(config.tracked_extensions(), vec!["md", "canvas", "ics"]);
    }
}
