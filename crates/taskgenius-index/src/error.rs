//! Error types for the task index

use taskgenius_cache::CacheError;
use taskgenius_parsers::ParserError;
use thiserror::Error;

/// Index and manager errors
#[derive(Debug, Error)]
pub enum IndexError {
    /// An API was called before `load()` completed or after `unload()`
    #[error("{manager} is not initialized")]
    NotInitialized { manager: String },

    #[error("{manager} failed to initialize: {message}")]
    InitializationFailed { manager: String, message: String },

    #[error("Vault error for {path}: {message}")]
    Vault { path: String, message: String },

    #[error("Parse error: {0}")]
    Parse(#[from] ParserError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IndexError {
    pub fn not_initialized(manager: impl Into<String>) -> Self {
        Self::NotInitialized {
            manager: manager.into(),
        }
    }

    pub fn vault(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Vault {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this is the fail-fast lifecycle error
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized { .. })
    }
}

/// Result type for index operations
pub type IndexResult<T> = std::result::Result<T, IndexError>;
