//! Parser error types and results

use std::fmt;
use thiserror::Error;

/// Parser operation errors
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Parse error in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML front-matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ParserError {
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for parser operations
pub type ParserResult<T> = std::result::Result<T, ParserError>;

/// Non-fatal issue raised while parsing one file
///
/// A parser that fails outright contributes no tasks; the failure is kept as a
/// warning so the remaining parsers for the same file still run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParserWarning {
    pub parser: String,
    pub message: String,
}

impl ParserWarning {
    pub fn new(parser: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            parser: parser.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParserWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.parser, self.message)
    }
}
