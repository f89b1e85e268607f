//! Parser configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Inline metadata syntax that wins when a line carries both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    /// Emoji markers such as `📅 2024-01-01`
    #[default]
    Tasks,
    /// Inline fields such as `[due:: 2024-01-01]`
    Dataview,
}

/// Settings for deriving one task per file from its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadataConfig {
    pub enabled: bool,
    /// Front-matter keys whose presence turns the file into a task
    pub task_fields: Vec<String>,
    /// Tags (with `#`) that turn the file into a task
    pub task_tags: Vec<String>,
    /// Front-matter key used as the task content, file stem otherwise
    pub content_field: String,
    /// Status mark used when the front-matter does not say
    pub default_status: String,
}

impl Default for FileMetadataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            task_fields: vec![
                "dueDate".to_string(),
                "todo".to_string(),
                "complete".to_string(),
                "task".to_string(),
            ],
            task_tags: vec![
                "#todo".to_string(),
                "#task".to_string(),
                "#action".to_string(),
                "#due".to_string(),
            ],
            content_field: "title".to_string(),
            default_status: " ".to_string(),
        }
    }
}

/// Parser configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Marks that mean "done"
    pub done_marks: Vec<String>,
    /// Named non-done marks (in progress, abandoned, planned, ...)
    pub status_marks: HashMap<String, String>,
    pub metadata_format: MetadataFormat,
    pub parse_tags: bool,
    pub parse_heading_context: bool,
    pub file_metadata: FileMetadataConfig,
    /// Map `.ics` files to the calendar parser
    pub enable_ics: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        let status_marks = [("/", "in-progress"), ("-", "abandoned"), ("?", "planned")]
            .into_iter()
            .map(|(mark, name)| (mark.to_string(), name.to_string()))
            .collect();
        Self {
            done_marks: vec!["x".to_string(), "X".to_string()],
            status_marks,
            metadata_format: MetadataFormat::default(),
            parse_tags: true,
            parse_heading_context: true,
            file_metadata: FileMetadataConfig::default(),
            enable_ics: false,
        }
    }
}

impl ParserConfig {
    /// Whether a raw status mark means the task is done
    pub fn is_done(&self, mark: &str) -> bool {
        self.done_marks.iter().any(|m| m == mark)
    }

    /// First configured done mark, used when a source only says "completed"
    pub fn done_mark(&self) -> &str {
        self.done_marks.first().map(String::as_str).unwrap_or("x")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_done_marks() {
        let config = ParserConfig::default();
        assert!(config.is_done("x"));
        assert!(config.is_done("X"));
        assert!(!config.is_done(" "));
        assert!(!config.is_done("/"));
        assert_eq!(config.done_mark(), "x");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ParserConfig = serde_yaml::from_str("done_marks: [\"v\"]").unwrap();
        assert!(config.is_done("v"));
        assert!(!config.is_done("x"));
        assert!(config.parse_tags);
        assert_eq!(config.status_marks.get("/").map(String::as_str), Some("in-progress"));
    }
}
