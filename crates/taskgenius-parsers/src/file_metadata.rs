//! File-metadata parser
//!
//! Turns a whole note into a single task when its front-matter or tags mark
//! it as one.

use std::path::Path;

use serde_json::Value;

use crate::config::ParserConfig;
use crate::dates::parse_date;
use crate::frontmatter::FileFrontmatter;
use crate::markdown::parse_priority;
use crate::types::{SourceType, Task, TaskMetadata};

const DUE_KEYS: &[&str] = &["dueDate", "due"];
const START_KEYS: &[&str] = &["startDate", "start"];
const SCHEDULED_KEYS: &[&str] = &["scheduledDate", "scheduled"];
const COMPLETED_KEYS: &[&str] = &["completedDate", "completion"];

/// Parser producing at most one task per file
#[derive(Debug, Clone)]
pub struct FileMetadataTaskParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> FileMetadataTaskParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    /// Whether the file's metadata selects it as a task
    pub fn is_task_file(&self, frontmatter: &FileFrontmatter) -> bool {
        let cfg = &self.config.file_metadata;
        cfg.task_fields
            .iter()
            .any(|field| frontmatter.fields.contains_key(field))
            || cfg
                .task_tags
                .iter()
                .any(|tag| frontmatter.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
    }

    pub fn parse(&self, file_path: &str, frontmatter: &FileFrontmatter) -> Vec<Task> {
        if !self.config.file_metadata.enabled || !self.is_task_file(frontmatter) {
            return Vec::new();
        }

        let content = frontmatter
            .get_str(&self.config.file_metadata.content_field)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                Path::new(file_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(file_path)
                    .to_string()
            });

        let status = self.status_mark(frontmatter);
        let first_date = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| frontmatter.get_str(k))
                .find_map(|v| parse_date(&v))
        };

        let mut metadata = TaskMetadata {
            priority: frontmatter
                .get_str("priority")
                .and_then(|p| parse_priority(&p)),
            project: frontmatter.get_str("project"),
            context: frontmatter.get_str("context"),
            due_date: first_date(DUE_KEYS),
            start_date: first_date(START_KEYS),
            scheduled_date: first_date(SCHEDULED_KEYS),
            completed_date: first_date(COMPLETED_KEYS),
            recurrence: frontmatter.get_str("repeat"),
            source_type: SourceType::FileMetadata,
            ..Default::default()
        };
        for tag in &frontmatter.tags {
            metadata.push_tag(tag.clone());
        }

        vec![Task {
            id: Task::file_id(file_path),
            completed: self.config.is_done(&status),
            original_markdown: content.clone(),
            content,
            file_path: file_path.to_string(),
            line: 0,
            status,
            metadata,
        }]
    }

    fn status_mark(&self, frontmatter: &FileFrontmatter) -> String {
        let done = self.config.done_mark().to_string();
        for key in ["completed", "complete", "done"] {
            if let Some(Value::Bool(flag)) = frontmatter.get(key) {
                return if *flag {
                    done
                } else {
                    self.config.file_metadata.default_status.clone()
                };
            }
        }
        match frontmatter.get_str("status") {
            Some(s) if s.chars().count() == 1 => s,
            Some(s) => match s.to_lowercase().as_str() {
                "done" | "completed" | "complete" => done,
                other => self
                    .config
                    .status_marks
                    .iter()
                    .find(|(_, name)| name.as_str() == other)
                    .map(|(mark, _)| mark.clone())
                    .unwrap_or_else(|| self.config.file_metadata.default_status.clone()),
            },
            None => self.config.file_metadata.default_status.clone(),
        }
    }
}
