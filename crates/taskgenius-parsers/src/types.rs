//! Task data model shared by every parser and the index

use serde::{Deserialize, Serialize};

/// Where a task was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    #[default]
    Markdown,
    Canvas,
    FileMetadata,
    Ics,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Markdown => "markdown",
            SourceType::Canvas => "canvas",
            SourceType::FileMetadata => "file-metadata",
            SourceType::Ics => "ics",
        }
    }
}

/// How a file's project identity was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectSource {
    /// Matched a configured path prefix
    PathMapping,
    /// Read from a front-matter key
    Metadata,
    /// Read from a project config file in an ancestor directory
    ConfigFile,
    /// Derived by the default naming strategy
    Default,
}

/// Project a file (and therefore its tasks) belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdentity {
    pub name: String,
    pub source: ProjectSource,
    /// Config file or mapping prefix the identity came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Inherited identities cannot be edited from a task
    #[serde(default)]
    pub read_only: bool,
}

/// Optional semantic metadata attached to a task
///
/// Dates are milliseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskMetadata {
    /// 1 (lowest) ..= 5 (highest)
    pub priority: Option<u8>,
    pub project: Option<String>,
    /// Project inherited from the file when the task names none
    pub tg_project: Option<ProjectIdentity>,
    pub context: Option<String>,
    pub tags: Vec<String>,
    pub due_date: Option<i64>,
    pub start_date: Option<i64>,
    pub scheduled_date: Option<i64>,
    pub completed_date: Option<i64>,
    pub cancelled_date: Option<i64>,
    pub created_date: Option<i64>,
    pub recurrence: Option<String>,
    /// Explicit identifier written in the task line (`🆔 abc`)
    pub task_id: Option<String>,
    pub depends_on: Vec<String>,
    pub on_completion: Option<String>,
    pub children: Vec<String>,
    pub parent: Option<String>,
    /// Enclosing headings, outermost first
    pub heading: Vec<String>,
    pub canvas_node_id: Option<String>,
    pub source_type: SourceType,
}

impl TaskMetadata {
    /// Project name used for indexing: explicit first, then inherited
    pub fn effective_project(&self) -> Option<&str> {
        self.project
            .as_deref()
            .or_else(|| self.tg_project.as_ref().map(|p| p.name.as_str()))
    }

    /// Add a tag once, keeping first-seen order
    pub fn push_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

/// A single actionable item extracted from a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable identifier derived from file path and position
    pub id: String,
    pub content: String,
    pub file_path: String,
    /// Zero-based line within the file (or within the canvas node text)
    pub line: usize,
    pub completed: bool,
    /// Raw status mark between the checkbox brackets
    pub status: String,
    pub original_markdown: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    /// Id for a markdown checklist task
    pub fn markdown_id(file_path: &str, line: usize) -> String {
        format!("{}-L{}", file_path, line)
    }

    /// Id for a checklist task inside a canvas text node
    pub fn canvas_id(file_path: &str, node_id: &str, line: usize) -> String {
        format!("{}#{}-L{}", file_path, node_id, line)
    }

    /// Id for the single task derived from a file's metadata
    pub fn file_id(file_path: &str) -> String {
        format!("{}#file", file_path)
    }

    /// Id for a calendar component
    pub fn ics_id(file_path: &str, uid: &str) -> String {
        format!("{}#ics-{}", file_path, uid)
    }

    /// Rough in-memory footprint, used for memory accounting
    pub fn estimated_size(&self) -> usize {
        let m = &self.metadata;
        let strings = self.id.len()
            + self.content.len()
            + self.file_path.len()
            + self.status.len()
            + self.original_markdown.len()
            + m.project.as_ref().map_or(0, String::len)
            + m.context.as_ref().map_or(0, String::len)
            + m.recurrence.as_ref().map_or(0, String::len)
            + m.on_completion.as_ref().map_or(0, String::len)
            + m.tags.iter().map(String::len).sum::<usize>()
            + m.depends_on.iter().map(String::len).sum::<usize>()
            + m.children.iter().map(String::len).sum::<usize>()
            + m.heading.iter().map(String::len).sum::<usize>();
        std::mem::size_of::<Task>() + strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_derived_from_position() {
        assert_eq!(Task::markdown_id("a/b.md", 4), "a/b.md-L4");
        assert_eq!(Task::canvas_id("b.canvas", "n1", 0), "b.canvas#n1-L0");
        assert_eq!(Task::file_id("c.md"), "c.md#file");
        assert_eq!(Task::ics_id("cal.ics", "u-1"), "cal.ics#ics-u-1");
    }

    #[test]
    fn test_effective_project_prefers_explicit() {
        let mut meta = TaskMetadata {
            tg_project: Some(ProjectIdentity {
                name: "inherited".into(),
                source: ProjectSource::ConfigFile,
                source_path: None,
                read_only: true,
            }),
            ..Default::default()
        };
        assert_eq!(meta.effective_project(), Some("inherited"));

        meta.project = Some("explicit".into());
        assert_eq!(meta.effective_project(), Some("explicit"));
    }

    #[test]
    fn test_push_tag_dedupes() {
        let mut meta = TaskMetadata::default();
        meta.push_tag("#a");
        meta.push_tag("#b");
        meta.push_tag("#a");
        assert_eq!(meta.tags, vec!["#a", "#b"]);
    }

    #[test]
    fn test_source_type_serializes_kebab_case() {
        let json = serde_json::to_string(&SourceType::FileMetadata).unwrap();
        assert_eq!(json, "\"file-metadata\"");
    }
}
