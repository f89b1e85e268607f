//! Markdown checklist parser
//!
//! Extracts `- [ ]` style items with their inline metadata. Both the emoji
//! syntax (`📅 2024-01-01`) and dataview inline fields (`[due:: 2024-01-01]`)
//! are recognised on every line; [`MetadataFormat`] only decides which one
//! wins when a line carries both.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{MetadataFormat, ParserConfig};
use crate::dates::parse_date;
use crate::types::{SourceType, Task, TaskMetadata};

static TASK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:[-*+]|\d+[.)])\s+\[(.)\]\s?(.*)$").expect("valid task regex")
});
static LIST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(?:[-*+]|\d+[.)])\s").expect("valid list regex"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("valid heading regex"));

static DATAVIEW_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([A-Za-z][A-Za-z0-9_ -]*)::\s*([^\]]*)\]").expect("valid dataview regex")
});
static EMOJI_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(📅|🛫|⏳|⌛|✅|❌|➕)\u{FE0F}?\s*(\d{4}-\d{2}-\d{2}(?:[ T]\d{2}:\d{2})?)")
        .expect("valid emoji date regex")
});
static EMOJI_PRIORITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(🔺|⏫|🔼|🔽|⏬)\u{FE0F}?").expect("valid priority regex"));
static EMOJI_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"🆔\u{FE0F}?\s*([A-Za-z0-9_-]+)").expect("valid id regex"));
static EMOJI_DEPENDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"⛔\u{FE0F}?\s*([A-Za-z0-9_-]+(?:\s*,\s*[A-Za-z0-9_-]+)*)")
        .expect("valid depends regex")
});
static EMOJI_FREE_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(🔁|🏁)\u{FE0F}?\s*([^📅🛫⏳⌛✅❌➕🆔⛔🏁🔁🔺⏫🔼🔽⏬#@\[]*)")
        .expect("valid free text regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(#[\p{L}\p{N}_/-]*[\p{L}_/-][\p{L}\p{N}_/-]*)").expect("valid tag regex")
});
static CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)@([\p{L}\p{N}_/-]+)").expect("valid context regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("valid ws regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Due,
    Start,
    Scheduled,
    Completed,
    Cancelled,
    Created,
    Priority,
    Project,
    Context,
    Recurrence,
    Id,
    DependsOn,
    OnCompletion,
    Tags,
}

impl Field {
    fn from_dataview_key(key: &str) -> Option<Self> {
        let key: String = key
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        Some(match key.as_str() {
            "due" | "duedate" => Field::Due,
            "start" | "startdate" => Field::Start,
            "scheduled" | "scheduleddate" => Field::Scheduled,
            "completion" | "completed" | "completeddate" | "completiondate" => Field::Completed,
            "cancelled" | "canceled" | "cancelleddate" => Field::Cancelled,
            "created" | "createddate" => Field::Created,
            "priority" => Field::Priority,
            "project" => Field::Project,
            "context" => Field::Context,
            "repeat" | "recurrence" => Field::Recurrence,
            "id" => Field::Id,
            "dependson" => Field::DependsOn,
            "oncompletion" => Field::OnCompletion,
            "tags" | "tag" => Field::Tags,
            _ => return None,
        })
    }

    fn from_date_emoji(emoji: &str) -> Option<Self> {
        Some(match emoji {
            "📅" => Field::Due,
            "🛫" => Field::Start,
            "⏳" | "⌛" => Field::Scheduled,
            "✅" => Field::Completed,
            "❌" => Field::Cancelled,
            "➕" => Field::Created,
            _ => return None,
        })
    }
}

/// Map a priority word, digit, or emoji to 1 (lowest) ..= 5 (highest)
pub fn parse_priority(value: &str) -> Option<u8> {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "highest" | "🔺" => Some(5),
        "high" | "⏫" => Some(4),
        "medium" | "🔼" => Some(3),
        "low" | "🔽" => Some(2),
        "lowest" | "⏬" => Some(1),
        other => other.parse::<u8>().ok().filter(|p| (1..=5).contains(p)),
    }
}

fn apply_field(meta: &mut TaskMetadata, field: Field, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    match field {
        Field::Due => meta.due_date = parse_date(value).or(meta.due_date),
        Field::Start => meta.start_date = parse_date(value).or(meta.start_date),
        Field::Scheduled => meta.scheduled_date = parse_date(value).or(meta.scheduled_date),
        Field::Completed => meta.completed_date = parse_date(value).or(meta.completed_date),
        Field::Cancelled => meta.cancelled_date = parse_date(value).or(meta.cancelled_date),
        Field::Created => meta.created_date = parse_date(value).or(meta.created_date),
        Field::Priority => meta.priority = parse_priority(value).or(meta.priority),
        Field::Project => meta.project = Some(value.to_string()),
        Field::Context => meta.context = Some(value.trim_start_matches('@').to_string()),
        Field::Recurrence => meta.recurrence = Some(value.to_string()),
        Field::Id => meta.task_id = Some(value.to_string()),
        Field::DependsOn => {
            meta.depends_on = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        Field::OnCompletion => meta.on_completion = Some(value.to_string()),
        Field::Tags => {
            for tag in value.split(|c: char| c == ',' || c.is_whitespace()) {
                let tag = tag.trim();
                if !tag.is_empty() {
                    let tag = if tag.starts_with('#') {
                        tag.to_string()
                    } else {
                        format!("#{}", tag)
                    };
                    meta.push_tag(tag);
                }
            }
        }
    }
}

fn collect_dataview(text: &str) -> (Vec<(Field, String)>, String) {
    let mut fields = Vec::new();
    for cap in DATAVIEW_FIELD.captures_iter(text) {
        if let Some(field) = Field::from_dataview_key(&cap[1]) {
            fields.push((field, cap[2].to_string()));
        }
    }
    let stripped = DATAVIEW_FIELD
        .replace_all(text, |cap: &regex::Captures| {
            if Field::from_dataview_key(&cap[1]).is_some() {
                " ".to_string()
            } else {
                cap[0].to_string()
            }
        })
        .into_owned();
    (fields, stripped)
}

fn collect_emoji(text: &str) -> (Vec<(Field, String)>, String) {
    let mut fields = Vec::new();
    for cap in EMOJI_DATE.captures_iter(text) {
        if let Some(field) = Field::from_date_emoji(&cap[1]) {
            fields.push((field, cap[2].to_string()));
        }
    }
    if let Some(cap) = EMOJI_PRIORITY.captures(text) {
        fields.push((Field::Priority, cap[1].to_string()));
    }
    if let Some(cap) = EMOJI_ID.captures(text) {
        fields.push((Field::Id, cap[1].to_string()));
    }
    if let Some(cap) = EMOJI_DEPENDS.captures(text) {
        fields.push((Field::DependsOn, cap[1].to_string()));
    }
    for cap in EMOJI_FREE_TEXT.captures_iter(text) {
        let field = if &cap[1] == "🔁" {
            Field::Recurrence
        } else {
            Field::OnCompletion
        };
        fields.push((field, cap[2].to_string()));
    }

    let mut stripped = text.to_string();
    for re in [
        &*EMOJI_DATE,
        &*EMOJI_PRIORITY,
        &*EMOJI_ID,
        &*EMOJI_DEPENDS,
        &*EMOJI_FREE_TEXT,
    ] {
        stripped = re.replace_all(&stripped, " ").into_owned();
    }
    (fields, stripped)
}

/// Split a task's text into display content and structured metadata
pub fn extract_metadata(text: &str, config: &ParserConfig) -> (String, TaskMetadata) {
    let mut meta = TaskMetadata::default();

    let (dataview_fields, after_dataview) = collect_dataview(text);
    let (emoji_fields, mut content) = collect_emoji(&after_dataview);

    // Later writes win, so the preferred syntax is applied last
    let ordered: Vec<(Field, String)> = match config.metadata_format {
        MetadataFormat::Tasks => dataview_fields.into_iter().chain(emoji_fields).collect(),
        MetadataFormat::Dataview => emoji_fields.into_iter().chain(dataview_fields).collect(),
    };
    for (field, value) in &ordered {
        apply_field(&mut meta, *field, value);
    }

    if config.parse_tags {
        for cap in TAG.captures_iter(&content) {
            let tag = &cap[1];
            match tag.strip_prefix("#project/") {
                Some(project) if !project.is_empty() => {
                    if meta.project.is_none() {
                        meta.project = Some(project.to_string());
                    }
                }
                _ => meta.push_tag(tag),
            }
        }
        if let Some(cap) = CONTEXT.captures(&content) {
            if meta.context.is_none() {
                meta.context = Some(cap[1].to_string());
            }
        }
        content = TAG.replace_all(&content, " ").into_owned();
        content = CONTEXT.replace_all(&content, " ").into_owned();
    }

    let content = WHITESPACE.replace_all(content.trim(), " ").into_owned();
    (content, meta)
}

fn indent_width(prefix: &str) -> usize {
    prefix
        .chars()
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Markdown checklist parser
#[derive(Debug, Clone)]
pub struct MarkdownTaskParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> MarkdownTaskParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    /// Parse every checklist item of a markdown document
    pub fn parse(&self, content: &str, file_path: &str) -> Vec<Task> {
        self.parse_lines(
            content,
            file_path,
            &|line: usize| Task::markdown_id(file_path, line),
            SourceType::Markdown,
            None,
        )
    }

    /// Shared line scanner; canvas nodes reuse it with their own id scheme
    pub(crate) fn parse_lines(
        &self,
        content: &str,
        file_path: &str,
        make_id: &dyn Fn(usize) -> String,
        source_type: SourceType,
        canvas_node_id: Option<&str>,
    ) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::new();
        let mut headings: Vec<(usize, String)> = Vec::new();
        // (indent, index into `tasks`) of currently open ancestors
        let mut parents: Vec<(usize, usize)> = Vec::new();
        let mut in_fence = false;

        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }

            if let Some(cap) = HEADING.captures(line) {
                let level = cap[1].len();
                while headings.last().is_some_and(|(l, _)| *l >= level) {
                    headings.pop();
                }
                headings.push((level, cap[2].to_string()));
                parents.clear();
                continue;
            }

            let Some(cap) = TASK_LINE.captures(line) else {
                if let Some(list) = LIST_LINE.captures(line) {
                    let indent = indent_width(&list[1]);
                    while parents.last().is_some_and(|(i, _)| *i >= indent) {
                        parents.pop();
                    }
                }
                continue;
            };

            let indent = indent_width(&cap[1]);
            let mark = cap[2].to_string();
            let (text, mut metadata) = extract_metadata(&cap[3], self.config);

            metadata.source_type = source_type;
            metadata.canvas_node_id = canvas_node_id.map(str::to_string);
            if self.config.parse_heading_context {
                metadata.heading = headings.iter().map(|(_, h)| h.clone()).collect();
            }

            while parents.last().is_some_and(|(i, _)| *i >= indent) {
                parents.pop();
            }
            let id = make_id(line_no);
            if let Some(&(_, parent_idx)) = parents.last() {
                metadata.parent = Some(tasks[parent_idx].id.clone());
                tasks[parent_idx].metadata.children.push(id.clone());
            }

            tasks.push(Task {
                id,
                content: text,
                file_path: file_path.to_string(),
                line: line_no,
                completed: self.config.is_done(&mark),
                status: mark,
                original_markdown: line.to_string(),
                metadata,
            });
            parents.push((indent, tasks.len() - 1));
        }

        tasks
    }
}
