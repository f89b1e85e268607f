//! Task filtering and sorting

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use taskgenius_parsers::{SourceType, Task};

/// Conjunctive task filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskFilter {
    pub completed: Option<bool>,
    /// Every listed tag must be present; the leading `#` is optional
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub context: Option<String>,
    pub priority: Option<u8>,
    /// Inclusive upper bound on the due date (ms)
    pub due_before: Option<i64>,
    /// Inclusive lower bound on the due date (ms)
    pub due_after: Option<i64>,
    pub file_path: Option<String>,
    /// Case-insensitive substring of the content
    pub text: Option<String>,
    pub source_type: Option<SourceType>,
}

fn normalize_tag(tag: &str) -> String {
    if tag.starts_with('#') {
        tag.to_string()
    } else {
        format!("#{}", tag)
    }
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self == &TaskFilter::default()
    }

    pub fn matches(&self, task: &Task) -> bool {
        let meta = &task.metadata;
        if self.completed.is_some_and(|c| c != task.completed) {
            return false;
        }
        if !self
            .tags
            .iter()
            .all(|tag| meta.tags.contains(&normalize_tag(tag)))
        {
            return false;
        }
        if let Some(project) = &self.project {
            if meta.effective_project() != Some(project.as_str()) {
                return false;
            }
        }
        if self.context.is_some() && meta.context != self.context {
            return false;
        }
        if self.priority.is_some() && meta.priority != self.priority {
            return false;
        }
        if self.due_before.is_some() || self.due_after.is_some() {
            let Some(due) = meta.due_date else {
                return false;
            };
            if self.due_before.is_some_and(|bound| due > bound)
                || self.due_after.is_some_and(|bound| due < bound)
            {
                return false;
            }
        }
        if self.file_path.as_ref().is_some_and(|path| path != &task.file_path) {
            return false;
        }
        if let Some(text) = &self.text {
            if !task.content.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        if self.source_type.is_some_and(|source| source != meta.source_type) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Status,
    Priority,
    DueDate,
    StartDate,
    ScheduledDate,
    Content,
    FilePath,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortCriterion {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
        }
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Missing values sort last whatever the direction
fn compare_optional<T: Ord>(a: Option<T>, b: Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.cmp(&b), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare(a: &Task, b: &Task, criterion: &SortCriterion) -> Ordering {
    let order = criterion.order;
    let (ma, mb) = (&a.metadata, &b.metadata);
    match criterion.field {
        SortField::Status => directed(
            a.completed
                .cmp(&b.completed)
                .then_with(|| a.status.cmp(&b.status)),
            order,
        ),
        SortField::Priority => compare_optional(ma.priority, mb.priority, order),
        SortField::DueDate => compare_optional(ma.due_date, mb.due_date, order),
        SortField::StartDate => compare_optional(ma.start_date, mb.start_date, order),
        SortField::ScheduledDate => compare_optional(ma.scheduled_date, mb.scheduled_date, order),
        SortField::Content => directed(
            a.content.to_lowercase().cmp(&b.content.to_lowercase()),
            order,
        ),
        SortField::FilePath => directed(a.file_path.cmp(&b.file_path), order),
        SortField::Line => directed(a.line.cmp(&b.line), order),
    }
}

/// Filter then sort; ties fall back to file path, line and id
pub fn query<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    filter: &TaskFilter,
    sort_by: &[SortCriterion],
) -> Vec<Task> {
    let mut matched: Vec<Task> = tasks
        .into_iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    matched.sort_by(|a, b| {
        sort_by
            .iter()
            .map(|criterion| compare(a, b, criterion))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.id.cmp(&b.id))
    });
    matched
}
