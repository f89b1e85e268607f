//! Multi-index task cache
//!
//! `tasks` is the primary map and `files` groups task ids by source file.
//! Every secondary index is derived from `tasks` and maintained by exactly
//! two functions, `index_task` and `unindex_task`, which visit the same
//! keys. An empty bucket is removed as soon as its last id leaves.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use taskgenius_parsers::dates::format_day;
use taskgenius_parsers::Task;

/// Date fields indexed by calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    Due,
    Start,
    Scheduled,
}

impl DateField {
    pub const ALL: [DateField; 3] = [DateField::Due, DateField::Start, DateField::Scheduled];

    fn value(&self, task: &Task) -> Option<i64> {
        let meta = &task.metadata;
        match self {
            DateField::Due => meta.due_date,
            DateField::Start => meta.start_date,
            DateField::Scheduled => meta.scheduled_date,
        }
    }
}

/// Ids added, re-inserted and dropped by one file re-parse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SecondaryIndexes {
    tags: HashMap<String, HashSet<String>>,
    projects: HashMap<String, HashSet<String>>,
    contexts: HashMap<String, HashSet<String>>,
    priorities: HashMap<u8, HashSet<String>>,
    completed: HashMap<bool, HashSet<String>>,
    dates: HashMap<(DateField, String), HashSet<String>>,
    /// Dependency key (explicit id or task id) -> ids of tasks depending on it
    dependents: HashMap<String, HashSet<String>>,
}

fn add_to<K: Eq + Hash>(index: &mut HashMap<K, HashSet<String>>, key: K, id: &str) {
    index.entry(key).or_default().insert(id.to_string());
}

fn remove_from<K: Eq + Hash>(index: &mut HashMap<K, HashSet<String>>, key: &K, id: &str) {
    if let Some(bucket) = index.get_mut(key) {
        bucket.remove(id);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

impl SecondaryIndexes {
    fn index_task(&mut self, task: &Task) {
        let id = task.id.as_str();
        let meta = &task.metadata;
        for tag in &meta.tags {
            add_to(&mut self.tags, tag.clone(), id);
        }
        if let Some(project) = meta.effective_project() {
            add_to(&mut self.projects, project.to_string(), id);
        }
        if let Some(context) = &meta.context {
            add_to(&mut self.contexts, context.clone(), id);
        }
        if let Some(priority) = meta.priority {
            add_to(&mut self.priorities, priority, id);
        }
        add_to(&mut self.completed, task.completed, id);
        for field in DateField::ALL {
            if let Some(day) = field.value(task).and_then(format_day) {
                add_to(&mut self.dates, (field, day), id);
            }
        }
        for dependency in &meta.depends_on {
            add_to(&mut self.dependents, dependency.clone(), id);
        }
    }

    fn unindex_task(&mut self, task: &Task) {
        let id = task.id.as_str();
        let meta = &task.metadata;
        for tag in &meta.tags {
            remove_from(&mut self.tags, tag, id);
        }
        if let Some(project) = meta.effective_project() {
            remove_from(&mut self.projects, &project.to_string(), id);
        }
        if let Some(context) = &meta.context {
            remove_from(&mut self.contexts, context, id);
        }
        if let Some(priority) = meta.priority {
            remove_from(&mut self.priorities, &priority, id);
        }
        remove_from(&mut self.completed, &task.completed, id);
        for field in DateField::ALL {
            if let Some(day) = field.value(task).and_then(format_day) {
                remove_from(&mut self.dates, &(field, day), id);
            }
        }
        for dependency in &meta.depends_on {
            remove_from(&mut self.dependents, dependency, id);
        }
    }
}

/// Authoritative in-memory task store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCache {
    tasks: HashMap<String, Task>,
    files: HashMap<String, HashSet<String>>,
    #[serde(skip)]
    indexes: SecondaryIndexes,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every secondary index from `tasks`
    ///
    /// Used after deserializing, which never trusts persisted indexes.
    pub fn rebuild_indexes(&mut self) {
        let mut indexes = SecondaryIndexes::default();
        let mut files: HashMap<String, HashSet<String>> = HashMap::new();
        for task in self.tasks.values() {
            indexes.index_task(task);
            files
                .entry(task.file_path.clone())
                .or_default()
                .insert(task.id.clone());
        }
        self.indexes = indexes;
        self.files = files;
    }

    /// Whether the live indexes equal a fresh rebuild
    pub fn is_consistent(&self) -> bool {
        let mut rebuilt = self.clone();
        rebuilt.rebuild_indexes();
        rebuilt.indexes == self.indexes && rebuilt.files == self.files
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Insert or replace a task, keeping every index in step
    pub fn upsert(&mut self, task: Task) -> Option<Task> {
        let previous = self.remove(&task.id);
        self.indexes.index_task(&task);
        self.files
            .entry(task.file_path.clone())
            .or_default()
            .insert(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let task = self.tasks.remove(id)?;
        self.indexes.unindex_task(&task);
        if let Some(ids) = self.files.get_mut(&task.file_path) {
            ids.remove(id);
            if ids.is_empty() {
                self.files.remove(&task.file_path);
            }
        }
        Some(task)
    }

    /// Replace everything sourced from `path` with a fresh parse
    pub fn replace_file(&mut self, path: &str, tasks: Vec<Task>) -> FileDiff {
        let previous: HashSet<String> = self.files.get(path).cloned().unwrap_or_default();
        let current: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

        let mut diff = FileDiff::default();
        for id in previous.iter().filter(|id| !current.contains(id.as_str())) {
            self.remove(id);
            diff.removed.push(id.clone());
        }
        for task in tasks {
            let id = task.id.clone();
            if self.upsert(task).is_some() {
                diff.updated.push(id);
            } else {
                diff.added.push(id);
            }
        }
        diff.removed.sort();
        diff
    }

    /// Drop every task sourced from `path`
    pub fn remove_file(&mut self, path: &str) -> Vec<Task> {
        let ids = self.files.remove(path).unwrap_or_default();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.files.clear();
        self.indexes = SecondaryIndexes::default();
    }

    /// Tasks of a file in line order; dangling ids are skipped
    pub fn tasks_for_file(&self, path: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .files
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect();
        tasks.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn file_task_ids(&self, path: &str) -> HashSet<String> {
        self.files.get(path).cloned().unwrap_or_default()
    }

    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn resolve(&self, ids: Option<&HashSet<String>>) -> Vec<Task> {
        let mut tasks: Vec<Task> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Task> {
        self.resolve(self.indexes.tags.get(tag))
    }

    pub fn by_project(&self, project: &str) -> Vec<Task> {
        self.resolve(self.indexes.projects.get(project))
    }

    pub fn by_context(&self, context: &str) -> Vec<Task> {
        self.resolve(self.indexes.contexts.get(context))
    }

    pub fn by_priority(&self, priority: u8) -> Vec<Task> {
        self.resolve(self.indexes.priorities.get(&priority))
    }

    pub fn by_status(&self, completed: bool) -> Vec<Task> {
        self.resolve(self.indexes.completed.get(&completed))
    }

    /// Tasks whose `field` falls on `day` (`YYYY-MM-DD`)
    pub fn by_date(&self, field: DateField, day: &str) -> Vec<Task> {
        self.resolve(self.indexes.dates.get(&(field, day.to_string())))
    }

    /// Tasks that list `id` (or the task's explicit id) in their dependencies
    pub fn dependents(&self, id: &str) -> Vec<Task> {
        let mut keys = vec![id.to_string()];
        if let Some(explicit) = self.tasks.get(id).and_then(|t| t.metadata.task_id.clone()) {
            keys.push(explicit);
        }
        let ids: HashSet<String> = keys
            .iter()
            .filter_map(|key| self.indexes.dependents.get(key))
            .flatten()
            .cloned()
            .collect();
        self.resolve(Some(&ids))
    }

    /// Every index key a task id currently appears under, for diagnostics
    pub fn index_keys_for(&self, id: &str) -> Vec<String> {
        let idx = &self.indexes;
        let mut keys = Vec::new();
        let has = |bucket: &HashSet<String>| bucket.contains(id);
        keys.extend(idx.tags.iter().filter(|(_, b)| has(*b)).map(|(k, _)| format!("tag:{}", k)));
        keys.extend(
            idx.projects
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|(k, _)| format!("project:{}", k)),
        );
        keys.extend(
            idx.contexts
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|(k, _)| format!("context:{}", k)),
        );
        keys.extend(
            idx.priorities
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|(k, _)| format!("priority:{}", k)),
        );
        keys.extend(
            idx.completed
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|(k, _)| format!("completed:{}", k)),
        );
        keys.extend(
            idx.dates
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|((f, d), _)| format!("{:?}:{}", f, d)),
        );
        keys.extend(
            idx.dependents
                .iter()
                .filter(|(_, b)| has(*b))
                .map(|(k, _)| format!("depends:{}", k)),
        );
        keys.sort();
        keys
    }

    /// Number of buckets across all secondary indexes
    pub fn bucket_count(&self) -> usize {
        let idx = &self.indexes;
        idx.tags.len()
            + idx.projects.len()
            + idx.contexts.len()
            + idx.priorities.len()
            + idx.completed.len()
            + idx.dates.len()
            + idx.dependents.len()
    }

    pub fn estimated_size(&self) -> usize {
        let tasks: usize = self.tasks.values().map(Task::estimated_size).sum();
        // Each index entry holds one cloned id
        let index_entries = self.bucket_count() * 48
            + self.tasks.values().map(|t| t.id.len() * 8).sum::<usize>();
        tasks + index_entries
    }
}
