//! Minimal iCalendar reader for `VTODO` and `VEVENT` components

use crate::config::ParserConfig;
use crate::dates::parse_date;
use crate::error::{ParserError, ParserResult};
use crate::types::{SourceType, Task, TaskMetadata};

/// Content lines after RFC 5545 unfolding
fn unfold(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(continuation) = raw.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

/// Split `NAME;PARAM=x:VALUE` into upper-cased name and value
fn split_property(line: &str) -> Option<(String, &str)> {
    let colon = line.find(':')?;
    let (head, value) = line.split_at(colon);
    let name = head.split(';').next()?.to_ascii_uppercase();
    Some((name, &value[1..]))
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// ICS 1 (highest) ..= 9 (lowest) onto 5 ..= 1; 0 means undefined
fn map_priority(value: &str) -> Option<u8> {
    match value.trim().parse::<u8>().ok()? {
        1..=2 => Some(5),
        3..=4 => Some(4),
        5 => Some(3),
        6..=7 => Some(2),
        8..=9 => Some(1),
        _ => None,
    }
}

#[derive(Default)]
struct Component {
    uid: Option<String>,
    summary: Option<String>,
    status: Option<String>,
    metadata: TaskMetadata,
}

/// Parser for `.ics` calendar files
#[derive(Debug, Clone)]
pub struct IcsTaskParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> IcsTaskParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, content: &str, file_path: &str) -> ParserResult<Vec<Task>> {
        let lines = unfold(content);
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        if !lines[0].eq_ignore_ascii_case("BEGIN:VCALENDAR") {
            return Err(ParserError::parse(file_path, "missing BEGIN:VCALENDAR"));
        }

        let mut tasks = Vec::new();
        let mut current: Option<Component> = None;
        let mut index = 0usize;

        for line in &lines {
            let upper = line.to_ascii_uppercase();
            if upper == "BEGIN:VTODO" || upper == "BEGIN:VEVENT" {
                current = Some(Component::default());
                continue;
            }
            if upper == "END:VTODO" || upper == "END:VEVENT" {
                if let Some(component) = current.take() {
                    tasks.push(self.finish(component, file_path, index));
                    index += 1;
                }
                continue;
            }
            let Some(component) = current.as_mut() else {
                continue;
            };
            let Some((name, value)) = split_property(line) else {
                continue;
            };
            let meta = &mut component.metadata;
            match name.as_str() {
                "UID" => component.uid = Some(value.trim().to_string()),
                "SUMMARY" => component.summary = Some(unescape(value)),
                "STATUS" => component.status = Some(value.trim().to_ascii_uppercase()),
                "DUE" => meta.due_date = parse_date(value),
                "DTEND" if meta.due_date.is_none() => meta.due_date = parse_date(value),
                "DTSTART" => meta.start_date = parse_date(value),
                "COMPLETED" => meta.completed_date = parse_date(value),
                "CREATED" => meta.created_date = parse_date(value),
                "PRIORITY" => meta.priority = map_priority(value),
                "RRULE" => meta.recurrence = Some(value.to_string()),
                "LOCATION" => meta.context = Some(unescape(value)),
                "CATEGORIES" => {
                    for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                        meta.push_tag(format!("#{}", tag.replace(' ', "-")));
                    }
                }
                _ => {}
            }
        }

        Ok(tasks)
    }

    fn finish(&self, component: Component, file_path: &str, index: usize) -> Task {
        let uid = component
            .uid
            .unwrap_or_else(|| format!("component-{}", index));
        let done = matches!(component.status.as_deref(), Some("COMPLETED"));
        let status = if done {
            self.config.done_mark().to_string()
        } else if matches!(component.status.as_deref(), Some("CANCELLED")) {
            "-".to_string()
        } else {
            " ".to_string()
        };
        let content = component.summary.unwrap_or_default();
        let mut metadata = component.metadata;
        metadata.source_type = SourceType::Ics;

        Task {
            id: Task::ics_id(file_path, &uid),
            original_markdown: content.clone(),
            content,
            file_path: file_path.to_string(),
            line: index,
            completed: self.config.is_done(&status),
            status,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::format_day;

    const CALENDAR: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VTODO\r\nUID:todo-1\r\nSUMMARY:File taxes\\, finally\r\nDUE;VALUE=DATE:20240415\r\nPRIORITY:1\r\nSTATUS:COMPLETED\r\nCATEGORIES:Finance,Home Admin\r\nEND:VTODO\r\nBEGIN:VEVENT\r\nUID:ev-9\r\nSUMMARY:Team sync with a very long\r\n  description line\r\nDTSTART:20240410T090000Z\r\nDTEND:20240410T100000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn test_parse_todo_and_event() {
        let config = ParserConfig::default();
        let tasks = IcsTaskParser::new(&config).parse(CALENDAR, "cal/work.ics").unwrap();
        assert_eq!(tasks.len(), 2);

        let todo = &tasks[0];
        assert_eq!(todo.id, "cal/work.ics#ics-todo-1");
        assert_eq!(todo.content, "File taxes, finally");
        assert!(todo.completed);
        assert_eq!(todo.metadata.priority, Some(5));
        assert_eq!(format_day(todo.metadata.due_date.unwrap()).unwrap(), "2024-04-15");
        assert_eq!(todo.metadata.tags, vec!["#Finance", "#Home-Admin"]);

        let event = &tasks[1];
        assert_eq!(event.content, "Team sync with a very long description line");
        assert!(!event.completed);
        assert!(event.metadata.start_date.is_some());
        assert!(event.metadata.due_date.is_some());
        assert_eq!(event.metadata.source_type, SourceType::Ics);
    }

    #[test]
    fn test_rejects_non_calendar() {
        let config = ParserConfig::default();
        assert!(IcsTaskParser::new(&config).parse("hello", "x.ics").is_err());
    }
}
