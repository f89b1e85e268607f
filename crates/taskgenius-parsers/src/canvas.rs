//! Canvas parser
//!
//! A canvas file is JSON with a `nodes` array. Only `text` nodes carry
//! markdown; their checklist items become tasks tagged with the node id.

use serde::Deserialize;

use crate::config::ParserConfig;
use crate::error::{ParserError, ParserResult};
use crate::markdown::MarkdownTaskParser;
use crate::types::{SourceType, Task};

#[derive(Debug, Deserialize)]
struct CanvasDocument {
    #[serde(default)]
    nodes: Vec<CanvasNode>,
}

#[derive(Debug, Deserialize)]
struct CanvasNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Parser for `.canvas` documents
#[derive(Debug, Clone)]
pub struct CanvasTaskParser<'a> {
    markdown: MarkdownTaskParser<'a>,
}

impl<'a> CanvasTaskParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self {
            markdown: MarkdownTaskParser::new(config),
        }
    }

    pub fn parse(&self, content: &str, file_path: &str) -> ParserResult<Vec<Task>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document: CanvasDocument = serde_json::from_str(content)
            .map_err(|e| ParserError::parse(file_path, format!("invalid canvas JSON: {}", e)))?;

        let mut tasks = Vec::new();
        for node in document.nodes.iter().filter(|n| n.kind == "text") {
            let Some(text) = node.text.as_deref() else {
                continue;
            };
            let node_id = node.id.as_str();
            tasks.extend(self.markdown.parse_lines(
                text,
                file_path,
                &|line: usize| Task::canvas_id(file_path, node_id, line),
                SourceType::Canvas,
                Some(node_id),
            ));
        }
        Ok(tasks)
    }
}
