//! Extension dispatch and the single parse entry point
//!
//! The set of parsers is closed: [`TaskParser`] names every variant and
//! [`parsers_for_extension`] is the dispatch table. [`parse_content`] runs the
//! selected parsers in order, concatenating their tasks. One parser failing
//! never hides the output of the others.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canvas::CanvasTaskParser;
use crate::config::ParserConfig;
use crate::error::{ParserResult, ParserWarning};
use crate::file_metadata::FileMetadataTaskParser;
use crate::frontmatter::FileFrontmatter;
use crate::ics::IcsTaskParser;
use crate::markdown::MarkdownTaskParser;
use crate::types::{ProjectIdentity, Task};

/// Format-specific parser kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskParser {
    Markdown,
    Canvas,
    FileMetadata,
    Ics,
}

impl TaskParser {
    pub fn name(&self) -> &'static str {
        match self {
            TaskParser::Markdown => "markdown",
            TaskParser::Canvas => "canvas",
            TaskParser::FileMetadata => "file-metadata",
            TaskParser::Ics => "ics",
        }
    }

    /// Run this parser over one file
    pub fn run(&self, content: &str, ctx: &ParseContext, config: &ParserConfig) -> ParserResult<Vec<Task>> {
        let path = ctx.file_path.as_str();
        match self {
            TaskParser::Markdown => Ok(MarkdownTaskParser::new(config).parse(content, path)),
            TaskParser::Canvas => CanvasTaskParser::new(config).parse(content, path),
            TaskParser::FileMetadata => {
                Ok(FileMetadataTaskParser::new(config).parse(path, &ctx.frontmatter))
            }
            TaskParser::Ics => IcsTaskParser::new(config).parse(content, path),
        }
    }
}

/// Ordered parser list for a file extension (without the dot)
pub fn parsers_for_extension(extension: &str, config: &ParserConfig) -> Vec<TaskParser> {
    match extension.to_ascii_lowercase().as_str() {
        "md" | "markdown" => vec![TaskParser::Markdown, TaskParser::FileMetadata],
        "canvas" => vec![TaskParser::Canvas],
        "ics" if config.enable_ics => vec![TaskParser::Ics],
        _ => vec![TaskParser::FileMetadata],
    }
}

/// Everything a parse needs besides the raw content
///
/// Owned so it can be moved onto a worker thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseContext {
    pub file_path: String,
    pub frontmatter: FileFrontmatter,
    /// Project resolved for the file, inherited by tasks that name none
    pub project: Option<ProjectIdentity>,
}

impl ParseContext {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn with_frontmatter(mut self, frontmatter: FileFrontmatter) -> Self {
        self.frontmatter = frontmatter;
        self
    }

    pub fn with_project(mut self, project: Option<ProjectIdentity>) -> Self {
        self.project = project;
        self
    }

    pub fn extension(&self) -> String {
        Path::new(&self.file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// Tasks from every parser that ran, plus the failures that were skipped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub tasks: Vec<Task>,
    pub warnings: Vec<ParserWarning>,
}

/// Parse one file with every parser its extension maps to
pub fn parse_content(content: &str, ctx: &ParseContext, config: &ParserConfig) -> ParseOutput {
    let mut output = ParseOutput::default();

    for parser in parsers_for_extension(&ctx.extension(), config) {
        match parser.run(content, ctx, config) {
            Ok(tasks) => {
                debug!(path = %ctx.file_path, parser = parser.name(), count = tasks.len(), "Parsed tasks");
                output.tasks.extend(tasks);
            }
            Err(e) => {
                warn!(path = %ctx.file_path, parser = parser.name(), error = %e, "Parser failed, skipping");
                output.warnings.push(ParserWarning::new(parser.name(), e.to_string()));
            }
        }
    }

    if let Some(project) = &ctx.project {
        for task in output.tasks.iter_mut().filter(|t| t.metadata.project.is_none()) {
            task.metadata.tg_project = Some(project.clone());
        }
    }

    output
}
