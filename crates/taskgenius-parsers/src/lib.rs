//! # TaskGenius Parsers
//!
//! Task data model and the closed set of parsers that turn vault content into
//! tasks. Parsing is a pure function of `(content, path, context)`, so callers
//! may run it on any thread or worker pool.
//!
//! ## Parsers
//!
//! - **Markdown**: checklist items with emoji or dataview metadata, tags,
//!   contexts, heading context and indentation hierarchy
//! - **Canvas**: markdown tasks inside canvas text nodes
//! - **File metadata**: one task per file selected by front-matter or tags
//! - **ICS**: `VTODO`/`VEVENT` components of calendar files

pub mod canvas;
pub mod config;
pub mod dates;
pub mod error;
pub mod file_metadata;
pub mod frontmatter;
pub mod ics;
pub mod markdown;
pub mod parser;
pub mod types;

pub use config::{FileMetadataConfig, MetadataFormat, ParserConfig};
pub use error::{ParserError, ParserResult, ParserWarning};
pub use frontmatter::{FileFrontmatter, FrontmatterExtractor};
pub use parser::{parse_content, parsers_for_extension, ParseContext, ParseOutput, TaskParser};
pub use types::{ProjectIdentity, ProjectSource, SourceType, Task, TaskMetadata};
