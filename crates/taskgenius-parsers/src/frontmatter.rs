//! YAML front-matter extraction for vault notes

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParserError, ParserResult};

static INLINE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(#[\p{L}\p{N}_/-]*[\p{L}_/-][\p{L}\p{N}_/-]*)").expect("valid tag regex")
});

/// Parsed front-matter plus the tags a note carries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFrontmatter {
    pub fields: Map<String, Value>,
    /// Front-matter and inline tags, each with a leading `#`
    pub tags: Vec<String>,
}

impl FileFrontmatter {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String view of a scalar field (numbers and booleans are stringified)
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.tags.is_empty()
    }
}

/// Splits `---` delimited YAML front-matter from a note body
#[derive(Debug, Clone, Default)]
pub struct FrontmatterExtractor;

impl FrontmatterExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Return the raw YAML block and the body that follows it
    ///
    /// The block must open on the very first line; a note whose first line is
    /// not `---` has no front-matter.
    pub fn split<'a>(&self, content: &'a str, path: &str) -> ParserResult<(Option<&'a str>, &'a str)> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut lines = content.split_inclusive('\n');
        let Some(first) = lines.next() else {
            return Ok((None, content));
        };
        if first.trim_end() != "---" {
            return Ok((None, content));
        }

        let yaml_start = first.len();
        let mut offset = yaml_start;
        for line in lines {
            let trimmed = line.trim_end();
            if trimmed == "---" || trimmed == "..." {
                let yaml = &content[yaml_start..offset];
                let body = &content[offset + line.len()..];
                return Ok((Some(yaml), body));
            }
            offset += line.len();
        }

        Err(ParserError::parse(
            path,
            "unclosed front-matter: found opening '---' but no closing '---'",
        ))
    }

    /// Parse front-matter fields and collect tags from both YAML and body
    pub fn extract(&self, content: &str, path: &str) -> ParserResult<FileFrontmatter> {
        let (yaml, body) = self.split(content, path)?;

        let fields = match yaml {
            Some(yaml) if !yaml.trim().is_empty() => {
                match serde_yaml::from_str::<Value>(yaml)? {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    _ => {
                        return Err(ParserError::parse(path, "front-matter must be a mapping"));
                    }
                }
            }
            _ => Map::new(),
        };

        let mut tags = Vec::new();
        let mut push = |tag: String| {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        };
        match fields.get("tags").or_else(|| fields.get("tag")) {
            Some(Value::String(s)) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .for_each(|t| push(normalize_tag(t))),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .for_each(|t| push(normalize_tag(t))),
            _ => {}
        }
        for tag in inline_tags(body) {
            push(tag);
        }

        Ok(FileFrontmatter { fields, tags })
    }
}

fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('#') {
        tag.to_string()
    } else {
        format!("#{}", tag)
    }
}

/// Inline `#tags` outside fenced code blocks
pub fn inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        // Headings ("# Title") never match: a tag needs a non-space after '#'
        for cap in INLINE_TAG.captures_iter(line) {
            let tag = cap[1].to_string();
            if tag.len() > 1 && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fields_and_tags() {
        let content = "---\ntitle: Plan\ntags: [work, \"#urgent\"]\nproject: Apollo\n---\n# Notes\nSome #inline text\n";
        let fm = FrontmatterExtractor::new().extract(content, "a.md").unwrap();
        assert_eq!(fm.get_str("title").as_deref(), Some("Plan"));
        assert_eq!(fm.get_str("project").as_deref(), Some("Apollo"));
        assert_eq!(fm.tags, vec!["#work", "#urgent", "#inline"]);
    }

    #[test]
    fn test_no_frontmatter() {
        let fm = FrontmatterExtractor::new()
            .extract("# Title\n- [ ] task", "a.md")
            .unwrap();
        assert!(fm.fields.is_empty());
    }

    #[test]
    fn test_unclosed_frontmatter_is_error() {
        let err = FrontmatterExtractor::new()
            .extract("---\ntitle: x\n", "a.md")
            .unwrap_err();
        assert!(err.to_string().contains("unclosed"));
    }

    #[test]
    fn test_split_returns_body_after_block() {
        let extractor = FrontmatterExtractor::new();
        let (yaml, body) = extractor.split("---\na: 1\n---\nbody\n", "a.md").unwrap();
        assert_eq!(yaml, Some("a: 1\n"));
        assert_eq!(body, "body\n");
    }

    #[test]
    fn test_inline_tags_skip_code_and_headings() {
        let body = "# Heading\n```\n#notatag\n```\ntext #real and #2024 #x/y\n";
        assert_eq!(inline_tags(body), vec!["#real", "#x/y"]);
    }

    #[test]
    fn test_numeric_scalar_fields_stringify() {
        let fm = FrontmatterExtractor::new()
            .extract("---\npriority: 3\ndone: true\n---\n", "a.md")
            .unwrap();
        assert_eq!(fm.get_str("priority").as_deref(), Some("3"));
        assert_eq!(fm.get_str("done").as_deref(), Some("true"));
    }
}
