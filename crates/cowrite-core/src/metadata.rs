//! Metadata extraction for persisted drafts.
//!
//! Extraction enriches what is saved but never blocks a save: the autosave
//! controller persists with empty metadata when the extractor fails.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use crate::markdown;

/// Maximum summary length in chars.
pub const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Invalid frontmatter field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Derived metadata saved alongside content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Pure function from content to metadata.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, content: &str) -> Result<DocumentMetadata>;
}

/// Extractor that never produces metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataExtractor for NoMetadata {
    fn extract(&self, _content: &str) -> Result<DocumentMetadata> {
        Ok(DocumentMetadata::default())
    }
}

/// Reads tags and a summary from YAML frontmatter and the body.
///
/// Tags come from the frontmatter `tags` field (a list or a comma-separated
/// string) plus inline `#hashtags` in the body. The summary is the
/// frontmatter `summary` or `description`, else the first body paragraph
/// that is not a heading.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrontmatterExtractor;

impl MetadataExtractor for FrontmatterExtractor {
    fn extract(&self, content: &str) -> Result<DocumentMetadata> {
        let parsed = markdown::parse(content);

        let mut tags = match parsed.field("tags") {
            Some(value) => frontmatter_tags(value)?,
            None => Vec::new(),
        };
        for tag in inline_tags(&parsed.body) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let summary = ["summary", "description"]
            .iter()
            .find_map(|key| parsed.field(key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| first_paragraph(&parsed.body))
            .map(|s| truncate_chars(&s, SUMMARY_MAX_CHARS));

        Ok(DocumentMetadata { tags, summary })
    }
}

fn frontmatter_tags(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Sequence(items) => Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()),
        Value::String(s) => Ok(s
            .split(',')
            .map(|t| t.trim().trim_start_matches('#').to_string())
            .filter(|t| !t.is_empty())
            .collect()),
        Value::Null => Ok(Vec::new()),
        _ => Err(MetadataError::InvalidField {
            field: "tags".into(),
            reason: "expected a list or a string".into(),
        }),
    }
}

/// `#tag` tokens at the start of a word. Headings (`# Title`) have a space and are skipped.
fn inline_tags(body: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in body.split_whitespace() {
        let Some(rest) = word.strip_prefix('#') else {
            continue;
        };
        let tag: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '/')
            .collect();
        if tag.chars().next().is_some_and(char::is_alphabetic) && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn first_paragraph(body: &str) -> Option<String> {
    body.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_frontmatter_and_inline_tags() {
        let content = "---\ntags: [fiction, draft]\n---\n\n# Chapter\n\nThe storm #weather rolled in. #draft";
        let meta = FrontmatterExtractor.extract(content).unwrap();

        assert_eq!(meta.tags, vec!["fiction", "draft", "weather"]);
        assert_eq!(meta.summary.as_deref(), Some("The storm #weather rolled in. #draft"));
    }

    #[test]
    fn test_comma_separated_tags() {
        let content = "---\ntags: \"one, #two ,three\"\n---\nbody";
        let meta = FrontmatterExtractor.extract(content).unwrap();

        assert_eq!(meta.tags, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_summary_prefers_frontmatter() {
        let content = "---\ndescription: A short tale\n---\n\nLong body text.";
        let meta = FrontmatterExtractor.extract(content).unwrap();

        assert_eq!(meta.summary.as_deref(), Some("A short tale"));
    }

    #[test]
    fn test_summary_is_truncated() {
        let content = "word ".repeat(100);
        let meta = FrontmatterExtractor.extract(&content).unwrap();
        let summary = meta.summary.unwrap();

        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_invalid_tags_field_is_an_error() {
        let content = "---\ntags:\n  nested: true\n---\nbody";
        let err = FrontmatterExtractor.extract(content).unwrap_err();

        assert!(err.to_string().contains("tags"));
    }

    #[test]
    fn test_plain_text_has_no_tags() {
        let meta = FrontmatterExtractor.extract("# Heading only\n\n").unwrap();

        assert!(meta.tags.is_empty());
        assert!(meta.summary.is_none());
    }
}
