//! Frontmatter splitting for markdown drafts.
//!
//! Drafts may start with a YAML block delimited by `---`; the metadata
//! extractor reads tags and summaries from it.

use std::collections::HashMap;

/// Parsed markdown document
#[derive(Debug, Clone)]
pub struct ParsedMarkdown {
    /// Frontmatter as key-value pairs (None if no frontmatter)
    pub frontmatter: Option<HashMap<String, serde_yaml::Value>>,
    /// Markdown body (everything after frontmatter)
    pub body: String,
}

impl ParsedMarkdown {
    /// Look up a frontmatter field.
    pub fn field(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.frontmatter.as_ref().and_then(|fm| fm.get(key))
    }
}

/// Split a draft into frontmatter and body.
///
/// Frontmatter must be delimited by `---` at the start of the file:
/// ```markdown
/// ---
/// title: Chapter One
/// tags: [draft, fiction]
/// ---
///
/// # Content here
/// ```
pub fn parse(content: &str) -> ParsedMarkdown {
    let Some(rest) = content.strip_prefix("---") else {
        return ParsedMarkdown {
            frontmatter: None,
            body: content.to_string(),
        };
    };

    let Some(pos) = rest.find("\n---") else {
        // No closing delimiter, treat entire content as body
        return ParsedMarkdown {
            frontmatter: None,
            body: content.to_string(),
        };
    };

    let yaml_content = rest[..pos].trim();
    let body = rest[pos + 4..].trim_start_matches('\n').to_string();

    let frontmatter = match serde_yaml::from_str::<HashMap<String, serde_yaml::Value>>(yaml_content)
    {
        Ok(fm) if !fm.is_empty() => Some(fm),
        Ok(_) => None,  // Empty frontmatter
        Err(_) => None, // Invalid YAML, treat as no frontmatter
    };

    ParsedMarkdown { frontmatter, body }
}
