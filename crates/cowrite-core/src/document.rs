//! The live document seam.
//!
//! The rich-text widget is external; the core only sees it through
//! [`EditSurface`], which reads the whole content and replaces a char range.
//! [`SharedDocument`] is a plain in-memory surface used by the daemon and tests.

use std::ops::Range;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Who produced a document state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditOrigin {
    UserEdit,
    Suggestion,
}

/// Immutable content plus when and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub content: String,
    /// Milliseconds since Unix epoch
    pub timestamp: u64,
    pub origin: EditOrigin,
}

impl ContentSnapshot {
    pub fn new(content: impl Into<String>, timestamp: u64, origin: EditOrigin) -> Self {
        Self {
            content: content.into(),
            timestamp,
            origin,
        }
    }
}

/// Transactional edit API of the external editor.
///
/// Ranges are char offsets into the current content.
pub trait EditSurface: Send + Sync {
    /// Current full content.
    fn content(&self) -> String;

    /// Replace `range` with `text`.
    fn replace(&self, range: Range<usize>, text: &str);

    /// Replace the whole document.
    fn set_content(&self, content: &str) {
        let len = self.content().chars().count();
        self.replace(0..len, content);
    }
}

/// Produce new content with the char `range` of `content` replaced by `text`.
///
/// The range is clamped to the content length.
pub fn replace_range(content: &str, range: Range<usize>, text: &str) -> String {
    let start = byte_offset(content, range.start);
    let end = byte_offset(content, range.end.max(range.start));

    let mut result = String::with_capacity(content.len() - (end - start) + text.len());
    result.push_str(&content[..start]);
    result.push_str(text);
    result.push_str(&content[end..]);
    result
}

/// Byte offset of the char at `char_offset`, clamped to the end.
pub fn byte_offset(content: &str, char_offset: usize) -> usize {
    content
        .char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(content.len())
}

/// Char offset of a byte offset on a char boundary.
pub fn char_offset(content: &str, byte_offset: usize) -> usize {
    content[..byte_offset].chars().count()
}

/// In-memory [`EditSurface`].
#[derive(Debug, Default)]
pub struct SharedDocument {
    text: RwLock<String>,
}

impl SharedDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            text: RwLock::new(content.into()),
        }
    }
}

impl EditSurface for SharedDocument {
    fn content(&self) -> String {
        self.text.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace(&self, range: Range<usize>, text: &str) {
        let mut guard = self.text.write().unwrap_or_else(|e| e.into_inner());
        *guard = replace_range(&guard, range, text);
    }

    fn set_content(&self, content: &str) {
        let mut guard = self.text.write().unwrap_or_else(|e| e.into_inner());
        *guard = content.to_string();
    }
}
