//! Character-level change detection between two text snapshots.
//!
//! Uses the `similar` crate's Myers diff over chars and folds the result into
//! a left-to-right list of insertions and deletions. Positions and lengths
//! are counted in chars, not bytes.
//!
//! Positions are expressed against the *resulting* stream: the cursor
//! advances over equal and inserted text but not over deleted text. Applying
//! the changes in order to the old text reproduces the new text exactly.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, TextDiff};

/// Kind of a single content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Addition,
    Deletion,
}

/// One insertion or deletion produced by [`compute_changes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Char offset in the running output stream
    pub position: usize,
    /// Inserted or deleted text
    pub content: String,
    /// Length of `content` in chars
    pub length: usize,
}

impl ContentChange {
    fn new(kind: ChangeKind, position: usize, content: String) -> Self {
        let length = content.chars().count();
        Self {
            kind,
            position,
            content,
            length,
        }
    }
}

/// Summary statistics for a diff
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of characters inserted
    pub chars_inserted: usize,
    /// Number of characters deleted
    pub chars_deleted: usize,
}

impl DiffSummary {
    pub fn from_changes(changes: &[ContentChange]) -> Self {
        changes
            .iter()
            .fold(Self::default(), |mut summary, change| {
                match change.kind {
                    ChangeKind::Addition => summary.chars_inserted += change.length,
                    ChangeKind::Deletion => summary.chars_deleted += change.length,
                }
                summary
            })
    }
}

/// Compute the minimal list of insertions/deletions turning `old` into `new`.
///
/// Identical inputs yield an empty list.
pub fn compute_changes(old: &str, new: &str) -> Vec<ContentChange> {
    if old == new {
        return Vec::new();
    }

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_chars(old, new);

    // Fold per-char changes into spans of the same tag.
    let mut spans: Vec<(ChangeTag, String)> = Vec::new();
    for change in diff.iter_all_changes() {
        match spans.last_mut() {
            Some((tag, text)) if *tag == change.tag() => text.push_str(change.value()),
            _ => spans.push((change.tag(), change.value().to_string())),
        }
    }

    let mut changes = Vec::new();
    let mut position = 0;
    for (tag, text) in spans {
        match tag {
            ChangeTag::Equal => position += text.chars().count(),
            ChangeTag::Insert => {
                let change = ContentChange::new(ChangeKind::Addition, position, text);
                position += change.length;
                changes.push(change);
            }
            // Deleted text is absent from the output, so the cursor stays put.
            ChangeTag::Delete => {
                changes.push(ContentChange::new(ChangeKind::Deletion, position, text));
            }
        }
    }

    changes
}

/// Apply changes from [`compute_changes`] to `old`, in order.
///
/// Out-of-range positions are clamped to the end of the text.
pub fn apply_changes(old: &str, changes: &[ContentChange]) -> String {
    let mut chars: Vec<char> = old.chars().collect();

    for change in changes {
        let start = change.position.min(chars.len());
        match change.kind {
            ChangeKind::Addition => {
                chars.splice(start..start, change.content.chars());
            }
            ChangeKind::Deletion => {
                let end = (start + change.length).min(chars.len());
                chars.drain(start..end);
            }
        }
    }

    chars.into_iter().collect()
}
