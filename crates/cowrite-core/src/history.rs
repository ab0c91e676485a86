//! Undo/redo history of whole-content snapshots.
//!
//! The manager owns an ordered list of entries and a cursor pointing at the
//! active snapshot. It never touches the live document itself: `undo` and
//! `redo` return the entry whose content the caller should restore.

use serde::{Deserialize, Serialize};

use crate::diff::ContentChange;
use crate::document::EditOrigin;
use crate::suggestion::Suggestion;

/// Default cap on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum number of entries kept; oldest are evicted first (default: 50)
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A recorded document state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: EditOrigin,
    /// Full document content after this step
    pub content: String,
    /// Changes relative to the previous entry, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<ContentChange>>,
    /// The suggestion that produced this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
    /// Milliseconds since Unix epoch
    pub timestamp: u64,
}

impl HistoryEntry {
    pub fn user_edit(content: String, changes: Vec<ContentChange>, timestamp: u64) -> Self {
        Self {
            kind: EditOrigin::UserEdit,
            content,
            changes: Some(changes),
            suggestion: None,
            timestamp,
        }
    }

    pub fn suggestion(content: String, suggestion: Suggestion, timestamp: u64) -> Self {
        Self {
            kind: EditOrigin::Suggestion,
            content,
            changes: None,
            suggestion: Some(suggestion),
            timestamp,
        }
    }
}

/// Linear undo/redo stack with a cursor.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    position: usize,
    max_entries: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            entries: Vec::new(),
            position: 0,
            max_entries: config.max_entries.max(1),
        }
    }

    /// Create a history whose first entry is the document's starting content.
    pub fn with_initial(config: HistoryConfig, content: String, timestamp: u64) -> Self {
        let mut history = Self::new(config);
        history.push(HistoryEntry::user_edit(content, Vec::new(), timestamp));
        history
    }

    /// Append an entry, discarding anything after the cursor.
    pub fn push(&mut self, entry: HistoryEntry) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.position + 1);
        }
        self.entries.push(entry);
        self.position = self.entries.len() - 1;

        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
            self.position -= excess;
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.entries.is_empty() && self.position < self.entries.len() - 1
    }

    /// Step the cursor back. Returns the entry to restore, or `None` at the boundary.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_undo() {
            return None;
        }
        self.position -= 1;
        self.entries.get(self.position)
    }

    /// Step the cursor forward. Returns the entry to restore, or `None` at the boundary.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        self.position += 1;
        self.entries.get(self.position)
    }

    /// The entry at the cursor.
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str, timestamp: u64) -> HistoryEntry {
        HistoryEntry::user_edit(content.to_string(), Vec::new(), timestamp)
    }

    fn history_with(contents: &[&str], max_entries: usize) -> HistoryManager {
        let mut history = HistoryManager::new(HistoryConfig { max_entries });
        for (i, content) in contents.iter().enumerate() {
            history.push(entry(content, i as u64));
        }
        history
    }

    fn current_content(history: &HistoryManager) -> &str {
        history.current().map(|e| e.content.as_str()).unwrap_or("")
    }

    #[test]
    fn test_empty_history_has_nothing_to_do() {
        let mut history = HistoryManager::default();

        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_undo_redo_single_step() {
        let mut history = history_with(&["a", "ab"], 50);

        assert!(history.can_undo());
        assert_eq!(history.undo().unwrap().content, "a");
        assert!(!history.can_undo());
        assert!(history.can_redo());

        assert_eq!(history.redo().unwrap().content, "ab");
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_redo_symmetry() {
        let mut history = history_with(&["", "h", "he", "hel", "hell", "hello"], 50);

        for k in 1..=5 {
            let before = current_content(&history).to_string();
            for _ in 0..k {
                assert!(history.undo().is_some());
            }
            for _ in 0..k {
                assert!(history.redo().is_some());
            }
            assert_eq!(current_content(&history), before);
            assert!(!history.can_redo());
        }
    }

    #[test]
    fn test_push_after_undo_discards_redo_branch() {
        let mut history = history_with(&["a", "ab", "abc"], 50);

        history.undo();
        history.undo();
        history.push(entry("ax", 10));

        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(current_content(&history), "ax");
        assert_eq!(history.undo().unwrap().content, "a");
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let contents: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
        let mut history = history_with(&refs, 3);

        assert_eq!(history.len(), 3);
        assert_eq!(history.position(), 2);
        assert_eq!(current_content(&history), "9");

        assert_eq!(history.undo().unwrap().content, "8");
        assert_eq!(history.undo().unwrap().content, "7");
        assert!(!history.can_undo());
        assert!(history.undo().is_none());
    }

    #[test]
    fn test_cap_rebases_cursor_after_truncating_push() {
        let mut history = history_with(&["a", "b", "c"], 3);

        // Cursor on "b"; the push drops "c", then "a" is still within the cap.
        history.undo();
        history.push(entry("d", 5));
        assert_eq!(history.len(), 3);
        assert_eq!(current_content(&history), "d");

        history.push(entry("e", 6));
        assert_eq!(history.len(), 3);
        assert_eq!(history.position(), 2);
        assert_eq!(history.entries()[0].content, "b");
        assert!(history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_with_initial_snapshot() {
        let mut history = HistoryManager::with_initial(HistoryConfig::default(), "start".into(), 0);
        history.push(entry("start!", 1));

        assert_eq!(history.undo().unwrap().content, "start");
        assert!(!history.can_undo());
    }
}
