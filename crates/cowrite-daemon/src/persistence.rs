//! Index of persisted drafts.
//!
//! Records what was last saved for every draft so restarts can tell which
//! drafts changed while the daemon was down. Stored in
//! `.cowrite/index.json` within the store directory.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use cowrite_core::DocumentMetadata;

/// SHA-256 of `content`, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// What was saved for one draft.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedDraft {
    pub id: String,
    /// Last successful save (unix timestamp ms)
    pub saved_at: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub content_hash: String,
}

impl PersistedDraft {
    pub fn new(id: &str, content: &str, metadata: &DocumentMetadata, now_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            saved_at: now_ms,
            tags: metadata.tags.clone(),
            summary: metadata.summary.clone(),
            content_hash: content_hash(content),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedDrafts {
    pub drafts: Vec<PersistedDraft>,
}

impl PersistedDrafts {
    /// Add or replace the record for a draft.
    pub fn upsert(&mut self, draft: PersistedDraft) {
        match self.drafts.iter_mut().find(|d| d.id == draft.id) {
            Some(existing) => *existing = draft,
            None => self.drafts.push(draft),
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.drafts.retain(|d| d.id != id);
    }

    pub fn get(&self, id: &str) -> Option<&PersistedDraft> {
        self.drafts.iter().find(|d| d.id == id)
    }
}

/// On-disk draft index.
pub struct DraftIndex {
    path: PathBuf,
    drafts: PersistedDrafts,
}

impl DraftIndex {
    /// Open the index under `store_path`, loading any existing records.
    pub fn new(store_path: &Path) -> Self {
        let path = store_path.join(".cowrite").join("index.json");

        let mut index = Self {
            path,
            drafts: PersistedDrafts::default(),
        };

        match index.load() {
            Ok(loaded) => index.drafts = loaded,
            Err(e) => tracing::warn!("Ignoring unreadable draft index {:?}: {}", index.path, e),
        }

        index
    }

    pub fn load(&self) -> Result<PersistedDrafts> {
        if !self.path.exists() {
            return Ok(PersistedDrafts::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let drafts: PersistedDrafts = serde_json::from_str(&contents)?;
        Ok(drafts)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.drafts)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn upsert(&mut self, draft: PersistedDraft) -> Result<()> {
        self.drafts.upsert(draft);
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.drafts.remove(id);
        self.save()
    }

    pub fn get(&self, id: &str) -> Option<&PersistedDraft> {
        self.drafts.get(id)
    }

    /// Whether `content` is exactly what was last saved for `id`.
    pub fn is_current(&self, id: &str, content: &str) -> bool {
        self.get(id)
            .is_some_and(|draft| draft.content_hash == content_hash(content))
    }

    pub fn all(&self) -> &[PersistedDraft] {
        &self.drafts.drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata(tags: &[&str]) -> DocumentMetadata {
        DocumentMetadata {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            summary: Some("A draft.".into()),
        }
    }

    #[test]
    fn test_upsert_replaces_existing_record() {
        let mut drafts = PersistedDrafts::default();

        drafts.upsert(PersistedDraft::new("essay", "v1", &metadata(&["a"]), 1000));
        drafts.upsert(PersistedDraft::new("essay", "v2", &metadata(&["b"]), 2000));

        assert_eq!(drafts.drafts.len(), 1);
        let record = drafts.get("essay").unwrap();
        assert_eq!(record.saved_at, 2000);
        assert_eq!(record.tags, vec!["b".to_string()]);
        assert_eq!(record.content_hash, content_hash("v2"));
    }

    #[test]
    fn test_index_survives_restart() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut index = DraftIndex::new(temp_dir.path());
            index
                .upsert(PersistedDraft::new("one", "first", &metadata(&[]), 1))
                .unwrap();
            index
                .upsert(PersistedDraft::new("two", "second", &metadata(&["x"]), 2))
                .unwrap();
        }

        let index_file = temp_dir.path().join(".cowrite/index.json");
        assert!(index_file.exists());

        let index = DraftIndex::new(temp_dir.path());
        assert_eq!(index.all().len(), 2);
        assert!(index.is_current("one", "first"));
        assert!(!index.is_current("one", "first, edited"));
        assert!(!index.is_current("missing", "first"));
    }

    #[test]
    fn test_remove_drops_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = DraftIndex::new(temp_dir.path());

        index
            .upsert(PersistedDraft::new("gone", "text", &metadata(&[]), 1))
            .unwrap();
        index.remove("gone").unwrap();

        assert!(DraftIndex::new(temp_dir.path()).get("gone").is_none());
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join(".cowrite");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.json"), "garbage").unwrap();

        let index = DraftIndex::new(temp_dir.path());
        assert!(index.all().is_empty());
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        assert_eq!(content_hash("test").len(), 64);
        assert_eq!(content_hash("same"), content_hash("same"));
    }
}
