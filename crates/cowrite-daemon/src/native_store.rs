//! Native draft store using tokio::fs.
//!
//! Each document is written to `<store>/<id>.md`; the draft index under
//! `<store>/.cowrite/` records what was saved and when.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

use cowrite_core::store::{DocumentStore, Result, StoreError};
use cowrite_core::{Clock, DocumentMetadata, SystemClock};

use crate::persistence::{DraftIndex, PersistedDraft};

/// Filesystem-backed [`DocumentStore`] for the daemon
pub struct NativeStore {
    base_path: PathBuf,
    index: Mutex<DraftIndex>,
    clock: Arc<dyn Clock>,
}

impl NativeStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self::with_clock(base_path, Arc::new(SystemClock))
    }

    pub fn with_clock(base_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let index = DraftIndex::new(&base_path);
        Self {
            base_path,
            index: Mutex::new(index),
            clock,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, document_id: &str) -> PathBuf {
        self.base_path.join(format!("{document_id}.md"))
    }

    /// Whether `content` matches the last save recorded for `document_id`.
    pub fn is_current(&self, document_id: &str, content: &str) -> bool {
        self.lock_index().is_current(document_id, content)
    }

    /// Drop the index record for `document_id`. The stored file is kept.
    pub fn forget(&self, document_id: &str) -> Result<()> {
        self.lock_index()
            .remove(document_id)
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// The index record for `document_id`, if it was ever saved.
    pub fn record(&self, document_id: &str) -> Option<PersistedDraft> {
        self.lock_index().get(document_id).cloned()
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, DraftIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for NativeStore {
    async fn save(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        let full_path = self.full_path(document_id);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let record = PersistedDraft::new(document_id, content, metadata, self.clock.now_ms());
        self.lock_index()
            .upsert(record)
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn load(&self, document_id: &str) -> Result<String> {
        let full_path = self.full_path(document_id);
        fs::read_to_string(&full_path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(document_id.to_string()),
            _ => StoreError::Io(e.to_string()),
        })
    }
}
