//! DocumentStore trait abstraction for platform-independent persistence.
//!
//! Implementations:
//! - `InMemoryStore` - For testing, with failure injection
//! - `NativeStore` (in cowrite-daemon) - Markdown files plus a JSON index via tokio::fs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::metadata::DocumentMetadata;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Asynchronous persistence function for document content.
///
/// Failures are treated as transient by the autosave controller and retried.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist `content` for `document_id` with derived metadata
    async fn save(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()>;

    /// Load the last persisted content
    async fn load(&self, document_id: &str) -> Result<String>;
}

/// One recorded call to [`InMemoryStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCall {
    pub document_id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub succeeded: bool,
}

/// In-memory store for testing
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, (String, DocumentMetadata)>>,
    /// Every save attempt, in order
    calls: RwLock<Vec<SaveCall>>,
    /// Number of upcoming saves that should fail
    failures_remaining: RwLock<usize>,
    always_fail: RwLock<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failures_remaining: RwLock::new(0),
            always_fail: RwLock::new(false),
        }
    }

    /// Make the next `count` saves fail
    pub fn fail_next(&self, count: usize) {
        *self.failures_remaining.write().unwrap() = count;
    }

    /// Make every save fail until reset with `false`
    pub fn set_always_fail(&self, fail: bool) {
        *self.always_fail.write().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<SaveCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Currently stored content for a document
    pub fn content(&self, document_id: &str) -> Option<String> {
        let documents = self.documents.read().unwrap();
        documents.get(document_id).map(|(content, _)| content.clone())
    }

    pub fn metadata(&self, document_id: &str) -> Option<DocumentMetadata> {
        let documents = self.documents.read().unwrap();
        documents.get(document_id).map(|(_, meta)| meta.clone())
    }

    fn should_fail(&self) -> bool {
        if *self.always_fail.read().unwrap() {
            return true;
        }
        let mut remaining = self.failures_remaining.write().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn save(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        let failed = self.should_fail();

        self.calls.write().unwrap().push(SaveCall {
            document_id: document_id.to_string(),
            content: content.to_string(),
            metadata: metadata.clone(),
            succeeded: !failed,
        });

        if failed {
            return Err(StoreError::Unavailable(format!(
                "injected failure saving {document_id}"
            )));
        }

        let mut documents = self.documents.write().unwrap();
        documents.insert(
            document_id.to_string(),
            (content.to_string(), metadata.clone()),
        );
        Ok(())
    }

    async fn load(&self, document_id: &str) -> Result<String> {
        self.content(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }
}

// Implement DocumentStore for Arc<T> where T: DocumentStore
// This allows tests to keep a handle on the store they hand to a controller
#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn save(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        (**self).save(document_id, content, metadata).await
    }

    async fn load(&self, document_id: &str) -> Result<String> {
        (**self).load(document_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_store_save_and_load() {
        let store = InMemoryStore::new();
        let meta = DocumentMetadata {
            tags: vec!["draft".into()],
            summary: None,
        };

        store.save("doc-1", "hello", &meta).await.unwrap();

        assert_eq!(store.load("doc-1").await.unwrap(), "hello");
        assert_eq!(store.metadata("doc-1"), Some(meta));
        assert!(matches!(
            store.load("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_store_injected_failures() {
        let store = InMemoryStore::new();
        store.fail_next(2);

        assert!(store.save("doc", "a", &DocumentMetadata::default()).await.is_err());
        assert!(store.save("doc", "b", &DocumentMetadata::default()).await.is_err());
        assert!(store.save("doc", "c", &DocumentMetadata::default()).await.is_ok());

        let calls = store.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls[0].succeeded);
        assert!(calls[2].succeeded);
        assert_eq!(store.content("doc").as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_inmemory_store_always_fail() {
        let store = InMemoryStore::new();
        store.set_always_fail(true);

        for _ in 0..5 {
            assert!(store.save("doc", "x", &DocumentMetadata::default()).await.is_err());
        }
        assert!(store.content("doc").is_none());

        store.set_always_fail(false);
        assert!(store.save("doc", "x", &DocumentMetadata::default()).await.is_ok());
    }
}
