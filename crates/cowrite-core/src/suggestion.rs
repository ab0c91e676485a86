//! AI suggestions and where they land in a document.
//!
//! Placement priority:
//! 1. `position` set: insert at that char offset (clamped to the end)
//! 2. `original_text` set: replace its first occurrence, or append if absent
//! 3. otherwise: append at the end

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::document::char_offset;

/// Default grace period before a divergent document needs conflict arbitration.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ResolverError(pub String);

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("Conflict resolver failed: {0}")]
    Resolver(#[from] ResolverError),
}

pub type Result<T> = std::result::Result<T, SuggestionError>;

#[derive(Debug, Clone)]
pub struct SuggestionConfig {
    /// Time since the last sync point after which divergence is arbitrated (default: 2s)
    pub staleness_threshold: Duration,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
        }
    }
}

/// A suggested edit from the AI source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    /// Text to insert
    pub content: String,
    /// Char offset to insert at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Existing text to replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Milliseconds since Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Suggestion {
    /// Suggestion that appends `content` at the end of the document.
    pub fn append(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            position: None,
            original_text: None,
            description: None,
            timestamp: None,
        }
    }

    pub fn at_position(id: impl Into<String>, content: impl Into<String>, position: usize) -> Self {
        Self {
            position: Some(position),
            ..Self::append(id, content)
        }
    }

    pub fn replacing(
        id: impl Into<String>,
        content: impl Into<String>,
        original_text: impl Into<String>,
    ) -> Self {
        Self {
            original_text: Some(original_text.into()),
            ..Self::append(id, content)
        }
    }
}

/// Where a suggestion was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Inserted at a char offset
    AtPosition(usize),
    /// Replaced `length` chars at `position`
    Replaced { position: usize, length: usize },
    /// Appended at the end; `fallback` when `original_text` was not found
    Appended { fallback: bool },
}

/// Char range of the first occurrence of `needle` in `content`.
pub fn find_text_in_document(content: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    content.find(needle).map(|byte| {
        let start = char_offset(content, byte);
        start..start + needle.chars().count()
    })
}

/// Resolve the char range a suggestion replaces in `content`.
pub fn place_suggestion(content: &str, suggestion: &Suggestion) -> (Range<usize>, Placement) {
    let end = content.chars().count();

    if let Some(position) = suggestion.position {
        let position = position.min(end);
        return (position..position, Placement::AtPosition(position));
    }

    match suggestion.original_text.as_deref() {
        Some(original) if !original.is_empty() => match find_text_in_document(content, original) {
            Some(range) => {
                let placement = Placement::Replaced {
                    position: range.start,
                    length: range.len(),
                };
                (range, placement)
            }
            None => (end..end, Placement::Appended { fallback: true }),
        },
        _ => (end..end, Placement::Appended { fallback: false }),
    }
}

/// Decides whether a suggestion may be applied over unseen edits.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// `true` applies the suggestion, `false` drops it.
    async fn resolve(
        &self,
        current_content: &str,
        suggestion: &Suggestion,
    ) -> std::result::Result<bool, ResolverError>;
}

/// Always applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl ConflictResolver for AcceptAll {
    async fn resolve(&self, _: &str, _: &Suggestion) -> std::result::Result<bool, ResolverError> {
        Ok(true)
    }
}

/// Always drops.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

#[async_trait]
impl ConflictResolver for RejectAll {
    async fn resolve(&self, _: &str, _: &Suggestion) -> std::result::Result<bool, ResolverError> {
        Ok(false)
    }
}

/// A pending conflict decision delivered to the UI.
#[derive(Debug)]
pub struct ConflictRequest {
    pub current_content: String,
    pub suggestion: Suggestion,
    reply: oneshot::Sender<bool>,
}

impl ConflictRequest {
    pub fn accept(self) {
        let _ = self.reply.send(true);
    }

    pub fn reject(self) {
        let _ = self.reply.send(false);
    }
}

/// Forwards each conflict over a channel and waits for the reader's answer.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    tx: mpsc::Sender<ConflictRequest>,
}

impl ChannelResolver {
    /// Create a resolver and the receiver the UI reads decisions from.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ConflictRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConflictResolver for ChannelResolver {
    async fn resolve(
        &self,
        current_content: &str,
        suggestion: &Suggestion,
    ) -> std::result::Result<bool, ResolverError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(ConflictRequest {
                current_content: current_content.to_string(),
                suggestion: suggestion.clone(),
                reply,
            })
            .await
            .map_err(|_| ResolverError("conflict channel closed".into()))?;

        answer
            .await
            .map_err(|_| ResolverError("conflict request dropped without an answer".into()))
    }
}
