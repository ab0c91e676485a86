//! cowrite-core: synchronization core for co-authoring a document with an AI assistant.
//!
//! This crate provides:
//! - Change detection between document versions
//! - Undo/redo history of content snapshots
//! - Suggestion placement with conflict arbitration
//! - Debounced, retried autosave with status notifications
//! - A cache and per-user rate limiter in front of the suggestion source

pub mod autosave;
pub mod cache;
pub mod clock;
pub mod diff;
pub mod document;
pub mod events;
pub mod history;
pub mod markdown;
pub mod metadata;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod store;
pub mod suggestion;

pub use autosave::{AutosaveConfig, AutosaveController, RetryPolicy, SaveHandle, SaveOutcome, SavePhase};
pub use cache::{CacheConfig, SuggestionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use diff::{apply_changes, compute_changes, ChangeKind, ContentChange, DiffSummary};
pub use document::{ContentSnapshot, EditOrigin, EditSurface, SharedDocument};
pub use events::{SaveStatus, StatusBus, StatusEvent, Subscription};
pub use history::{HistoryConfig, HistoryEntry, HistoryManager};
pub use metadata::{DocumentMetadata, FrontmatterExtractor, MetadataExtractor, NoMetadata};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use service::{SuggestionRequest, SuggestionService, SuggestionServiceError, SuggestionSource};
pub use session::{ApplyOutcome, DraftSession, SessionConfig};
pub use store::{DocumentStore, InMemoryStore, StoreError};
pub use suggestion::{
    AcceptAll, ChannelResolver, ConflictRequest, ConflictResolver, Placement, RejectAll,
    Suggestion, SuggestionConfig, SuggestionError,
};
