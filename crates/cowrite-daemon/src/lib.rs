//! cowrite-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive drafts without a file watcher.

pub mod config;
pub mod drafts;
pub mod native_store;
pub mod persistence;
pub mod watcher;

// Re-export key types for convenience
pub use config::{ConflictPolicy, DaemonConfig};
pub use drafts::DraftDaemon;
pub use native_store::NativeStore;
pub use persistence::{DraftIndex, PersistedDraft};
pub use watcher::{DraftWatcher, FileEvent, FileEventKind, WatchTarget};
