//! File watcher with debouncing for the drafts directory.
//!
//! Uses notify-debouncer-mini for efficient file change detection.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Suffix of files that drop suggestions for a draft.
pub const SUGGESTIONS_SUFFIX: &str = ".suggestions.json";

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to the drafts root
    pub path: String,
    pub kind: FileEventKind,
    pub target: WatchTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// What kind of file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// A markdown draft
    Draft,
    /// A `<draft>.suggestions.json` drop file
    Suggestions,
}

impl WatchTarget {
    /// Classify a path relative to the drafts root. Hidden paths are ignored.
    pub fn classify(relative: &str) -> Option<Self> {
        if relative.starts_with('.') || relative.contains("/.") {
            return None;
        }

        if relative.ends_with(SUGGESTIONS_SUFFIX) {
            Some(WatchTarget::Suggestions)
        } else if relative.ends_with(".md") {
            Some(WatchTarget::Draft)
        } else {
            None
        }
    }
}

/// Document id for a draft or suggestions path relative to the drafts root.
pub fn document_id(relative: &str) -> Option<&str> {
    relative
        .strip_suffix(SUGGESTIONS_SUFFIX)
        .or_else(|| relative.strip_suffix(".md"))
        .filter(|id| !id.is_empty())
}

/// Watches the drafts directory.
pub struct DraftWatcher {
    drafts_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Track last seen mtime to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

impl DraftWatcher {
    /// Create a new watcher for the drafts directory.
    ///
    /// Uses 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(drafts_path: PathBuf) -> Result<Self> {
        // FSEvents needs the real path (/var -> /private/var on macOS).
        let drafts_path = drafts_path.canonicalize().unwrap_or(drafts_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = drafts_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event, &root, &mtime_cache)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&drafts_path, RecursiveMode::Recursive)?;

        Ok(Self {
            drafts_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(
        event: &DebouncedEvent,
        drafts_path: &Path,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(drafts_path).ok()?;
        let relative_str = relative.to_str()?;
        let target = WatchTarget::classify(relative_str)?;

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        let relative_path = relative.to_path_buf();
        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            FileEventKind::Modified => {
                if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
                    if cache.get(&relative_path) == Some(&mtime) {
                        // Mtime unchanged - spurious event
                        return None;
                    }
                    cache.insert(relative_path, mtime);
                }
            }
            FileEventKind::Deleted => {
                cache.remove(&relative_path);
            }
        }

        debug!("File event: {:?} {:?} - {}", kind, target, relative_str);

        Some(FileEvent {
            path: relative_str.to_string(),
            kind,
            target,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn drafts_path(&self) -> &Path {
        &self.drafts_path
    }
}
