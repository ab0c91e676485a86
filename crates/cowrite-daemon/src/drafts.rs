//! Draft sessions driven by on-disk changes.
//!
//! Every markdown draft under the drafts directory gets a [`DraftSession`].
//! Disk changes are fed through the session as user edits, so they are
//! diffed, recorded in history and autosaved to the store. A
//! `<draft>.suggestions.json` file holds suggestions to apply to `<draft>.md`;
//! results are written back to the draft and the drop file is removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};

use cowrite_core::{
    ApplyOutcome, AutosaveController, Clock, ConflictResolver, DocumentStore, DraftSession,
    EditSurface, FrontmatterExtractor, SaveOutcome, SessionConfig, SharedDocument, Suggestion,
};

use crate::config::DaemonConfig;
use crate::native_store::NativeStore;
use crate::watcher::{document_id, FileEvent, FileEventKind, WatchTarget};

struct OpenDraft {
    document: Arc<SharedDocument>,
    session: DraftSession,
}

/// Owns one session per open draft plus the shared autosave controller.
pub struct DraftDaemon {
    drafts_path: PathBuf,
    store: Arc<NativeStore>,
    autosave: AutosaveController,
    clock: Arc<dyn Clock>,
    session_config: SessionConfig,
    resolver: Arc<dyn ConflictResolver>,
    drafts: HashMap<String, OpenDraft>,
}

impl DraftDaemon {
    pub fn new(
        drafts_path: PathBuf,
        store: Arc<NativeStore>,
        config: &DaemonConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let autosave = AutosaveController::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(FrontmatterExtractor),
            Arc::clone(&clock),
            config.autosave_config(),
        );

        Self {
            drafts_path,
            store,
            autosave,
            clock,
            session_config: config.session_config(),
            resolver: config.resolver(),
            drafts: HashMap::new(),
        }
    }

    pub fn autosave(&self) -> &AutosaveController {
        &self.autosave
    }

    pub fn store(&self) -> &NativeStore {
        &self.store
    }

    /// The session for `id`, if the draft is open.
    pub fn session(&self, id: &str) -> Option<&DraftSession> {
        self.drafts.get(id).map(|draft| &draft.session)
    }

    pub fn open_count(&self) -> usize {
        self.drafts.len()
    }

    /// Open every draft under the drafts directory, queueing saves for those
    /// that changed since they were last stored.
    pub async fn scan(&mut self) -> Result<usize> {
        let mut pending = vec![self.drafts_path.clone()];
        let mut drafts = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read drafts directory {:?}", dir))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if !entry.file_name().to_string_lossy().starts_with('.') {
                        pending.push(path);
                    }
                    continue;
                }

                if let Some(relative) = self.relative(&path) {
                    if WatchTarget::classify(&relative) == Some(WatchTarget::Draft) {
                        drafts.push(relative);
                    }
                }
            }
        }

        drafts.sort();
        for relative in &drafts {
            self.on_draft_modified(relative).await?;
        }

        info!("Opened {} draft(s)", drafts.len());
        Ok(drafts.len())
    }

    /// Route a watcher event.
    pub async fn on_file_event(&mut self, event: FileEvent) -> Result<()> {
        match (event.target, event.kind) {
            (WatchTarget::Draft, FileEventKind::Modified) => {
                self.on_draft_modified(&event.path).await
            }
            (WatchTarget::Draft, FileEventKind::Deleted) => self.on_draft_deleted(&event.path),
            (WatchTarget::Suggestions, FileEventKind::Modified) => {
                self.on_suggestions(&event.path).await
            }
            // Our own cleanup after applying a suggestions file.
            (WatchTarget::Suggestions, FileEventKind::Deleted) => Ok(()),
        }
    }

    /// Feed the on-disk content of a draft through its session.
    pub async fn on_draft_modified(&mut self, relative: &str) -> Result<()> {
        let Some(id) = document_id(relative).map(str::to_string) else {
            return Ok(());
        };

        let content = match fs::read_to_string(self.drafts_path.join(relative)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Draft {} vanished before it could be read", relative);
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read draft {}", relative)),
        };

        match self.drafts.get(&id) {
            Some(draft) => {
                if draft.document.content() == content {
                    // Our own write-back, or a touch without changes.
                    debug!("Skipping {} (content unchanged)", relative);
                    return Ok(());
                }
                draft.document.set_content(&content);
                let changes = draft.session.record_user_edit();
                debug!("Recorded {} change(s) in {}", changes.len(), id);
            }
            None => {
                let stale = !self.store.is_current(&id, &content);
                let draft = self.open(&id, &content);
                if stale {
                    debug!("Draft {} differs from the store, queueing save", id);
                    let _ = draft.session.rearm_save();
                }
            }
        }

        Ok(())
    }

    /// Forget a deleted draft: drop its pending save and its index record.
    pub fn on_draft_deleted(&mut self, relative: &str) -> Result<()> {
        let Some(id) = document_id(relative) else {
            return Ok(());
        };

        if self.drafts.remove(id).is_some() {
            info!("Draft {} deleted, closing session", id);
            self.autosave.cancel_save(id);
        }
        self.store
            .forget(id)
            .with_context(|| format!("Failed to drop index record for {}", id))
    }

    /// Apply a suggestions drop file to its draft.
    pub async fn on_suggestions(&mut self, relative: &str) -> Result<()> {
        let Some(id) = document_id(relative).map(str::to_string) else {
            return Ok(());
        };
        let suggestions_path = self.drafts_path.join(relative);
        let draft_relative = format!("{}.md", id);
        let draft_path = self.drafts_path.join(&draft_relative);

        let raw = match fs::read_to_string(&suggestions_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", relative));
            }
        };
        let suggestions: Vec<Suggestion> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid suggestions file {}", relative))?;

        let on_disk = fs::read_to_string(&draft_path)
            .await
            .with_context(|| format!("No draft {} for {}", draft_relative, relative))?;

        if !self.drafts.contains_key(&id) {
            self.open(&id, &on_disk);
        }
        let Some(draft) = self.drafts.get(&id) else {
            return Ok(());
        };

        // Edits the session has not recorded yet stay unseen until the
        // suggestions are settled, so stale divergence is arbitrated.
        if draft.document.content() != on_disk {
            draft.document.set_content(&on_disk);
        }

        let mut applied = 0;
        for suggestion in &suggestions {
            match draft.session.apply_suggestion(suggestion).await {
                Ok(ApplyOutcome::Applied { placement, .. }) => {
                    debug!("Suggestion {} placed {:?}", suggestion.id, placement);
                    applied += 1;
                }
                Ok(ApplyOutcome::Rejected) => {
                    info!("Suggestion {} for {} rejected", suggestion.id, id);
                }
                Err(e) => warn!("Suggestion {} for {} failed: {}", suggestion.id, id, e),
            }
        }

        // Whatever remains unrecorded is the user's own edit.
        draft.session.record_user_edit();

        if applied > 0 {
            let content = draft.document.content();
            fs::write(&draft_path, &content)
                .await
                .with_context(|| format!("Failed to write back {}", draft_relative))?;
        }

        fs::remove_file(&suggestions_path)
            .await
            .with_context(|| format!("Failed to remove {}", relative))?;

        info!(
            "Applied {}/{} suggestion(s) to {}",
            applied,
            suggestions.len(),
            id
        );
        Ok(())
    }

    /// Save everything queued now.
    pub async fn flush(&self) -> Vec<(String, SaveOutcome)> {
        self.autosave.flush_all().await
    }

    /// Flush pending saves and stop all timers.
    pub async fn shutdown(&mut self) {
        for (id, outcome) in self.flush().await {
            match outcome {
                SaveOutcome::Failed { error } => {
                    warn!("Could not save {} before shutdown: {}", id, error)
                }
                outcome => debug!("Flushed {}: {:?}", id, outcome),
            }
        }
        self.autosave.dispose();
        self.drafts.clear();
    }

    fn open(&mut self, id: &str, content: &str) -> &OpenDraft {
        let document = Arc::new(SharedDocument::new(content));
        let session = DraftSession::new(
            id,
            Arc::clone(&document) as Arc<dyn EditSurface>,
            self.autosave.clone(),
            Arc::clone(&self.clock),
            self.session_config.clone(),
        )
        .with_resolver(Arc::clone(&self.resolver));

        debug!("Opened draft {}", id);
        self.drafts
            .entry(id.to_string())
            .or_insert(OpenDraft { document, session })
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.drafts_path).ok()?;
        Some(relative.to_str()?.replace('\\', "/"))
    }
}
