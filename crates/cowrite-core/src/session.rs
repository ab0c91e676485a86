//! DraftSession: one live document with history, suggestions and autosave.
//!
//! Both paths end the same way:
//!
//! - user edit: diff against the last sync point, record history, queue save
//! - suggestion: arbitrate divergence if stale, mutate, record history, queue save
//!
//! While a suggestion (or an undo/redo) mutates the document the session
//! raises a reentrancy flag, so change notifications fired by that mutation
//! are not recorded as user edits. Suggestion application and undo/redo are
//! further serialized by a per-session async lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::autosave::{AutosaveController, SaveHandle, SaveOutcome};
use crate::clock::Clock;
use crate::diff::{compute_changes, ContentChange};
use crate::document::{ContentSnapshot, EditOrigin, EditSurface};
use crate::history::{HistoryConfig, HistoryEntry, HistoryManager};
use crate::suggestion::{
    place_suggestion, ConflictResolver, Placement, Result, Suggestion, SuggestionConfig,
};

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub history: HistoryConfig,
    pub suggestion: SuggestionConfig,
}

/// Result of [`DraftSession::apply_suggestion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The document now holds `content`
    Applied { placement: Placement, content: String },
    /// The conflict resolver declined; nothing changed
    Rejected,
}

/// Raises the reentrancy flag for the lifetime of the guard.
struct ApplyingGuard<'a>(&'a AtomicBool);

impl<'a> ApplyingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A single editing session over one document.
pub struct DraftSession {
    document_id: String,
    surface: Arc<dyn EditSurface>,
    autosave: AutosaveController,
    clock: Arc<dyn Clock>,
    config: SuggestionConfig,
    resolver: Option<Arc<dyn ConflictResolver>>,
    history: Mutex<HistoryManager>,
    /// Last content the session knows it is in sync with
    sync_point: Mutex<ContentSnapshot>,
    applying: AtomicBool,
    edit_lock: tokio::sync::Mutex<()>,
}

impl DraftSession {
    pub fn new(
        document_id: impl Into<String>,
        surface: Arc<dyn EditSurface>,
        autosave: AutosaveController,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let now = clock.now_ms();
        let initial = surface.content();

        Self {
            document_id: document_id.into(),
            history: Mutex::new(HistoryManager::with_initial(
                config.history,
                initial.clone(),
                now,
            )),
            sync_point: Mutex::new(ContentSnapshot::new(initial, now, EditOrigin::UserEdit)),
            surface,
            autosave,
            clock,
            config: config.suggestion,
            resolver: None,
            applying: AtomicBool::new(false),
            edit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Arbitrate stale divergence with `resolver` before applying suggestions.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn autosave(&self) -> &AutosaveController {
        &self.autosave
    }

    /// The last synchronized snapshot.
    pub fn snapshot(&self) -> ContentSnapshot {
        self.sync_point.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }

    pub fn can_undo(&self) -> bool {
        self.lock_history().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.lock_history().can_redo()
    }

    /// Record whatever the user changed since the last sync point.
    ///
    /// Returns the detected changes; an empty list means nothing was recorded
    /// (no change, or the change came from the session's own mutation).
    /// Must run inside a tokio runtime since it arms the autosave timer.
    pub fn record_user_edit(&self) -> Vec<ContentChange> {
        if self.applying.load(Ordering::SeqCst) {
            debug!("Ignoring change notification during internal mutation");
            return Vec::new();
        }

        let current = self.surface.content();
        let changes = {
            let mut sync_point = self.sync_point.lock().unwrap_or_else(|e| e.into_inner());
            let changes = compute_changes(&sync_point.content, &current);
            if changes.is_empty() {
                return changes;
            }

            let now = self.clock.now_ms();
            self.lock_history().push(HistoryEntry::user_edit(
                current.clone(),
                changes.clone(),
                now,
            ));
            *sync_point = ContentSnapshot::new(current.clone(), now, EditOrigin::UserEdit);
            changes
        };

        debug!(
            "Recorded {} change(s) for {}",
            changes.len(),
            self.document_id
        );
        self.autosave.queue_save(&self.document_id, &current);
        changes
    }

    /// Merge a suggestion into the live document.
    ///
    /// If the last sync point is older than the staleness threshold and the
    /// live content has diverged from it, the configured resolver decides
    /// first. Resolver failures are returned and leave the document untouched.
    pub async fn apply_suggestion(&self, suggestion: &Suggestion) -> Result<ApplyOutcome> {
        let _edit = self.edit_lock.lock().await;

        if let Some(resolver) = &self.resolver {
            let sync_point = self.snapshot();
            let elapsed = self.clock.now_ms().saturating_sub(sync_point.timestamp);

            if elapsed > self.config.staleness_threshold.as_millis() as u64 {
                let current = self.surface.content();
                if current != sync_point.content {
                    info!(
                        "Document {} diverged {}ms after last sync; arbitrating suggestion {}",
                        self.document_id, elapsed, suggestion.id
                    );
                    if !resolver.resolve(&current, suggestion).await? {
                        info!("Suggestion {} rejected by conflict resolver", suggestion.id);
                        return Ok(ApplyOutcome::Rejected);
                    }
                }
            }
        }

        let (content, placement) = {
            let _applying = ApplyingGuard::raise(&self.applying);
            let current = self.surface.content();
            let (range, placement) = place_suggestion(&current, suggestion);
            self.surface.replace(range, &suggestion.content);
            (self.surface.content(), placement)
        };

        if placement == (Placement::Appended { fallback: true }) {
            debug!(
                "Original text for suggestion {} not found; appended instead",
                suggestion.id
            );
        }

        let now = self.clock.now_ms();
        self.lock_history().push(HistoryEntry::suggestion(
            content.clone(),
            suggestion.clone(),
            now,
        ));
        self.set_sync_point(ContentSnapshot::new(
            content.clone(),
            now,
            EditOrigin::Suggestion,
        ));

        info!("Applied suggestion {} to {}", suggestion.id, self.document_id);
        self.autosave.queue_save(&self.document_id, &content);

        Ok(ApplyOutcome::Applied { placement, content })
    }

    /// Restore the previous history snapshot. Returns `false` at the boundary.
    ///
    /// Cancels any save still pending for content the restore replaced. Does
    /// not queue a save; call [`rearm_save`](Self::rearm_save) to persist the result.
    pub async fn undo(&self) -> bool {
        let _edit = self.edit_lock.lock().await;
        let entry = self.lock_history().undo().cloned();
        self.restore(entry)
    }

    /// Re-apply the next history snapshot. Returns `false` at the boundary.
    pub async fn redo(&self) -> bool {
        let _edit = self.edit_lock.lock().await;
        let entry = self.lock_history().redo().cloned();
        self.restore(entry)
    }

    /// Queue the current content for saving.
    pub fn rearm_save(&self) -> SaveHandle {
        let content = self.surface.content();
        self.autosave.queue_save(&self.document_id, &content)
    }

    /// Save any queued content for this document now.
    pub async fn force_save(&self) -> SaveOutcome {
        self.autosave.force_save(&self.document_id).await
    }

    fn restore(&self, entry: Option<HistoryEntry>) -> bool {
        let Some(entry) = entry else {
            return false;
        };

        self.autosave.cancel_save(&self.document_id);
        {
            let _applying = ApplyingGuard::raise(&self.applying);
            self.surface.set_content(&entry.content);
        }
        self.set_sync_point(ContentSnapshot::new(
            entry.content,
            self.clock.now_ms(),
            entry.kind,
        ));
        true
    }

    fn set_sync_point(&self, snapshot: ContentSnapshot) {
        *self.sync_point.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, HistoryManager> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::AutosaveConfig;
    use crate::clock::ManualClock;
    use crate::diff::ChangeKind;
    use crate::document::SharedDocument;
    use crate::metadata::NoMetadata;
    use crate::store::{DocumentStore, InMemoryStore};
    use crate::suggestion::{AcceptAll, ResolverError, RejectAll};
    use async_trait::async_trait;
    use std::ops::Range;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    struct Fixture {
        session: Arc<DraftSession>,
        document: Arc<SharedDocument>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(initial: &str, resolver: Option<Arc<dyn ConflictResolver>>) -> Fixture {
        let document = Arc::new(SharedDocument::new(initial));
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let autosave = AutosaveController::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(NoMetadata),
            Arc::clone(&clock) as Arc<dyn Clock>,
            AutosaveConfig {
                debounce: DEBOUNCE,
                ..Default::default()
            },
        );

        let mut session = DraftSession::new(
            "doc",
            Arc::clone(&document) as Arc<dyn EditSurface>,
            autosave,
            Arc::clone(&clock) as Arc<dyn Clock>,
            SessionConfig::default(),
        );
        if let Some(resolver) = resolver {
            session = session.with_resolver(resolver);
        }

        Fixture {
            session: Arc::new(session),
            document,
            store,
            clock,
        }
    }

    /// Resolver that counts calls and answers with a fixed decision.
    struct CountingResolver {
        calls: AtomicUsize,
        answer: std::result::Result<bool, ResolverError>,
    }

    impl CountingResolver {
        fn new(answer: std::result::Result<bool, ResolverError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConflictResolver for CountingResolver {
        async fn resolve(
            &self,
            _current_content: &str,
            _suggestion: &Suggestion,
        ) -> std::result::Result<bool, ResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_edit_is_diffed_recorded_and_saved() {
        let f = fixture("Hello world", None);

        f.document.set_content("Hello, world!");
        let changes = f.session.record_user_edit();

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Addition));
        assert_eq!((changes[0].position, changes[0].content.as_str()), (5, ","));
        assert_eq!((changes[1].position, changes[1].content.as_str()), (12, "!"));
        assert_eq!(f.session.history_len(), 2);
        assert!(f.session.autosave().has_pending_saves("doc"));

        tokio::time::sleep(DEBOUNCE * 2).await;

        let calls = f.store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content, "Hello, world!");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_content_records_nothing() {
        let f = fixture("same", None);

        assert!(f.session.record_user_edit().is_empty());
        assert_eq!(f.session.history_len(), 1);
        assert!(!f.session.autosave().has_pending_saves("doc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_content_skips_resolver_after_threshold() {
        let resolver = CountingResolver::new(Ok(false));
        let f = fixture("Hello", Some(resolver.clone()));

        f.clock.advance(5_000);
        let outcome = f
            .session
            .apply_suggestion(&Suggestion::append("s1", " there"))
            .await
            .unwrap();

        assert_eq!(resolver.calls(), 0);
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
        assert_eq!(f.document.content(), "Hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergence_within_threshold_skips_resolver() {
        let resolver = CountingResolver::new(Ok(false));
        let f = fixture("Hello", Some(resolver.clone()));

        f.document.set_content("Hello!");
        f.clock.advance(1_000);
        f.session
            .apply_suggestion(&Suggestion::append("s1", "?"))
            .await
            .unwrap();

        assert_eq!(resolver.calls(), 0);
        assert_eq!(f.document.content(), "Hello!?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_divergence_rejected_by_resolver() {
        let resolver = CountingResolver::new(Ok(false));
        let f = fixture("Hello", Some(resolver.clone()));

        f.document.set_content("Hello, typed elsewhere");
        f.clock.advance(5_000);
        let outcome = f
            .session
            .apply_suggestion(&Suggestion::append("s1", "!"))
            .await
            .unwrap();

        assert_eq!(resolver.calls(), 1);
        assert_eq!(outcome, ApplyOutcome::Rejected);
        assert_eq!(f.document.content(), "Hello, typed elsewhere");
        assert_eq!(f.session.history_len(), 1);
        assert!(!f.session.autosave().has_pending_saves("doc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_divergence_accepted_by_resolver() {
        let f = fixture("Hello", Some(Arc::new(AcceptAll)));

        f.document.set_content("Hello you");
        f.clock.advance(5_000);
        let outcome = f
            .session
            .apply_suggestion(&Suggestion::replacing("s1", "friend", "you"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                placement: Placement::Replaced {
                    position: 6,
                    length: 3
                },
                content: "Hello friend".into(),
            }
        );
        assert_eq!(f.session.snapshot().origin, EditOrigin::Suggestion);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_error_propagates_without_mutation() {
        let resolver = CountingResolver::new(Err(ResolverError("ui gone".into())));
        let f = fixture("Hello", Some(resolver));

        f.document.set_content("Hello?");
        f.clock.advance(5_000);
        let result = f
            .session
            .apply_suggestion(&Suggestion::append("s1", "!"))
            .await;

        assert!(result.is_err());
        assert_eq!(f.document.content(), "Hello?");
        assert_eq!(f.session.history_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resolver_applies_directly() {
        let f = fixture("Hello", None);

        f.document.set_content("Hello!");
        f.clock.advance(60_000);
        let outcome = f
            .session
            .apply_suggestion(&Suggestion::at_position("s1", ">> ", 0))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ApplyOutcome::Applied {
                placement: Placement::AtPosition(0),
                ..
            }
        ));
        assert_eq!(f.document.content(), ">> Hello!");
    }

    #[tokio::test(start_paused = true)]
    async fn test_applied_suggestion_is_saved_and_undoable() {
        let f = fixture("Draft", Some(Arc::new(RejectAll)));

        f.session
            .apply_suggestion(&Suggestion::replacing("s1", " text", "nowhere"))
            .await
            .unwrap();
        assert_eq!(f.document.content(), "Draft text");

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(f.store.content("doc").as_deref(), Some("Draft text"));

        assert!(f.session.undo().await);
        assert_eq!(f.document.content(), "Draft");
        assert!(f.session.redo().await);
        assert_eq!(f.document.content(), "Draft text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_redo_do_not_trigger_saves() {
        let f = fixture("a", None);

        for text in ["ab", "abc", "abcd"] {
            f.document.set_content(text);
            f.session.record_user_edit();
        }
        f.session.force_save().await;
        assert_eq!(f.store.call_count(), 1);

        assert!(f.session.undo().await);
        assert!(f.session.undo().await);
        assert_eq!(f.document.content(), "ab");
        assert!(f.session.can_redo());

        // The restored content is the new baseline, not a user edit.
        assert!(f.session.record_user_edit().is_empty());
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(f.store.call_count(), 1);

        assert!(f.session.redo().await);
        assert!(f.session.redo().await);
        assert!(!f.session.redo().await);
        assert_eq!(f.document.content(), "abcd");

        // Caller may persist the restored state explicitly.
        assert_eq!(f.session.rearm_save().await, SaveOutcome::Saved);
        assert_eq!(f.store.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_at_boundary_returns_false() {
        let f = fixture("start", None);

        assert!(!f.session.can_undo());
        assert!(!f.session.undo().await);
        assert!(!f.session.redo().await);
        assert_eq!(f.document.content(), "start");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_after_undo_discards_redo() {
        let f = fixture("one", None);

        f.document.set_content("one two");
        f.session.record_user_edit();
        assert!(f.session.undo().await);

        f.document.set_content("one three");
        let changes = f.session.record_user_edit();

        assert!(!changes.is_empty());
        assert!(!f.session.can_redo());
        assert_eq!(f.session.history_len(), 2);
    }

    /// Surface that, like an editor widget, reports every mutation back as a change.
    struct NotifyingSurface {
        inner: SharedDocument,
        session: OnceLock<Weak<DraftSession>>,
        echoed: Mutex<Vec<Vec<ContentChange>>>,
    }

    impl EditSurface for NotifyingSurface {
        fn content(&self) -> String {
            self.inner.content()
        }

        fn replace(&self, range: Range<usize>, text: &str) {
            self.inner.replace(range, text);
            if let Some(session) = self.session.get().and_then(Weak::upgrade) {
                let changes = session.record_user_edit();
                self.echoed.lock().unwrap().push(changes);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggestion_mutation_is_not_recorded_as_user_edit() {
        let surface = Arc::new(NotifyingSurface {
            inner: SharedDocument::new("Hello"),
            session: OnceLock::new(),
            echoed: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let autosave = AutosaveController::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(NoMetadata),
            Arc::clone(&clock) as Arc<dyn Clock>,
            AutosaveConfig::default(),
        );
        let session = Arc::new(DraftSession::new(
            "doc",
            Arc::clone(&surface) as Arc<dyn EditSurface>,
            autosave,
            clock,
            SessionConfig::default(),
        ));
        let _ = surface.session.set(Arc::downgrade(&session));

        session
            .apply_suggestion(&Suggestion::append("s1", " world"))
            .await
            .unwrap();

        let echoed = surface.echoed.lock().unwrap();
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].is_empty());
        assert_eq!(session.history_len(), 2);
        assert_eq!(
            session.lock_history().current().unwrap().kind,
            EditOrigin::Suggestion
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_cancels_pending_save_of_replaced_content() {
        let f = fixture("a", None);

        f.document.set_content("ab");
        f.session.record_user_edit();
        assert!(f.session.autosave().has_pending_saves("doc"));

        assert!(f.session.undo().await);
        assert!(!f.session.autosave().has_pending_saves("doc"));
        tokio::time::sleep(DEBOUNCE * 4).await;

        assert_eq!(f.document.content(), "a");
        assert_eq!(f.store.call_count(), 0);

        assert_eq!(f.session.rearm_save().await, SaveOutcome::Saved);
        assert_eq!(f.store.content("doc").as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redo_cancels_pending_save() {
        let f = fixture("one", None);

        f.document.set_content("one two");
        f.session.record_user_edit();
        f.session.force_save().await;
        assert!(f.session.undo().await);
        let pending = f.session.rearm_save();

        assert!(f.session.redo().await);
        assert_eq!(pending.await, SaveOutcome::Cancelled);
        tokio::time::sleep(DEBOUNCE * 4).await;

        // Only the forced save of "one two" reached the store.
        assert_eq!(f.store.call_count(), 1);
        assert_eq!(f.store.content("doc").as_deref(), Some("one two"));
        assert_eq!(f.document.content(), "one two");
    }
}
