//! Debounced, retried persistence of document content.
//!
//! Per document id the controller walks a small state machine:
//!
//! ```text
//! Idle -> PendingSave -> Saving -> Saved
//!                          |
//!                          +-> Retrying -> Saving ...
//!                          +-> Failed
//! ```
//!
//! - `queue_save` replaces any pending content for the id and restarts its
//!   debounce timer (last write wins within the window).
//! - Failed attempts are retried up to `max_retries` times. When retries run
//!   out the content stays queued so `force_save` can resend it.
//! - A controller-wide guard lets only one attempt be in flight at a time,
//!   across all ids.
//! - `cancel_save` also disowns an attempt already in flight: its outcome is
//!   dropped and no retry is scheduled.
//!
//! Timers are tokio tasks, so every method that arms one must run inside a
//! tokio runtime. Tests drive them with a paused tokio clock.

mod retry;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::events::{SaveStatus, StatusBus, StatusEvent, Subscription};
use crate::metadata::{MetadataExtractor, NoMetadata};
use crate::store::DocumentStore;

/// Configuration for debouncing and retries.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Quiet period before a queued save runs (default: 1s)
    pub debounce: Duration,
    /// Retries after the first failed attempt (default: 3)
    pub max_retries: u32,
    /// Delay before each retry (default: fixed 1s)
    pub retry: RetryPolicy,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            max_retries: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where a document is in the save state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Idle,
    PendingSave,
    Saving,
    Saved,
    Retrying,
    Failed,
}

/// How a queued save settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Content reached the store
    Saved,
    /// Content was empty or whitespace-only and was not persisted
    Skipped,
    /// The save was cancelled before it ran
    Cancelled,
    /// Retries were exhausted; the content is kept for `force_save`
    Failed { error: String },
    /// `force_save` found nothing queued
    NothingPending,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

/// Resolves once the save it was returned for settles, including retries.
///
/// Saves coalesced into a later `queue_save` settle with that later save.
pub struct SaveHandle {
    rx: oneshot::Receiver<SaveOutcome>,
}

impl SaveHandle {
    fn ready(outcome: SaveOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }
}

impl Future for SaveHandle {
    type Output = SaveOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the controller went away with the save still queued.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(SaveOutcome::Cancelled))
    }
}

/// Pending content for one document id.
struct SaveQueueItem {
    content: String,
    retry_count: u32,
    waiters: Vec<oneshot::Sender<SaveOutcome>>,
}

impl SaveQueueItem {
    fn new(content: String) -> Self {
        Self {
            content,
            retry_count: 0,
            waiters: Vec::new(),
        }
    }

    fn resolve(self, outcome: &SaveOutcome) {
        for waiter in self.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    queue: HashMap<String, SaveQueueItem>,
    timers: HashMap<String, PendingTimer>,
    phases: HashMap<String, SavePhase>,
    last_saved: HashMap<String, u64>,
    /// Bumped by `cancel_save`; an attempt started under an older value is stale
    cancellations: HashMap<String, u64>,
    next_generation: u64,
    disposed: bool,
}

impl ControllerState {
    fn cancel_timer(&mut self, document_id: &str) -> bool {
        match self.timers.remove(document_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn cancellation(&self, document_id: &str) -> u64 {
        self.cancellations.get(document_id).copied().unwrap_or(0)
    }

    /// Whether an attempt started at `cancellation` was cancelled since.
    fn is_cancelled(&self, document_id: &str, cancellation: u64) -> bool {
        self.disposed || self.cancellation(document_id) != cancellation
    }
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    extractor: Arc<dyn MetadataExtractor>,
    clock: Arc<dyn Clock>,
    config: AutosaveConfig,
    /// Never held across an await
    state: Mutex<ControllerState>,
    /// Serializes save attempts across all document ids
    in_flight: tokio::sync::Mutex<()>,
    status: Arc<StatusBus>,
}

/// Debounced persistence controller.
///
/// Cheap to clone; clones share queue, timers and status bus.
#[derive(Clone)]
pub struct AutosaveController {
    inner: Arc<Inner>,
}

impl AutosaveController {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn MetadataExtractor>,
        clock: Arc<dyn Clock>,
        config: AutosaveConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                extractor,
                clock,
                config,
                state: Mutex::new(ControllerState::default()),
                in_flight: tokio::sync::Mutex::new(()),
                status: Arc::new(StatusBus::new()),
            }),
        }
    }

    /// Controller with no metadata extraction and the system clock.
    pub fn with_defaults(store: Arc<dyn DocumentStore>, config: AutosaveConfig) -> Self {
        Self::new(store, Arc::new(NoMetadata), Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.inner.config
    }

    /// Subscribe to status changes. Drop the returned handle to unsubscribe.
    pub fn subscribe(
        &self,
        callback: impl Fn(&StatusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status.subscribe(callback)
    }

    /// Queue `content` for `document_id` and (re)start its debounce timer.
    ///
    /// Empty or whitespace-only content is skipped without touching the queue.
    pub fn queue_save(&self, document_id: &str, content: &str) -> SaveHandle {
        if content.trim().is_empty() {
            debug!("Skipping save for {} (empty content)", document_id);
            return SaveHandle::ready(SaveOutcome::Skipped);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock_state();
            if state.disposed {
                return SaveHandle::ready(SaveOutcome::Cancelled);
            }

            let item = state
                .queue
                .entry(document_id.to_string())
                .or_insert_with(|| SaveQueueItem::new(String::new()));
            item.content = content.to_string();
            item.retry_count = 0;
            item.waiters.push(tx);

            state.cancel_timer(document_id);
            self.inner
                .schedule(&mut state, document_id, self.inner.config.debounce);
            state
                .phases
                .insert(document_id.to_string(), SavePhase::PendingSave);
        }

        debug!(
            "Queued save for {} ({} bytes, debounce {:?})",
            document_id,
            content.len(),
            self.inner.config.debounce
        );
        self.inner.emit(document_id, SaveStatus::Saving, None);

        SaveHandle { rx }
    }

    /// Run any queued save for `document_id` now instead of waiting for its timer.
    ///
    /// Resolves once the attempt (and any retries) settle. Also resends content
    /// left behind by a save that exhausted its retries.
    pub async fn force_save(&self, document_id: &str) -> SaveOutcome {
        let rx = {
            let mut state = self.inner.lock_state();
            state.cancel_timer(document_id);
            match state.queue.get_mut(document_id) {
                Some(item) => {
                    let (tx, rx) = oneshot::channel();
                    item.waiters.push(tx);
                    rx
                }
                None => return SaveOutcome::NothingPending,
            }
        };

        debug!("Forcing save for {}", document_id);
        Arc::clone(&self.inner)
            .attempt(document_id.to_string())
            .await;

        rx.await.unwrap_or(SaveOutcome::Cancelled)
    }

    /// Force-save every queued document.
    pub async fn flush_all(&self) -> Vec<(String, SaveOutcome)> {
        let ids: Vec<String> = {
            let state = self.inner.lock_state();
            state.queue.keys().cloned().collect()
        };

        let saves = ids.iter().map(|id| self.force_save(id));
        let outcomes = join_all(saves).await;
        ids.into_iter().zip(outcomes).collect()
    }

    /// Drop the pending timer and queued content for `document_id`.
    ///
    /// An attempt already in flight runs to completion but its result is
    /// discarded: it is not retried and its waiters resolve as cancelled.
    pub fn cancel_save(&self, document_id: &str) {
        let item = {
            let mut state = self.inner.lock_state();
            state.cancel_timer(document_id);
            *state
                .cancellations
                .entry(document_id.to_string())
                .or_insert(0) += 1;
            state.phases.insert(document_id.to_string(), SavePhase::Idle);
            state.queue.remove(document_id)
        };

        if let Some(item) = item {
            debug!("Cancelled pending save for {}", document_id);
            item.resolve(&SaveOutcome::Cancelled);
        }
        self.inner.emit(document_id, SaveStatus::Idle, None);
    }

    /// Whether content or a timer is pending for `document_id`.
    pub fn has_pending_saves(&self, document_id: &str) -> bool {
        let state = self.inner.lock_state();
        state.queue.contains_key(document_id) || state.timers.contains_key(document_id)
    }

    pub fn phase(&self, document_id: &str) -> SavePhase {
        let state = self.inner.lock_state();
        state
            .phases
            .get(document_id)
            .copied()
            .unwrap_or(SavePhase::Idle)
    }

    /// When `document_id` was last saved successfully (ms since epoch).
    pub fn last_saved_at(&self, document_id: &str) -> Option<u64> {
        let state = self.inner.lock_state();
        state.last_saved.get(document_id).copied()
    }

    /// Abort all timers and cancel everything still queued.
    ///
    /// Call `flush_all` first to keep queued content.
    pub fn dispose(&self) {
        let items: Vec<SaveQueueItem> = {
            let mut state = self.inner.lock_state();
            state.disposed = true;
            for (_, timer) in state.timers.drain() {
                timer.handle.abort();
            }
            state.queue.drain().map(|(_, item)| item).collect()
        };

        if !items.is_empty() {
            info!("Disposing autosave with {} unsaved document(s)", items.len());
        }
        for item in items {
            item.resolve(&SaveOutcome::Cancelled);
        }
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, document_id: &str, status: SaveStatus, error: Option<String>) {
        self.status.emit(StatusEvent {
            document_id: document_id.to_string(),
            status,
            error,
            timestamp: self.clock.now_ms(),
        });
    }

    /// Arm a timer that runs an attempt for `document_id` after `delay`.
    fn schedule(self: &Arc<Self>, state: &mut ControllerState, document_id: &str, delay: Duration) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let inner = Arc::clone(self);
        let id = document_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.claim_timer(&id, generation) {
                inner.attempt(id).await;
            }
        });

        state
            .timers
            .insert(document_id.to_string(), PendingTimer { generation, handle });
    }

    /// Remove our own timer entry. False if it was cancelled or replaced meanwhile.
    fn claim_timer(&self, document_id: &str, generation: u64) -> bool {
        let mut state = self.lock_state();
        match state.timers.get(document_id) {
            Some(timer) if timer.generation == generation => {
                state.timers.remove(document_id);
                true
            }
            _ => false,
        }
    }

    /// One persistence attempt for whatever is queued under `document_id`.
    fn attempt(self: Arc<Self>, document_id: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let _guard = self.in_flight.lock().await;

            let (item, cancellation) = {
                let mut state = self.lock_state();
                let Some(item) = state.queue.remove(&document_id) else {
                    return;
                };
                state.phases.insert(document_id.clone(), SavePhase::Saving);
                (item, state.cancellation(&document_id))
            };

            let metadata = match self.extractor.extract(&item.content) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Metadata extraction failed for {}: {}", document_id, e);
                    Default::default()
                }
            };

            debug!(
                "Saving {} (attempt {})",
                document_id,
                item.retry_count + 1
            );

            match self.store.save(&document_id, &item.content, &metadata).await {
                Ok(()) => self.on_saved(&document_id, item, cancellation),
                Err(e) => self.on_failed(&document_id, item, cancellation, e.to_string()),
            }
        })
    }

    fn on_saved(self: &Arc<Self>, document_id: &str, item: SaveQueueItem, cancellation: u64) {
        let superseded = {
            let mut state = self.lock_state();
            state
                .last_saved
                .insert(document_id.to_string(), self.clock.now_ms());
            if state.is_cancelled(document_id, cancellation) {
                drop(state);
                debug!("Save for {} completed after it was cancelled", document_id);
                item.resolve(&SaveOutcome::Cancelled);
                return;
            }
            // Newer content queued during the attempt keeps the document dirty.
            let superseded = state.queue.contains_key(document_id);
            if !superseded {
                state
                    .phases
                    .insert(document_id.to_string(), SavePhase::Saved);
            }
            superseded
        };

        info!("Saved {}", document_id);
        if !superseded {
            self.emit(document_id, SaveStatus::Saved, None);
        }
        item.resolve(&SaveOutcome::Saved);
    }

    fn on_failed(
        self: &Arc<Self>,
        document_id: &str,
        mut item: SaveQueueItem,
        cancellation: u64,
        error: String,
    ) {
        let mut state = self.lock_state();

        if state.is_cancelled(document_id, cancellation) {
            drop(state);
            debug!(
                "Save for {} failed after it was cancelled ({}); not retrying",
                document_id, error
            );
            item.resolve(&SaveOutcome::Cancelled);
            return;
        }

        // Newer content supersedes the failed attempt; its waiters follow it.
        if let Some(newer) = state.queue.get_mut(document_id) {
            warn!(
                "Save failed for {} ({}); newer content already queued",
                document_id, error
            );
            newer.waiters.append(&mut item.waiters);
            return;
        }

        if item.retry_count < self.config.max_retries {
            item.retry_count += 1;
            let delay = self.config.retry.delay(item.retry_count);
            warn!(
                "Save failed for {}: {}. Retrying in {:?} ({}/{})",
                document_id, error, delay, item.retry_count, self.config.max_retries
            );

            state
                .phases
                .insert(document_id.to_string(), SavePhase::Retrying);
            state.queue.insert(document_id.to_string(), item);
            self.schedule(&mut state, document_id, delay);
            return;
        }

        error!(
            "Save failed for {} after {} retries: {}",
            document_id, self.config.max_retries, error
        );

        // Keep the content so a later force_save can resend it.
        let waiters = std::mem::take(&mut item.waiters);
        item.retry_count = 0;
        state.queue.insert(document_id.to_string(), item);
        state
            .phases
            .insert(document_id.to_string(), SavePhase::Failed);
        drop(state);

        self.emit(document_id, SaveStatus::Error, Some(error.clone()));
        let outcome = SaveOutcome::Failed { error };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}
