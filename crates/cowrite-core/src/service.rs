//! Guarded access to the AI suggestion source.
//!
//! Requests are answered from the cache when an identical request against
//! identical content was served recently. Only cache misses reach the source,
//! and those are charged against the caller's rate limit bucket.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, CacheConfig, SuggestionCache};
use crate::clock::Clock;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::suggestion::Suggestion;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SuggestionServiceError {
    #[error("Rate limited, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Suggestion source failed: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, SuggestionServiceError>;

/// What the caller wants suggestions for.
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub document_id: String,
    pub content: String,
    pub prompt: Option<String>,
    pub max_suggestions: usize,
}

impl SuggestionRequest {
    pub fn new(document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            prompt: None,
            max_suggestions: 3,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    fn fingerprint(&self) -> String {
        fingerprint(
            &self.document_id,
            &self.content,
            self.prompt.as_deref(),
            self.max_suggestions,
        )
    }
}

/// The external generator of suggestions.
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn suggest(&self, request: &SuggestionRequest) -> std::result::Result<Vec<Suggestion>, String>;
}

pub struct SuggestionService {
    source: Arc<dyn SuggestionSource>,
    clock: Arc<dyn Clock>,
    cache: Mutex<SuggestionCache<Vec<Suggestion>>>,
    limiter: Mutex<RateLimiter>,
}

impl SuggestionService {
    pub fn new(
        source: Arc<dyn SuggestionSource>,
        clock: Arc<dyn Clock>,
        cache: CacheConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            source,
            clock,
            cache: Mutex::new(SuggestionCache::new(cache)),
            limiter: Mutex::new(RateLimiter::new(rate_limit)),
        }
    }

    /// Suggestions for `request` on behalf of `user_id`.
    pub async fn suggest(
        &self,
        user_id: &str,
        request: &SuggestionRequest,
    ) -> Result<Vec<Suggestion>> {
        let key = request.fingerprint();
        let now = self.clock.now_ms();

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key, now);
        if let Some(suggestions) = cached {
            debug!("Suggestion cache hit for {}", request.document_id);
            return Ok(suggestions);
        }

        let decision = self
            .limiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check_and_consume(user_id, now);
        if !decision.allowed {
            info!("Suggestion request from {} rate limited", user_id);
            return Err(SuggestionServiceError::RateLimited {
                retry_after_ms: decision.retry_after_ms,
            });
        }

        let suggestions = self.source.suggest(request).await.map_err(|e| {
            warn!("Suggestion source failed for {}: {}", request.document_id, e);
            SuggestionServiceError::Source(e)
        })?;

        debug!(
            "Caching {} suggestion(s) for {} ({} tokens left for {})",
            suggestions.len(),
            request.document_id,
            decision.remaining,
            user_id
        );
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set(key, suggestions.clone(), self.clock.now_ms());

        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SuggestionSource for CountingSource {
        async fn suggest(
            &self,
            request: &SuggestionRequest,
        ) -> std::result::Result<Vec<Suggestion>, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err("model unavailable".into());
            }
            Ok(vec![Suggestion::append(
                format!("s{n}"),
                format!(" ({} chars)", request.content.len()),
            )])
        }
    }

    fn service(source: Arc<CountingSource>, clock: Arc<ManualClock>) -> SuggestionService {
        SuggestionService::new(
            source,
            clock,
            CacheConfig {
                capacity: 10,
                ttl: Duration::from_secs(60),
            },
            RateLimitConfig {
                max_tokens: 2.0,
                refill_time: Duration::from_secs(10),
                idle_ttl: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn test_identical_request_is_served_from_cache() {
        let source = Arc::new(CountingSource::default());
        let svc = service(Arc::clone(&source), Arc::new(ManualClock::new(0)));
        let request = SuggestionRequest::new("doc", "Hello").with_prompt("continue");

        let first = svc.suggest("ana", &request).await.unwrap();
        let second = svc.suggest("ana", &request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_content_misses_cache() {
        let source = Arc::new(CountingSource::default());
        let svc = service(Arc::clone(&source), Arc::new(ManualClock::new(0)));

        svc.suggest("ana", &SuggestionRequest::new("doc", "Hello"))
            .await
            .unwrap();
        svc.suggest("ana", &SuggestionRequest::new("doc", "Hello!"))
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_misses_are_rate_limited_per_user() {
        let source = Arc::new(CountingSource::default());
        let clock = Arc::new(ManualClock::new(0));
        let svc = service(Arc::clone(&source), Arc::clone(&clock));

        for content in ["a", "b"] {
            svc.suggest("ana", &SuggestionRequest::new("doc", content))
                .await
                .unwrap();
        }

        let denied = svc.suggest("ana", &SuggestionRequest::new("doc", "c")).await;
        assert_eq!(
            denied,
            Err(SuggestionServiceError::RateLimited {
                retry_after_ms: 5_000
            })
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // Cache hits still work while limited, and other users are unaffected.
        assert!(svc.suggest("ana", &SuggestionRequest::new("doc", "a")).await.is_ok());
        assert!(svc.suggest("ben", &SuggestionRequest::new("doc", "c")).await.is_ok());

        clock.advance(5_000);
        assert!(svc.suggest("ana", &SuggestionRequest::new("doc", "d")).await.is_ok());
    }

    #[tokio::test]
    async fn test_source_failure_is_not_cached() {
        let source = Arc::new(CountingSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let svc = service(Arc::clone(&source), Arc::new(ManualClock::new(0)));
        let request = SuggestionRequest::new("doc", "Hello");

        assert!(matches!(
            svc.suggest("ana", &request).await,
            Err(SuggestionServiceError::Source(_))
        ));

        source.fail.store(false, Ordering::SeqCst);
        assert!(svc.suggest("ana", &request).await.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_entries_expire() {
        let source = Arc::new(CountingSource::default());
        let clock = Arc::new(ManualClock::new(0));
        let svc = service(Arc::clone(&source), Arc::clone(&clock));
        let request = SuggestionRequest::new("doc", "Hello");

        svc.suggest("ana", &request).await.unwrap();
        clock.advance(61_000);
        svc.suggest("ana", &request).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
