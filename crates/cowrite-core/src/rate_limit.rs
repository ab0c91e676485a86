//! Per-user token bucket rate limiting.
//!
//! Each user's bucket refills continuously at `max_tokens / refill_time` and
//! never holds more than `max_tokens`. A request needs one whole token.
//! Buckets idle for longer than `idle_ttl` are purged opportunistically.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity (default: 10)
    pub max_tokens: f64,
    /// Time to refill an empty bucket (default: 60s)
    pub refill_time: Duration,
    /// Buckets untouched for this long are dropped (default: 1h)
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_time: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitBucket {
    tokens: f64,
    last_refill: u64,
    last_access: u64,
}

/// Result of [`RateLimiter::check_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left after this request
    pub remaining: u32,
    /// How long until the next whole token is available (0 if one already is)
    pub retry_after_ms: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: HashMap<String, RateLimitBucket>,
    last_purge: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            last_purge: 0,
        }
    }

    fn refill_rate_per_ms(&self) -> f64 {
        let refill_ms = self.config.refill_time.as_millis().max(1) as f64;
        self.config.max_tokens / refill_ms
    }

    /// Refill `user_id`'s bucket and try to take one token.
    pub fn check_and_consume(&mut self, user_id: &str, now_ms: u64) -> RateLimitDecision {
        self.maybe_purge(now_ms);

        let rate = self.refill_rate_per_ms();
        let max_tokens = self.config.max_tokens;
        let bucket = self
            .buckets
            .entry(user_id.to_string())
            .or_insert(RateLimitBucket {
                tokens: max_tokens,
                last_refill: now_ms,
                last_access: now_ms,
            });

        let elapsed = now_ms.saturating_sub(bucket.last_refill) as f64;
        bucket.tokens = (bucket.tokens + elapsed * rate).min(max_tokens);
        bucket.last_refill = now_ms;
        bucket.last_access = now_ms;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateLimitDecision {
                allowed: true,
                remaining: bucket.tokens.floor() as u32,
                retry_after_ms: time_to_next_token(bucket.tokens, rate),
            };
        }

        let retry_after_ms = time_to_next_token(bucket.tokens, rate);
        debug!("Rate limited {} for {}ms", user_id, retry_after_ms);
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after_ms,
        }
    }

    /// Tokens currently available to `user_id`, without consuming.
    pub fn available(&self, user_id: &str, now_ms: u64) -> f64 {
        match self.buckets.get(user_id) {
            Some(bucket) => {
                let elapsed = now_ms.saturating_sub(bucket.last_refill) as f64;
                (bucket.tokens + elapsed * self.refill_rate_per_ms()).min(self.config.max_tokens)
            }
            None => self.config.max_tokens,
        }
    }

    /// Drop buckets idle for longer than `idle_ttl`. Returns how many were removed.
    pub fn purge_idle(&mut self, now_ms: u64) -> usize {
        let idle_ms = self.config.idle_ttl.as_millis() as u64;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now_ms.saturating_sub(bucket.last_access) <= idle_ms);
        self.last_purge = now_ms;

        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!("Purged {} idle rate limit bucket(s)", removed);
        }
        removed
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }

    fn maybe_purge(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_purge) > self.config.idle_ttl.as_millis() as u64 {
            self.purge_idle(now_ms);
        }
    }
}

fn time_to_next_token(tokens: f64, rate_per_ms: f64) -> u64 {
    if tokens >= 1.0 {
        0
    } else if rate_per_ms > 0.0 {
        ((1.0 - tokens) / rate_per_ms).ceil() as u64
    } else {
        u64::MAX
    }
}
