// Rate limiter (C4): independent token-bucket-ish windows per (principal,
// endpoint class) over a `DashMap<key, RateEntry>`, generalized to five
// classes with a periodic eviction task that sweeps stale buckets.

use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    General,
    Auth,
    Position,
    Sos,
    GeofencingAdmin,
}

impl EndpointClass {
    /// (max requests, window) defaults per endpoint class.
    fn limit(self) -> (u32, u64) {
        match self {
            EndpointClass::General => (2000, 15 * 60_000),
            EndpointClass::Auth => (5, 15 * 60_000),
            EndpointClass::Position => (20, 60_000),
            EndpointClass::Sos => (10, 5 * 60_000),
            EndpointClass::GeofencingAdmin => (20, 15 * 60_000),
        }
    }
}

struct RateEntry {
    count: u32,
    window_start_ms: u64,
}

pub struct RateLimiter {
    buckets: DashMap<(String, EndpointClass), RateEntry>,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    /// A bucket never refills faster than its configured rate: the window
    /// only resets once `window` ms have elapsed since it was opened.
    pub fn check(&self, principal_id: &str, class: EndpointClass) -> Result<(), EngineError> {
        let (max, window) = class.limit();
        let now = now_ms();
        let key = (principal_id.to_string(), class);
        let mut entry = self.buckets.entry(key).or_insert_with(|| RateEntry { count: 0, window_start_ms: now });

        if now.saturating_sub(entry.window_start_ms) > window {
            entry.count = 1;
            entry.window_start_ms = now;
            return Ok(());
        }
        if entry.count < max {
            entry.count += 1;
            Ok(())
        } else {
            let elapsed = now.saturating_sub(entry.window_start_ms);
            let retry_ms = window.saturating_sub(elapsed).max(1000);
            Err(EngineError::RateLimited { retry_after_secs: retry_ms / 1000 })
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn evict_stale(&self) {
        let before = self.buckets.len();
        let now = now_ms();
        self.buckets.retain(|(_, class), e| {
            let (_, window) = class.limit();
            now.saturating_sub(e.window_start_ms) < window * 2
        });
        let after = self.buckets.len();
        if before != after {
            info!(evicted = before - after, remaining = after, "ratelimit_eviction");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn eviction_task(limiter: std::sync::Arc<RateLimiter>) {
    let mut iv = tokio::time::interval(Duration::from_secs(60));
    loop {
        iv.tick().await;
        limiter.evict_stale();
    }
}
