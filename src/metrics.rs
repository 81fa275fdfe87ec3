// Structured observability counters, the same all-atomics shape as the
// teacher's `Metrics` struct, extended with this engine's own
// accept/drop/degrade paths.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub struct Metrics {
    pub ingested: AtomicU64,
    pub accepted_ok: AtomicU64,
    pub dropped_out_of_order: AtomicU64,
    pub consent_denied: AtomicU64,
    pub rate_limited: AtomicU64,
    pub invalid_input: AtomicU64,
    pub invalid_geometry: AtomicU64,
    pub anomalous: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub alerts_deduped: AtomicU64,
    pub degraded_history_writes: AtomicU64,
    pub degraded_hotcache_writes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ingested: AtomicU64::new(0),
            accepted_ok: AtomicU64::new(0),
            dropped_out_of_order: AtomicU64::new(0),
            consent_denied: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            invalid_input: AtomicU64::new(0),
            invalid_geometry: AtomicU64::new(0),
            anomalous: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            alerts_deduped: AtomicU64::new(0),
            degraded_history_writes: AtomicU64::new(0),
            degraded_hotcache_writes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            accepted_ok: self.accepted_ok.load(Ordering::Relaxed),
            dropped_out_of_order: self.dropped_out_of_order.load(Ordering::Relaxed),
            consent_denied: self.consent_denied.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            invalid_input: self.invalid_input.load(Ordering::Relaxed),
            invalid_geometry: self.invalid_geometry.load(Ordering::Relaxed),
            anomalous: self.anomalous.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alerts_deduped: self.alerts_deduped.load(Ordering::Relaxed),
            degraded_history_writes: self.degraded_history_writes.load(Ordering::Relaxed),
            degraded_hotcache_writes: self.degraded_hotcache_writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub ingested: u64,
    pub accepted_ok: u64,
    pub dropped_out_of_order: u64,
    pub consent_denied: u64,
    pub rate_limited: u64,
    pub invalid_input: u64,
    pub invalid_geometry: u64,
    pub anomalous: u64,
    pub alerts_emitted: u64,
    pub alerts_deduped: u64,
    pub degraded_history_writes: u64,
    pub degraded_hotcache_writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let m = Metrics::new();
        let s = m.snapshot();
        assert_eq!(s.ingested, 0);
        assert_eq!(s.accepted_ok, 0);
    }

    #[test]
    fn increments_are_reflected_in_snapshot() {
        let m = Metrics::new();
        m.ingested.fetch_add(3, Ordering::Relaxed);
        assert_eq!(m.snapshot().ingested, 3);
    }
}
