// Alert engine (C8): materializes geofence/SOS events into alerts with
// severity, id and timestamp, retained in a bounded ring. The
// ring is a single-mutex `VecDeque`, O(1) push/evict per

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Point;
use crate::zone::Severity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    GeofenceBreach,
    SafeZoneExit,
    SosTriggered,
    SosResolved,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub tourist_id: String,
    pub tourist_display_name: String,
    pub position: Option<Point>,
    pub zone_id: Option<String>,
    pub zone_name: Option<String>,
    pub severity: Severity,
    pub description: String,
    pub server_timestamp: DateTime<Utc>,
    /// Monotonic per-tourist edge sequence: alerts are idempotent with
    /// respect to (tourist, kind, zone, monotonic edge-sequence).
    pub edge_sequence: u64,
}

struct RingState {
    ring: VecDeque<Alert>,
    capacity: usize,
    /// (tourist, kind, zone) -> (last emitted timestamp, last edge sequence)
    /// used for the 2s jitter-suppression window.
    recent: std::collections::HashMap<(String, AlertKind, Option<String>), (DateTime<Utc>, u64)>,
    next_edge_sequence: u64,
}

pub struct AlertEngine {
    state: Mutex<RingState>,
}

const DEDUP_WINDOW_MS: i64 = 2000;

impl AlertEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                recent: std::collections::HashMap::new(),
                next_edge_sequence: 0,
            }),
        }
    }

    /// Emits an alert unless an identical (tourist, kind, zone) alert was
    /// emitted within the last 2 seconds, in which case it is collapsed.
    /// Returns `None` when collapsed.
    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        kind: AlertKind,
        tourist_id: &str,
        tourist_display_name: &str,
        position: Option<Point>,
        zone_id: Option<String>,
        zone_name: Option<String>,
        severity: Severity,
        description: String,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let mut state = self.state.lock().expect("alert ring mutex poisoned");
        let dedup_key = (tourist_id.to_string(), kind, zone_id.clone());

        if let Some((last_ts, _)) = state.recent.get(&dedup_key) {
            if (now - *last_ts).num_milliseconds().abs() < DEDUP_WINDOW_MS {
                return None;
            }
        }

        let edge_sequence = state.next_edge_sequence;
        state.next_edge_sequence += 1;
        state.recent.insert(dedup_key, (now, edge_sequence));

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            kind,
            tourist_id: tourist_id.to_string(),
            tourist_display_name: tourist_display_name.to_string(),
            position,
            zone_id,
            zone_name,
            severity,
            description,
            server_timestamp: now,
            edge_sequence,
        };

        if state.ring.len() == state.capacity {
            state.ring.pop_front();
        }
        state.ring.push_back(alert.clone());
        Some(alert)
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock().expect("alert ring mutex poisoned");
        state.ring.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("alert ring mutex poisoned").ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn p() -> Option<Point> {
        Some(Point::new(10.0, 10.0).unwrap())
    }

    #[test]
    fn emit_returns_alert() {
        let engine = AlertEngine::new(10);
        let alert = engine
            .emit(
                AlertKind::GeofenceBreach,
                "t1",
                "Alice",
                p(),
                Some("z1".into()),
                Some("Zone 1".into()),
                Severity::High,
                "entered restricted zone".into(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(alert.kind, AlertKind::GeofenceBreach);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn ring_overflow_evicts_oldest() {
        let engine = AlertEngine::new(2);
        let now = Utc::now();
        for i in 0..3 {
            engine.emit(
                AlertKind::GeofenceBreach,
                "t1",
                "Alice",
                p(),
                Some(format!("z{i}")),
                None,
                Severity::Low,
                "x".into(),
                now + ChronoDuration::seconds(i * 3),
            );
        }
        assert_eq!(engine.len(), 2);
        let alerts = engine.recent_alerts(10);
        // Oldest (z0) evicted; z1 and z2 remain.
        assert!(alerts.iter().all(|a| a.zone_id != Some("z0".into())));
    }

    #[test]
    fn duplicate_within_2s_is_collapsed() {
        let engine = AlertEngine::new(10);
        let now = Utc::now();
        let first = engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z1".into()),
            None,
            Severity::High,
            "x".into(),
            now,
        );
        let second = engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z1".into()),
            None,
            Severity::High,
            "x".into(),
            now + ChronoDuration::milliseconds(500),
        );
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn repeat_after_2s_is_not_collapsed() {
        let engine = AlertEngine::new(10);
        let now = Utc::now();
        engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z1".into()),
            None,
            Severity::High,
            "x".into(),
            now,
        );
        let second = engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z1".into()),
            None,
            Severity::High,
            "x".into(),
            now + ChronoDuration::seconds(3),
        );
        assert!(second.is_some());
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn different_zone_is_not_collapsed() {
        let engine = AlertEngine::new(10);
        let now = Utc::now();
        engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z1".into()),
            None,
            Severity::High,
            "x".into(),
            now,
        );
        let second = engine.emit(
            AlertKind::GeofenceBreach,
            "t1",
            "Alice",
            p(),
            Some("z2".into()),
            None,
            Severity::High,
            "x".into(),
            now,
        );
        assert!(second.is_some());
    }
}
