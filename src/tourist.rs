// Tourist state store (C3): in-memory mapping from tourist id to current
// position/zone state. Concurrent access is serialized per tourist via
// DashMap's internal sharding, giving single-writer-per-tourist semantics
// without a separate lock layer.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Safe,
    Risk,
    Sos,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fix {
    pub tourist_id: String,
    pub sequence: u64,
    pub position: Point,
    pub accuracy_m: Option<f64>,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub client_timestamp: DateTime<Utc>,
    pub ingest_timestamp: DateTime<Utc>,
    pub device_info: Option<String>,
    pub network_info: Option<String>,
    pub anomalous: bool,
    pub quality_score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TouristState {
    pub tourist_id: String,
    pub display_name: String,
    pub latest_fix: Option<Fix>,
    pub membership: HashSet<String>,
    pub snapshot_version: u64,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub sos_active: bool,
}

impl TouristState {
    fn new(tourist_id: String, display_name: String) -> Self {
        Self {
            tourist_id,
            display_name,
            latest_fix: None,
            membership: HashSet::new(),
            snapshot_version: 0,
            last_evaluated_at: None,
            sos_active: false,
        }
    }

    /// Derived status: sos pins over risk pins over safe.
    pub fn status(&self, restricted_ids: &HashSet<String>) -> Status {
        if self.sos_active {
            Status::Sos
        } else if self.membership.iter().any(|id| restricted_ids.contains(id)) {
            Status::Risk
        } else {
            Status::Safe
        }
    }
}

#[derive(Default)]
pub struct TouristStore {
    shards: DashMap<String, TouristState>,
}

impl TouristStore {
    pub fn new() -> Self {
        Self { shards: DashMap::new() }
    }

    /// Returns a consistent snapshot of one tourist's state.
    pub fn get(&self, tourist_id: &str) -> Option<TouristState> {
        self.shards.get(tourist_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn all(&self) -> Vec<TouristState> {
        self.shards.iter().map(|e| e.value().clone()).collect()
    }

    /// Atomically swaps in a new fix and returns the prior state (membership
    /// set + snapshot version) the geofence evaluator needs to diff against.
    /// Returns `None` (fix dropped) if `fix` is older than the tourist's
    /// last accepted client timestamp — per-tourist monotonic ordering.
    pub fn accept_fix(
        &self,
        tourist_id: &str,
        display_name: &str,
        fix: Fix,
    ) -> Option<TouristState> {
        let mut entry = self
            .shards
            .entry(tourist_id.to_string())
            .or_insert_with(|| TouristState::new(tourist_id.to_string(), display_name.to_string()));

        if let Some(prev) = &entry.latest_fix {
            if fix.client_timestamp < prev.client_timestamp {
                return None;
            }
        }

        let prior = entry.clone();
        entry.display_name = display_name.to_string();
        entry.latest_fix = Some(fix);
        Some(prior)
    }

    pub fn set_membership(&self, tourist_id: &str, membership: HashSet<String>, snapshot_version: u64) {
        if let Some(mut e) = self.shards.get_mut(tourist_id) {
            e.membership = membership;
            e.snapshot_version = snapshot_version;
            e.last_evaluated_at = Some(Utc::now());
        }
    }

    pub fn set_sos_active(&self, tourist_id: &str, active: bool) {
        if let Some(mut e) = self.shards.get_mut(tourist_id) {
            e.sos_active = active;
        }
    }
}
