// Zone registry (C2): authoritative set of restricted/safe zones. The
// read-side is a single ArcSwap pointer to an immutable snapshot — writers
// build a new snapshot and swap the pointer; readers never block writers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::geometry::{self, Point, Polygon, CIRCLE_VERTEX_COUNT};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneVariant {
    Restricted,
    Safe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub variant: ZoneVariant,
    pub geometry: Polygon,
    pub severity: Severity,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// Patch applied by `update()`. Geometry is immutable post-creation:
/// a geometry change must go through delete+create so enter/exit edges stay
/// bound to a concrete zone lifetime.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ZonePatch {
    pub name: Option<String>,
    pub severity: Option<Severity>,
    pub active: Option<bool>,
    pub description: Option<Option<String>>,
}

/// An immutable, versioned view of the registry. The geofence evaluator
/// reads exactly one of these per fix so that a single evaluation is atomic
/// against a coherent zone set.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ZoneSnapshot {
    pub version: u64,
    pub restricted: Vec<Zone>,
    pub safe: Vec<Zone>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ZoneSnapshot {
    pub fn all(&self) -> impl Iterator<Item = &Zone> {
        self.restricted.iter().chain(self.safe.iter())
    }

    pub fn find(&self, id: &str) -> Option<&Zone> {
        self.all().find(|z| z.id == id)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    restricted: Vec<Zone>,
    safe: Vec<Zone>,
    last_updated: Option<DateTime<Utc>>,
}

pub struct ZoneRegistry {
    current: ArcSwap<ZoneSnapshot>,
    version: AtomicU64,
    snapshot_path: String,
}

impl ZoneRegistry {
    /// Attempts to restore from the persisted snapshot; on failure or
    /// absence, starts empty and logs.
    pub async fn load(snapshot_path: impl Into<String>) -> Self {
        let snapshot_path = snapshot_path.into();
        let restored = match tokio::fs::read_to_string(&snapshot_path).await {
            Ok(raw) => match serde_json::from_str::<PersistedSnapshot>(&raw) {
                Ok(p) => {
                    info!(restricted = p.restricted.len(), safe = p.safe.len(), "zone_snapshot_restored");
                    Some(ZoneSnapshot {
                        version: 0,
                        restricted: p.restricted,
                        safe: p.safe,
                        last_updated: p.last_updated,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "zone_snapshot_corrupt_starting_empty");
                    None
                }
            },
            Err(_) => {
                info!("zone_snapshot_absent_starting_empty");
                None
            }
        };
        let snapshot = restored.unwrap_or_default();
        Self {
            current: ArcSwap::from_pointee(snapshot),
            version: AtomicU64::new(0),
            snapshot_path,
        }
    }

    pub fn snapshot(&self) -> Arc<ZoneSnapshot> {
        self.current.load_full()
    }

    pub fn add(
        &self,
        variant: ZoneVariant,
        name: String,
        geometry: Polygon,
        severity: Severity,
        description: Option<String>,
    ) -> Result<Zone, EngineError> {
        if !geometry::valid(&geometry) {
            return Err(EngineError::InvalidGeometry("polygon is not a valid closed simple ring".into()));
        }
        let prev = self.snapshot();
        // Duplicate names are warned, not rejected.
        if prev.all().any(|z| z.name == name) {
            warn!(name = %name, "zone_duplicate_name");
        }
        let zone = Zone {
            id: Uuid::new_v4().to_string(),
            name,
            variant,
            geometry,
            severity,
            active: true,
            created_at: Utc::now(),
            description,
        };
        self.mutate(|next| match variant {
            ZoneVariant::Restricted => next.restricted.push(zone.clone()),
            ZoneVariant::Safe => next.safe.push(zone.clone()),
        });
        Ok(zone)
    }

    pub fn update(&self, id: &str, patch: ZonePatch) -> Result<Zone, EngineError> {
        let prev = self.snapshot();
        if prev.find(id).is_none() {
            return Err(EngineError::NotFound(format!("zone {id}")));
        }
        let mut updated = None;
        self.mutate(|next| {
            for z in next.restricted.iter_mut().chain(next.safe.iter_mut()) {
                if z.id == id {
                    if let Some(name) = &patch.name {
                        z.name = name.clone();
                    }
                    if let Some(sev) = patch.severity {
                        z.severity = sev;
                    }
                    if let Some(active) = patch.active {
                        z.active = active;
                    }
                    if let Some(desc) = patch.description.clone() {
                        z.description = desc;
                    }
                    updated = Some(z.clone());
                }
            }
        });
        updated.ok_or_else(|| EngineError::NotFound(format!("zone {id}")))
    }

    pub fn delete(&self, id: &str) -> Result<(), EngineError> {
        let prev = self.snapshot();
        if prev.find(id).is_none() {
            return Err(EngineError::NotFound(format!("zone {id}")));
        }
        self.mutate(|next| {
            next.restricted.retain(|z| z.id != id);
            next.safe.retain(|z| z.id != id);
        });
        Ok(())
    }

    /// Builds a new snapshot by cloning the current one, applying `f`, bumping
    /// the version, and atomically swapping the read pointer. Persists
    /// asynchronously afterward (write-behind — the in-memory version is
    /// authoritative during the write window).
    fn mutate(&self, f: impl FnOnce(&mut ZoneSnapshot)) {
        let prev = self.snapshot();
        let mut next = (*prev).clone();
        f(&mut next);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        next.version = version;
        next.last_updated = Some(Utc::now());
        self.current.store(Arc::new(next.clone()));
        self.spawn_persist(next);
    }

    fn spawn_persist(&self, snapshot: ZoneSnapshot) {
        let path = self.snapshot_path.clone();
        tokio::spawn(async move {
            let persisted = PersistedSnapshot {
                restricted: snapshot.restricted,
                safe: snapshot.safe,
                last_updated: snapshot.last_updated,
            };
            match serde_json::to_string_pretty(&persisted) {
                Ok(raw) => {
                    if let Err(e) = tokio::fs::write(&path, raw).await {
                        warn!(error = %e, "zone_snapshot_persist_failed");
                    }
                }
                Err(e) => warn!(error = %e, "zone_snapshot_serialize_failed"),
            }
        });
    }
}

pub fn normalize_circle_zone(center: Point, radius_m: f64) -> Result<Polygon, EngineError> {
    geometry::normalize_circle(center, radius_m, CIRCLE_VERTEX_COUNT)
}
