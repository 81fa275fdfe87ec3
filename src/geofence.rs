// Geofence evaluator (C7): diffs prior membership against a new fix,
// evaluated against one zone-registry snapshot. Generalizes the
// teacher's cluster-membership diffing (`GeoCluster`) from "count unique
// reporters in a cell" to "set-diff zone membership across two fixes".

use std::collections::HashSet;

use crate::geometry::{contains, Point};
use crate::zone::{Zone, ZoneSnapshot, ZoneVariant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Enter,
    Exit,
}

#[derive(Clone, Debug)]
pub struct EdgeEvent {
    pub edge: Edge,
    pub zone_id: String,
}

/// Computes M_new against the snapshot and returns the enter/exit edges
/// versus M_old, plus M_new itself for storage back into C3.
pub fn evaluate(prior_membership: &HashSet<String>, position: Point, snapshot: &ZoneSnapshot) -> (HashSet<String>, Vec<EdgeEvent>) {
    let new_membership: HashSet<String> = snapshot
        .all()
        .filter(|z| contains(&z.geometry, position))
        .map(|z| z.id.clone())
        .collect();

    let mut events = Vec::new();
    for zone_id in new_membership.difference(prior_membership) {
        events.push(EdgeEvent { edge: Edge::Enter, zone_id: zone_id.clone() });
    }
    for zone_id in prior_membership.difference(&new_membership) {
        events.push(EdgeEvent { edge: Edge::Exit, zone_id: zone_id.clone() });
    }

    (new_membership, events)
}

/// Resolves an edge's zone id against the snapshot it was evaluated in — a
/// deleted zone's edge still needs its last-known attributes for reporting,
/// since deletion generates an exit event if a tourist has a subsequent fix.
/// Callers should resolve promptly against the snapshot used for that
/// evaluation rather than the latest one.
pub fn resolve_zone<'a>(snapshot: &'a ZoneSnapshot, zone_id: &str) -> Option<&'a Zone> {
    snapshot.find(zone_id)
}

pub fn is_restricted(zone: &Zone) -> bool {
    zone.variant == ZoneVariant::Restricted
}

pub fn is_safe(zone: &Zone) -> bool {
    zone.variant == ZoneVariant::Safe
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{Severity, Zone, ZoneSnapshot};
    use chrono::Utc;

    fn square_zone(id: &str, variant: ZoneVariant) -> Zone {
        Zone {
            id: id.to_string(),
            name: id.to_string(),
            variant,
            geometry: crate::geometry::Polygon {
                vertices: vec![
                    Point::new(0.0, 0.0).unwrap(),
                    Point::new(0.0, 1.0).unwrap(),
                    Point::new(1.0, 1.0).unwrap(),
                    Point::new(1.0, 0.0).unwrap(),
                    Point::new(0.0, 0.0).unwrap(),
                ],
            },
            severity: Severity::High,
            active: true,
            created_at: Utc::now(),
            description: None,
        }
    }

    fn snapshot_with(zones: Vec<Zone>) -> ZoneSnapshot {
        let mut restricted = Vec::new();
        let mut safe = Vec::new();
        for z in zones {
            match z.variant {
                ZoneVariant::Restricted => restricted.push(z),
                ZoneVariant::Safe => safe.push(z),
            }
        }
        ZoneSnapshot { version: 1, restricted, safe, last_updated: None }
    }

    #[test]
    fn entering_a_zone_emits_enter() {
        let snap = snapshot_with(vec![square_zone("r1", ZoneVariant::Restricted)]);
        let prior = HashSet::new();
        let (membership, events) = evaluate(&prior, Point::new(0.5, 0.5).unwrap(), &snap);
        assert!(membership.contains("r1"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, Edge::Enter);
        assert_eq!(events[0].zone_id, "r1");
    }

    #[test]
    fn leaving_a_zone_emits_exit() {
        let snap = snapshot_with(vec![square_zone("s1", ZoneVariant::Safe)]);
        let mut prior = HashSet::new();
        prior.insert("s1".to_string());
        let (membership, events) = evaluate(&prior, Point::new(10.0, 10.0).unwrap(), &snap);
        assert!(membership.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, Edge::Exit);
    }

    #[test]
    fn no_change_emits_no_events() {
        let snap = snapshot_with(vec![square_zone("r1", ZoneVariant::Restricted)]);
        let mut prior = HashSet::new();
        prior.insert("r1".to_string());
        let (membership, events) = evaluate(&prior, Point::new(0.5, 0.5).unwrap(), &snap);
        assert_eq!(membership.len(), 1);
        assert!(events.is_empty());
    }

    #[test]
    fn zone_added_between_fixes_generates_enter_on_next_fix() {
        // Tourist already inside a geometry added after their prior fix —
        // the zone appears fresh with an empty prior membership, so the
        // first fix evaluated against the new snapshot produces an enter.
        let snap = snapshot_with(vec![square_zone("new_zone", ZoneVariant::Restricted)]);
        let prior = HashSet::new();
        let (_, events) = evaluate(&prior, Point::new(0.2, 0.2).unwrap(), &snap);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, Edge::Enter);
    }

    #[test]
    fn zone_deletion_followed_by_fix_outside_produces_one_exit() {
        // Prior membership still references a zone id that no longer
        // exists in the snapshot (it was deleted) — the next fix, if
        // outside its old geometry, must still emit exactly one exit.
        let snap = snapshot_with(vec![]); // deleted
        let mut prior = HashSet::new();
        prior.insert("deleted_zone".to_string());
        let (membership, events) = evaluate(&prior, Point::new(10.0, 10.0).unwrap(), &snap);
        assert!(membership.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, Edge::Exit);
        assert_eq!(events[0].zone_id, "deleted_zone");
    }
}
