// Single engine value created at startup and passed explicitly to handlers,
// rather than package-level mutable state, so tests can spin up fresh
// engines in parallel. Owns C2/C3/C4/C8/C9 in-process; holds C5/C10 behind
// trait objects since those are pluggable external collaborators.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::alert::{AlertEngine, AlertKind};
use crate::auth::{self, Principal};
use crate::config::Config;
use crate::consent::ConsentGate;
use crate::error::{EngineError, EngineResult};
use crate::geofence::{self, Edge};
use crate::hub::{Hub, ServerMessage};
use crate::ingest::{self, PositionInput};
use crate::metrics::Metrics;
use crate::persistence::{HistoryRow, HistoryStore, HotCache, LivePosition};
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::sos::SosRegistry;
use crate::tourist::{Fix, TouristStore};
use crate::zone::{Severity, ZoneRegistry, ZoneVariant};

pub struct Engine {
    pub config: Config,
    pub zones: ZoneRegistry,
    pub tourists: TouristStore,
    pub rate_limiter: RateLimiter,
    pub consent: Arc<dyn ConsentGate>,
    pub alerts: AlertEngine,
    pub hub: Hub,
    pub hot_cache: Arc<dyn HotCache>,
    pub history: Arc<dyn HistoryStore>,
    pub sos: SosRegistry,
    pub metrics: Metrics,
}

/// Outcome of a single ingested fix, returned to HTTP/WS callers.
#[derive(Debug)]
pub struct IngestOutcome {
    pub accepted: bool,
    pub quality_score: f64,
    pub anomalous: bool,
}

impl Engine {
    /// Ingestion pipeline (C6) steps 1-10.
    pub async fn ingest_position(
        &self,
        principal: &Principal,
        tourist_id: &str,
        display_name: &str,
        input: PositionInput,
    ) -> EngineResult<IngestOutcome> {
        // Step 1: authorization.
        auth::authorize_ingest(principal, tourist_id, self.config.impersonation_enabled)?;

        // Step 2: rate limit.
        if let Err(e) = self.rate_limiter.check(tourist_id, EndpointClass::Position) {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!(tourist_id, "position_rate_limited");
            return Err(e);
        }

        // Step 3: validate coordinates (already a Point by construction),
        // accuracy, and timestamp window.
        ingest::validate_accuracy(input.accuracy_m).map_err(|e| {
            self.metrics.invalid_input.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        let now = Utc::now();
        let previous = self.tourists.get(tourist_id);
        let last_client_ts = previous.as_ref().and_then(|p| p.latest_fix.as_ref().map(|f| f.client_timestamp));
        ingest::validate_timestamp(input.client_timestamp, now, last_client_ts, self.config.position_timestamp_skew_secs)
            .map_err(|e| {
                self.metrics.invalid_input.fetch_add(1, Ordering::Relaxed);
                e
            })?;

        // Step 4: consent. A consent-gate timeout fails closed, the same as
        // an explicit denial.
        let decision = match tokio::time::timeout(self.config.consent_deadline, self.consent.allow(tourist_id)).await {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                self.metrics.consent_denied.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            Err(_) => {
                self.metrics.consent_denied.fetch_add(1, Ordering::Relaxed);
                warn!(tourist_id, "consent_check_timed_out");
                return Err(EngineError::ConsentRequired);
            }
        };

        // Step 5: derive motion + quality against the previous fix.
        let prev_point_ts = previous
            .as_ref()
            .and_then(|p| p.latest_fix.as_ref().map(|f| (f.position, f.client_timestamp)));
        let motion = ingest::derive_motion(prev_point_ts, input.position, input.client_timestamp);
        let quality = ingest::quality_score(input.accuracy_m, motion.speed_mps, motion.time_delta_s, motion.distance_m);

        // Step 6: anomaly flag (advisory only, does not gate ingestion).
        let anomalous = ingest::is_anomalous(motion.speed_mps, input.accuracy_m, motion.distance_m, motion.time_delta_s);
        if anomalous {
            self.metrics.anomalous.fetch_add(1, Ordering::Relaxed);
        }

        self.metrics.ingested.fetch_add(1, Ordering::Relaxed);

        let fix = Fix {
            tourist_id: tourist_id.to_string(),
            sequence: previous.as_ref().map(|p| p.latest_fix.as_ref().map(|f| f.sequence + 1).unwrap_or(0)).unwrap_or(0),
            position: input.position,
            accuracy_m: input.accuracy_m,
            speed_mps: motion.speed_mps,
            heading_deg: motion.heading_deg,
            client_timestamp: input.client_timestamp,
            ingest_timestamp: now,
            device_info: input.device_info.clone(),
            network_info: input.network_info.clone(),
            anomalous,
            quality_score: quality,
        };

        // Step 7: atomic per-tourist swap; a `None` means the fix was older
        // than the last accepted one and was silently dropped.
        let prior_state = match self.tourists.accept_fix(tourist_id, display_name, fix.clone()) {
            Some(prior) => prior,
            None => {
                self.metrics.dropped_out_of_order.fetch_add(1, Ordering::Relaxed);
                info!(tourist_id, "fix_dropped_out_of_order");
                return Ok(IngestOutcome { accepted: false, quality_score: quality, anomalous });
            }
        };

        // Step 8: geofence evaluation against one zone snapshot.
        let snapshot = self.zones.snapshot();
        let (new_membership, edges) = geofence::evaluate(&prior_state.membership, fix.position, &snapshot);
        self.tourists.set_membership(tourist_id, new_membership.clone(), snapshot.version);

        let restricted_ids: std::collections::HashSet<String> =
            snapshot.restricted.iter().filter(|z| z.active).map(|z| z.id.clone()).collect();
        let in_restricted = new_membership.iter().any(|id| restricted_ids.contains(id));
        let in_safe = new_membership.iter().any(|id| !restricted_ids.contains(id));

        for edge in &edges {
            self.emit_geofence_alert(edge, &new_membership, &snapshot, tourist_id, display_name, fix.position, now);
        }

        // Step 9: history append with anonymization per consent. A deadline
        // overrun degrades the same way a store error does: log and move on.
        let row = self.build_history_row(&fix, display_name, snapshot.version, decision.anonymize, motion.distance_m, motion.time_delta_s);
        match tokio::time::timeout(self.config.history_deadline, self.history.append(row)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.degraded_history_writes.fetch_add(1, Ordering::Relaxed);
                warn!(tourist_id, error = %e, "history_append_degraded");
            }
            Err(_) => {
                self.metrics.degraded_history_writes.fetch_add(1, Ordering::Relaxed);
                warn!(tourist_id, "history_append_timed_out");
            }
        }
        self.hot_cache
            .write_live_position(LivePosition {
                tourist_id: tourist_id.to_string(),
                display_name: display_name.to_string(),
                position: fix.position,
                server_timestamp: now,
            })
            .await;

        // Step 10: fan-out.
        self.hub.publish_watch(
            tourist_id,
            ServerMessage::location_changed(tourist_id, display_name, fix.position, fix.accuracy_m, now),
        );
        self.hub.publish_user(
            tourist_id,
            ServerMessage::ZoneStatus {
                in_restricted,
                in_safe,
                restricted_zones: new_membership.iter().filter(|id| restricted_ids.contains(*id)).cloned().collect(),
                safe_zones: new_membership.iter().filter(|id| !restricted_ids.contains(*id)).cloned().collect(),
            },
        );

        self.metrics.accepted_ok.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome { accepted: true, quality_score: quality, anomalous })
    }

    /// Alert generation rules: enter(restricted) -> geofence_breach;
    /// exit(safe) with no remaining safe membership -> safe_zone_exit.
    #[allow(clippy::too_many_arguments)]
    fn emit_geofence_alert(
        &self,
        edge: &geofence::EdgeEvent,
        new_membership: &std::collections::HashSet<String>,
        snapshot: &crate::zone::ZoneSnapshot,
        tourist_id: &str,
        display_name: &str,
        position: crate::geometry::Point,
        now: chrono::DateTime<Utc>,
    ) {
        let zone = geofence::resolve_zone(snapshot, &edge.zone_id);
        let (kind, severity, zone_name) = match (edge.edge, zone) {
            (Edge::Enter, Some(z)) if geofence::is_restricted(z) => {
                (Some(AlertKind::GeofenceBreach), z.severity, Some(z.name.clone()))
            }
            (Edge::Exit, Some(z)) if geofence::is_safe(z) => {
                let still_in_safe = new_membership.iter().any(|id| {
                    snapshot.find(id).map(geofence::is_safe).unwrap_or(false)
                });
                if still_in_safe {
                    (None, Severity::Low, None)
                } else {
                    (Some(AlertKind::SafeZoneExit), Severity::Medium, Some(z.name.clone()))
                }
            }
            (Edge::Exit, None) => {
                // Zone was deleted between fixes: still report the
                // exit if the tourist was previously recorded inside it,
                // but we no longer know its variant/severity, so treat it
                // conservatively as a low-severity informational exit.
                (Some(AlertKind::SafeZoneExit), Severity::Low, None)
            }
            _ => (None, Severity::Low, None),
        };

        if let Some(kind) = kind {
            let description = match kind {
                AlertKind::GeofenceBreach => format!("tourist entered restricted zone {}", edge.zone_id),
                AlertKind::SafeZoneExit => format!("tourist exited safe zone {}", edge.zone_id),
                _ => String::new(),
            };
            let emitted = self.alerts.emit(
                kind,
                tourist_id,
                display_name,
                Some(position),
                Some(edge.zone_id.clone()),
                zone_name,
                severity,
                description,
                now,
            );
            match emitted {
                Some(alert) => {
                    self.metrics.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                    self.hub.publish_authorities(ServerMessage::from_alert(&alert));
                }
                None => {
                    self.metrics.alerts_deduped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn build_history_row(
        &self,
        fix: &Fix,
        display_name: &str,
        snapshot_version: u64,
        anonymize: bool,
        distance_from_previous_m: f64,
        time_from_previous_s: f64,
    ) -> HistoryRow {
        let (tourist_id, display_name, position) = if anonymize {
            (
                crate::consent::salted_hash_id(&self.config.anonymization_salt, &fix.tourist_id),
                crate::consent::mask_name(display_name),
                crate::geometry::Point {
                    lat: crate::consent::round_coordinate(fix.position.lat),
                    lon: crate::consent::round_coordinate(fix.position.lon),
                },
            )
        } else {
            (fix.tourist_id.clone(), display_name.to_string(), fix.position)
        };

        HistoryRow {
            tourist_id,
            display_name,
            position,
            accuracy_m: fix.accuracy_m,
            server_timestamp: fix.ingest_timestamp,
            client_timestamp: fix.client_timestamp,
            speed_mps: fix.speed_mps,
            heading_deg: fix.heading_deg,
            distance_from_previous_m,
            time_from_previous_s,
            quality_score: fix.quality_score,
            anomalous: fix.anomalous,
            snapshot_version,
            anonymized: anonymize,
            retention_days: 90,
        }
    }

    /// SOS fan-out: the engine consumes the external SOS subsystem's
    /// trigger/resolve calls through this narrow seam and fans out an alert
    /// of severity high, pinning/unpinning the tourist's `sos` status.
    pub fn sos_triggered(&self, tourist_id: &str, display_name: &str) -> EngineResult<()> {
        self.sos.trigger(tourist_id);
        self.tourists.set_sos_active(tourist_id, true);
        let now = Utc::now();
        if let Some(alert) = self.alerts.emit(
            AlertKind::SosTriggered,
            tourist_id,
            display_name,
            self.tourists.get(tourist_id).and_then(|s| s.latest_fix.map(|f| f.position)),
            None,
            None,
            Severity::High,
            "SOS triggered".into(),
            now,
        ) {
            self.hub.publish_authorities(ServerMessage::from_alert(&alert));
        }
        Ok(())
    }

    pub fn sos_resolved(&self, tourist_id: &str, display_name: &str) -> EngineResult<()> {
        self.sos.resolve(tourist_id)?;
        self.tourists.set_sos_active(tourist_id, false);
        let now = Utc::now();
        if let Some(alert) = self.alerts.emit(
            AlertKind::SosResolved,
            tourist_id,
            display_name,
            self.tourists.get(tourist_id).and_then(|s| s.latest_fix.map(|f| f.position)),
            None,
            None,
            Severity::High,
            "SOS resolved".into(),
            now,
        ) {
            self.hub.publish_authorities(ServerMessage::from_alert(&alert));
        }
        Ok(())
    }

    pub fn add_zone(
        &self,
        variant: ZoneVariant,
        name: String,
        geometry: crate::geometry::Polygon,
        severity: Severity,
        description: Option<String>,
    ) -> EngineResult<crate::zone::Zone> {
        self.zones.add(variant, name, geometry, severity, description)
    }

    pub fn delete_zone(&self, id: &str) -> EngineResult<()> {
        self.zones.delete(id)
    }

    pub fn history_has_capacity(&self) -> bool {
        self.history.has_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::consent::{ConsentRecord, InMemoryConsentGate};
    use crate::geometry::Point;
    use crate::persistence::{FileHistoryStore, HistoryMetrics};

    async fn test_engine(tmp_suffix: &str) -> Engine {
        let consent_gate = Arc::new(InMemoryConsentGate::new());
        consent_gate.set(
            "t1",
            ConsentRecord { location_sharing: true, retention_days: 30, anonymize: false, consent_given_at: Some(Utc::now()) },
        );
        let consent: Arc<dyn ConsentGate> = consent_gate;
        let history_metrics = Arc::new(HistoryMetrics::new());
        let history_path = format!("/tmp/engine_test_history_{tmp_suffix}.ndjson");
        let hot_cache_path = format!("/tmp/engine_test_hotcache_{tmp_suffix}.json");
        Engine {
            config: Config::from_env(),
            zones: ZoneRegistry::load(format!("/tmp/engine_test_zones_{tmp_suffix}.json")).await,
            tourists: TouristStore::new(),
            rate_limiter: RateLimiter::new(),
            consent,
            alerts: AlertEngine::new(1000),
            hub: Hub::new(),
            hot_cache: Arc::new(crate::persistence::FileHotCache::new(hot_cache_path)),
            history: Arc::new(FileHistoryStore::spawn(history_path, history_metrics)),
            sos: SosRegistry::new(),
            metrics: Metrics::new(),
        }
    }

    fn tourist_principal() -> Principal {
        Principal { id: "t1".into(), role: Role::Tourist }
    }

    fn input_at(lat: f64, lon: f64, ts: chrono::DateTime<Utc>) -> PositionInput {
        PositionInput {
            position: Point::new(lat, lon).unwrap(),
            accuracy_m: Some(5.0),
            client_timestamp: ts,
            device_info: None,
            network_info: None,
        }
    }

    #[tokio::test]
    async fn scenario_consent_gated_accept_emits_geofence_breach() {
        let engine = test_engine("scenario1").await;
        let square = crate::geometry::Polygon {
            vertices: vec![
                Point::new(28.6139, 77.2090).unwrap(),
                Point::new(28.6149, 77.2090).unwrap(),
                Point::new(28.6149, 77.2100).unwrap(),
                Point::new(28.6139, 77.2100).unwrap(),
                Point::new(28.6139, 77.2090).unwrap(),
            ],
        };
        engine.add_zone(ZoneVariant::Restricted, "R".into(), square, Severity::High, None).unwrap();
        let circle = crate::zone::normalize_circle_zone(Point::new(28.6139, 77.2090).unwrap(), 1000.0).unwrap();
        engine.add_zone(ZoneVariant::Safe, "S".into(), circle, Severity::Low, None).unwrap();

        let mut authorities_rx = engine.hub.subscribe_authorities();

        let outcome = engine
            .ingest_position(&tourist_principal(), "t1", "Alice", input_at(28.6142, 77.2095, Utc::now()))
            .await
            .unwrap();
        assert!(outcome.accepted);

        let state = engine.tourists.get("t1").unwrap();
        assert_eq!(state.membership.len(), 2);

        let alert_msg = authorities_rx.try_recv().unwrap();
        match alert_msg {
            ServerMessage::Alert { kind, severity, .. } => {
                assert_eq!(kind, AlertKind::GeofenceBreach);
                assert_eq!(severity, Severity::High);
            }
            _ => panic!("expected alert"),
        }
    }

    #[tokio::test]
    async fn scenario_consent_missing_rejects_without_side_effects() {
        let engine = test_engine("scenario2").await;
        let result = engine
            .ingest_position(&Principal { id: "t2".into(), role: Role::Tourist }, "t2", "Bob", input_at(1.0, 1.0, Utc::now()))
            .await;
        assert!(matches!(result, Err(EngineError::ConsentRequired)));
        assert!(engine.tourists.get("t2").is_none());
    }

    #[tokio::test]
    async fn scenario_rate_limit_after_20_in_one_minute() {
        let engine = test_engine("scenario3").await;
        let now = Utc::now();
        let mut accepted = 0;
        let mut rejected = 0;
        for i in 0..21 {
            let ts = now + chrono::Duration::milliseconds(i);
            match engine.ingest_position(&tourist_principal(), "t1", "Alice", input_at(10.0, 10.0, ts)).await {
                Ok(o) if o.accepted => accepted += 1,
                Err(EngineError::RateLimited { .. }) => rejected += 1,
                _ => {}
            }
        }
        assert_eq!(accepted, 20);
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn scenario_exit_from_safe_emits_safe_zone_exit_only() {
        let engine = test_engine("scenario4").await;
        let circle = crate::zone::normalize_circle_zone(Point::new(0.0, 0.0).unwrap(), 500.0).unwrap();
        engine.add_zone(ZoneVariant::Safe, "SafeZone".into(), circle, Severity::Low, None).unwrap();

        let now = Utc::now();
        engine.ingest_position(&tourist_principal(), "t1", "Alice", input_at(0.0, 0.0, now)).await.unwrap();
        let mut authorities_rx = engine.hub.subscribe_authorities();

        let far = input_at(10.0, 10.0, now + chrono::Duration::seconds(10));
        engine.ingest_position(&tourist_principal(), "t1", "Alice", far).await.unwrap();

        let alert_msg = authorities_rx.try_recv().unwrap();
        match alert_msg {
            ServerMessage::Alert { kind, severity, .. } => {
                assert_eq!(kind, AlertKind::SafeZoneExit);
                assert_eq!(severity, Severity::Medium);
            }
            _ => panic!("expected alert"),
        }
        assert!(authorities_rx.try_recv().is_err(), "no second (breach) alert expected");
    }

    #[tokio::test]
    async fn scenario_jitter_suppression_collapses_duplicate_breach() {
        let engine = test_engine("scenario5").await;
        let square = crate::geometry::Polygon {
            vertices: vec![
                Point::new(0.0, 0.0).unwrap(),
                Point::new(0.0, 1.0).unwrap(),
                Point::new(1.0, 1.0).unwrap(),
                Point::new(1.0, 0.0).unwrap(),
                Point::new(0.0, 0.0).unwrap(),
            ],
        };
        engine.add_zone(ZoneVariant::Restricted, "R".into(), square, Severity::High, None).unwrap();
        let mut authorities_rx = engine.hub.subscribe_authorities();
        let mut watch_rx = engine.hub.subscribe_watch("t1");

        let now = Utc::now();
        // Cross in, out, back in within 2s — two location updates, one alert.
        engine.ingest_position(&tourist_principal(), "t1", "Alice", input_at(0.5, 0.5, now)).await.unwrap();
        engine
            .ingest_position(&tourist_principal(), "t1", "Alice", input_at(10.0, 10.0, now + chrono::Duration::milliseconds(500)))
            .await
            .unwrap();
        engine
            .ingest_position(&tourist_principal(), "t1", "Alice", input_at(0.5, 0.5, now + chrono::Duration::milliseconds(900)))
            .await
            .unwrap();

        let mut alert_count = 0;
        while authorities_rx.try_recv().is_ok() {
            alert_count += 1;
        }
        assert_eq!(alert_count, 1, "duplicate breach within 2s must collapse");

        let mut location_count = 0;
        while watch_rx.try_recv().is_ok() {
            location_count += 1;
        }
        assert_eq!(location_count, 3);
    }

    #[tokio::test]
    async fn out_of_order_fix_is_silently_dropped_not_an_error() {
        let engine = test_engine("scenario_ooo").await;
        let now = Utc::now();
        engine.ingest_position(&tourist_principal(), "t1", "Alice", input_at(1.0, 1.0, now)).await.unwrap();
        let older = input_at(1.0, 1.0, now - chrono::Duration::seconds(5));
        let outcome = engine.ingest_position(&tourist_principal(), "t1", "Alice", older).await.unwrap();
        assert!(!outcome.accepted);
    }

    #[tokio::test]
    async fn anonymized_history_row_rounds_coordinates_and_hides_id() {
        let engine = test_engine("scenario_anon").await;
        let row = engine.build_history_row(
            &Fix {
                tourist_id: "t1".into(),
                sequence: 0,
                position: Point::new(28.613921, 77.209499).unwrap(),
                accuracy_m: None,
                speed_mps: 0.0,
                heading_deg: 0.0,
                client_timestamp: Utc::now(),
                ingest_timestamp: Utc::now(),
                device_info: None,
                network_info: None,
                anomalous: false,
                quality_score: 1.0,
            },
            "Alice",
            1,
            true,
            0.0,
            0.0,
        );
        assert_eq!(row.position.lat, 28.61);
        assert_eq!(row.position.lon, 77.21);
        assert_ne!(row.tourist_id, "t1");
        assert_eq!(row.display_name, "A****");
    }
}
