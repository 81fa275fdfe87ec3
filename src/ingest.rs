// Ingestion pipeline (C6) — pure helpers. The orchestration of steps 1-10
// lives on `Engine::ingest_position` in `engine.rs`, which wires these
// helpers to C3/C4/C5/C7/C8/C9/C10; this module holds the parts that are
// total functions of their inputs and so are cheap to test in isolation.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::geometry::{self, Point};

/// Raw input from the HTTP/WS boundary, already converted from wire
/// `[lng, lat]` ordering into an explicit `Point`.
#[derive(Clone, Debug)]
pub struct PositionInput {
    pub position: Point,
    pub accuracy_m: Option<f64>,
    pub client_timestamp: DateTime<Utc>,
    pub device_info: Option<String>,
    pub network_info: Option<String>,
}

pub struct DerivedMotion {
    pub distance_m: f64,
    pub time_delta_s: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
}

/// Derives distance, time-delta, speed and heading against the previous fix.
/// Speed/heading are derived (not carried by the client) and default to 0
/// for a tourist's first fix.
pub fn derive_motion(previous: Option<(Point, DateTime<Utc>)>, current: Point, current_ts: DateTime<Utc>) -> DerivedMotion {
    match previous {
        None => DerivedMotion { distance_m: 0.0, time_delta_s: 0.0, speed_mps: 0.0, heading_deg: 0.0 },
        Some((prev_pos, prev_ts)) => {
            let distance_m = geometry::distance(prev_pos, current);
            let time_delta_s = (current_ts - prev_ts).num_milliseconds() as f64 / 1000.0;
            let speed_mps = if time_delta_s > 0.0 { distance_m / time_delta_s } else { 0.0 };
            let heading_deg = geometry::bearing(prev_pos, current);
            DerivedMotion { distance_m, time_delta_s, speed_mps, heading_deg }
        }
    }
}

/// Quality score: starts at 1.0, penalized by accuracy/speed/
/// time-gap/jump-distance, clamped to [0,1]. Purely advisory.
pub fn quality_score(accuracy_m: Option<f64>, speed_mps: f64, time_gap_s: f64, distance_m: f64) -> f64 {
    let mut score = 1.0;
    if let Some(acc) = accuracy_m {
        if acc > 100.0 {
            score -= 0.3;
        } else if acc >= 50.0 {
            score -= 0.1;
        }
    }
    let speed_kmh = speed_mps * 3.6;
    if speed_kmh > 200.0 {
        score -= 0.5;
    }
    if time_gap_s > 3600.0 {
        score -= 0.2;
    }
    if distance_m > 50_000.0 {
        score -= 0.4;
    }
    score.clamp(0.0, 1.0)
}

/// Anomaly flag: any of sustained >50 m/s, accuracy >1000m,
/// jump >10km, or time-gap >3600s.
pub fn is_anomalous(speed_mps: f64, accuracy_m: Option<f64>, distance_m: f64, time_gap_s: f64) -> bool {
    speed_mps > 50.0
        || accuracy_m.map(|a| a > 1000.0).unwrap_or(false)
        || distance_m > 10_000.0
        || time_gap_s > 3600.0
}

/// Timestamp validation: reject (InvalidInput) if the fix is more than
/// `skew` seconds in the future of server time, or more than `skew` seconds
/// older than the last accepted fix. A fix that is merely *older* than the
/// last accepted one but within the skew window is not an error here — it
/// is handled by the silent monotonic-ordering drop in C3.
pub fn validate_timestamp(
    client_timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    last_accepted: Option<DateTime<Utc>>,
    skew_secs: u64,
) -> Result<(), EngineError> {
    let skew = chrono::Duration::seconds(skew_secs as i64);
    if client_timestamp > now + skew {
        return Err(EngineError::InvalidInput("fix timestamp is too far in the future".into()));
    }
    if let Some(last) = last_accepted {
        if client_timestamp < last - skew {
            return Err(EngineError::InvalidInput(
                "fix timestamp is more than the configured skew older than the last accepted fix".into(),
            ));
        }
    }
    Ok(())
}

pub fn validate_accuracy(accuracy_m: Option<f64>) -> Result<(), EngineError> {
    if let Some(acc) = accuracy_m {
        if acc < 0.0 {
            return Err(EngineError::InvalidInput("accuracy must be >= 0".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn first_fix_has_zero_derived_motion() {
        let p = Point::new(10.0, 10.0).unwrap();
        let m = derive_motion(None, p, Utc::now());
        assert_eq!(m.distance_m, 0.0);
        assert_eq!(m.speed_mps, 0.0);
    }

    #[test]
    fn derives_speed_from_distance_and_time() {
        let p1 = Point::new(0.0, 0.0).unwrap();
        let p2 = Point::new(0.0, 0.001).unwrap(); // ~111m east
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(10);
        let m = derive_motion(Some((p1, t1)), p2, t2);
        assert!(m.distance_m > 90.0 && m.distance_m < 130.0);
        assert!((m.speed_mps - m.distance_m / 10.0).abs() < 1e-6);
    }

    #[test]
    fn quality_score_default_is_one() {
        assert_eq!(quality_score(Some(10.0), 1.0, 1.0, 1.0), 1.0);
    }

    #[test]
    fn quality_score_penalizes_low_accuracy() {
        assert!((quality_score(Some(150.0), 0.0, 0.0, 0.0) - 0.7).abs() < 1e-9);
        assert!((quality_score(Some(75.0), 0.0, 0.0, 0.0) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn quality_score_penalizes_speed_time_gap_and_jump() {
        let s = quality_score(None, 60.0, 4000.0, 60_000.0);
        // speed>200km/h(-0.5) + time_gap(-0.2) + distance(-0.4) = 1.0 - 1.1 -> clamp 0
        assert_eq!(s, 0.0);
    }

    #[test]
    fn anomalous_flags_each_condition() {
        assert!(is_anomalous(51.0, None, 0.0, 0.0));
        assert!(is_anomalous(0.0, Some(1001.0), 0.0, 0.0));
        assert!(is_anomalous(0.0, None, 10_001.0, 0.0));
        assert!(is_anomalous(0.0, None, 0.0, 3601.0));
        assert!(!is_anomalous(1.0, Some(5.0), 10.0, 5.0));
    }

    #[test]
    fn timestamp_future_beyond_skew_is_rejected() {
        let now = Utc::now();
        let future = now + ChronoDuration::seconds(120);
        assert!(validate_timestamp(future, now, None, 60).is_err());
    }

    #[test]
    fn timestamp_within_future_skew_is_accepted() {
        let now = Utc::now();
        let future = now + ChronoDuration::seconds(30);
        assert!(validate_timestamp(future, now, None, 60).is_ok());
    }

    #[test]
    fn timestamp_far_older_than_last_accepted_is_rejected() {
        let now = Utc::now();
        let last = now;
        let stale = now - ChronoDuration::seconds(200);
        assert!(validate_timestamp(stale, now, Some(last), 60).is_err());
    }

    #[test]
    fn timestamp_slightly_older_is_accepted_for_validation_purposes() {
        let now = Utc::now();
        let last = now;
        let slightly_old = now - ChronoDuration::seconds(5);
        assert!(validate_timestamp(slightly_old, now, Some(last), 60).is_ok());
    }

    #[test]
    fn negative_accuracy_is_rejected() {
        assert!(validate_accuracy(Some(-1.0)).is_err());
        assert!(validate_accuracy(Some(0.0)).is_ok());
        assert!(validate_accuracy(None).is_ok());
    }
}
