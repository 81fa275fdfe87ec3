// HTTP surface. Thin handlers over `Engine` — request/response shapes
// only, no business logic here. State-extractor handlers with
// `ServiceBuilder` layering in main.rs, covering the full
// position/geofencing/alert surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{Principal, TokenVerifier};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::geometry::Point;
use crate::ingest::PositionInput;
use crate::ratelimit::EndpointClass;
use crate::zone::{Severity, ZonePatch, ZoneVariant};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/position", post(submit_position))
        .route("/position/live", get(live_positions))
        .route("/geofencing/zones", get(list_zones))
        .route("/geofencing/zones/restricted", post(create_restricted_zone))
        .route("/geofencing/zones/safe", post(create_safe_zone))
        .route("/geofencing/zones/circular", post(create_circular_zone))
        .route("/geofencing/zones/:id", delete(delete_zone).patch(patch_zone))
        .route("/geofencing/alerts", get(list_alerts))
        .route("/sos/:tourist_id/trigger", post(trigger_sos))
        .route("/sos/:tourist_id/resolve", post(resolve_sos))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CompressionLayer::new()))
}

async fn authenticate(state: &AppState, headers: &axum::http::HeaderMap) -> EngineResult<Principal> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::Unauthenticated)?;
    let token = raw.strip_prefix("Bearer ").ok_or(EngineError::Unauthenticated)?;
    state.verifier.verify(token).await
}

#[derive(Deserialize)]
struct PositionRequest {
    tourist_id: String,
    display_name: String,
    /// Wire order is [lng, lat].
    coordinates: [f64; 2],
    accuracy_m: Option<f64>,
    timestamp: DateTime<Utc>,
    device_info: Option<String>,
    network_info: Option<String>,
}

#[derive(Serialize)]
struct PositionResponse {
    accepted: bool,
    quality_score: f64,
    anomalous: bool,
}

async fn submit_position(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<PositionRequest>,
) -> Result<Json<PositionResponse>, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    let [lon, lat] = body.coordinates;
    let position = Point::new(lat, lon)?;
    let input = PositionInput {
        position,
        accuracy_m: body.accuracy_m,
        client_timestamp: body.timestamp,
        device_info: body.device_info,
        network_info: body.network_info,
    };
    let outcome = state
        .engine
        .ingest_position(&principal, &body.tourist_id, &body.display_name, input)
        .await?;
    Ok(Json(PositionResponse {
        accepted: outcome.accepted,
        quality_score: outcome.quality_score,
        anomalous: outcome.anomalous,
    }))
}

async fn live_positions(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Result<impl IntoResponse, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    if !principal.is_authority() {
        return Err(EngineError::Unauthorized("live positions require an authority role".into()));
    }
    let positions = state.engine.hot_cache.read_all().await;
    Ok(Json(positions))
}

#[derive(Serialize)]
struct ZonesResponse {
    version: u64,
    restricted: Vec<crate::zone::Zone>,
    safe: Vec<crate::zone::Zone>,
}

async fn list_zones(State(state): State<AppState>) -> Json<ZonesResponse> {
    let snap = state.engine.zones.snapshot();
    Json(ZonesResponse { version: snap.version, restricted: snap.restricted.clone(), safe: snap.safe.clone() })
}

#[derive(Deserialize)]
struct PolygonZoneRequest {
    name: String,
    coordinates: Vec<[f64; 2]>,
    #[serde(rename = "alertLevel")]
    alert_level: Severity,
    description: Option<String>,
}

async fn create_restricted_zone(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<PolygonZoneRequest>,
) -> Result<impl IntoResponse, EngineError> {
    create_polygon_zone(state, headers, ZoneVariant::Restricted, body).await
}

async fn create_safe_zone(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<PolygonZoneRequest>,
) -> Result<impl IntoResponse, EngineError> {
    create_polygon_zone(state, headers, ZoneVariant::Safe, body).await
}

async fn create_polygon_zone(
    state: AppState,
    headers: axum::http::HeaderMap,
    variant: ZoneVariant,
    body: PolygonZoneRequest,
) -> Result<impl IntoResponse, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    check_rate_limit(&state, &principal, EndpointClass::GeofencingAdmin)?;
    let mut vertices = Vec::with_capacity(body.coordinates.len());
    for [lon, lat] in body.coordinates {
        vertices.push(Point::new(lat, lon)?);
    }
    let zone = state.engine.add_zone(
        variant,
        body.name,
        crate::geometry::Polygon { vertices },
        body.alert_level,
        body.description,
    )?;
    Ok((axum::http::StatusCode::CREATED, Json(zone)))
}

#[derive(Deserialize)]
struct CircularZoneRequest {
    name: String,
    center: [f64; 2],
    radius: f64,
    #[serde(rename = "type")]
    variant: ZoneVariant,
    #[serde(rename = "alertLevel")]
    alert_level: Severity,
    description: Option<String>,
}

async fn create_circular_zone(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CircularZoneRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    check_rate_limit(&state, &principal, EndpointClass::GeofencingAdmin)?;
    let [lon, lat] = body.center;
    let center = Point::new(lat, lon)?;
    let polygon = crate::zone::normalize_circle_zone(center, body.radius)?;
    let zone = state.engine.add_zone(body.variant, body.name, polygon, body.alert_level, body.description)?;
    Ok((axum::http::StatusCode::CREATED, Json(zone)))
}

async fn patch_zone(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<ZonePatch>,
) -> Result<Json<crate::zone::Zone>, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    check_rate_limit(&state, &principal, EndpointClass::GeofencingAdmin)?;
    let zone = state.engine.zones.update(&id, patch)?;
    Ok(Json(zone))
}

async fn delete_zone(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    check_rate_limit(&state, &principal, EndpointClass::GeofencingAdmin)?;
    state.engine.delete_zone(&id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

fn require_authority(principal: &Principal) -> EngineResult<()> {
    if principal.is_authority() {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("zone management requires an authority role".into()))
    }
}

fn check_rate_limit(state: &AppState, principal: &Principal, class: EndpointClass) -> EngineResult<()> {
    state.engine.rate_limiter.check(&principal.id, class).map_err(|e| {
        state.engine.metrics.rate_limited.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        e
    })
}

#[derive(Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<AlertsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    let alerts = state.engine.alerts.recent_alerts(query.limit.unwrap_or(50));
    Ok(Json(alerts))
}

#[derive(Deserialize)]
struct SosRequest {
    display_name: String,
}

async fn trigger_sos(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(tourist_id): Path<String>,
    Json(body): Json<SosRequest>,
) -> Result<axum::http::StatusCode, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    crate::auth::authorize_ingest(&principal, &tourist_id, state.engine.config.impersonation_enabled)?;
    check_rate_limit(&state, &principal, EndpointClass::Sos)?;
    state.engine.sos_triggered(&tourist_id, &body.display_name)?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

async fn resolve_sos(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(tourist_id): Path<String>,
    Json(body): Json<SosRequest>,
) -> Result<axum::http::StatusCode, EngineError> {
    let principal = authenticate(&state, &headers).await?;
    require_authority(&principal)?;
    check_rate_limit(&state, &principal, EndpointClass::Sos)?;
    state.engine.sos_resolved(&tourist_id, &body.display_name)?;
    Ok(axum::http::StatusCode::OK)
}

async fn health() -> axum::http::StatusCode {
    axum::http::StatusCode::OK
}

/// Ready when the history queue still has spare capacity.
async fn ready(State(state): State<AppState>) -> axum::http::StatusCode {
    if state.engine.history_has_capacity() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.engine.metrics.snapshot())
}
