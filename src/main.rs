// Real-time tourist-safety location ingestion and geofencing engine.

mod alert;
mod auth;
mod config;
mod consent;
mod engine;
mod error;
mod geofence;
mod geometry;
mod http;
mod hub;
mod ingest;
mod metrics;
mod persistence;
mod ratelimit;
mod sos;
mod tourist;
mod ws;
mod zone;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use auth::{StaticTokenVerifier, TokenVerifier};
use config::Config;
use consent::InMemoryConsentGate;
use engine::Engine;
use persistence::{FileHistoryStore, FileHotCache, HistoryMetrics};
use ratelimit::RateLimiter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "tourist_safety_engine=info,tower_http=info".into()))
        .json()
        .init();

    let config = Config::from_env();
    info!(port = config.port, impersonation_enabled = config.impersonation_enabled, "tourist_safety_engine_starting");

    let zones = zone::ZoneRegistry::load(config.zone_snapshot_path.clone()).await;
    let history_metrics = Arc::new(HistoryMetrics::new());
    let history = Arc::new(FileHistoryStore::spawn(config.history_log_path.clone(), history_metrics));
    let hot_cache = Arc::new(FileHotCache::new(config.hot_cache_path.clone()));

    let engine = Arc::new(Engine {
        config: config.clone(),
        zones,
        tourists: tourist::TouristStore::new(),
        rate_limiter: RateLimiter::new(),
        consent: Arc::new(InMemoryConsentGate::new()),
        alerts: alert::AlertEngine::new(config.alert_ring_capacity),
        hub: hub::Hub::new(),
        hot_cache,
        history,
        sos: sos::SosRegistry::new(),
        metrics: metrics::Metrics::new(),
    });

    let verifier: Arc<dyn TokenVerifier> = Arc::new(StaticTokenVerifier);

    let rl_eviction_engine = engine.clone();
    tokio::spawn(async move {
        let mut iv = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            iv.tick().await;
            rl_eviction_engine.rate_limiter.evict_stale();
        }
    });
    tokio::spawn(persistence::compaction_task(config.history_log_path.clone(), std::time::Duration::from_secs(3600)));

    let state = http::AppState { engine: engine.clone(), verifier };
    let app = http::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, port = config.port, "bind_failed");
            std::process::exit(1);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown_signal_received");
        })
        .await
        .unwrap_or_else(|e| error!(error = %e, "server_error"));
}
