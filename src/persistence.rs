// Persistence adapters (C10). Two interfaces:
//   - HotCache (optional, best-effort): write failures are logged and never
//     fail ingestion; reads only warm in-memory state at startup.
//   - HistoryStore (required for analytics): append-only rows, indexed on
//     (tourist, timestamp). Batches and flushes NDJSON the same way the
//     teacher's `persist_worker`/`flush()` does for its packet log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::geometry::Point;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LivePosition {
    pub tourist_id: String,
    pub display_name: String,
    pub position: Point,
    pub server_timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait HotCache: Send + Sync {
    async fn write_live_position(&self, pos: LivePosition);
    async fn read_all(&self) -> Vec<LivePosition>;
}

/// File-backed hot cache: a JSON object mapping tourist id -> latest fix,
/// matching the `live_positions` key of the persisted-state shape.
pub struct FileHotCache {
    path: String,
    failures: AtomicU64,
}

impl FileHotCache {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), failures: AtomicU64::new(0) }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HotCache for FileHotCache {
    async fn write_live_position(&self, pos: LivePosition) {
        // Best-effort: read-modify-write the whole map. A production
        // deployment would back this with an actual cache service; degraded
        // operation here is still correct because the engine's in-memory
        // tourist store remains authoritative.
        let mut map: std::collections::HashMap<String, LivePosition> = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => std::collections::HashMap::new(),
        };
        map.insert(pos.tourist_id.clone(), pos);
        match serde_json::to_string(&map) {
            Ok(raw) => {
                if let Err(e) = tokio::fs::write(&self.path, raw).await {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "hot_cache_write_failed");
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "hot_cache_serialize_failed");
            }
        }
    }

    async fn read_all(&self) -> Vec<LivePosition> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let map: std::collections::HashMap<String, LivePosition> = serde_json::from_str(&raw).unwrap_or_default();
                map.into_values().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

/// One durable history row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRow {
    pub tourist_id: String,
    pub display_name: String,
    pub position: Point,
    pub accuracy_m: Option<f64>,
    pub server_timestamp: DateTime<Utc>,
    pub client_timestamp: DateTime<Utc>,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub distance_from_previous_m: f64,
    pub time_from_previous_s: f64,
    pub quality_score: f64,
    pub anomalous: bool,
    pub snapshot_version: u64,
    pub anonymized: bool,
    pub retention_days: u16,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Enqueues a row for durable append. Must not block the ingest path
    /// longer than the configured history deadline; implementations
    /// that can't keep up should drop and report degraded mode rather than
    /// block.
    async fn append(&self, row: HistoryRow) -> Result<(), EngineError>;

    /// Readiness probe: false once the append path has no spare queue
    /// capacity.
    fn has_capacity(&self) -> bool {
        true
    }
}

/// Batches rows in a background task and flushes them as NDJSON on a
/// 100ms tick or a 1000-row batch, whichever comes first.
pub struct FileHistoryStore {
    tx: mpsc::Sender<HistoryRow>,
}

pub struct HistoryMetrics {
    pub appended: AtomicU64,
    pub flush_failures: AtomicU64,
    pub degraded_drops: AtomicU64,
}

impl HistoryMetrics {
    pub fn new() -> Self {
        Self {
            appended: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            degraded_drops: AtomicU64::new(0),
        }
    }
}

impl Default for HistoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHistoryStore {
    pub fn spawn(path: impl Into<String>, metrics: std::sync::Arc<HistoryMetrics>) -> Self {
        let (tx, rx) = mpsc::channel(100_000);
        let path = path.into();
        tokio::spawn(batch_worker(rx, path, metrics));
        Self { tx }
    }
}

async fn batch_worker(mut rx: mpsc::Receiver<HistoryRow>, path: String, metrics: std::sync::Arc<HistoryMetrics>) {
    let mut batch = Vec::with_capacity(1000);
    let mut iv = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            maybe_row = rx.recv() => {
                match maybe_row {
                    Some(row) => {
                        batch.push(row);
                        if batch.len() >= 1000 {
                            flush(&mut batch, &path, &metrics).await;
                        }
                    }
                    None => break,
                }
            }
            _ = iv.tick() => {
                if !batch.is_empty() {
                    flush(&mut batch, &path, &metrics).await;
                }
            }
        }
    }
    if !batch.is_empty() {
        flush(&mut batch, &path, &metrics).await;
    }
}

async fn flush(batch: &mut Vec<HistoryRow>, path: &str, metrics: &HistoryMetrics) {
    let n = batch.len();
    match tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
        Ok(mut f) => {
            for row in batch.iter() {
                if let Ok(line) = serde_json::to_string(row) {
                    let _ = f.write_all(line.as_bytes()).await;
                    let _ = f.write_all(b"\n").await;
                }
            }
            metrics.appended.fetch_add(n as u64, Ordering::Relaxed);
            info!(rows = n, "history_batch_flush");
        }
        Err(e) => {
            metrics.flush_failures.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "history_log_open_failed");
        }
    }
    batch.clear();
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, row: HistoryRow) -> Result<(), EngineError> {
        match self.tx.try_send(row) {
            Ok(_) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(EngineError::DependencyUnavailable("history queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EngineError::DependencyUnavailable("history worker stopped".into()))
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.tx.capacity() > 0
    }
}

/// Compactor: purges history rows whose `retention_days` has elapsed since
/// `server_timestamp`. Rewrites the NDJSON file periodically — acceptable
/// for the append-mostly, compact-rarely access pattern this store has.
pub async fn compaction_task(path: String, interval: Duration) {
    let mut iv = tokio::time::interval(interval);
    loop {
        iv.tick().await;
        if let Err(e) = compact_once(&path).await {
            warn!(error = %e, "history_compaction_failed");
        }
    }
}

async fn compact_once(path: &str) -> std::io::Result<()> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let now = Utc::now();
    let mut kept = String::new();
    let mut purged = 0usize;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRow>(line) {
            Ok(row) => {
                let age_days = (now - row.server_timestamp).num_days();
                if age_days <= row.retention_days as i64 {
                    kept.push_str(line);
                    kept.push('\n');
                } else {
                    purged += 1;
                }
            }
            Err(_) => {
                // Keep unparsable lines rather than silently destroying data.
                kept.push_str(line);
                kept.push('\n');
            }
        }
    }
    if purged > 0 {
        tokio::fs::write(path, kept).await?;
        info!(purged, "history_compaction_purged_rows");
    }
    Ok(())
}
