// WebSocket session lifecycle (C9): one socket per connection,
// authenticated by a bearer token on the upgrade request, speaking the
// `ClientMessage`/`ServerMessage` verbs defined in `hub.rs`. Generalizes the
// teacher's single inbound ingest stream into a bidirectional session with
// per-room forwarder tasks, cancelled together on disconnect.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::Principal;
use crate::hub::{ClientMessage, ServerMessage};
use crate::http::AppState;
use crate::ingest::PositionInput;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>, headers: axum::http::HeaderMap) -> impl IntoResponse {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::to_string);

    ws.on_upgrade(move |socket| async move {
        let principal = match token {
            Some(t) => state.verifier.verify(&t).await,
            None => Err(crate::error::EngineError::Unauthenticated),
        };
        match principal {
            Ok(p) => handle_socket(socket, state, p).await,
            Err(e) => {
                warn!(error = %e, "ws_handshake_rejected");
            }
        }
    })
}

/// One session's lifetime: an inbound task reading `ClientMessage`s and an
/// outbound task draining whatever rooms the client is currently watching.
/// `watch:start`/`watch:stop` add/drop a forwarder task for that specific
/// tourist id; disconnect aborts every remaining forwarder plus the
/// outbound send task.
async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    info!(tourist_id = %principal.id, "ws_connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<ServerMessage>(256);

    // Every authenticated session is automatically subscribed to its own
    // user room (zone-status / alerts about itself) and, if an authority,
    // the global authorities room. Those two are fixed for the session's
    // lifetime; per-tourist watch forwarders are tracked by id so `watch:stop`
    // can cancel one without touching the others.
    let mut forwarders: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut watch_forwarders: std::collections::HashMap<String, tokio::task::JoinHandle<()>> = std::collections::HashMap::new();
    forwarders.push(spawn_forwarder(state.engine.hub.subscribe_user(&principal.id), out_tx.clone()));
    if principal.is_authority() {
        forwarders.push(spawn_forwarder(state.engine.hub.subscribe_authorities(), out_tx.clone()));
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(ClientMessage::PositionUpdate { lat, lon, accuracy, timestamp, device_info, network_info }) => {
                let Ok(position) = crate::geometry::Point::new(lat, lon) else {
                    let _ = out_tx.send(ServerMessage::Error { message: "invalid coordinates".into() }).await;
                    continue;
                };
                let input = PositionInput { position, accuracy_m: accuracy, client_timestamp: timestamp, device_info, network_info };
                if let Err(e) = state
                    .engine
                    .ingest_position(&principal, &principal.id, &principal.id, input)
                    .await
                {
                    let _ = out_tx.send(ServerMessage::Error { message: e.to_string() }).await;
                }
            }
            Ok(ClientMessage::WatchStart { tourist_id }) => {
                if !principal.is_authority() {
                    let _ = out_tx
                        .send(ServerMessage::Error { message: "watch requires an authority role".into() })
                        .await;
                    continue;
                }
                let handle = spawn_forwarder(state.engine.hub.subscribe_watch(&tourist_id), out_tx.clone());
                if let Some(old) = watch_forwarders.insert(tourist_id.clone(), handle) {
                    old.abort();
                }
                // Immediately surface the tourist's latest known position on
                // watch start.
                if let Some(t) = state.engine.tourists.get(&tourist_id) {
                    if let Some(fix) = t.latest_fix {
                        let _ = out_tx
                            .send(ServerMessage::location_changed(&tourist_id, &t.display_name, fix.position, fix.accuracy_m, Utc::now()))
                            .await;
                    }
                }
            }
            Ok(ClientMessage::WatchStop { tourist_id }) => {
                if let Some(handle) = watch_forwarders.remove(&tourist_id) {
                    handle.abort();
                }
            }
            Err(e) => {
                let _ = out_tx.send(ServerMessage::Error { message: format!("malformed message: {e}") }).await;
            }
        }
    }

    for f in forwarders {
        f.abort();
    }
    for (_, f) in watch_forwarders {
        f.abort();
    }
    send_task.abort();
    info!(tourist_id = %principal.id, "ws_disconnected");
}

fn spawn_forwarder(mut rx: broadcast::Receiver<ServerMessage>, tx: tokio::sync::mpsc::Sender<ServerMessage>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
