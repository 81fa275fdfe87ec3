// Subscription hub (C9): long-lived per-connection sessions, per-tourist
// watcher rooms, broadcast of position changes / alerts / zone-status.
// Rooms are dynamic `tokio::sync::broadcast` channels created lazily,
// generalizing a fixed-worker `mpsc` fan-out into a keyed, many-reader fan-
// out structure with a typed event enum instead of callback-style handlers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::alert::{Alert, AlertKind};
use crate::geometry::Point;
use crate::zone::Severity;

pub const ROOM_CAPACITY: usize = 1024;

/// Typed event enum fanned out via the hub. Serializes to the wire verbs
/// consumed by WebSocket clients and the HTTP surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "location:changed")]
    LocationChanged {
        tourist_id: String,
        name: String,
        lat: f64,
        lon: f64,
        accuracy: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "alert")]
    Alert {
        id: String,
        kind: AlertKind,
        tourist_id: String,
        severity: Severity,
        description: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "zone_status")]
    ZoneStatus {
        in_restricted: bool,
        in_safe: bool,
        restricted_zones: Vec<String>,
        safe_zones: Vec<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn location_changed(tourist_id: &str, name: &str, position: Point, accuracy: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        ServerMessage::LocationChanged {
            tourist_id: tourist_id.to_string(),
            name: name.to_string(),
            lat: position.lat,
            lon: position.lon,
            accuracy,
            timestamp,
        }
    }

    pub fn from_alert(alert: &Alert) -> Self {
        ServerMessage::Alert {
            id: alert.id.clone(),
            kind: alert.kind,
            tourist_id: alert.tourist_id.clone(),
            severity: alert.severity,
            description: alert.description.clone(),
            timestamp: alert.server_timestamp,
        }
    }
}

/// Incoming verbs.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "position:update")]
    PositionUpdate {
        lat: f64,
        lon: f64,
        accuracy: Option<f64>,
        timestamp: DateTime<Utc>,
        #[serde(rename = "deviceInfo")]
        device_info: Option<String>,
        #[serde(rename = "networkInfo")]
        network_info: Option<String>,
    },
    #[serde(rename = "watch:start")]
    WatchStart { tourist_id: String },
    #[serde(rename = "watch:stop")]
    WatchStop { tourist_id: String },
}

fn user_room_key(tourist_id: &str) -> String {
    format!("user:{tourist_id}")
}

fn watch_room_key(tourist_id: &str) -> String {
    format!("watch:{tourist_id}")
}

/// Per-tourist and global rooms. A session joining `watch:<tourist>` receives
/// a dedicated broadcast::Receiver; disconnect simply drops the receiver
/// (and the sender is kept alive by the hub regardless of reader count) —
/// disconnected sessions are silently dropped from all rooms.
pub struct Hub {
    watch_rooms: DashMap<String, broadcast::Sender<ServerMessage>>,
    user_rooms: DashMap<String, broadcast::Sender<ServerMessage>>,
    authorities: broadcast::Sender<ServerMessage>,
}

impl Hub {
    pub fn new() -> Self {
        let (authorities, _) = broadcast::channel(ROOM_CAPACITY);
        Self { watch_rooms: DashMap::new(), user_rooms: DashMap::new(), authorities }
    }

    fn room(map: &DashMap<String, broadcast::Sender<ServerMessage>>, key: String) -> broadcast::Sender<ServerMessage> {
        map.entry(key).or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0).clone()
    }

    pub fn subscribe_watch(&self, tourist_id: &str) -> broadcast::Receiver<ServerMessage> {
        Self::room(&self.watch_rooms, watch_room_key(tourist_id)).subscribe()
    }

    pub fn subscribe_user(&self, tourist_id: &str) -> broadcast::Receiver<ServerMessage> {
        Self::room(&self.user_rooms, user_room_key(tourist_id)).subscribe()
    }

    pub fn subscribe_authorities(&self) -> broadcast::Receiver<ServerMessage> {
        self.authorities.subscribe()
    }

    /// Publish is at-most-once per subscriber; a `SendError` just means zero
    /// current subscribers and is not an error condition. No retry on
    /// disconnect.
    pub fn publish_watch(&self, tourist_id: &str, msg: ServerMessage) {
        let _ = Self::room(&self.watch_rooms, watch_room_key(tourist_id)).send(msg);
    }

    pub fn publish_user(&self, tourist_id: &str, msg: ServerMessage) {
        let _ = Self::room(&self.user_rooms, user_room_key(tourist_id)).send(msg);
    }

    pub fn publish_authorities(&self, msg: ServerMessage) {
        let _ = self.authorities.send(msg);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_room_delivers_to_subscriber() {
        let hub = Hub::new();
        let mut rx = hub.subscribe_watch("t1");
        hub.publish_watch(
            "t1",
            ServerMessage::location_changed("t1", "Alice", Point::new(1.0, 1.0).unwrap(), None, Utc::now()),
        );
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::LocationChanged { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let hub = Hub::new();
        hub.publish_watch("nobody_watching", ServerMessage::Error { message: "x".into() });
    }

    #[tokio::test]
    async fn authorities_room_is_global() {
        let hub = Hub::new();
        let mut a = hub.subscribe_authorities();
        let mut b = hub.subscribe_authorities();
        hub.publish_authorities(ServerMessage::Error { message: "broadcast".into() });
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn watch_and_user_rooms_are_independent() {
        let hub = Hub::new();
        let mut watch_rx = hub.subscribe_watch("t1");
        let mut user_rx = hub.subscribe_user("t1");
        hub.publish_watch("t1", ServerMessage::Error { message: "for-watchers".into() });
        assert!(watch_rx.try_recv().is_ok());
        assert!(user_rx.try_recv().is_err());

        hub.publish_user("t1", ServerMessage::Error { message: "for-tourist".into() });
        assert!(user_rx.try_recv().is_ok());
    }

    #[test]
    fn client_message_deserializes_position_update() {
        let raw = r#"{"type":"position:update","lat":28.6,"lon":77.2,"accuracy":5.0,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::PositionUpdate { .. }));
    }

    #[test]
    fn client_message_deserializes_watch_start() {
        let raw = r#"{"type":"watch:start","tourist_id":"t1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::WatchStart { tourist_id } if tourist_id == "t1"));
    }

    #[test]
    fn server_message_serializes_with_tag() {
        let msg = ServerMessage::Error { message: "oops".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));
    }
}
