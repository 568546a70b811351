//! Wire messages for the realtime transport
//!
//! ## Protocol
//!
//! Connect: `ws://host/ws?appId=<id>&token=<jwt>`
//!
//! Messages (client → server):
//! - `command-event` - Targeted at a room when `appId` is set, otherwise every other session
//! - `app-message` - Delivered to the `targetAppId` room
//! - `platform-event` - Delivered to every session
//! - `ping` - Keep-alive, answered with `pong`
//!
//! Messages (server → client):
//! - the three forwarded kinds, annotated with `sourceAppId`
//! - `app-status` - Application went online/offline
//! - `pong`, `error`
//!
//! ```json
//! {"type": "command-event", "appId": "b1c2...", "payload": {"command": "refresh"}}
//! {"type": "app-status", "appId": "b1c2...", "appName": "tasks", "status": "online",
//!  "isHealthy": true, "timestamp": "2024-01-15T10:30:00Z", "metadata": {}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room joined by sessions that declare no application identity
pub const DEFAULT_ROOM: &str = "container";

/// Reported application status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Online,
    Offline,
}

/// Server-originated status change, delivered to every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub app_id: String,
    pub app_name: String,
    pub status: AppStatus,
    pub is_healthy: bool,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

/// Message received from a client session
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CommandEvent {
        #[serde(default)]
        app_id: Option<String>,
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    AppMessage {
        target_app_id: String,
        #[serde(default)]
        payload: Value,
    },
    PlatformEvent {
        #[serde(default)]
        payload: Value,
    },
    Ping,
}

/// Message sent to a client session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    CommandEvent {
        source_app_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    AppMessage {
        source_app_id: String,
        target_app_id: String,
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    PlatformEvent {
        source_app_id: String,
        payload: Value,
    },
    AppStatus(StatusEvent),
    Pong {
        timestamp: String,
    },
    Error {
        message: String,
    },
    /// The session fell behind and `skipped` frames were dropped; any
    /// status view the client holds is stale
    Resync {
        skipped: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"command-event","payload":{"x":1}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CommandEvent { app_id: None, .. }));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"app-message","targetAppId":"tasks","payload":"hi"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::AppMessage { target_app_id, payload } => {
                assert_eq!(target_app_id, "tasks");
                assert_eq!(payload, Value::from("hi"));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn test_status_event_serialization() {
        let msg = ServerMessage::AppStatus(StatusEvent {
            app_id: "app-1".to_string(),
            app_name: "tasks".to_string(),
            status: AppStatus::Offline,
            is_healthy: false,
            timestamp: Utc::now(),
            metadata: serde_json::json!({"version": "1.2.0"}),
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "app-status");
        assert_eq!(json["appId"], "app-1");
        assert_eq!(json["status"], "offline");
        assert_eq!(json["isHealthy"], false);
        assert_eq!(json["metadata"]["version"], "1.2.0");
    }

    #[test]
    fn test_resync_serialization() {
        let json = serde_json::to_value(ServerMessage::Resync { skipped: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "resync", "skipped": 7}));
    }

    #[test]
    fn test_forwarded_message_carries_source() {
        let msg = ServerMessage::CommandEvent {
            source_app_id: "shell".to_string(),
            app_id: None,
            payload: Value::Null,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "command-event");
        assert_eq!(json["sourceAppId"], "shell");
        assert!(json.get("appId").is_none());
    }
}
