//! Heartbeat ingestion
//!
//! Running application instances push liveness signals. A heartbeat bumps
//! the application's freshness timestamp and publishes a status event to
//! every connected session on a spawned task, off the acknowledgment path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::realtime::{AppStatus, MessageRouter, StatusEvent};
use crate::registry::ApplicationRegistry;
use crate::types::VestibuleError;

/// Heartbeat request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub status: Option<AppStatus>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Heartbeat acknowledgment
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Last heartbeat received from an application
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatRecord {
    pub at: DateTime<Utc>,
    pub status: AppStatus,
}

/// Accepts heartbeats and fans out status events
pub struct HeartbeatIngestor {
    registry: Arc<ApplicationRegistry>,
    router: Arc<MessageRouter>,
    /// app id → last heartbeat
    last_seen: DashMap<String, HeartbeatRecord>,
}

impl HeartbeatIngestor {
    pub fn new(registry: Arc<ApplicationRegistry>, router: Arc<MessageRouter>) -> Self {
        Self {
            registry,
            router,
            last_seen: DashMap::new(),
        }
    }

    /// Ingest a heartbeat for `app_id`
    ///
    /// Unknown or inactive applications fail with `NotFound` and cause no
    /// side effects. Must run inside a tokio runtime.
    pub fn ingest(
        &self,
        app_id: &str,
        status: AppStatus,
        metadata: Value,
    ) -> Result<HeartbeatAck, VestibuleError> {
        let app = self
            .registry
            .get_active(app_id)
            .ok_or_else(|| VestibuleError::NotFound(format!("application {app_id} not found or inactive")))?;

        let now = Utc::now();
        self.last_seen
            .insert(app.id.clone(), HeartbeatRecord { at: now, status });

        let event = StatusEvent {
            app_id: app.id.clone(),
            app_name: app.name.clone(),
            status,
            is_healthy: status == AppStatus::Online,
            timestamp: now,
            metadata,
        };

        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            let app_id = event.app_id.clone();
            let delivered = router.publish_status(event);
            if delivered == 0 {
                debug!(app_id = %app_id, "Status event had no subscribers");
            }
        });

        info!(app_id = %app.id, app = %app.name, ?status, "Heartbeat received");

        Ok(HeartbeatAck {
            success: true,
            message: format!("Heartbeat recorded for {}", app.name),
            timestamp: now,
        })
    }

    /// Most recent heartbeat for an application
    pub fn last_heartbeat(&self, app_id: &str) -> Option<HeartbeatRecord> {
        self.last_seen.get(app_id).map(|r| *r)
    }

    /// Drop state kept for a deleted application
    pub fn forget(&self, app_id: &str) {
        self.last_seen.remove(app_id);
    }
}
