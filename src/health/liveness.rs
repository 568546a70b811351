//! Liveness view over the registry
//!
//! Combines on-demand probe results with the last heartbeat seen for each
//! active application.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::health::{HealthProber, HeartbeatIngestor};
use crate::realtime::{AppStatus, MessageRouter, StatusEvent};
use crate::registry::{Application, ApplicationRegistry};

/// Liveness of one active application
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessRecord {
    pub app_id: String,
    pub is_healthy: bool,
    pub last_probe_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_status: Option<AppStatus>,
}

/// Application as listed to clients, with its probed health
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: Application,
    pub is_healthy: bool,
}

/// Probes active applications and reports their liveness
pub struct LivenessService {
    registry: Arc<ApplicationRegistry>,
    prober: Arc<HealthProber>,
    heartbeats: Arc<HeartbeatIngestor>,
    router: Arc<MessageRouter>,
    broadcast_transitions: bool,
}

impl LivenessService {
    pub fn new(
        registry: Arc<ApplicationRegistry>,
        prober: Arc<HealthProber>,
        heartbeats: Arc<HeartbeatIngestor>,
        router: Arc<MessageRouter>,
        broadcast_transitions: bool,
    ) -> Self {
        Self {
            registry,
            prober,
            heartbeats,
            router,
            broadcast_transitions,
        }
    }

    /// Probe every active application concurrently
    ///
    /// Total latency is bounded by the slowest single probe.
    async fn probe_active(&self) -> Vec<(Application, bool, DateTime<Utc>)> {
        let apps = self.registry.list_active();
        let results = self.prober.probe_all(&apps).await;
        let at = Utc::now();

        apps.into_iter()
            .zip(results)
            .map(|(app, healthy)| {
                self.record(&app, healthy, at);
                (app, healthy, at)
            })
            .collect()
    }

    /// Store a probe result and publish it if health flipped
    fn record(&self, app: &Application, healthy: bool, at: DateTime<Utc>) {
        let previous = self.prober.observe(&app.id, healthy, at);

        // First observation is not a transition
        let flipped = matches!(previous, Some(prev) if prev.healthy != healthy);
        if !(flipped && self.broadcast_transitions) {
            return;
        }

        let status = if healthy { AppStatus::Online } else { AppStatus::Offline };
        let delivered = self.router.publish_status(StatusEvent {
            app_id: app.id.clone(),
            app_name: app.name.clone(),
            status,
            is_healthy: healthy,
            timestamp: at,
            metadata: json!({ "source": "probe" }),
        });
        info!(app_id = %app.id, healthy, delivered, "Probe detected health transition");
    }

    /// Liveness of every active application
    pub async fn liveness(&self) -> Vec<LivenessRecord> {
        self.probe_active()
            .await
            .into_iter()
            .map(|(app, is_healthy, last_probe_at)| {
                let heartbeat = self.heartbeats.last_heartbeat(&app.id);
                LivenessRecord {
                    app_id: app.id,
                    is_healthy,
                    last_probe_at,
                    last_heartbeat_at: heartbeat.map(|h| h.at),
                    last_heartbeat_status: heartbeat.map(|h| h.status),
                }
            })
            .collect()
    }

    /// Active applications with probed health, optionally only healthy ones
    pub async fn list_applications(&self, healthy_only: bool) -> Vec<ApplicationView> {
        self.probe_active()
            .await
            .into_iter()
            .filter(|(_, healthy, _)| !healthy_only || *healthy)
            .map(|(application, is_healthy, _)| ApplicationView {
                application,
                is_healthy,
            })
            .collect()
    }

    /// Drop probe and heartbeat state for a deleted application
    pub fn forget(&self, app_id: &str) {
        self.prober.forget(app_id);
        self.heartbeats.forget(app_id);
    }

    /// One pass of the background loop; returns (healthy, unhealthy)
    pub async fn probe_once(&self) -> (usize, usize) {
        let results = self.probe_active().await;
        let healthy = results.iter().filter(|(_, h, _)| *h).count();
        let unhealthy = results.len() - healthy;
        debug!(healthy, unhealthy, "Background probe pass complete");
        (healthy, unhealthy)
    }
}

/// Spawn the background probe loop
pub fn spawn_probe_task(service: Arc<LivenessService>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let (_healthy, _unhealthy) = service.probe_once().await;
        }
    });

    info!(interval_secs = interval.as_secs(), "Background liveness probe task started");
}
