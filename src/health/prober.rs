//! Health prober
//!
//! Issues a GET to an application's base URL with a hard timeout. Any
//! response below 500 (404 included) counts as reachable; timeouts,
//! connection failures and 5xx count as unreachable. Probing never fails.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::registry::Application;
use crate::types::VestibuleError;

/// Default hard timeout for a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Most recent probe outcome for one application
#[derive(Debug, Clone, Copy)]
pub struct ProbeObservation {
    pub healthy: bool,
    pub at: DateTime<Utc>,
}

/// Concurrent, timeout-bounded reachability prober
pub struct HealthProber {
    http_client: reqwest::Client,
    timeout: Duration,
    /// app id → last observation, used for transition detection
    observations: DashMap<String, ProbeObservation>,
    total_probes: AtomicU64,
    failed_probes: AtomicU64,
}

impl HealthProber {
    /// Create a prober with the given hard timeout
    pub fn new(timeout: Duration) -> Result<Self, VestibuleError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VestibuleError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            timeout,
            observations: DashMap::new(),
            total_probes: AtomicU64::new(0),
            failed_probes: AtomicU64::new(0),
        })
    }

    /// Probe one application; `true` when reachable
    pub async fn probe(&self, app: &Application) -> bool {
        self.total_probes.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let request = self.http_client.get(&app.base_url).send();
        let healthy = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let status = response.status();
                debug!(
                    app = %app.name,
                    url = %app.base_url,
                    status = status.as_u16(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Probe response"
                );
                !status.is_server_error()
            }
            Ok(Err(e)) => {
                debug!(app = %app.name, url = %app.base_url, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(app = %app.name, url = %app.base_url, timeout_ms = self.timeout.as_millis() as u64, "Probe timed out");
                false
            }
        };

        if !healthy {
            self.failed_probes.fetch_add(1, Ordering::Relaxed);
        }

        healthy
    }

    /// Probe every application concurrently and join the results
    ///
    /// Results are in input order. One hung application only costs its own
    /// timeout.
    pub async fn probe_all(&self, apps: &[Application]) -> Vec<bool> {
        join_all(apps.iter().map(|app| self.probe(app))).await
    }

    /// Record an observation, returning the previous one
    pub fn observe(&self, app_id: &str, healthy: bool, at: DateTime<Utc>) -> Option<ProbeObservation> {
        self.observations
            .insert(app_id.to_string(), ProbeObservation { healthy, at })
    }

    /// Most recent observation for an application
    pub fn last_observation(&self, app_id: &str) -> Option<ProbeObservation> {
        self.observations.get(app_id).map(|o| *o)
    }

    /// Drop state kept for a deleted application
    pub fn forget(&self, app_id: &str) {
        self.observations.remove(app_id);
    }

    /// (total, failed) probe counters
    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_probes.load(Ordering::Relaxed),
            self.failed_probes.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IntegrationKind;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(name: &str, base_url: &str) -> Application {
        let now = Utc::now();
        Application {
            id: format!("{name}-id"),
            name: name.to_string(),
            base_url: base_url.to_string(),
            icon_url: None,
            integration_kind: IntegrationKind::Iframe,
            remote_entry: None,
            active: true,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn server_returning(status: u16, delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_404_is_healthy() {
        let server = server_returning(404, Duration::ZERO).await;
        let prober = HealthProber::new(DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(prober.probe(&app("docs", &server.uri())).await);
    }

    #[tokio::test]
    async fn test_500_is_unhealthy() {
        let server = server_returning(500, Duration::ZERO).await;
        let prober = HealthProber::new(DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(!prober.probe(&app("docs", &server.uri())).await);
        assert_eq!(prober.stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unhealthy() {
        let prober = HealthProber::new(DEFAULT_PROBE_TIMEOUT).unwrap();
        // Port 9 (discard) is closed on test hosts
        assert!(!prober.probe(&app("gone", "http://127.0.0.1:9")).await);
    }

    #[tokio::test]
    async fn test_hung_app_times_out_without_delaying_others() {
        let hung = server_returning(200, Duration::from_secs(10)).await;
        let fast = server_returning(200, Duration::ZERO).await;
        let prober = HealthProber::new(Duration::from_millis(300)).unwrap();

        let apps = vec![app("hung", &hung.uri()), app("fast", &fast.uri())];
        let start = Instant::now();
        let results = prober.probe_all(&apps).await;

        assert_eq!(results, vec![false, true]);
        // Joined concurrently: bounded by one timeout, not the sum
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_observe_returns_previous() {
        let prober = HealthProber::new(DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(prober.observe("a", true, Utc::now()).is_none());
        let previous = prober.observe("a", false, Utc::now()).unwrap();
        assert!(previous.healthy);
        assert!(!prober.last_observation("a").unwrap().healthy);

        prober.forget("a");
        assert!(prober.last_observation("a").is_none());
    }
}
