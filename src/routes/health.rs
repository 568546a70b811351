//! Service health endpoints
//!
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /version - Build information for deployment verification

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::routes::json_response;
use crate::server::AppState;

/// Health response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// Operating mode
    pub mode: &'static str,
    /// Whether registrations survive restarts
    pub persistent: bool,
    pub registry: RegistryHealth,
    pub realtime: RealtimeHealth,
    pub loader: LoaderHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryHealth {
    pub applications: usize,
    pub active: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeHealth {
    pub sessions: usize,
    pub rooms: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderHealth {
    pub cached_modules: usize,
    pub cached_entries: usize,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        persistent: state.registry.is_persistent(),
        registry: RegistryHealth {
            applications: state.registry.len(),
            active: state.registry.list_active().len(),
        },
        realtime: RealtimeHealth {
            sessions: state.router.session_count(),
            rooms: state.router.room_count(),
        },
        loader: LoaderHealth {
            cached_modules: state.loader.cached_modules(),
            cached_entries: state.loader.cached_entries(),
        },
    }
}

/// Handle liveness probe (/health, /healthz)
///
/// Always 200 while the process serves requests.
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health_response(state))
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Git commit hash (full)
    pub commit_full: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "vestibule",
    };

    json_response(StatusCode::OK, &response)
}
