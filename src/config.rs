//! Configuration for Vestibule
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::loader::RetryPolicy;

/// Vestibule - application registry and federated-module gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "vestibule")]
#[command(about = "Application registry, liveness and federated-module gateway")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (admin routes open, insecure JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI (registry is memory-only when unset)
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "vestibule")]
    pub mongodb_db: String,

    /// JWT secret for bearer token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// API key granting admin access via X-API-Key
    #[arg(long, env = "ADMIN_API_KEY")]
    pub admin_api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Hard timeout for a single liveness probe in milliseconds
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value = "5000")]
    pub probe_timeout_ms: u64,

    /// Background probe interval in seconds (0 disables the loop)
    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value = "0")]
    pub probe_interval_secs: u64,

    /// Publish a status event when a probe flips an application's health
    #[arg(long, env = "BROADCAST_PROBE_TRANSITIONS", default_value = "false")]
    pub broadcast_probe_transitions: bool,

    /// Maximum attempts for a module load
    #[arg(long, env = "LOADER_MAX_ATTEMPTS", default_value = "3")]
    pub loader_max_attempts: u32,

    /// Base retry delay for module loads in milliseconds
    #[arg(long, env = "LOADER_BASE_DELAY_MS", default_value = "1000")]
    pub loader_base_delay_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[arg(long, env = "LOADER_MAX_DELAY_MS", default_value = "8000")]
    pub loader_max_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter added to each retry delay
    #[arg(long, env = "LOADER_MAX_JITTER_MS", default_value = "1000")]
    pub loader_max_jitter_ms: u64,

    /// Timeout for fetching a remote-entry manifest in milliseconds
    #[arg(long, env = "REMOTE_FETCH_TIMEOUT_MS", default_value = "10000")]
    pub remote_fetch_timeout_ms: u64,

    /// Host shared dependencies offered to remotes, e.g. "react=18.2.0,react-dom=18.2.0"
    #[arg(long, env = "SHARED_DEPENDENCIES")]
    pub shared_dependencies: Option<String>,

    /// Outbound queue depth per realtime topic before slow sessions lag
    #[arg(long, env = "REALTIME_QUEUE_DEPTH", default_value = "256")]
    pub realtime_queue_depth: usize,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-only-insecure-secret-not-for-production".to_string()),
            (None, false) => None,
        }
    }

    /// Liveness probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Background probe interval, if enabled
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }

    /// Retry policy applied to module loads
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.loader_max_attempts,
            base_delay: Duration::from_millis(self.loader_base_delay_ms),
            max_delay: Duration::from_millis(self.loader_max_delay_ms),
            max_jitter: Duration::from_millis(self.loader_max_jitter_ms),
        }
    }

    /// Parse SHARED_DEPENDENCIES into a package → version map
    pub fn shared_dependency_map(&self) -> HashMap<String, String> {
        let Some(ref raw) = self.shared_dependencies else {
            return HashMap::new();
        };

        raw.split(',')
            .filter_map(|pair| {
                let (name, version) = pair.split_once('=')?;
                let (name, version) = (name.trim(), version.trim());
                if name.is_empty() || version.is_empty() {
                    None
                } else {
                    Some((name.to_string(), version.to_string()))
                }
            })
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if let Some(ref secret) = self.jwt_secret {
            if secret.len() < 32 {
                return Err("JWT_SECRET must be at least 32 characters".to_string());
            }
        }

        if self.loader_max_attempts == 0 {
            return Err("LOADER_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.loader_base_delay_ms > self.loader_max_delay_ms {
            return Err("LOADER_BASE_DELAY_MS must not exceed LOADER_MAX_DELAY_MS".to_string());
        }

        if self.probe_timeout_ms == 0 {
            return Err("PROBE_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.realtime_queue_depth == 0 {
            return Err("REALTIME_QUEUE_DEPTH must be greater than zero".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be 'text' or 'json', got '{}'", self.log_format));
        }

        Ok(())
    }
}
