//! Vestibule - application registry and federated-module gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vestibule::{config::Args, db::MongoClient, registry::ApplicationRegistry, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let json_logs = args.log_format == "json";
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vestibule={},info", log_level).into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Vestibule");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Probe timeout: {}ms", args.probe_timeout_ms);
    match args.probe_interval() {
        Some(interval) => info!("Background probes: every {}s", interval.as_secs()),
        None => info!("Background probes: disabled"),
    }
    info!(
        "Loader: {} attempts, {}ms base, {}ms max",
        args.loader_max_attempts, args.loader_base_delay_ms, args.loader_max_delay_ms
    );
    info!("======================================");

    // Registry persistence is optional; without MONGODB_URI it is memory-only
    let registry = match args.mongodb_uri.as_deref() {
        Some(uri) => {
            let mongo = MongoClient::new(uri, &args.mongodb_db).await;
            match mongo {
                Ok(client) => {
                    info!("MongoDB connected successfully");
                    ApplicationRegistry::with_mongo(&client).await?
                }
                Err(e) if args.dev_mode => {
                    warn!("MongoDB connection failed (dev mode, continuing without): {}", e);
                    ApplicationRegistry::memory_only()
                }
                Err(e) => {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            warn!("MONGODB_URI not set - registrations will not survive restarts");
            ApplicationRegistry::memory_only()
        }
    };

    let state = Arc::new(AppState::new(args, Arc::new(registry))?);

    tokio::select! {
        result = server::run(state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
