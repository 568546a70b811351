//! Vestibule - application registry and federated-module gateway
//!
//! Vestibule sits in front of a micro-frontend host shell. It tracks which
//! remote applications exist, whether they are reachable right now, tells
//! connected clients when that changes, and resolves federated UI modules
//! on demand.
//!
//! ## Services
//!
//! - **Registry**: Application records, optionally persisted to MongoDB
//! - **Health**: Timeout-bounded probes and pushed heartbeats
//! - **Realtime**: Room-based WebSocket router for status and app messages
//! - **Loader**: Deduplicating, retrying federated-module resolution

pub mod auth;
pub mod config;
pub mod db;
pub mod health;
pub mod loader;
pub mod realtime;
pub mod registry;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, VestibuleError};
