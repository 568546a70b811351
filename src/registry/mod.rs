//! Application registry
//!
//! Durable store of remote-application metadata. The in-process map is
//! authoritative for reads; MongoDB, when configured, is written through
//! and reloaded at startup.

pub mod application;
pub mod store;

pub use application::{Application, IntegrationKind, RegisterApplication, RemoteEntry};
pub use store::ApplicationRegistry;
