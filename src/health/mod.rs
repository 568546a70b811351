//! Liveness and health subsystem
//!
//! - **Prober**: pull-based reachability check against each application's base URL
//! - **Heartbeat**: push-based liveness signals from running application instances
//! - **Liveness**: on-demand view joining both, plus optional probe loop

pub mod heartbeat;
pub mod liveness;
pub mod prober;

pub use heartbeat::{HeartbeatAck, HeartbeatIngestor, HeartbeatRecord, HeartbeatRequest};
pub use liveness::{spawn_probe_task, ApplicationView, LivenessRecord, LivenessService};
pub use prober::{HealthProber, DEFAULT_PROBE_TIMEOUT};
