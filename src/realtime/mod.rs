//! Realtime status fan-out and inter-application message routing
//!
//! Sessions join exactly one room (an application id, or the anonymous
//! `container` room). Rooms and the global topic are tokio broadcast
//! channels; a session's outbound stream merges its room topic with the
//! global topic.

pub mod messages;
pub mod router;

pub use messages::{AppStatus, ClientMessage, ServerMessage, StatusEvent, DEFAULT_ROOM};
pub use router::{MessageRouter, Routed, Session, SessionId};
