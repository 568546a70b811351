//! Topic-based message router
//!
//! One global broadcast topic plus one topic per room. A session holds a
//! receiver on each; dropping the session is the disconnect.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::realtime::messages::{ClientMessage, ServerMessage, StatusEvent, DEFAULT_ROOM};
use crate::types::VestibuleError;

/// Identity of one live connection
pub type SessionId = Uuid;

/// A frame on a topic, with the session it must not be echoed to
#[derive(Debug)]
struct Envelope {
    exclude: Option<SessionId>,
    message: ServerMessage,
}

type Topic = broadcast::Sender<Arc<Envelope>>;

/// Outcome of routing a client message
#[derive(Debug, PartialEq)]
pub enum Routed {
    /// Forwarded; count of subscribed receivers on the topic
    Delivered(usize),
    /// Answer addressed to the sending session only
    Reply(ServerMessage),
}

/// Router of status events and inter-application messages
pub struct MessageRouter {
    global: Topic,
    rooms: Arc<DashMap<String, Topic>>,
    sessions: Arc<AtomicUsize>,
    queue_depth: usize,
}

impl MessageRouter {
    /// Create a router whose topics buffer `queue_depth` frames per receiver
    pub fn new(queue_depth: usize) -> Self {
        let (global, _) = broadcast::channel(queue_depth);
        Self {
            global,
            rooms: Arc::new(DashMap::new()),
            sessions: Arc::new(AtomicUsize::new(0)),
            queue_depth,
        }
    }

    /// Join a session to a room (`None` joins the default room)
    pub fn join(&self, room: Option<String>, subject: Option<String>) -> Session {
        let room = room
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_ROOM.to_string());

        let global_rx = self.global.subscribe();
        let room_rx = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.queue_depth).0)
            .subscribe();

        let count = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = Uuid::new_v4();
        debug!(session = %id, room = %room, subject = ?subject, total = count, "Session joined");

        Session {
            id,
            room,
            subject,
            global_rx,
            room_rx: Some(room_rx),
            rooms: Arc::clone(&self.rooms),
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Route a message received from `from`
    pub fn route(&self, from: &Session, msg: ClientMessage) -> Result<Routed, VestibuleError> {
        let source_app_id = from.room.clone();

        let routed = match msg {
            ClientMessage::CommandEvent { app_id: Some(target), payload } => {
                let target = non_empty(target, "appId")?;
                let message = ServerMessage::CommandEvent {
                    source_app_id,
                    app_id: Some(target.clone()),
                    payload,
                };
                Routed::Delivered(self.send_to_room(&target, Some(from.id), message))
            }
            ClientMessage::CommandEvent { app_id: None, payload } => {
                let message = ServerMessage::CommandEvent {
                    source_app_id,
                    app_id: None,
                    payload,
                };
                Routed::Delivered(self.send_global(Some(from.id), message))
            }
            ClientMessage::AppMessage { target_app_id, payload } => {
                let target = non_empty(target_app_id, "targetAppId")?;
                let message = ServerMessage::AppMessage {
                    source_app_id,
                    target_app_id: target.clone(),
                    payload,
                };
                Routed::Delivered(self.send_to_room(&target, Some(from.id), message))
            }
            ClientMessage::PlatformEvent { payload } => {
                let message = ServerMessage::PlatformEvent {
                    source_app_id,
                    payload,
                };
                Routed::Delivered(self.send_global(None, message))
            }
            ClientMessage::Ping => Routed::Reply(ServerMessage::Pong {
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        };

        Ok(routed)
    }

    /// Publish a status event to every session
    pub fn publish_status(&self, event: StatusEvent) -> usize {
        self.send_global(None, ServerMessage::AppStatus(event))
    }

    /// Number of connected sessions
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of sessions currently in `room`
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Number of rooms with at least one session
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn send_global(&self, exclude: Option<SessionId>, message: ServerMessage) -> usize {
        // Send only fails when nobody is subscribed
        self.global
            .send(Arc::new(Envelope { exclude, message }))
            .unwrap_or(0)
    }

    fn send_to_room(&self, room: &str, exclude: Option<SessionId>, message: ServerMessage) -> usize {
        let Some(topic) = self.rooms.get(room) else {
            debug!(room = %room, "No sessions in target room");
            return 0;
        };
        topic.send(Arc::new(Envelope { exclude, message })).unwrap_or(0)
    }
}

fn non_empty(value: String, field: &str) -> Result<String, VestibuleError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        Err(VestibuleError::BadRequest(format!("{field} must not be empty")))
    } else {
        Ok(value)
    }
}

/// One live connection bound to a room
pub struct Session {
    id: SessionId,
    room: String,
    subject: Option<String>,
    global_rx: broadcast::Receiver<Arc<Envelope>>,
    /// Taken on drop so the room's receiver count excludes this session
    room_rx: Option<broadcast::Receiver<Arc<Envelope>>>,
    rooms: Arc<DashMap<String, Topic>>,
    sessions: Arc<AtomicUsize>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Next frame for this session; `None` once the router is gone
    ///
    /// A session that fell behind gets a `resync` frame before the frames
    /// that survived.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            let room_rx = self.room_rx.as_mut()?;
            let result = tokio::select! {
                r = self.global_rx.recv() => r,
                r = room_rx.recv() => r,
            };

            match result {
                Ok(envelope) if envelope.exclude == Some(self.id) => continue,
                Ok(envelope) => return Some(envelope.message.clone()),
                Err(RecvError::Lagged(skipped)) => return Some(self.lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Session::recv`]
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        loop {
            let result = match self.global_rx.try_recv() {
                Err(TryRecvError::Empty) => self.room_rx.as_mut()?.try_recv(),
                other => other,
            };

            match result {
                Ok(envelope) if envelope.exclude == Some(self.id) => continue,
                Ok(envelope) => return Some(envelope.message.clone()),
                Err(TryRecvError::Lagged(skipped)) => return Some(self.lagged(skipped)),
                Err(_) => return None,
            }
        }
    }

    fn lagged(&self, skipped: u64) -> ServerMessage {
        warn!(session = %self.id, room = %self.room, skipped, "Session lagging, frames dropped");
        ServerMessage::Resync { skipped }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        drop(self.room_rx.take());
        self.rooms
            .remove_if(&self.room, |_, topic| topic.receiver_count() == 0);
        let remaining = self.sessions.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(session = %self.id, room = %self.room, remaining, "Session left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::AppStatus;
    use serde_json::json;

    fn command(app_id: Option<&str>) -> ClientMessage {
        ClientMessage::CommandEvent {
            app_id: app_id.map(String::from),
            payload: json!({"command": "refresh"}),
        }
    }

    #[test]
    fn test_untargeted_command_reaches_everyone_but_sender() {
        let router = MessageRouter::new(16);
        let sender = router.join(Some("shell".into()), None);
        let mut a = router.join(Some("tasks".into()), None);
        let mut b = router.join(None, None);
        let mut sender_view = router.join(Some("shell".into()), None);

        router.route(&sender, command(None)).unwrap();

        for session in [&mut a, &mut b, &mut sender_view] {
            match session.try_recv() {
                Some(ServerMessage::CommandEvent { source_app_id, app_id, .. }) => {
                    assert_eq!(source_app_id, "shell");
                    assert!(app_id.is_none());
                }
                other => panic!("expected command-event, got {other:?}"),
            }
        }

        let mut sender = sender;
        assert!(sender.try_recv().is_none());
    }

    #[test]
    fn test_targeted_command_reaches_only_room() {
        let router = MessageRouter::new(16);
        let sender = router.join(Some("shell".into()), None);
        let mut tasks_1 = router.join(Some("tasks".into()), None);
        let mut tasks_2 = router.join(Some("tasks".into()), None);
        let mut other = router.join(Some("billing".into()), None);

        let routed = router.route(&sender, command(Some("tasks"))).unwrap();
        assert_eq!(routed, Routed::Delivered(2));

        assert!(matches!(tasks_1.try_recv(), Some(ServerMessage::CommandEvent { .. })));
        assert!(matches!(tasks_2.try_recv(), Some(ServerMessage::CommandEvent { .. })));
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_app_message_to_missing_room_is_dropped() {
        let router = MessageRouter::new(16);
        let sender = router.join(Some("shell".into()), None);

        let routed = router
            .route(
                &sender,
                ClientMessage::AppMessage {
                    target_app_id: "nobody".into(),
                    payload: json!(1),
                },
            )
            .unwrap();
        assert_eq!(routed, Routed::Delivered(0));
    }

    #[test]
    fn test_empty_target_is_an_error() {
        let router = MessageRouter::new(16);
        let sender = router.join(None, None);

        let err = router
            .route(
                &sender,
                ClientMessage::AppMessage {
                    target_app_id: "  ".into(),
                    payload: json!(null),
                },
            )
            .unwrap_err();
        assert!(matches!(err, VestibuleError::BadRequest(_)));
    }

    #[test]
    fn test_platform_event_reaches_sender_too() {
        let router = MessageRouter::new(16);
        let mut sender = router.join(Some("tasks".into()), None);
        let mut other = router.join(Some("billing".into()), None);

        router
            .route(&sender, ClientMessage::PlatformEvent { payload: json!("theme-changed") })
            .unwrap();

        for session in [&mut sender, &mut other] {
            match session.try_recv() {
                Some(ServerMessage::PlatformEvent { source_app_id, payload }) => {
                    assert_eq!(source_app_id, "tasks");
                    assert_eq!(payload, json!("theme-changed"));
                }
                other => panic!("expected platform-event, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_ping_is_answered_directly() {
        let router = MessageRouter::new(16);
        let mut sender = router.join(None, None);
        let routed = router.route(&sender, ClientMessage::Ping).unwrap();
        assert!(matches!(routed, Routed::Reply(ServerMessage::Pong { .. })));
        assert!(sender.try_recv().is_none());
    }

    #[test]
    fn test_disconnect_leaves_room_immediately() {
        let router = MessageRouter::new(16);
        let a = router.join(Some("tasks".into()), None);
        let b = router.join(Some("tasks".into()), Some("user-1".into()));
        assert_eq!(b.subject(), Some("user-1"));
        assert_eq!(router.room_size("tasks"), 2);
        assert_eq!(router.session_count(), 2);

        drop(a);
        assert_eq!(router.room_size("tasks"), 1);

        drop(b);
        assert_eq!(router.room_size("tasks"), 0);
        assert_eq!(router.room_count(), 0);
        assert_eq!(router.session_count(), 0);
    }

    #[test]
    fn test_room_fifo_order() {
        let router = MessageRouter::new(16);
        let sender = router.join(Some("shell".into()), None);
        let mut target = router.join(Some("tasks".into()), None);

        for i in 0..5 {
            router
                .route(
                    &sender,
                    ClientMessage::AppMessage {
                        target_app_id: "tasks".into(),
                        payload: json!(i),
                    },
                )
                .unwrap();
        }

        for i in 0..5 {
            match target.try_recv() {
                Some(ServerMessage::AppMessage { payload, .. }) => assert_eq!(payload, json!(i)),
                other => panic!("expected app-message, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_slow_session_lags_without_blocking_others() {
        let router = MessageRouter::new(2);
        let mut slow = router.join(Some("tasks".into()), None);
        let sender = router.join(Some("shell".into()), None);

        for i in 0..5 {
            router
                .route(&sender, ClientMessage::PlatformEvent { payload: json!(i) })
                .unwrap();
        }

        // Oldest frames are gone; the session is told, then the newest two
        // arrive in order
        assert_eq!(slow.try_recv(), Some(ServerMessage::Resync { skipped: 3 }));
        let mut seen = Vec::new();
        while let Some(ServerMessage::PlatformEvent { payload, .. }) = slow.try_recv() {
            seen.push(payload);
        }
        assert_eq!(seen, vec![json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_lagging_session_is_told_status_is_stale() {
        let router = MessageRouter::new(2);
        let mut slow = router.join(Some("tasks".into()), None);

        for healthy in [false, true, false, true] {
            router.publish_status(StatusEvent {
                app_id: "tasks".into(),
                app_name: "Tasks".into(),
                status: AppStatus::Online,
                is_healthy: healthy,
                timestamp: chrono::Utc::now(),
                metadata: json!({}),
            });
        }

        assert_eq!(slow.recv().await, Some(ServerMessage::Resync { skipped: 2 }));
        match slow.recv().await {
            Some(ServerMessage::AppStatus(event)) => assert!(!event.is_healthy),
            other => panic!("expected app-status, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_disconnects_remove_room() {
        for _ in 0..200 {
            let router = MessageRouter::new(4);
            let a = router.join(Some("tasks".into()), None);
            let b = router.join(Some("tasks".into()), None);
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                for session in [a, b] {
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        drop(session);
                    });
                }
            });

            assert_eq!(router.room_count(), 0);
            assert_eq!(router.session_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_status_event_reaches_all_sessions() {
        let router = MessageRouter::new(16);
        let mut a = router.join(Some("tasks".into()), None);
        let mut b = router.join(None, None);

        let delivered = router.publish_status(StatusEvent {
            app_id: "tasks".into(),
            app_name: "Tasks".into(),
            status: AppStatus::Online,
            is_healthy: true,
            timestamp: chrono::Utc::now(),
            metadata: json!({}),
        });
        assert_eq!(delivered, 2);

        for session in [&mut a, &mut b] {
            match session.recv().await {
                Some(ServerMessage::AppStatus(event)) => assert!(event.is_healthy),
                other => panic!("expected app-status, got {other:?}"),
            }
        }
    }
}
