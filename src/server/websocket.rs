//! Realtime WebSocket transport
//!
//! `GET /ws?appId=<room>&token=<jwt>` joins the session to the room named by
//! `appId` (the default room when absent). A token may also arrive in the
//! Authorization header. A present but invalid token is rejected with 401
//! before the upgrade; no token joins anonymously.
//!
//! Client frames are JSON [`ClientMessage`]s. A frame that fails to parse or
//! route is answered with an `error` frame and the connection stays open.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::auth::{extract_token_from_header, Caller};
use crate::realtime::{ClientMessage, MessageRouter, Routed, ServerMessage, Session};
use crate::routes::error_response;
use crate::server::AppState;
use crate::types::VestibuleError;

/// WebSocket type after upgrade
type HyperWebSocket = hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Handshake query parameters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Authenticate the handshake; `Ok(None)` room means the default room
fn authenticate<B>(state: &AppState, req: &Request<B>) -> Result<(Caller, Option<String>), VestibuleError> {
    let params: ConnectParams = serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| VestibuleError::BadRequest(format!("Invalid query: {}", e)))?;

    let header_token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| extract_token_from_header(header_token));

    let caller = match (token, header_token) {
        (Some(token), _) => state.auth.from_token(token)?,
        (None, Some(_)) => {
            return Err(VestibuleError::Unauthorized("malformed Authorization header".into()))
        }
        (None, None) => Caller::anonymous(),
    };

    Ok((caller, params.app_id))
}

/// Authenticate the handshake and join the requested room
fn open_session<B>(state: &AppState, req: &Request<B>) -> Result<Session, VestibuleError> {
    let (caller, room) = authenticate(state, req)?;
    Ok(state.router.join(room, caller.subject))
}

/// Handle WebSocket upgrade for the realtime transport
pub fn handle_realtime_upgrade(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    // Join before the upgrade completes so no broadcast is missed
    let session = match open_session(&state, &req) {
        Ok(session) => session,
        Err(e) => {
            warn!("Realtime handshake rejected: {}", e);
            return error_response(e);
        }
    };

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("WebSocket upgrade failed")))
                .unwrap();
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_connection(ws, &state.router, session).await {
                    warn!("Realtime WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

/// Handle one realtime connection until either side closes
async fn handle_connection(
    ws: HyperWebSocket,
    router: &MessageRouter,
    mut session: Session,
) -> Result<(), VestibuleError> {
    let (mut sender, mut receiver) = ws.split();

    info!(session = %session.id(), room = %session.room(), "Realtime client connected");

    loop {
        tokio::select! {
            outbound = session.recv() => {
                match outbound {
                    Some(msg) => {
                        let json = serde_json::to_string(&msg)?;
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = handle_client_frame(router, &session, &text) {
                            let json = serde_json::to_string(&reply)?;
                            if sender.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(session = %session.id(), "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(session = %session.id(), room = %session.room(), "Realtime client disconnected");
    Ok(())
}

/// Route one text frame; returns the frame to answer the sender with, if any
fn handle_client_frame(router: &MessageRouter, session: &Session, text: &str) -> Option<ServerMessage> {
    let parsed = serde_json::from_str::<ClientMessage>(text)
        .map_err(|e| VestibuleError::BadRequest(format!("unrecognized message: {}", e)));

    match parsed.and_then(|msg| router.route(session, msg)) {
        Ok(Routed::Delivered(receivers)) => {
            debug!(session = %session.id(), receivers, "Routed client message");
            None
        }
        Ok(Routed::Reply(reply)) => Some(reply),
        Err(e) => {
            warn!(session = %session.id(), "Rejected client message: {}", e);
            Some(ServerMessage::Error {
                message: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtValidator, PermissionLevel};
    use crate::config::Args;
    use crate::realtime::DEFAULT_ROOM;
    use crate::registry::ApplicationRegistry;
    use clap::Parser;

    const SECRET: &str = "realtime-secret-that-is-at-least-32-characters";

    fn state(extra: &[&str]) -> AppState {
        let mut argv = vec!["vestibule", "--jwt-secret", SECRET];
        argv.extend_from_slice(extra);
        AppState::new(Args::parse_from(argv), Arc::new(ApplicationRegistry::memory_only())).unwrap()
    }

    fn token(subject: &str) -> String {
        JwtValidator::new(SECRET.into(), 3600)
            .unwrap()
            .generate_token(subject, PermissionLevel::Authenticated)
            .unwrap()
    }

    fn handshake(uri: &str, authorization: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_no_credential_joins_default_room_anonymously() {
        let state = state(&[]);
        let session = open_session(&state, &handshake("/ws", None)).unwrap();

        assert_eq!(session.room(), DEFAULT_ROOM);
        assert!(session.subject().is_none());
        assert_eq!(state.router.session_count(), 1);
    }

    #[test]
    fn test_app_id_becomes_room() {
        let state = state(&[]);
        let session = open_session(&state, &handshake("/ws?appId=tasks", None)).unwrap();

        assert_eq!(session.room(), "tasks");
        assert_eq!(state.router.room_size("tasks"), 1);
    }

    #[test]
    fn test_valid_token_sets_subject() {
        let state = state(&[]);

        let query = format!("/ws?appId=tasks&token={}", token("alice"));
        let session = open_session(&state, &handshake(&query, None)).unwrap();
        assert_eq!(session.subject(), Some("alice"));

        let bearer = format!("Bearer {}", token("bob"));
        let session = open_session(&state, &handshake("/ws", Some(&bearer))).unwrap();
        assert_eq!(session.subject(), Some("bob"));
    }

    #[test]
    fn test_query_token_takes_precedence_over_header() {
        let state = state(&[]);
        let query = format!("/ws?token={}", token("alice"));
        let bearer = format!("Bearer {}", token("bob"));

        let session = open_session(&state, &handshake(&query, Some(&bearer))).unwrap();
        assert_eq!(session.subject(), Some("alice"));
    }

    #[test]
    fn test_invalid_credentials_rejected_before_join() {
        let state = state(&[]);
        let rejected = [
            handshake("/ws?appId=tasks&token=not-a-jwt", None),
            handshake("/ws?appId=tasks", Some("Bearer not-a-jwt")),
            handshake("/ws?appId=tasks", Some("Basic dXNlcjpwYXNz")),
        ];

        for req in &rejected {
            let Err(err) = open_session(&state, req) else {
                panic!("{} was accepted", req.uri());
            };
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED, "{}", req.uri());
        }
        assert_eq!(state.router.session_count(), 0);
        assert_eq!(state.router.room_size("tasks"), 0);
    }

    #[test]
    fn test_dev_mode_does_not_skip_token_checks() {
        let state = state(&["--dev-mode"]);
        let Err(err) = open_session(&state, &handshake("/ws?token=forged", None)) else {
            panic!("forged token was accepted");
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.router.session_count(), 0);
    }

    #[test]
    fn test_bad_frame_gets_error_reply_and_session_survives() {
        let router = MessageRouter::new(8);
        let sender = router.join(Some("shell".into()), None);
        let mut target = router.join(Some("tasks".into()), None);

        let reply = handle_client_frame(&router, &sender, "{not json");
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        let reply = handle_client_frame(&router, &sender, r#"{"type":"app-message","targetAppId":"  "}"#);
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        // Same session keeps routing after the failures
        let reply = handle_client_frame(
            &router,
            &sender,
            r#"{"type":"app-message","targetAppId":"tasks","payload":{"n":1}}"#,
        );
        assert!(reply.is_none());
        assert!(matches!(target.try_recv(), Some(ServerMessage::AppMessage { .. })));
    }

    #[test]
    fn test_ping_gets_pong() {
        let router = MessageRouter::new(8);
        let session = router.join(None, None);
        let reply = handle_client_frame(&router, &session, r#"{"type":"ping"}"#);
        assert!(matches!(reply, Some(ServerMessage::Pong { .. })));
    }

    #[test]
    fn test_connect_params_parse() {
        let params: ConnectParams = serde_urlencoded::from_str("appId=tasks&token=abc").unwrap();
        assert_eq!(params.app_id.as_deref(), Some("tasks"));
        assert_eq!(params.token.as_deref(), Some("abc"));

        let params: ConnectParams = serde_urlencoded::from_str("").unwrap();
        assert!(params.app_id.is_none());
    }
}
