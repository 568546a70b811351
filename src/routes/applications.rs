//! Application registry routes
//!
//! - `POST   /api/applications` register (admin)
//! - `GET    /api/applications[?healthy=true]` active apps with probed health
//! - `GET    /api/applications/{id}` one record
//! - `POST   /api/applications/{id}/heartbeat` liveness signal
//! - `POST   /api/applications/{id}/activate|deactivate` (admin)
//! - `DELETE /api/applications/{id}` (admin)
//! - `GET    /api/liveness` liveness of every active app

use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::auth::Caller;
use crate::health::HeartbeatRequest;
use crate::registry::RegisterApplication;
use crate::routes::{json_response, parse_json, parse_json_or_default, RouteResult};
use crate::routes::modules::handle_resolve_module;
use crate::server::AppState;
use crate::types::VestibuleError;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    healthy: Option<bool>,
}

/// POST /api/applications
pub async fn handle_register(state: &AppState, caller: &Caller, body: &[u8]) -> RouteResult {
    caller.require_admin()?;
    let request: RegisterApplication = parse_json(body)?;
    let app = state.registry.register(request).await?;
    Ok(json_response(StatusCode::CREATED, &app))
}

/// GET /api/applications
pub async fn handle_list_applications(state: &AppState, query: Option<&str>) -> RouteResult {
    let query: ListQuery = serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| VestibuleError::BadRequest(format!("Invalid query: {}", e)))?;
    let apps = state
        .liveness
        .list_applications(query.healthy.unwrap_or(false))
        .await;
    Ok(json_response(StatusCode::OK, &apps))
}

/// GET /api/liveness
pub async fn handle_liveness(state: &AppState) -> RouteResult {
    let records = state.liveness.liveness().await;
    Ok(json_response(StatusCode::OK, &records))
}

/// Routes under `/api/applications/{id}`; `rest` is the path after the prefix
pub async fn handle_application_item(
    state: &AppState,
    method: &Method,
    rest: &str,
    caller: &Caller,
    body: &[u8],
) -> RouteResult {
    let (id, action) = match rest.split_once('/') {
        Some((id, action)) => (id, Some(action)),
        None => (rest, None),
    };

    if id.is_empty() {
        return Err(VestibuleError::NotFound("application id missing".into()));
    }

    match (method, action) {
        (&Method::GET, None) => {
            let app = state
                .registry
                .get(id)
                .ok_or_else(|| VestibuleError::NotFound(format!("application {id} not found")))?;
            Ok(json_response(StatusCode::OK, &app))
        }
        (&Method::DELETE, None) => {
            caller.require_admin()?;
            let app = state.registry.delete(id).await?;
            state.liveness.forget(&app.id);
            Ok(json_response(StatusCode::OK, &json!({ "success": true, "id": app.id })))
        }
        (&Method::POST, Some("heartbeat")) => {
            let request: HeartbeatRequest = parse_json_or_default(body)?;
            let ack = state.heartbeats.ingest(
                id,
                request.status.unwrap_or_default(),
                request.metadata.unwrap_or_else(|| json!({})),
            )?;
            Ok(json_response(StatusCode::OK, &ack))
        }
        (&Method::POST, Some(action @ ("activate" | "deactivate"))) => {
            caller.require_admin()?;
            let app = state.registry.set_active(id, action == "activate").await?;
            Ok(json_response(StatusCode::OK, &app))
        }
        (&Method::GET, Some("module")) => handle_resolve_module(state, id).await,
        _ => Err(VestibuleError::NotFound(format!(
            "no route for {} /api/applications/{}",
            method, rest
        ))),
    }
}
