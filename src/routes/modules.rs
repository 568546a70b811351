//! Federated module routes
//!
//! - `GET  /api/applications/{id}/module` resolve the app's exposed module
//! - `POST /api/modules/cache/clear` drop cached modules (admin)

use hyper::StatusCode;
use serde_json::json;

use crate::auth::Caller;
use crate::registry::IntegrationKind;
use crate::routes::{json_response, RouteResult};
use crate::server::AppState;
use crate::types::VestibuleError;

/// GET /api/applications/{id}/module
pub async fn handle_resolve_module(state: &AppState, id: &str) -> RouteResult {
    let app = state
        .registry
        .get_active(id)
        .ok_or_else(|| VestibuleError::NotFound(format!("application {id} not found or inactive")))?;

    let entry = match (app.integration_kind, app.remote_entry.as_ref()) {
        (IntegrationKind::FederatedModule, Some(entry)) => entry,
        _ => {
            return Err(VestibuleError::BadRequest(format!(
                "application {} is not a federated module",
                app.name
            )))
        }
    };

    let factory = state.loader.load(entry.module_key(), &state.retry_policy).await?;
    Ok(json_response(StatusCode::OK, factory.as_ref()))
}

/// POST /api/modules/cache/clear
pub fn handle_clear_cache(state: &AppState, caller: &Caller) -> RouteResult {
    caller.require_admin()?;
    let modules = state.loader.cached_modules();
    state.loader.clear_cache();
    Ok(json_response(StatusCode::OK, &json!({ "success": true, "cleared": modules })))
}
