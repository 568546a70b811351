//! HTTP routes for Vestibule

pub mod applications;
pub mod health;
pub mod modules;

pub use applications::{handle_application_item, handle_list_applications, handle_liveness, handle_register};
pub use health::{health_check, version_info};
pub use modules::{handle_clear_cache, handle_resolve_module};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::types::VestibuleError;

/// Largest request body accepted by JSON routes
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Result of a route handler
pub type RouteResult = Result<Response<Full<Bytes>>, VestibuleError>;

/// JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(body) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            return error_response(VestibuleError::Internal("serialization failed".into()));
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// `{"error": kind, "message": text}` with the error's status code
pub fn error_response(err: VestibuleError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    if status.is_server_error() {
        warn!(status = status.as_u16(), body = %body, "Request failed");
    }

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Read a request body up to the size limit
pub async fn read_body(req: Request<Incoming>) -> Result<Bytes, VestibuleError> {
    Ok(Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| VestibuleError::BadRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes())
}

/// Parse a required JSON body
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, VestibuleError> {
    serde_json::from_slice(bytes).map_err(|e| VestibuleError::BadRequest(format!("Invalid JSON: {}", e)))
}

/// Parse an optional JSON body; an empty body parses as `T::default()`
pub fn parse_json_or_default<T>(bytes: &[u8]) -> Result<T, VestibuleError>
where
    T: DeserializeOwned + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(bytes)
}
