//! Error types for Vestibule

use hyper::StatusCode;

use crate::loader::LoadError;

/// Main error type for Vestibule operations
#[derive(Debug, thiserror::Error)]
pub enum VestibuleError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation on a registry mutation
    #[error("Conflict: {field} '{value}' already exists")]
    Conflict { field: &'static str, value: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VestibuleError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Load(_) => StatusCode::BAD_GATEWAY,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind used in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Load(_) => "load_failed",
            Self::WebSocket(_) => "websocket",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
            Self::Config(_) => "config",
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, body)
    }
}

impl From<std::io::Error> for VestibuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for VestibuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for VestibuleError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VestibuleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for VestibuleError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for VestibuleError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for Vestibule operations
pub type Result<T> = std::result::Result<T, VestibuleError>;
