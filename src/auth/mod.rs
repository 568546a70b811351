//! Authentication and authorization for Vestibule
//!
//! Provides:
//! - JWT bearer token generation and validation
//! - Admin API key authentication via X-API-Key
//! - Permission levels for route authorization

pub mod api_key;
pub mod authenticator;
pub mod jwt;
pub mod permissions;

pub use api_key::ApiKeyValidator;
pub use authenticator::{Authenticator, Caller};
pub use jwt::{extract_token_from_header, Claims, JwtValidator};
pub use permissions::PermissionLevel;
