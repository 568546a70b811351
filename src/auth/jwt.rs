//! JWT bearer tokens
//!
//! Tokens are signed with HS256. The `permission_level` claim decides
//! whether a caller may use admin routes.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::PermissionLevel;
use crate::types::VestibuleError;

/// Payload stored in JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or application identifier)
    pub sub: String,
    /// Permission level granted
    #[serde(default)]
    pub permission_level: PermissionLevel,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, VestibuleError> {
        if secret.is_empty() {
            return Err(VestibuleError::Config("JWT_SECRET must not be empty".into()));
        }

        if secret.len() < 32 {
            return Err(VestibuleError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Generate a token for `subject`
    pub fn generate_token(
        &self,
        subject: &str,
        permission_level: PermissionLevel,
    ) -> Result<String, VestibuleError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| VestibuleError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: subject.to_string(),
            permission_level,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| VestibuleError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a token
    pub fn verify_token(&self, token: &str) -> Result<Claims, VestibuleError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Token validation failed",
            };
            VestibuleError::Unauthorized(msg.into())
        })
    }
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}
