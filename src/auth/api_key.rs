//! Admin API key authentication
//!
//! Operators pass the key via the X-API-Key header to reach admin routes
//! without a token.

use crate::auth::PermissionLevel;

/// API key validator
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    admin_key: Option<String>,
}

impl ApiKeyValidator {
    pub fn new(admin_key: Option<String>) -> Self {
        Self {
            admin_key: admin_key.filter(|k| !k.is_empty()),
        }
    }

    /// Check if API key authentication is configured
    pub fn is_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    /// Validate an API key and return the granted permission level
    ///
    /// Returns None if the key is wrong or no key is configured.
    pub fn validate(&self, api_key: &str) -> Option<PermissionLevel> {
        let admin = self.admin_key.as_ref()?;
        constant_time_compare(api_key, admin).then_some(PermissionLevel::Admin)
    }

    /// Extract API key from request headers
    pub fn extract_from_header(header: Option<&str>) -> Option<&str> {
        header.map(str::trim).filter(|h| !h.is_empty())
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_configured() {
        let validator = ApiKeyValidator::new(None);
        assert!(!validator.is_configured());
        assert_eq!(validator.validate("any-key"), None);

        // Empty configured key counts as unset
        assert!(!ApiKeyValidator::new(Some(String::new())).is_configured());
    }

    #[test]
    fn test_admin_key_validation() {
        let validator = ApiKeyValidator::new(Some("admin-secret".into()));
        assert_eq!(validator.validate("admin-secret"), Some(PermissionLevel::Admin));
        assert_eq!(validator.validate("admin-secreT"), None);
        assert_eq!(validator.validate("short"), None);
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(ApiKeyValidator::extract_from_header(Some(" key ")), Some("key"));
        assert_eq!(ApiKeyValidator::extract_from_header(Some("")), None);
        assert_eq!(ApiKeyValidator::extract_from_header(None), None);
    }
}
