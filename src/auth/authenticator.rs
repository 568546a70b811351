//! Request caller identification
//!
//! A missing credential is an anonymous caller. A credential that is
//! present but invalid is rejected outright.

use tracing::debug;

use crate::auth::{extract_token_from_header, ApiKeyValidator, JwtValidator, PermissionLevel};
use crate::types::VestibuleError;

/// Identified caller of a request or realtime session
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub subject: Option<String>,
    pub level: PermissionLevel,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            subject: None,
            level: PermissionLevel::Public,
        }
    }

    /// Fail with Forbidden unless the caller has admin permission
    pub fn require_admin(&self) -> Result<(), VestibuleError> {
        if self.level >= PermissionLevel::Admin {
            Ok(())
        } else {
            Err(VestibuleError::Forbidden("admin permission required".into()))
        }
    }
}

/// Resolves credentials into a [`Caller`]
#[derive(Clone)]
pub struct Authenticator {
    jwt: Option<JwtValidator>,
    api_keys: ApiKeyValidator,
    dev_mode: bool,
}

impl Authenticator {
    pub fn new(jwt: Option<JwtValidator>, api_keys: ApiKeyValidator, dev_mode: bool) -> Self {
        Self {
            jwt,
            api_keys,
            dev_mode,
        }
    }

    /// Validate a bearer token
    pub fn from_token(&self, token: &str) -> Result<Caller, VestibuleError> {
        let jwt = self
            .jwt
            .as_ref()
            .ok_or_else(|| VestibuleError::Unauthorized("token authentication is not configured".into()))?;
        let claims = jwt.verify_token(token)?;
        Ok(Caller {
            subject: Some(claims.sub),
            level: claims.permission_level,
        })
    }

    /// Identify the caller from the Authorization and X-API-Key headers
    pub fn identify(
        &self,
        authorization: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Caller, VestibuleError> {
        if let Some(key) = ApiKeyValidator::extract_from_header(api_key) {
            let level = self
                .api_keys
                .validate(key)
                .ok_or_else(|| VestibuleError::Unauthorized("invalid API key".into()))?;
            return Ok(Caller {
                subject: Some("api-key".into()),
                level,
            });
        }

        match authorization {
            Some(header) => {
                let token = extract_token_from_header(Some(header))
                    .ok_or_else(|| VestibuleError::Unauthorized("malformed Authorization header".into()))?;
                self.from_token(token)
            }
            None if self.dev_mode => {
                debug!("Dev mode: anonymous caller granted admin");
                Ok(Caller {
                    subject: None,
                    level: PermissionLevel::Admin,
                })
            }
            None => Ok(Caller::anonymous()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-characters-long";

    fn authenticator(dev_mode: bool) -> Authenticator {
        Authenticator::new(
            Some(JwtValidator::new(SECRET.into(), 3600).unwrap()),
            ApiKeyValidator::new(Some("ops-key".into())),
            dev_mode,
        )
    }

    #[test]
    fn test_absent_credentials_are_anonymous() {
        let caller = authenticator(false).identify(None, None).unwrap();
        assert_eq!(caller, Caller::anonymous());
        assert!(caller.require_admin().is_err());
    }

    #[test]
    fn test_dev_mode_grants_admin() {
        let caller = tokio_test::assert_ok!(authenticator(true).identify(None, None));
        tokio_test::assert_ok!(caller.require_admin());
    }

    #[test]
    fn test_malformed_token_rejected() {
        let auth = authenticator(true);
        assert!(matches!(
            auth.identify(Some("Bearer garbage"), None),
            Err(VestibuleError::Unauthorized(_))
        ));
        assert!(matches!(
            auth.identify(Some("Basic a b"), None),
            Err(VestibuleError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_permission_level_applies() {
        let auth = authenticator(false);
        let jwt = JwtValidator::new(SECRET.into(), 3600).unwrap();

        let user = jwt.generate_token("alice", PermissionLevel::Authenticated).unwrap();
        let caller = auth.identify(Some(&format!("Bearer {user}")), None).unwrap();
        assert_eq!(caller.subject.as_deref(), Some("alice"));
        assert!(matches!(caller.require_admin(), Err(VestibuleError::Forbidden(_))));

        let admin = jwt.generate_token("ops", PermissionLevel::Admin).unwrap();
        let caller = auth.identify(Some(&format!("Bearer {admin}")), None).unwrap();
        assert!(caller.require_admin().is_ok());
    }

    #[test]
    fn test_api_key_grants_admin() {
        let auth = authenticator(false);
        let caller = tokio_test::assert_ok!(auth.identify(None, Some("ops-key")));
        tokio_test::assert_ok!(caller.require_admin());
        tokio_test::assert_err!(auth.identify(None, Some("wrong")));
    }

    #[test]
    fn test_token_without_configured_secret() {
        let auth = Authenticator::new(None, ApiKeyValidator::new(None), false);
        assert!(auth.from_token("anything").is_err());
    }
}
