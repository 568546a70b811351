//! Application records and registration input
//!
//! An application is a remote UI module the host shell can mount. Records
//! are serialized camelCase on the wire and as-is into MongoDB.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loader::ModuleKey;
use crate::types::VestibuleError;

/// How the host shell mounts an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationKind {
    /// Runtime-loaded federated module (needs a remote entry)
    FederatedModule,
    /// Sandboxed iframe pointing at the base URL
    #[default]
    Iframe,
    /// Custom element registered by the remote bundle
    WebComponent,
}

/// Coordinates of a federated module's remote entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    /// URL of the remote-entry manifest
    pub remote_url: String,
    /// Container name the remote registers itself under
    pub scope: String,
    /// Exposed module path, e.g. "./TaskManagerApp"
    pub exposed_module: String,
}

impl RemoteEntry {
    /// Loader cache key for this entry
    pub fn module_key(&self) -> ModuleKey {
        ModuleKey::new(&self.remote_url, &self.scope, &self.exposed_module)
    }
}

/// A registered remote application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub integration_kind: IntegrationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_entry: Option<RemoteEntry>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterApplication {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub integration_kind: IntegrationKind,
    #[serde(default)]
    pub remote_entry: Option<RemoteEntry>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RegisterApplication {
    /// Validate the request and build a new active record
    pub fn into_application(self) -> Result<Application, VestibuleError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(VestibuleError::BadRequest("name is required".into()));
        }

        let base_url = self.url.trim().to_string();
        validate_http_url("url", &base_url)?;

        if let Some(ref icon) = self.icon_url {
            validate_http_url("iconUrl", icon)?;
        }

        let remote_entry = match (self.integration_kind, self.remote_entry) {
            (IntegrationKind::FederatedModule, Some(entry)) => {
                validate_http_url("remoteEntry.remoteUrl", &entry.remote_url)?;
                if entry.scope.trim().is_empty() {
                    return Err(VestibuleError::BadRequest("remoteEntry.scope is required".into()));
                }
                if entry.exposed_module.trim().is_empty() {
                    return Err(VestibuleError::BadRequest(
                        "remoteEntry.exposedModule is required".into(),
                    ));
                }
                Some(entry)
            }
            (IntegrationKind::FederatedModule, None) => {
                return Err(VestibuleError::BadRequest(
                    "remoteEntry is required for federated-module applications".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(VestibuleError::BadRequest(
                    "remoteEntry is only allowed for federated-module applications".into(),
                ));
            }
            (_, None) => None,
        };

        let now = Utc::now();
        Ok(Application {
            id: Uuid::new_v4().to_string(),
            name,
            base_url,
            icon_url: self.icon_url,
            integration_kind: self.integration_kind,
            remote_entry,
            active: true,
            description: self.description,
            created_at: now,
            updated_at: now,
        })
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), VestibuleError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(VestibuleError::BadRequest(format!(
            "{field} must be an http(s) URL, got scheme '{}'",
            url.scheme()
        ))),
        Err(e) => Err(VestibuleError::BadRequest(format!("{field} is not a valid URL: {e}"))),
    }
}
