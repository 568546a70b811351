//! Pluggable code sources
//!
//! A code source knows how to fetch a remote-entry descriptor, initialize
//! the container it describes, and produce a factory for one exposed
//! module. The loader owns caching and retries; sources only do I/O.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::VestibuleError;

/// Host package name → version offered to remote containers
pub type SharedDependencies = HashMap<String, String>;

/// Retryable failure from a code source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("failed to fetch remote entry {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("remote entry does not provide container '{scope}'")]
    MissingContainer { scope: String },

    #[error("container '{scope}' does not expose '{module}'")]
    MissingExport { scope: String, module: String },

    #[error("export '{module}' is malformed: {reason}")]
    MalformedExport { module: String, reason: String },

    #[error("resolution task ended abnormally: {0}")]
    Interrupted(String),
}

/// Backend that turns remote entries into component factories
#[async_trait]
pub trait CodeSource: Send + Sync + 'static {
    type Descriptor: Send + Sync + 'static;
    type Factory: Send + Sync + 'static;

    /// Fetch and parse the remote entry at `url`
    async fn fetch_descriptor(&self, url: &str) -> Result<Self::Descriptor, SourceError>;

    /// Initialize container `scope`, negotiating shared dependencies
    async fn init_container(
        &self,
        descriptor: &Self::Descriptor,
        scope: &str,
        shared: &SharedDependencies,
    ) -> Result<(), SourceError>;

    /// Produce a factory for `module` exposed by container `scope`
    async fn resolve_export(
        &self,
        descriptor: &Self::Descriptor,
        scope: &str,
        module: &str,
    ) -> Result<Self::Factory, SourceError>;
}

// ============================================================================
// HTTP manifest source
// ============================================================================

/// Remote-entry manifest served by a federated application
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteManifest {
    /// Container name; must match the requested scope
    pub name: String,
    /// Exposed path → export description (validated lazily)
    #[serde(default)]
    pub exposes: HashMap<String, Value>,
    #[serde(default)]
    pub shared: HashMap<String, SharedDependency>,
}

/// A package the remote expects the host to share
#[derive(Debug, Clone, Deserialize)]
pub struct SharedDependency {
    pub version: String,
    #[serde(default)]
    pub singleton: bool,
}

/// Parsed manifest together with the URL it was fetched from
#[derive(Debug, Clone)]
pub struct RemoteDescriptor {
    pub url: Url,
    pub manifest: RemoteManifest,
}

/// Resolved federated component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFactory {
    pub scope: String,
    pub module: String,
    /// Absolute URL of the module's code
    pub entry_url: String,
    pub format: String,
}

const DEFAULT_MODULE_FORMAT: &str = "esm";

/// Code source reading JSON remote-entry manifests over HTTP
pub struct HttpCodeSource {
    http_client: reqwest::Client,
}

impl HttpCodeSource {
    pub fn new(fetch_timeout: Duration) -> Result<Self, VestibuleError> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| VestibuleError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    fn check_scope(descriptor: &RemoteDescriptor, scope: &str) -> Result<(), SourceError> {
        if descriptor.manifest.name == scope {
            Ok(())
        } else {
            Err(SourceError::MissingContainer {
                scope: scope.to_string(),
            })
        }
    }
}

#[async_trait]
impl CodeSource for HttpCodeSource {
    type Descriptor = RemoteDescriptor;
    type Factory = ComponentFactory;

    async fn fetch_descriptor(&self, url: &str) -> Result<RemoteDescriptor, SourceError> {
        let fetch_err = |reason: String| SourceError::Fetch {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| fetch_err(e.to_string()))?;
        let response = self
            .http_client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {}", status.as_u16())));
        }

        let manifest: RemoteManifest = response
            .json()
            .await
            .map_err(|e| fetch_err(format!("invalid manifest: {e}")))?;

        debug!(
            url = %url,
            container = %manifest.name,
            exposes = manifest.exposes.len(),
            "Fetched remote entry"
        );

        Ok(RemoteDescriptor {
            url: parsed,
            manifest,
        })
    }

    async fn init_container(
        &self,
        descriptor: &RemoteDescriptor,
        scope: &str,
        shared: &SharedDependencies,
    ) -> Result<(), SourceError> {
        Self::check_scope(descriptor, scope)?;

        for (package, wanted) in &descriptor.manifest.shared {
            match shared.get(package) {
                Some(offered) if offered != &wanted.version && wanted.singleton => {
                    warn!(
                        scope = %scope,
                        package = %package,
                        offered = %offered,
                        wanted = %wanted.version,
                        "Singleton shared dependency version mismatch"
                    );
                }
                Some(_) => {}
                None => {
                    debug!(scope = %scope, package = %package, "Remote brings its own copy of shared dependency");
                }
            }
        }

        Ok(())
    }

    async fn resolve_export(
        &self,
        descriptor: &RemoteDescriptor,
        scope: &str,
        module: &str,
    ) -> Result<ComponentFactory, SourceError> {
        Self::check_scope(descriptor, scope)?;

        let export = descriptor
            .manifest
            .exposes
            .get(module)
            .ok_or_else(|| SourceError::MissingExport {
                scope: scope.to_string(),
                module: module.to_string(),
            })?;

        let malformed = |reason: &str| SourceError::MalformedExport {
            module: module.to_string(),
            reason: reason.to_string(),
        };

        let entry = export
            .get("entry")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing string field 'entry'"))?;

        let format = match export.get("format") {
            None | Some(Value::Null) => DEFAULT_MODULE_FORMAT,
            Some(Value::String(f)) => f.as_str(),
            Some(_) => return Err(malformed("'format' must be a string")),
        };

        let entry_url = descriptor
            .url
            .join(entry)
            .map_err(|e| malformed(&format!("bad entry path: {e}")))?;

        Ok(ComponentFactory {
            scope: scope.to_string(),
            module: module.to_string(),
            entry_url: entry_url.to_string(),
            format: format.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_manifest(manifest: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/remoteEntry.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(manifest))
            .mount(&server)
            .await;
        server
    }

    fn source() -> HttpCodeSource {
        HttpCodeSource::new(Duration::from_secs(2)).unwrap()
    }

    fn task_manager_manifest() -> Value {
        json!({
            "name": "taskManager",
            "exposes": {
                "./TaskManagerApp": { "entry": "./task-manager-app.js" },
                "./Widget": { "entry": "widget.js", "format": "system" },
                "./Broken": { "format": "esm" }
            },
            "shared": {
                "react": { "version": "17.0.2", "singleton": true }
            }
        })
    }

    #[tokio::test]
    async fn test_resolves_entry_relative_to_remote() {
        let server = serve_manifest(task_manager_manifest()).await;
        let url = format!("{}/assets/remoteEntry.json", server.uri());
        let source = source();

        let descriptor = source.fetch_descriptor(&url).await.unwrap();
        let shared = SharedDependencies::from([("react".to_string(), "18.2.0".to_string())]);
        source.init_container(&descriptor, "taskManager", &shared).await.unwrap();

        let factory = source
            .resolve_export(&descriptor, "taskManager", "./TaskManagerApp")
            .await
            .unwrap();
        assert_eq!(factory.entry_url, format!("{}/assets/task-manager-app.js", server.uri()));
        assert_eq!(factory.format, "esm");

        let widget = source
            .resolve_export(&descriptor, "taskManager", "./Widget")
            .await
            .unwrap();
        assert_eq!(widget.format, "system");
    }

    #[tokio::test]
    async fn test_missing_container_and_exports() {
        let server = serve_manifest(task_manager_manifest()).await;
        let url = format!("{}/assets/remoteEntry.json", server.uri());
        let source = source();
        let descriptor = source.fetch_descriptor(&url).await.unwrap();

        assert!(matches!(
            source.init_container(&descriptor, "calendar", &SharedDependencies::new()).await,
            Err(SourceError::MissingContainer { .. })
        ));
        assert!(matches!(
            source.resolve_export(&descriptor, "taskManager", "./Nope").await,
            Err(SourceError::MissingExport { .. })
        ));
        assert!(matches!(
            source.resolve_export(&descriptor, "taskManager", "./Broken").await,
            Err(SourceError::MalformedExport { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let source = source();

        for p in ["/missing.json", "/garbage.json"] {
            let err = source
                .fetch_descriptor(&format!("{}{p}", server.uri()))
                .await
                .unwrap_err();
            assert!(matches!(err, SourceError::Fetch { .. }), "{p}: {err}");
        }

        assert!(matches!(
            source.fetch_descriptor("not a url").await,
            Err(SourceError::Fetch { .. })
        ));
    }
}
