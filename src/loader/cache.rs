//! Deduplicating module cache
//!
//! Each key maps to one shared future. The first caller spawns the
//! resolution task; later callers, concurrent or not, await the same
//! outcome. A second cache keyed by remote-entry URL makes sure each
//! remote entry is fetched and its container initialized once until
//! `clear_cache`, unless the fetch or initialization itself failed.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::loader::policy::RetryPolicy;
use crate::loader::source::{CodeSource, SharedDependencies, SourceError};

/// Identity of a federated module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleKey {
    pub remote_url: String,
    pub scope: String,
    pub module: String,
}

impl ModuleKey {
    pub fn new(remote_url: &str, scope: &str, module: &str) -> Self {
        Self {
            remote_url: remote_url.to_string(),
            scope: scope.to_string(),
            module: module.to_string(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.scope, self.module, self.remote_url)
    }
}

/// Load failure after every attempt was spent
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to load {key} after {attempts} attempt(s): {cause}")]
pub struct LoadError {
    pub key: ModuleKey,
    pub attempts: u32,
    #[source]
    pub cause: SourceError,
}

type ModuleFuture<F> = Shared<BoxFuture<'static, Result<Arc<F>, LoadError>>>;
type EntryFuture<D> = Shared<BoxFuture<'static, Result<Arc<D>, SourceError>>>;

/// A cached future tagged with the generation that created it, so a task
/// only ever evicts its own slot
struct Slot<T> {
    generation: u64,
    future: T,
}

struct LoaderInner<S: CodeSource> {
    source: S,
    shared: SharedDependencies,
    modules: DashMap<ModuleKey, Slot<ModuleFuture<S::Factory>>>,
    /// remote-entry URL → fetched and initialized descriptor
    entries: DashMap<String, Slot<EntryFuture<S::Descriptor>>>,
    generation: AtomicU64,
}

/// Federated module loader over a code source
pub struct ModuleLoader<S: CodeSource> {
    inner: Arc<LoaderInner<S>>,
}

impl<S: CodeSource> Clone for ModuleLoader<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CodeSource> ModuleLoader<S> {
    /// Create a loader offering `shared` dependencies to every container
    pub fn new(source: S, shared: SharedDependencies) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                source,
                shared,
                modules: DashMap::new(),
                entries: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Load a module, joining any resolution already in flight for `key`
    ///
    /// All callers for the same key receive the same `Arc`. Must run inside
    /// a tokio runtime.
    pub async fn load(
        &self,
        key: ModuleKey,
        policy: &RetryPolicy,
    ) -> Result<Arc<S::Factory>, LoadError> {
        let future = self
            .inner
            .modules
            .entry(key.clone())
            .or_insert_with(|| self.spawn_resolution(key, *policy))
            .future
            .clone();

        future.await
    }

    fn spawn_resolution(&self, key: ModuleKey, policy: RetryPolicy) -> Slot<ModuleFuture<S::Factory>> {
        let generation = self.inner.next_generation();
        debug!(module = %key, generation, "Starting module resolution");

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move { inner.resolve(task_key, policy, generation).await });

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(LoadError {
                    key,
                    attempts: 0,
                    cause: SourceError::Interrupted(e.to_string()),
                }),
            }
        }
        .boxed()
        .shared();

        Slot { generation, future }
    }

    /// Drop every cached module and remote entry
    ///
    /// In-flight resolutions keep running for their current waiters; the
    /// next `load` starts over.
    pub fn clear_cache(&self) {
        let modules = self.inner.modules.len();
        let entries = self.inner.entries.len();
        self.inner.modules.clear();
        self.inner.entries.clear();
        info!(modules, entries, "Module cache cleared");
    }

    /// Number of cached (resolved or in-flight) modules
    pub fn cached_modules(&self) -> usize {
        self.inner.modules.len()
    }

    /// Number of cached remote entries
    pub fn cached_entries(&self) -> usize {
        self.inner.entries.len()
    }
}

impl<S: CodeSource> LoaderInner<S> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    async fn resolve(
        self: Arc<Self>,
        key: ModuleKey,
        policy: RetryPolicy,
        generation: u64,
    ) -> Result<Arc<S::Factory>, LoadError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&key).await {
                Ok(factory) => {
                    info!(module = %key, attempt, "Module loaded");
                    return Ok(Arc::new(factory));
                }
                Err(cause) if attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        module = %key,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "Module load failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(cause) => {
                    self.modules.remove_if(&key, |_, slot| slot.generation == generation);
                    error!(module = %key, attempts = attempt, error = %cause, "Module load failed");
                    return Err(LoadError {
                        key,
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    /// One pass: obtain the initialized remote entry, then the export
    ///
    /// Only a failed fetch or initialization evicts the remote entry; an
    /// export failure keeps it for the next attempt.
    async fn attempt(self: &Arc<Self>, key: &ModuleKey) -> Result<S::Factory, SourceError> {
        let (generation, entry) = self.entry(&key.remote_url, &key.scope);

        let descriptor = match entry.await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.entries
                    .remove_if(&key.remote_url, |_, slot| slot.generation == generation);
                return Err(e);
            }
        };

        self.source
            .resolve_export(&*descriptor, &key.scope, &key.module)
            .await
    }

    /// Shared fetch + container initialization for a remote-entry URL
    fn entry(self: &Arc<Self>, url: &str, scope: &str) -> (u64, EntryFuture<S::Descriptor>) {
        let slot = self.entries.entry(url.to_string()).or_insert_with(|| {
            let generation = self.next_generation();
            let inner = Arc::clone(self);
            let url = url.to_string();
            let scope = scope.to_string();

            let future = async move {
                let descriptor = inner.source.fetch_descriptor(&url).await?;
                inner
                    .source
                    .init_container(&descriptor, &scope, &inner.shared)
                    .await?;
                debug!(url = %url, scope = %scope, "Remote container initialized");
                Ok::<_, SourceError>(Arc::new(descriptor))
            }
            .boxed()
            .shared();

            Slot { generation, future }
        });

        (slot.generation, slot.future.clone())
    }
}
