//! Federated module loader
//!
//! Resolves `(remote entry, scope, module)` keys into component factories
//! through a pluggable [`CodeSource`], deduplicating concurrent loads and
//! retrying failures with jittered exponential backoff.

pub mod cache;
pub mod policy;
pub mod source;

pub use cache::{LoadError, ModuleKey, ModuleLoader};
pub use policy::RetryPolicy;
pub use source::{CodeSource, ComponentFactory, HttpCodeSource, SharedDependencies, SourceError};
