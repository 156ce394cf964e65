//! # Shellcache Service Worker
//!
//! An offline app-shell cache worker: it intercepts same-origin requests
//! from the pages it controls and serves them from a versioned cache or the
//! network.
//!
//! ## Features
//!
//! - **Lifecycle**: install (optional eager precache), activate (prune stale
//!   generations, claim clients)
//! - **Routing**: navigations network-first, static assets cache-first,
//!   everything else untouched
//! - **Redirect safety**: redirected responses are never stored
//! - **Registration**: page-side `register()` that tolerates failure
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (one per page)
//!     │
//!     └── ServiceWorkerRegistration (by scope)
//!             ├── waiting (OfflineWorker)
//!             └── active  (OfflineWorker)
//!                     ├── WorkerConfig
//!                     ├── Fetcher
//!                     └── WorkerHost
//!                             ├── CacheStorage → Cache → Request → Response
//!                             └── Clients
//! ```

use shellcache_common::ShellError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod fetch;
pub mod router;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, ClientType, Clients};
pub use config::{NavigationFallback, WorkerConfig, WorkerConfigBuilder};
pub use container::{RegistrationOptions, ServiceWorkerContainer, ServiceWorkerRegistration};
pub use fetch::{FetchOutcome, FetchResponse, ResponseType};
pub use router::{classify, PassthroughReason, Route};
pub use worker::{
    OfflineWorker, ServiceWorker, ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerState,
    WorkerHost,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Common(#[from] ShellError),
}
