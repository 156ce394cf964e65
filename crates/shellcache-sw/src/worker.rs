//! The worker itself: lifecycle plus fetch dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shellcache_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::{WorkerConfig, DEFAULT_SCOPE, DEFAULT_SCRIPT_URL};
use crate::fetch::{FetchOutcome, FetchResponse};
use crate::router::{classify, Route};
use crate::strategy::{cache_first, network_first, StrategyContext};
use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// A service worker record.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Stale cache generation removed during activation.
    CacheDeleted { name: String },
    /// Controller changed.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Update found.
    UpdateFound { registration_scope: String },
}

/// Resources the hosting runtime shares with every worker it runs.
#[derive(Debug, Clone)]
pub struct WorkerHost {
    /// Cache storage.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Open pages.
    pub clients: Arc<RwLock<Clients>>,

    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl WorkerHost {
    /// Create a host with empty storage.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        Self::with_caches(CacheStorage::new())
    }

    /// Create a host around existing storage, e.g. a restored snapshot.
    pub fn with_caches(
        caches: CacheStorage,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                caches: Arc::new(RwLock::new(caches)),
                clients: Arc::new(RwLock::new(Clients::new())),
                events,
            },
            event_rx,
        )
    }

    pub(crate) fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.events.send(event);
    }
}

/// An offline cache worker bound to one [`WorkerConfig`].
pub struct OfflineWorker<F> {
    record: RwLock<ServiceWorker>,
    id: ServiceWorkerId,
    scope: Url,
    config: WorkerConfig,
    fetcher: F,
    host: WorkerHost,
}

impl<F: Fetcher> OfflineWorker<F> {
    /// Create a worker registered at `/sw.js` with scope `/` on the
    /// configured origin.
    pub fn new(config: WorkerConfig, fetcher: F, host: WorkerHost) -> Self {
        let mut script_url = config.origin.clone();
        script_url.set_path(DEFAULT_SCRIPT_URL);
        script_url.set_query(None);
        let mut scope = config.origin.clone();
        scope.set_path(DEFAULT_SCOPE);
        scope.set_query(None);

        let record = ServiceWorker::new(script_url);
        Self {
            id: record.id,
            record: RwLock::new(record),
            scope,
            config,
            fetcher,
            host,
        }
    }

    /// Recreate a worker that was already activated in an earlier run.
    ///
    /// The host may stop a worker between events; restarting it does not
    /// repeat install or activate.
    pub fn resume(config: WorkerConfig, fetcher: F, host: WorkerHost) -> Self {
        let mut worker = Self::new(config, fetcher, host);
        worker
            .record
            .get_mut()
            .set_state(ServiceWorkerState::Activated);
        worker
    }

    /// Override the script URL and scope.
    pub fn with_registration(mut self, script_url: Url, scope: Url) -> Self {
        self.record.get_mut().script_url = script_url;
        self.scope = scope;
        self
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.host.caches)
    }

    /// Snapshot of the worker record.
    pub async fn record(&self) -> ServiceWorker {
        self.record.read().await.clone()
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.record.read().await.state
    }

    /// Whether activation should follow install immediately.
    pub fn skip_waiting(&self) -> bool {
        self.config.skip_waiting
    }

    fn context(&self) -> StrategyContext<'_, F> {
        StrategyContext {
            config: &self.config,
            caches: &self.host.caches,
            fetcher: &self.fetcher,
        }
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        self.record.write().await.set_state(state);
        self.host.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state: state,
        });
    }

    async fn transition(
        &self,
        allowed: &[ServiceWorkerState],
        next: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut record = self.record.write().await;
            let current = record.state;
            if !allowed.contains(&current) {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot move from {current:?} to {next:?}"
                )));
            }
            record.set_state(next);
        }
        self.host.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state: next,
        });
        Ok(())
    }

    pub(crate) async fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    /// Run the install step.
    ///
    /// Opens the current cache generation and, when a manifest is configured,
    /// precaches it. The manifest is all-or-nothing: if any entry fails,
    /// nothing is written and the worker becomes redundant.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installing)
            .await?;

        match self.precache().await {
            Ok(stored) => {
                info!(
                    cache = %self.config.cache_name(),
                    stored,
                    "Worker installed"
                );
                self.set_state(ServiceWorkerState::Installed).await;
                Ok(())
            }
            Err(err) => {
                warn!(cache = %self.config.cache_name(), error = %err, "Install failed");
                self.mark_redundant().await;
                Err(err)
            }
        }
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let cache_name = self.config.cache_name();
        let urls = self.config.precache_urls()?;

        if urls.is_empty() {
            self.host.caches.write().await.open(&cache_name);
            return Ok(0);
        }

        let ctx = self.context();
        let fetches = urls.into_iter().map(|url| {
            let ctx = &ctx;
            async move {
                let request = Request::get(url);
                let response = ctx.fetch(request.clone()).await.map_err(|e| {
                    ServiceWorkerError::InstallFailed(format!("{}: {e}", request.url))
                })?;
                if !response.ok() {
                    return Err(ServiceWorkerError::InstallFailed(format!(
                        "{}: status {}",
                        request.url, response.status
                    )));
                }
                Ok::<(Request, FetchResponse), ServiceWorkerError>((request, response))
            }
        });

        let fetched = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut caches = self.host.caches.write().await;
        let cache = caches.open(&cache_name);
        let mut stored = 0;
        for (request, response) in &fetched {
            if cache.put(request, response) {
                stored += 1;
            } else {
                warn!(url = %request.url, "Manifest entry not cached");
            }
        }
        Ok(stored)
    }

    /// Run the activate step.
    ///
    /// Deletes every cache generation this version does not own, then claims
    /// all clients in scope. Returns the deleted cache names. Safe to repeat.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.transition(
            &[ServiceWorkerState::Installed, ServiceWorkerState::Activated],
            ServiceWorkerState::Activating,
        )
        .await?;

        let deleted = {
            let mut caches = self.host.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| !self.config.owns_cache(name))
                .map(str::to_string)
                .collect();
            for name in &stale {
                caches.delete(name);
                debug!(cache = %name, "Deleted stale cache");
                self.host
                    .emit(ServiceWorkerEvent::CacheDeleted { name: name.clone() });
            }
            caches.open(&self.config.cache_name());
            stale
        };

        self.set_state(ServiceWorkerState::Activated).await;

        let claimed = self
            .host
            .clients
            .write()
            .await
            .claim(self.id, &self.scope);
        for client_id in claimed {
            self.host.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: self.id,
            });
        }

        info!(
            cache = %self.config.cache_name(),
            deleted = deleted.len(),
            "Worker activated"
        );
        Ok(deleted)
    }

    /// Handle one intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        if !self.record.read().await.is_active() {
            trace!(url = %request.url, "Worker not active, passing through");
            return FetchOutcome::Passthrough;
        }

        let route = classify(&request, &self.config);
        debug!(url = %request.url, route = route.as_str(), "Routing request");

        let ctx = self.context();
        match route {
            Route::NetworkFirst => FetchOutcome::Respond(network_first(&ctx, &request).await),
            Route::CacheFirst => FetchOutcome::Respond(cache_first(&ctx, &request).await),
            Route::Passthrough(_) => FetchOutcome::Passthrough,
        }
    }
}
