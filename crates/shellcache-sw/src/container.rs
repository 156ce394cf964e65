//! Page-side registration (`navigator.serviceWorker`).

use std::sync::Arc;

use hashbrown::HashMap;
use shellcache_net::{Fetcher, Request};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::fetch::FetchOutcome;
use crate::worker::{OfflineWorker, ServiceWorkerEvent, WorkerHost};
use crate::ServiceWorkerError;

/// Options for service worker registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope URL, relative to the page. Defaults to the script's directory.
    pub scope: Option<String>,
}

/// A service worker registration.
pub struct ServiceWorkerRegistration<F> {
    /// Scope URL.
    pub scope: Url,

    /// Waiting worker (installed but not active).
    pub waiting: Option<Arc<OfflineWorker<F>>>,

    /// Active worker.
    pub active: Option<Arc<OfflineWorker<F>>>,
}

impl<F> ServiceWorkerRegistration<F> {
    fn new(scope: Url) -> Self {
        Self {
            scope,
            waiting: None,
            active: None,
        }
    }
}

/// Service worker container for one page.
pub struct ServiceWorkerContainer<F> {
    page_url: Url,
    host: WorkerHost,
    registrations: RwLock<HashMap<String, ServiceWorkerRegistration<F>>>,
}

impl<F: Fetcher> ServiceWorkerContainer<F> {
    /// Create a container for the page at `page_url`.
    pub fn new(page_url: Url, host: WorkerHost) -> Self {
        Self {
            page_url,
            host,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    /// Register a worker script.
    ///
    /// The script and scope must share the page's origin. Runs install, and
    /// activation too when the worker skips waiting. Returns the scope.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        config: WorkerConfig,
        fetcher: F,
    ) -> Result<Url, ServiceWorkerError> {
        let script_url = self
            .page_url
            .join(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        if !matches!(script_url.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::SecurityError(format!(
                "unsupported scheme for {script_url}"
            )));
        }
        if script_url.origin() != self.page_url.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "script {script_url} is not same-origin with the page"
            )));
        }

        let scope = match options.scope {
            Some(s) => self
                .page_url
                .join(&s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
            None => {
                let mut scope = script_url.clone();
                let dir = script_url
                    .path()
                    .rsplit_once('/')
                    .map(|(p, _)| p)
                    .unwrap_or("");
                scope.set_path(&format!("{dir}/"));
                scope.set_query(None);
                scope
            }
        };
        if scope.origin() != self.page_url.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {scope} is not same-origin with the page"
            )));
        }
        if config.origin.origin() != self.page_url.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "worker configured for {} but page is {}",
                config.origin, self.page_url
            )));
        }

        let worker = Arc::new(
            OfflineWorker::new(config, fetcher, self.host.clone())
                .with_registration(script_url.clone(), scope.clone()),
        );
        let scope_str = scope.to_string();
        self.host.emit(ServiceWorkerEvent::UpdateFound {
            registration_scope: scope_str.clone(),
        });

        worker.install().await?;

        let replaced = if worker.skip_waiting() {
            worker.activate().await?;
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_str.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            let old_waiting = registration.waiting.take();
            let old_active = registration.active.replace(Arc::clone(&worker));
            [old_waiting, old_active]
        } else {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_str.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            [registration.waiting.replace(Arc::clone(&worker)), None]
        };

        for old in replaced.into_iter().flatten() {
            old.mark_redundant().await;
        }

        info!(script = %script_url, scope = %scope, "Service worker registered");
        Ok(scope)
    }

    /// Register, logging and swallowing any failure.
    pub async fn register_silently(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        config: WorkerConfig,
        fetcher: F,
    ) -> Option<Url> {
        match self.register(script_url, options, config, fetcher).await {
            Ok(scope) => Some(scope),
            Err(err) => {
                warn!(script = script_url, error = %err, "Service worker registration failed");
                None
            }
        }
    }

    /// Activate the waiting worker of a registration.
    pub async fn activate_waiting(&self, scope: &str) -> Result<(), ServiceWorkerError> {
        let (worker, previous) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let worker = registration
                .waiting
                .take()
                .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".into()))?;
            let previous = registration.active.replace(Arc::clone(&worker));
            (worker, previous)
        };

        if let Some(previous) = previous {
            previous.mark_redundant().await;
        }
        worker.activate().await?;
        Ok(())
    }

    /// Scope of the registration controlling `url` (longest match).
    pub async fn get_registration(&self, url: &Url) -> Option<String> {
        let registrations = self.registrations.read().await;
        registrations
            .keys()
            .filter(|scope| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    /// Get all registrations.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Active worker of a registration.
    pub async fn active_worker(&self, scope: &str) -> Option<Arc<OfflineWorker<F>>> {
        self.registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.active.clone())
    }

    /// Dispatch a request issued by the page at `client_url`.
    pub async fn handle_fetch(&self, client_url: &Url, request: Request) -> FetchOutcome {
        let worker = match self.get_registration(client_url).await {
            Some(scope) => self.active_worker(&scope).await,
            None => None,
        };

        match worker {
            Some(worker) => worker.handle_fetch(request).await,
            None => {
                debug!(client = %client_url, url = %request.url, "No controlling worker");
                FetchOutcome::Passthrough
            }
        }
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &str) -> bool {
        let removed = self.registrations.write().await.remove(scope);
        match removed {
            Some(registration) => {
                for worker in [registration.active, registration.waiting]
                    .into_iter()
                    .flatten()
                {
                    worker.mark_redundant().await;
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SCOPE, DEFAULT_SCRIPT_URL};
    use crate::test_support::ScriptedFetcher;
    use crate::worker::ServiceWorkerState;

    fn page() -> Url {
        Url::parse("https://lknzmzd.example/").unwrap()
    }

    fn config(version: u32) -> WorkerConfig {
        WorkerConfig::builder("lknzmzd", version, page())
            .build()
            .unwrap()
    }

    fn container() -> ServiceWorkerContainer<ScriptedFetcher> {
        let (host, _rx) = WorkerHost::new();
        ServiceWorkerContainer::new(page(), host)
    }

    #[tokio::test]
    async fn test_container_register() {
        let container = container();

        let scope = container
            .register(
                DEFAULT_SCRIPT_URL,
                RegistrationOptions::default(),
                config(1),
                ScriptedFetcher::new(),
            )
            .await
            .unwrap();

        assert_eq!(scope.as_str(), "https://lknzmzd.example/");
        assert_eq!(container.get_registrations().await.len(), 1);
        let worker = container.active_worker(scope.as_str()).await.unwrap();
        assert_eq!(worker.state().await, ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_default_scope_is_script_directory() {
        let container = container();

        let scope = container
            .register(
                "/app/sw.js",
                RegistrationOptions::default(),
                config(1),
                ScriptedFetcher::new(),
            )
            .await
            .unwrap();

        assert_eq!(scope.path(), "/app/");
    }

    #[tokio::test]
    async fn test_cross_origin_script_rejected() {
        let container = container();

        let result = container
            .register(
                "https://evil.example/sw.js",
                RegistrationOptions::default(),
                config(1),
                ScriptedFetcher::new(),
            )
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::SecurityError(_))));
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_silently_tolerates_failure() {
        let container = container();
        let failing = WorkerConfig::builder("lknzmzd", 1, page())
            .precache(["/"])
            .build()
            .unwrap();

        let scope = container
            .register_silently(
                DEFAULT_SCRIPT_URL,
                RegistrationOptions {
                    scope: Some(DEFAULT_SCOPE.to_string()),
                },
                failing,
                ScriptedFetcher::new(),
            )
            .await;

        assert!(scope.is_none());
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_worker_origin_rejected() {
        let container = container();
        let other = WorkerConfig::builder("lknzmzd", 1, Url::parse("https://other.example/").unwrap())
            .build()
            .unwrap();

        let result = container
            .register(DEFAULT_SCRIPT_URL, RegistrationOptions::default(), other, ScriptedFetcher::new())
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::SecurityError(_))));
    }

    #[tokio::test]
    async fn test_update_replaces_and_prunes() {
        let container = container();
        let v1 = container
            .register(DEFAULT_SCRIPT_URL, RegistrationOptions::default(), config(1), ScriptedFetcher::new())
            .await
            .unwrap();
        let old = container.active_worker(v1.as_str()).await.unwrap();

        container
            .register(DEFAULT_SCRIPT_URL, RegistrationOptions::default(), config(2), ScriptedFetcher::new())
            .await
            .unwrap();

        assert_eq!(old.state().await, ServiceWorkerState::Redundant);
        let caches = container.host().caches.read().await;
        assert_eq!(caches.keys(), vec!["lknzmzd-v2"]);
    }

    #[tokio::test]
    async fn test_waiting_until_activated() {
        let container = container();
        let config = WorkerConfig::builder("lknzmzd", 1, page())
            .skip_waiting(false)
            .build()
            .unwrap();
        let fetcher = ScriptedFetcher::new().respond("/main.js", 200, "x");
        let scope = container
            .register(DEFAULT_SCRIPT_URL, RegistrationOptions::default(), config, fetcher)
            .await
            .unwrap();

        let page_url = page();
        let request = Request::get(page_url.join("/main.js").unwrap());
        assert!(container
            .handle_fetch(&page_url, request.clone())
            .await
            .is_passthrough());

        container.activate_waiting(scope.as_str()).await.unwrap();

        let outcome = container.handle_fetch(&page_url, request).await;
        assert!(outcome.response().unwrap().ok());
    }

    #[tokio::test]
    async fn test_handle_fetch_outside_scope() {
        let container = container();
        container
            .register(
                "/app/sw.js",
                RegistrationOptions::default(),
                config(1),
                ScriptedFetcher::new().respond("/main.js", 200, "x"),
            )
            .await
            .unwrap();

        let client = page().join("/blog/").unwrap();
        let request = Request::get(page().join("/main.js").unwrap());
        assert!(container.handle_fetch(&client, request).await.is_passthrough());
    }

    #[tokio::test]
    async fn test_container_unregister() {
        let container = container();
        let scope = container
            .register(DEFAULT_SCRIPT_URL, RegistrationOptions::default(), config(1), ScriptedFetcher::new())
            .await
            .unwrap();
        let worker = container.active_worker(scope.as_str()).await.unwrap();

        assert!(container.unregister(scope.as_str()).await);
        assert!(!container.unregister(scope.as_str()).await);
        assert!(container.get_registrations().await.is_empty());
        assert!(worker.record().await.is_redundant());
    }
}
