//! Network-first and cache-first handlers.
//!
//! Both take a [`StrategyContext`] carrying the configuration, storage and
//! transport, so each call is independent of any worker instance. Neither
//! holds the storage lock across a network call.

use shellcache_common::{with_timeout, ShellError};
use shellcache_net::{CacheMode, Fetcher, RedirectMode, Request};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::config::{NavigationFallback, WorkerConfig};
use crate::fetch::FetchResponse;

/// Everything a strategy needs for one request.
pub struct StrategyContext<'a, F: ?Sized> {
    pub config: &'a WorkerConfig,
    pub caches: &'a RwLock<CacheStorage>,
    pub fetcher: &'a F,
}

impl<F: Fetcher + ?Sized> StrategyContext<'_, F> {
    /// One network attempt, raced against the configured timeout.
    pub(crate) async fn fetch(&self, request: Request) -> Result<FetchResponse, ShellError> {
        let url = request.url.clone();
        let result = with_timeout(self.config.network_timeout(), self.fetcher.fetch(request))
            .await
            .and_then(|r| r.map_err(ShellError::from));

        match result {
            Ok(response) => Ok(FetchResponse::from_network(response)),
            Err(err) => {
                warn!(url = %url, category = err.category(), error = %err, "Network fetch failed");
                Err(err)
            }
        }
    }
}

/// Prefer the network; fall back to the cache, then the configured fallback.
pub async fn network_first<F: Fetcher + ?Sized>(
    ctx: &StrategyContext<'_, F>,
    request: &Request,
) -> FetchResponse {
    let network_request = request
        .clone()
        .cache(CacheMode::NoStore)
        .redirect(RedirectMode::Follow);

    match ctx.fetch(network_request).await {
        Ok(response) if response.redirected => {
            debug!(url = %request.url, final_url = ?response.url, "Serving clean copy of redirected navigation");
            response.into_clean()
        }
        Ok(response) => {
            if ctx.config.cache_navigations && response.ok() {
                let cache_name = ctx.config.cache_name();
                ctx.caches
                    .write()
                    .await
                    .open(&cache_name)
                    .put(request, &response);
            }
            response
        }
        Err(err) if err.is_network_failure() => offline_navigation(ctx, request).await,
        Err(_) => FetchResponse::network_error(),
    }
}

async fn offline_navigation<F: Fetcher + ?Sized>(
    ctx: &StrategyContext<'_, F>,
    request: &Request,
) -> FetchResponse {
    let caches = ctx.caches.read().await;

    if let Some(entry) = caches.match_request(request) {
        debug!(url = %request.url, "Network down, serving cached page");
        return FetchResponse::from_cache(entry);
    }

    if let NavigationFallback::Page(ref path) = ctx.config.fallback {
        match ctx.config.resolve(path) {
            Ok(url) => {
                if let Some(entry) = caches.match_url(&url) {
                    debug!(url = %request.url, fallback = %url, "Network down, serving fallback page");
                    return FetchResponse::from_cache(entry);
                }
            }
            Err(err) => warn!(error = %err, "Unusable fallback page"),
        }
    }

    debug!(url = %request.url, "Network down and nothing cached");
    FetchResponse::network_error()
}

/// Prefer the cache; on a miss fetch once and store a copy of good responses.
pub async fn cache_first<F: Fetcher + ?Sized>(
    ctx: &StrategyContext<'_, F>,
    request: &Request,
) -> FetchResponse {
    if let Some(entry) = ctx.caches.read().await.match_request(request) {
        debug!(url = %request.url, "Cache hit");
        return FetchResponse::from_cache(entry);
    }

    let response = match ctx.fetch(request.clone()).await {
        Ok(response) => response,
        Err(_) => return FetchResponse::network_error(),
    };

    if !response.redirected && response.ok() {
        let cache_name = ctx.config.static_cache_name();
        ctx.caches
            .write()
            .await
            .open(&cache_name)
            .put(request, &response);
    } else {
        debug!(
            url = %request.url,
            status = response.status,
            redirected = response.redirected,
            "Not caching asset response"
        );
    }

    response
}
