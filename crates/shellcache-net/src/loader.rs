//! reqwest-backed [`Fetcher`].

use std::time::Duration;

use futures::future::BoxFuture;
use http::{header, HeaderValue};
use reqwest::{redirect, Client};
use tracing::{debug, info, trace};
use url::{Position, Url};

use crate::{CacheMode, Fetcher, NetError, RedirectMode, Request, Response};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Timeout applied when the request carries none.
    pub default_timeout: Duration,
    /// Maximum redirects followed in [`RedirectMode::Follow`].
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellcache/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// HTTP fetcher for live network access.
///
/// Holds two clients since reqwest fixes the redirect policy per client.
pub struct HttpFetcher {
    following: Client,
    manual: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, NetError> {
        let following = Self::client(&config, redirect::Policy::limited(config.max_redirects))?;
        let manual = Self::client(&config, redirect::Policy::none())?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self {
            following,
            manual,
            config,
        })
    }

    fn client(config: &FetcherConfig, policy: redirect::Policy) -> Result<Client, NetError> {
        Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(policy)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    async fn execute(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let client = match request.redirect {
            RedirectMode::Follow => &self.following,
            RedirectMode::Error | RedirectMode::Manual => &self.manual,
        };

        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if !request.headers.contains_key(header::ACCEPT_LANGUAGE) {
            req_builder = req_builder.header(header::ACCEPT_LANGUAGE, &self.config.accept_language);
        }

        // Same request headers a browser sends for these cache modes.
        if matches!(request.cache, CacheMode::NoStore | CacheMode::Reload) {
            req_builder = req_builder
                .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(header::PRAGMA, HeaderValue::from_static("no-cache"));
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        if request.redirect == RedirectMode::Error && status.is_redirection() {
            return Err(NetError::RedirectNotAllowed(request.url));
        }

        let url = response.url().clone();
        let redirected = !same_resource(&url, &request.url);
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            request_id: request.id,
            url,
            status,
            headers,
            redirected,
            body,
        })
    }
}

/// Equal apart from the fragment, which never reaches the server.
fn same_resource(a: &Url, b: &Url) -> bool {
    a[..Position::AfterQuery] == b[..Position::AfterQuery]
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(self.execute(request))
    }
}
