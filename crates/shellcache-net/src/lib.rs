//! # Shellcache Net
//!
//! Request/response model and HTTP fetching for the shellcache worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped requests**: mode, cache mode and redirect mode travel
//!    with the request, the way a page issues them
//! 2. **Redirect visibility**: every response records whether redirects were
//!    followed to produce it
//! 3. **Swappable transport**: the worker only sees the [`Fetcher`] trait

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use shellcache_common::ShellError;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{FetcherConfig, HttpFetcher};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Redirect not allowed for {0}")]
    RedirectNotAllowed(Url),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ShellError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Timeout(limit) => ShellError::Timeout(limit),
            NetError::InvalidUrl(url) => ShellError::InvalidArgument(url),
            other => ShellError::network_with_source("fetch failed", other),
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as set by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// How the transport should treat its own HTTP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Bypass transport caches entirely.
    NoStore,
    /// Revalidate with the origin, ignoring stored copies.
    Reload,
}

/// What to do when the server answers with a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    /// Fail the request.
    Error,
    /// Hand the redirect response back untouched.
    Manual,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub cache: CacheMode,
    pub redirect: RedirectMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            cache: CacheMode::default(),
            redirect: RedirectMode::default(),
            timeout: None,
        }
    }

    /// Create a navigation request for a document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .mode(RequestMode::Navigate)
            .header(
                header::ACCEPT,
                HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
            )
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the cache mode.
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Set the redirect mode.
    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether the `Accept` header mentions `mime`.
    pub fn accepts(&self, mime: &str) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(mime))
    }

    /// Whether this request is a navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    /// Final URL, after any redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Whether one or more redirects were followed to produce this response.
    pub redirected: bool,
    pub body: Bytes,
}

impl Response {
    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Transport used by the worker to reach the network.
pub trait Fetcher: Send + Sync {
    /// Perform a single request. No retries.
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}

impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        (**self).fetch(request)
    }
}
