//! Worker configuration.
//!
//! One [`WorkerConfig`] describes a worker version: its cache namespace, the
//! app-shell manifest, the navigation fallback and the routing knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shellcache_common::{Result, ShellError};
use tracing::debug;
use url::Url;

/// Default script URL the page registers.
pub const DEFAULT_SCRIPT_URL: &str = "/sw.js";

/// Default registration scope.
pub const DEFAULT_SCOPE: &str = "/";

/// Extensions served cache-first when no list is configured.
pub const DEFAULT_STATIC_EXTENSIONS: &[&str] =
    &["js", "css", "png", "jpg", "jpeg", "webp", "svg", "woff", "woff2"];

const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 10_000;

/// What a navigation gets when both the network and its own cache entry fail.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationFallback {
    /// Synthetic network error.
    #[default]
    NetworkError,
    /// A cached page, by root-relative path (usually the home page).
    Page(String),
}

/// Configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Product identifier, first half of the cache name.
    pub product: String,

    /// Version ordinal, bumped on every deploy.
    pub version: u32,

    /// Origin of the controlled page.
    pub origin: Url,

    /// App-shell manifest fetched at install. Empty means lazy population.
    #[serde(default)]
    pub precache: Vec<String>,

    #[serde(default)]
    pub fallback: NavigationFallback,

    /// Path extensions routed cache-first, without the leading dot.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// Store successful, non-redirected navigation responses.
    #[serde(default)]
    pub cache_navigations: bool,

    /// Activate straight after install instead of waiting.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Per-request network timeout. `None` waits forever.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: Option<u64>,
}

fn default_static_extensions() -> Vec<String> {
    DEFAULT_STATIC_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_network_timeout_ms() -> Option<u64> {
    Some(DEFAULT_NETWORK_TIMEOUT_MS)
}

impl WorkerConfig {
    /// Start building a configuration.
    pub fn builder(product: impl Into<String>, version: u32, origin: Url) -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: WorkerConfig {
                product: product.into(),
                version,
                origin,
                precache: Vec::new(),
                fallback: NavigationFallback::default(),
                static_extensions: default_static_extensions(),
                cache_navigations: false,
                skip_waiting: true,
                network_timeout_ms: default_network_timeout_ms(),
            },
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), product = %config.product, version = config.version, "Loaded worker config");
        config.validated()
    }

    /// Cache generation name, `"<product>-v<N>"`.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.product, self.version)
    }

    /// Bucket for cache-first assets.
    pub fn static_cache_name(&self) -> String {
        format!("{}-static", self.cache_name())
    }

    /// Whether a stored bucket belongs to this version.
    ///
    /// Matches the generation name itself or `<name>-*`, so `app-v4` does not
    /// claim `app-v40`.
    pub fn owns_cache(&self, name: &str) -> bool {
        let current = self.cache_name();
        match name.strip_prefix(current.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('-'),
            None => false,
        }
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| ShellError::config_with_source(format!("bad path `{path}`"), e))
    }

    /// URLs fetched at install: the manifest, plus the fallback page when
    /// one is configured and the manifest does not already list it.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        let mut urls = self
            .precache
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>>>()?;
        if let NavigationFallback::Page(ref path) = self.fallback {
            let page = self.resolve(path)?;
            if !urls.contains(&page) {
                urls.push(page);
            }
        }
        Ok(urls)
    }

    fn validated(mut self) -> Result<Self> {
        if self.product.is_empty() || self.product.chars().any(char::is_whitespace) {
            return Err(ShellError::config(format!(
                "product `{}` must be non-empty without whitespace",
                self.product
            )));
        }
        if self.version == 0 {
            return Err(ShellError::config("version must start at 1"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
            return Err(ShellError::config(format!(
                "origin `{}` must be an http(s) URL with a host",
                self.origin
            )));
        }
        if let Some(path) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(ShellError::config(format!(
                "precache path `{path}` must be root-relative"
            )));
        }
        if let NavigationFallback::Page(ref path) = self.fallback {
            if !path.starts_with('/') {
                return Err(ShellError::config(format!(
                    "fallback page `{path}` must be root-relative"
                )));
            }
        }

        self.static_extensions = self
            .static_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(self)
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Set the app-shell manifest (eager install).
    pub fn precache<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallback(mut self, fallback: NavigationFallback) -> Self {
        self.config.fallback = fallback;
        self
    }

    pub fn static_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.static_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache_navigations(mut self, enabled: bool) -> Self {
        self.config.cache_navigations = enabled;
        self
    }

    pub fn skip_waiting(mut self, enabled: bool) -> Self {
        self.config.skip_waiting = enabled;
        self
    }

    pub fn network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.network_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<WorkerConfig> {
        self.config.validated()
    }
}
