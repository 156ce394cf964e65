//! Cache generations and the storage that holds them.

use std::path::Path;

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use shellcache_common::{Result, ShellError};
use shellcache_net::Request;
use tracing::{debug, trace};
use url::Url;

use crate::fetch::FetchResponse;

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    #[serde(default)]
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// Lookup key: the URL without its fragment.
fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One named cache generation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only `GET` requests ever match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.match_url(&request.url)
    }

    /// Match by URL.
    pub fn match_url(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(url))
    }

    /// Store a response for a request.
    ///
    /// Returns `false` without touching the cache when the response must not
    /// be persisted: redirected, network errors, partial content, or a
    /// non-`GET` request.
    pub fn put(&mut self, request: &Request, response: &FetchResponse) -> bool {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Not caching non-GET request");
            return false;
        }
        if response.redirected {
            debug!(url = %request.url, cache = %self.name, "Refusing to cache redirected response");
            return false;
        }
        if response.is_network_error() || response.status == 206 {
            trace!(url = %request.url, status = response.status, "Not caching response");
            return false;
        }

        let key = cache_key(&request.url);
        let entry = CacheEntry {
            url: key.clone(),
            method: Method::GET.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        };
        trace!(url = %key, cache = %self.name, bytes = entry.body.len(), "Cached response");
        self.entries.insert(key, entry);
        true
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// Get all keys (URLs), sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (the `caches` global).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Match across all caches, in name order.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.keys()
            .into_iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(request))
    }

    /// Match a URL across all caches, in name order.
    pub fn match_url(&self, url: &Url) -> Option<&CacheEntry> {
        self.keys()
            .into_iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_url(url))
    }

    /// Restore a snapshot, or empty storage if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No cache snapshot, starting empty");
            return Ok(Self::new());
        }
        let raw = std::fs::read(path)?;
        let storage: CacheStorage = serde_json::from_slice(&raw).map_err(|e| {
            ShellError::cache_with_source(format!("corrupt snapshot {}", path.display()), e)
        })?;
        debug!(path = %path.display(), caches = storage.caches.len(), "Loaded cache snapshot");
        Ok(storage)
    }

    /// Write a snapshot, replacing any previous one.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), caches = self.caches.len(), "Saved cache snapshot");
        Ok(())
    }
}
