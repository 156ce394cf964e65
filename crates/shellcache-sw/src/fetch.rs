//! Responses handed back to the controlled page.

use hashbrown::HashMap;
use http::HeaderMap;
use shellcache_net::Response;
use url::Url;

use crate::cache::CacheEntry;

/// Response type, as the page sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Basic,
    /// Network error; status 0, empty body.
    Error,
}

/// Fetch event response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response URL, `None` for synthetic errors.
    pub url: Option<Url>,

    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether redirects were followed to produce this response.
    pub redirected: bool,

    /// Whether from cache.
    pub from_cache: bool,

    pub response_type: ResponseType,
}

impl FetchResponse {
    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            url: None,
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            redirected: false,
            from_cache: false,
            response_type: ResponseType::Error,
        }
    }

    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            url: Url::parse(&entry.url).ok(),
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            redirected: false,
            from_cache: true,
            response_type: ResponseType::Basic,
        }
    }

    /// Create a response from a network response.
    pub fn from_network(response: Response) -> Self {
        Self {
            status: response.status.as_u16(),
            status_text: response
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers: flatten_headers(&response.headers),
            body: response.body.to_vec(),
            redirected: response.redirected,
            url: Some(response.url),
            from_cache: false,
            response_type: ResponseType::Basic,
        }
    }

    /// Copy of this response with the redirect flag cleared.
    ///
    /// Some engines refuse a redirected response for a navigation.
    pub fn into_clean(mut self) -> Self {
        self.redirected = false;
        self
    }

    /// Status in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }
}

/// Result of dispatching a fetch event to the worker.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker answered.
    Respond(FetchResponse),
    /// The worker declined; the request proceeds as if uncontrolled.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

/// Collapse a header map into one value per name, joining repeats with `", "`.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}
