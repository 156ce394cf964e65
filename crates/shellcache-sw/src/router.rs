//! Per-request routing decision.

use shellcache_net::Request;

use crate::config::WorkerConfig;

/// Why a request was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    CrossOrigin,
    /// Neither a navigation nor a known static asset.
    Unclassified,
}

/// Policy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Pages and anything accepting HTML.
    NetworkFirst,
    /// Scripts, stylesheets, images, fonts.
    CacheFirst,
    Passthrough(PassthroughReason),
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::NetworkFirst => "network-first",
            Route::CacheFirst => "cache-first",
            Route::Passthrough(PassthroughReason::CrossOrigin) => "passthrough:cross-origin",
            Route::Passthrough(PassthroughReason::Unclassified) => "passthrough",
        }
    }
}

/// Pick the policy for `request`.
///
/// Only the origin, request mode, `Accept` header and path extension are
/// consulted, in that order.
pub fn classify(request: &Request, config: &WorkerConfig) -> Route {
    if request.url.origin() != config.origin.origin() {
        return Route::Passthrough(PassthroughReason::CrossOrigin);
    }

    if request.is_navigation() || request.accepts("text/html") {
        return Route::NetworkFirst;
    }

    if let Some(ext) = path_extension(request) {
        if config
            .static_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        {
            return Route::CacheFirst;
        }
    }

    Route::Passthrough(PassthroughReason::Unclassified)
}

/// Extension of the last path segment.
fn path_extension(request: &Request) -> Option<&str> {
    request
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}
