//! Caching strategies.

use std::fmt;

use http::StatusCode;
use powerfit_net::{Response, ResponseType};
use serde::{Deserialize, Serialize};

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Cache first, then network; navigations fall back to the cached shell page
    /// when the network fails.
    #[default]
    OfflineFirst,
    /// Cache first, then network. No fallback.
    CacheFirst,
    /// Network first, then cache.
    NetworkFirst,
    /// Cached copy if present, otherwise the network; the cache is refreshed in the
    /// background either way.
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::OfflineFirst => "offline-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a network response may be written to the cache.
///
/// Only a plain `200` that came straight from the origin qualifies: no opaque or CORS
/// responses, no redirects.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK
        && response.response_type == ResponseType::Basic
        && !response.redirected
}
