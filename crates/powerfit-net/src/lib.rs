//! # PowerFit Net
//!
//! Request/response model and network access for the PowerFit offline shell.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped model**: requests carry a destination and mode, responses a type
//!    (`basic`, `cors`, `opaque`) so callers can decide what is safe to cache
//! 2. **Pluggable network**: everything goes through the [`Fetcher`] trait
//! 3. **Cheap clones**: bodies are [`Bytes`], so a response can be stored and returned

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;

pub use url::Url;

pub mod loader;
pub mod site;

pub use loader::{HttpFetcher, LoaderConfig};
pub use site::SiteDirFetcher;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable")]
    Offline,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
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

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// Top-level document navigation.
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR style calls.
    #[default]
    Empty,
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub mode: RequestMode,
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
            destination: Destination::Empty,
            mode: RequestMode::SameOrigin,
            timeout: None,
        }
    }

    /// Create a top-level document navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this request loads a full document.
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }
}

/// Response type, as observed by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response with full access.
    #[default]
    Basic,
    /// Cross-origin response shared via CORS.
    Cors,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
    /// Redirect captured with `redirect: "manual"`.
    OpaqueRedirect,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    #[default]
    Network,
    Cache,
}

/// HTTP response with a fully loaded body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Whether the final URL differs from the requested one.
    pub redirected: bool,
    pub source: ResponseSource,
    body: Bytes,
}

impl Response {
    /// Create a basic network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            response_type: ResponseType::Basic,
            redirected: false,
            source: ResponseSource::Network,
            body,
        }
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Mark the response as the result of a redirect.
    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Mark where the response came from.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the response was served from a cache.
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. `Err` means the network could not produce a response at all;
    /// HTTP error statuses are `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resolve a site-relative path (or absolute URL) against an origin.
pub fn resolve(origin: &Url, path: &str) -> Result<Url, NetError> {
    origin
        .join(path)
        .map_err(|e| NetError::InvalidUrl(format!("{}: {}", path, e)))
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
