//! Serves a site from a local directory as if it were the origin.
//!
//! Used by the shell harness to drive the worker without a web server, and to
//! simulate losing connectivity.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::{same_origin, Fetcher, NetError, Request, Response, ResponseType};

/// A [`Fetcher`] backed by a directory on disk.
pub struct SiteDirFetcher {
    root: PathBuf,
    origin: Url,
    online: AtomicBool,
}

impl SiteDirFetcher {
    /// Serve `root` under `origin`.
    pub fn new(root: impl Into<PathBuf>, origin: Url) -> Self {
        Self {
            root: root.into(),
            origin,
            online: AtomicBool::new(true),
        }
    }

    /// Toggle simulated connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Map a URL path onto a file below the root. `None` for paths escaping it.
    fn file_for(&self, url_path: &str) -> Option<PathBuf> {
        let relative = url_path.trim_start_matches('/');
        let relative = if relative.is_empty() || relative.ends_with('/') {
            format!("{}index.html", relative)
        } else {
            relative.to_string()
        };

        let candidate = Path::new(&relative);
        if candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(candidate))
    }

    fn status_only(url: Url, status: StatusCode) -> Response {
        Response::new(url, status, HeaderMap::new(), Bytes::new())
    }
}

#[async_trait]
impl Fetcher for SiteDirFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !self.is_online() {
            debug!(url = %request.url, "Simulated offline");
            return Err(NetError::Offline);
        }

        if !same_origin(&self.origin, &request.url) {
            return Err(NetError::RequestFailed(format!(
                "{} is outside {}",
                request.url,
                self.origin.origin().ascii_serialization()
            )));
        }

        if request.method != Method::GET && request.method != Method::HEAD {
            return Ok(Self::status_only(
                request.url.clone(),
                StatusCode::METHOD_NOT_ALLOWED,
            ));
        }

        let Some(path) = self.file_for(request.url.path()) else {
            return Ok(Self::status_only(request.url.clone(), StatusCode::FORBIDDEN));
        };

        let body = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %path.display(), "No such file");
                return Ok(Self::status_only(request.url.clone(), StatusCode::NOT_FOUND));
            }
            Err(e) => return Err(e.into()),
        };

        let mut headers = HeaderMap::new();
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        let body = if request.method == Method::HEAD {
            Bytes::new()
        } else {
            body
        };

        Ok(Response::new(request.url.clone(), StatusCode::OK, headers, body)
            .with_type(ResponseType::Basic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Destination;

    fn site() -> (tempfile::TempDir, SiteDirFetcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>PowerFit</h1>").unwrap();
        std::fs::write(dir.path().join("styles.css"), "body{}").unwrap();
        let origin = Url::parse("https://powerfit.example/").unwrap();
        let fetcher = SiteDirFetcher::new(dir.path(), origin);
        (dir, fetcher)
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse("https://powerfit.example/").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let (_dir, fetcher) = site();
        let response = fetcher.fetch(&get("/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"<h1>PowerFit</h1>");
        assert_eq!(response.content_type(), Some(mime::TEXT_HTML));
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (_dir, fetcher) = site();
        let response = fetcher
            .fetch(&get("/nope.js").destination(Destination::Script))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_offline_is_error() {
        let (_dir, fetcher) = site();
        fetcher.set_online(false);
        assert!(matches!(
            fetcher.fetch(&get("/styles.css")).await,
            Err(NetError::Offline)
        ));
        fetcher.set_online(true);
        assert!(fetcher.fetch(&get("/styles.css")).await.is_ok());
    }

    #[tokio::test]
    async fn test_cross_origin_is_error() {
        let (_dir, fetcher) = site();
        let request = Request::get(Url::parse("https://cdn.example/lib.js").unwrap());
        assert!(fetcher.fetch(&request).await.is_err());
    }

    #[test]
    fn test_path_escape_is_rejected() {
        let (_dir, fetcher) = site();
        assert!(fetcher.file_for("/../secret").is_none());
        assert!(fetcher.file_for("/icons/icon.png").is_some());
    }
}
