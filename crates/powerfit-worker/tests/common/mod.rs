//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use powerfit_net::{Fetcher, NetError, Request, Response, ResponseType, Url};
use powerfit_outbox::Outbox;
use powerfit_worker::{InstallRetryConfig, ShellWorker, WorkerConfig, WorkerEvent};
use tokio::sync::mpsc::UnboundedReceiver;

pub const ORIGIN: &str = "https://powerfit.example/";

#[derive(Clone)]
struct Page {
    status: StatusCode,
    body: Bytes,
    response_type: ResponseType,
    redirected: bool,
    /// Remaining attempts that fail before the page is served.
    failures: u32,
    /// Time the network takes to answer.
    latency: Option<Duration>,
}

/// An in-memory site that records every request it sees.
pub struct ScriptedSite {
    pages: Mutex<HashMap<String, Page>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// The default shell, every asset answering with its own path as body.
    pub fn with_shell() -> Arc<Self> {
        let site = Self::new();
        for path in WorkerConfig::default().shell_manifest {
            let body = format!("shell:{}", path);
            site.serve(&path, 200, body.as_bytes());
        }
        site
    }

    pub fn serve(&self, path: &str, status: u16, body: &[u8]) {
        self.insert(
            path,
            Page {
                status: StatusCode::from_u16(status).unwrap(),
                body: Bytes::copy_from_slice(body),
                response_type: ResponseType::Basic,
                redirected: false,
                failures: 0,
                latency: None,
            },
        );
    }

    pub fn serve_opaque(&self, path: &str, body: &[u8]) {
        self.serve(path, 200, body);
        self.pages.lock().unwrap().get_mut(path).unwrap().response_type = ResponseType::Opaque;
    }

    pub fn serve_redirected(&self, path: &str, body: &[u8]) {
        self.serve(path, 200, body);
        self.pages.lock().unwrap().get_mut(path).unwrap().redirected = true;
    }

    /// Make the next `times` requests for `path` fail at the network level.
    pub fn fail_next(&self, path: &str, times: u32) {
        self.pages.lock().unwrap().get_mut(path).unwrap().failures = times;
    }

    /// Answer `path` only after `latency` has passed.
    pub fn serve_slowly(&self, path: &str, body: &[u8], latency: Duration) {
        self.serve(path, 200, body);
        self.pages.lock().unwrap().get_mut(path).unwrap().latency = Some(latency);
    }

    pub fn remove(&self, path: &str) {
        self.pages.lock().unwrap().remove(path);
    }

    fn insert(&self, path: &str, page: Page) {
        self.pages.lock().unwrap().insert(path.to_string(), page);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedSite {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        let latency = self.pages.lock().unwrap().get(&path).and_then(|p| p.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let page = {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(&path) {
                Some(page) if page.failures > 0 => {
                    page.failures -= 1;
                    return Err(NetError::RequestFailed(format!("flaky {}", path)));
                }
                Some(page) => page.clone(),
                None => {
                    return Ok(Response::new(
                        request.url.clone(),
                        StatusCode::NOT_FOUND,
                        HeaderMap::new(),
                        Bytes::new(),
                    ))
                }
            }
        };

        Ok(Response::new(request.url.clone(), page.status, HeaderMap::new(), page.body)
            .with_type(page.response_type)
            .with_redirected(page.redirected))
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config() -> WorkerConfig {
    WorkerConfig {
        origin: Url::parse(ORIGIN).unwrap(),
        install_retry: InstallRetryConfig {
            max_attempts: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..WorkerConfig::default()
    }
}

pub fn worker(site: Arc<ScriptedSite>) -> (ShellWorker, UnboundedReceiver<WorkerEvent>) {
    worker_with(config(), site)
}

pub fn worker_with(
    config: WorkerConfig,
    site: Arc<ScriptedSite>,
) -> (ShellWorker, UnboundedReceiver<WorkerEvent>) {
    ShellWorker::builder(config)
        .fetcher(site)
        .outbox(Arc::new(Outbox::open_in_memory().unwrap()))
        .build()
        .unwrap()
}

/// Everything currently queued on the host channel.
pub fn drain_events(rx: &mut UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
