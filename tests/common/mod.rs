//! In-process origin server and remux doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archiver_core::download::RetryPolicy;
use archiver_core::{ArchiveError, EngineConfig, FetchClient, PermitPool, Remuxer, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;

/// A file the origin serves
#[derive(Debug, Clone)]
pub struct Resource {
    pub body: Vec<u8>,
    pub accepts_ranges: bool,
    /// The first GET sends this many bytes, then breaks the connection
    pub fail_first_get_after: Option<usize>,
    /// Every GET answers with this status
    pub get_status: Option<StatusCode>,
    /// Wait before answering a GET
    pub delay: Option<Duration>,
}

impl Resource {
    pub fn ranged(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            accepts_ranges: true,
            fail_first_get_after: None,
            get_status: None,
            delay: None,
        }
    }

    pub fn plain(body: impl Into<Vec<u8>>) -> Self {
        Self {
            accepts_ranges: false,
            ..Self::ranged(body)
        }
    }

    pub fn failing_first_get_after(mut self, bytes: usize) -> Self {
        self.fail_first_get_after = Some(bytes);
        self
    }

    pub fn with_get_status(mut self, status: StatusCode) -> Self {
        self.get_status = Some(status);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub method: Method,
    pub path: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct OriginState {
    resources: Mutex<HashMap<String, Resource>>,
    requests: Mutex<Vec<RequestRecord>>,
    gets_in_flight: AtomicUsize,
    peak_gets_in_flight: AtomicUsize,
}

/// Counts a GET as in flight until the handler returns
struct InFlight<'a>(&'a OriginState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a OriginState) -> Self {
        let now = state.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_gets_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.gets_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test origin bound to an ephemeral localhost port
pub struct Origin {
    addr: SocketAddr,
    state: Arc<OriginState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Origin {
    pub async fn start() -> Self {
        let state = Arc::new(OriginState::default());
        let app = Router::new().fallback(serve).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn add(&self, path: &str, resource: Resource) {
        self.state
            .resources
            .lock()
            .unwrap()
            .insert(path.to_string(), resource);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Most GETs the origin was answering at the same time
    pub fn peak_gets_in_flight(&self) -> usize {
        self.state.peak_gets_in_flight.load(Ordering::SeqCst)
    }

    /// Range headers of the GETs for `path`, in arrival order
    pub fn ranges(&self, path: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::GET && r.path == path)
            .map(|r| r.range)
            .collect()
    }
}

async fn serve(State(state): State<Arc<OriginState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let range = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let prior_gets = {
        let mut requests = state.requests.lock().unwrap();
        let prior = requests
            .iter()
            .filter(|r| r.method == Method::GET && r.path == path)
            .count();
        requests.push(RequestRecord {
            method: method.clone(),
            path: path.clone(),
            range: range.clone(),
        });
        prior
    };

    let known = {
        let resources = state.resources.lock().unwrap();
        resources.get(&path).cloned()
    };
    let resource = match known {
        Some(resource) => resource,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    let total = resource.body.len();

    if method == Method::HEAD {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total.to_string());
        if resource.accepts_ranges {
            builder = builder.header(header::ACCEPT_RANGES, "bytes");
        }
        return builder.body(Body::empty()).unwrap();
    }

    let _in_flight = InFlight::enter(&state);

    if let Some(delay) = resource.delay {
        tokio::time::sleep(delay).await;
    }

    if let Some(status) = resource.get_status {
        return status.into_response();
    }

    let (status, start, end) = match (resource.accepts_ranges, range.as_deref().and_then(parse_range)) {
        (true, Some((start, _))) if start >= total => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", total))
                .body(Body::empty())
                .unwrap();
        }
        (true, Some((start, end))) => {
            let end = end.unwrap_or(total - 1).min(total - 1);
            (StatusCode::PARTIAL_CONTENT, start, end)
        }
        _ => (StatusCode::OK, 0, total.saturating_sub(1)),
    };

    let slice = if total == 0 {
        Vec::new()
    } else {
        resource.body[start..=end].to_vec()
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, slice.len().to_string());
    if resource.accepts_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, total),
        );
    }

    match resource.fail_first_get_after {
        Some(cut) if prior_gets == 0 && cut < slice.len() => {
            let head = Bytes::copy_from_slice(&slice[..cut]);
            let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
                Ok(head),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "injected failure",
                )),
            ];
            // the pause lets the first chunk reach the socket before the break
            let stream = futures_util::stream::iter(chunks).then(|item| async move {
                if item.is_err() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                item
            });
            builder.body(Body::from_stream(stream)).unwrap()
        }
        _ => builder.body(Body::from(slice)).unwrap(),
    }
}

/// `bytes=START-` or `bytes=START-END`
fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let rest = value.strip_prefix("bytes=")?;
    let (start, end) = rest.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((start, end))
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

pub fn test_config(capacity: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_requests: capacity,
        probe_timeout: Duration::from_secs(5),
        probe_retries: 1,
        ..EngineConfig::default()
    }
}

/// Client with no proxy and immediate retries
pub fn test_client(capacity: usize) -> FetchClient {
    let config = test_config(capacity);
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    FetchClient::with_client(client, &config, PermitPool::new(capacity))
        .with_retry_policy(RetryPolicy::immediate(Some(5)))
}

/// Stream-copies the concatenated input to the output
pub struct CopyRemuxer;

#[async_trait]
impl Remuxer for CopyRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Writes a partial output and then reports failure
pub struct FailingRemuxer;

#[async_trait]
impl Remuxer for FailingRemuxer {
    async fn remux(&self, _input: &Path, output: &Path) -> Result<()> {
        tokio::fs::write(output, b"truncated moov").await?;
        Err(ArchiveError::RemuxFailed(
            "ffmpeg exited with exit status: 1: Invalid data found when processing input".to_string(),
        ))
    }
}

/// Writes part of its output and never returns
pub struct HangingRemuxer;

#[async_trait]
impl Remuxer for HangingRemuxer {
    async fn remux(&self, _input: &Path, output: &Path) -> Result<()> {
        tokio::fs::write(output, b"half-written mp4").await?;
        std::future::pending::<()>().await;
        Ok(())
    }
}
