//! Test utilities for the engine client
//!
//! [`FakeEngine`] is a scripted HTTP/1.1 server listening on a unix socket in
//! a temporary directory. Routes map a method and path (query ignored) to one
//! or more canned [`FakeResponse`]s; every request is recorded so tests can
//! assert on what the client actually sent.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use dockwatch_core::{Backend, ResolvedEndpoint};

use crate::socket::EndpointSlot;

// ---------------------------------------------------------------------------
// Sample bodies
// ---------------------------------------------------------------------------

pub const SAMPLE_CONTAINERS: &str = r#"[
  {"Id": "aaaaaaaaaaaa1111", "Names": ["/web"], "Image": "nginx:1.25", "State": "running",
   "Status": "Up 5 minutes", "Created": 1700000000,
   "Ports": [{"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"},
             {"IP": "::", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}],
   "Labels": {"com.docker.compose.project": "shop"}},
  {"Id": "bbbbbbbbbbbb2222", "Names": ["/worker"], "Image": "worker:dev", "State": "exited",
   "Status": "Exited (1) 3 minutes ago", "Created": 1700000100, "Ports": [], "Labels": {}}
]"#;

pub const SAMPLE_IMAGES: &str = r#"[
  {"Id": "sha256:1111222233334444", "RepoTags": ["nginx:1.25"], "Size": 187000000, "Created": 1690000000, "Containers": 1}
]"#;

pub const SAMPLE_VOLUMES: &str = r#"{"Volumes": [
  {"Name": "pgdata", "Driver": "local", "Mountpoint": "/var/lib/docker/volumes/pgdata/_data",
   "CreatedAt": "2024-05-01T12:00:00Z", "Scope": "local", "Labels": null}
], "Warnings": null}"#;

pub const SAMPLE_NETWORKS: &str = r#"[
  {"Name": "bridge", "Id": "net1", "Created": "2024-05-01T12:00:00Z", "Scope": "local", "Driver": "bridge", "Internal": false},
  {"Name": "shop_default", "Id": "net2", "Created": "2024-05-02T12:00:00Z", "Scope": "local", "Driver": "bridge", "Internal": false}
]"#;

pub const SAMPLE_INFO: &str = r#"{"Name": "colima", "ServerVersion": "25.0.3", "OperatingSystem": "Ubuntu 24.04",
  "Architecture": "aarch64", "NCPU": 4, "MemTotal": 8589934592, "Containers": 2,
  "ContainersRunning": 1, "ContainersStopped": 1, "Images": 1}"#;

pub const SAMPLE_VERSION: &str =
    r#"{"Version": "25.0.3", "ApiVersion": "1.44", "Os": "linux", "Arch": "arm64", "GoVersion": "go1.21.6"}"#;

/// Build one multiplexed log frame.
pub fn log_frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A canned response.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<Vec<u8>>,
    chunked: bool,
    delay: Duration,
    chunk_delay: Duration,
    hold_open: bool,
}

impl FakeResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self::with_body(status, "application/json", body.as_bytes().to_vec())
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::with_body(status, "text/plain", body.as_bytes().to_vec())
    }

    pub fn empty(status: u16) -> Self {
        Self::with_body(status, "text/plain", Vec::new())
    }

    /// A chunked body, one HTTP chunk per entry.
    pub fn chunked(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "application/vnd.docker.multiplexed-stream",
            body: chunks,
            chunked: true,
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    /// Wait before sending the response head.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wait between chunks of a chunked body.
    pub fn paced(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Keep a chunked body open after the last chunk until the client hangs up.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn with_body(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body: vec![body],
            chunked: false,
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            hold_open: false,
        }
    }
}

/// A request as received by the fake engine.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Route {
    method: String,
    path: String,
    responses: VecDeque<FakeResponse>,
}

#[derive(Default)]
struct Shared {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    hangups: AtomicUsize,
}

impl Shared {
    fn respond_to(&self, method: &str, path: &str) -> FakeResponse {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes
            .iter_mut()
            .rev()
            .find(|r| r.method == method && r.path == path);

        match route {
            Some(route) if route.responses.len() > 1 => {
                route.responses.pop_front().unwrap_or_else(|| FakeResponse::empty(500))
            }
            Some(route) => route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| FakeResponse::empty(500)),
            None => FakeResponse::json(404, r#"{"message":"page not found"}"#),
        }
    }
}

/// Scripted Engine API server on a temporary unix socket.
pub struct FakeEngine {
    _dir: TempDir,
    socket_path: PathBuf,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl FakeEngine {
    /// Bind a fresh socket and start accepting connections.
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir for fake engine");
        let socket_path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind fake engine socket");
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, Arc::clone(&accept_shared)));
            }
        });

        Self {
            _dir: dir,
            socket_path,
            shared,
            accept_task,
        }
    }

    /// A fake engine serving the `SAMPLE_*` bodies on the usual read endpoints.
    pub async fn with_sample_data() -> Self {
        let engine = Self::start().await;
        engine.route("GET", "/_ping", FakeResponse::text(200, "OK"));
        engine.route("GET", "/info", FakeResponse::json(200, SAMPLE_INFO));
        engine.route("GET", "/version", FakeResponse::json(200, SAMPLE_VERSION));
        engine.route("GET", "/containers/json", FakeResponse::json(200, SAMPLE_CONTAINERS));
        engine.route("GET", "/images/json", FakeResponse::json(200, SAMPLE_IMAGES));
        engine.route("GET", "/volumes", FakeResponse::json(200, SAMPLE_VOLUMES));
        engine.route("GET", "/networks", FakeResponse::json(200, SAMPLE_NETWORKS));
        engine
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// An endpoint slot already pointing at this engine.
    pub fn endpoint(&self) -> EndpointSlot {
        EndpointSlot::fixed(ResolvedEndpoint {
            backend: Backend::Docker,
            socket_path: self.socket_path.clone(),
        })
    }

    /// Serve `response` for every request to `method path`.
    pub fn route(&self, method: &str, path: &str, response: FakeResponse) {
        self.route_sequence(method, path, vec![response]);
    }

    /// Serve `responses` in order; the last one repeats.
    pub fn route_sequence(&self, method: &str, path: &str, responses: Vec<FakeResponse>) {
        let mut routes = self.shared.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.retain(|r| !(r.method == method && r.path == path));
        routes.push(Route {
            method: method.to_string(),
            path: path.to_string(),
            responses: responses.into(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Requests whose path (without query) equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }

    /// Number of held-open responses whose client has hung up.
    pub fn hangups(&self) -> usize {
        self.shared.hangups.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` held-open responses were closed by the client.
    pub async fn wait_for_closed(
        &self,
        count: usize,
        limit: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(limit, async {
            while self.hangups() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }

    /// Wait until at least `count` requests to `path` have been received.
    pub async fn wait_for_requests(
        &self,
        path: &str,
        count: usize,
        limit: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(limit, async {
            while self.requests_to(path).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(mut stream: UnixStream, shared: Arc<Shared>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let response = shared.respond_to(&request.method, request.path());
    shared
        .requests
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(request);

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    if write_response(&mut stream, &response).await.is_err() {
        return;
    }

    if response.hold_open {
        let mut scratch = [0u8; 256];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        shared.hangups.fetch_add(1, Ordering::SeqCst);
    } else {
        let _ = stream.shutdown().await;
    }
}

async fn read_request(stream: &mut UnixStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&scratch[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: BTreeMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&scratch[..n]);
    }
    body.truncate(content_length);

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}

async fn write_response(stream: &mut UnixStream, response: &FakeResponse) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\n",
        response.status,
        reason(response.status),
        response.content_type
    );

    if !response.chunked {
        let body: Vec<u8> = response.body.concat();
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&body).await?;
        return stream.flush().await;
    }

    head.push_str("Transfer-Encoding: chunked\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;

    for (i, chunk) in response.body.iter().enumerate() {
        if i > 0 && !response.chunk_delay.is_zero() {
            tokio::time::sleep(response.chunk_delay).await;
        }
        if chunk.is_empty() {
            continue;
        }
        stream
            .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
            .await?;
        stream.write_all(chunk).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
    }

    if !response.hold_open {
        stream.write_all(b"0\r\n\r\n").await?;
        stream.flush().await?;
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
