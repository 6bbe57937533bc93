//! HTTP/1.1 client for the Engine API over a unix socket.
//!
//! Every call reads the [`EndpointSlot`] at call time, opens a fresh
//! connection to that socket and sends one request with `Host: localhost`.
//! There is no pooling: a connection lives exactly as long as its exchange.
//!
//! ## Timeouts
//!
//! - Connecting to the socket is bounded by [`CONNECT_TIMEOUT`].
//! - A buffered exchange (connect, send, read the whole body) is bounded by
//!   [`REQUEST_TIMEOUT`].
//! - Streaming exchanges have no total timeout; they end when the Engine
//!   closes the body or the caller drops the [`ByteStream`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use dockwatch_core::prelude::*;

use crate::decode::engine_error_message;
use crate::socket::EndpointSlot;

/// Upper bound on establishing the socket connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on a complete buffered exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A fully buffered Engine response.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: u16,
    pub body: Bytes,
}

impl EngineResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Body of a successful response, or an [`Error::Http`] carrying the
    /// Engine's message.
    pub fn into_result(self) -> Result<Bytes> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(Error::http(
                self.status,
                engine_error_message(self.status, &self.body),
            ))
        }
    }
}

/// An open streaming response.
///
/// Owns the connection; dropping it (or calling [`ByteStream::cancel`])
/// closes the socket.
pub struct ByteStream {
    status: u16,
    body: Incoming,
    _connection: ConnectionTask,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl ByteStream {
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Next non-empty body chunk. `None` once the Engine ends the body.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.body.frame().await? {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Some(Ok(data));
                        }
                    }
                    // Trailers and empty frames carry no log data.
                }
                Err(e) => {
                    return Some(Err(Error::transport(format!("log stream read failed: {e}"))))
                }
            }
        }
    }

    /// Read the rest of the body, bounded by `limit`.
    pub async fn collect(self, limit: Duration) -> Result<Bytes> {
        let Self {
            body, _connection, ..
        } = self;
        match tokio::time::timeout(limit, body.collect()).await {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(e)) => Err(Error::transport(format!("reading response body: {e}"))),
            Err(_) => Err(Error::transport(format!(
                "reading response body timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    /// Close the connection now.
    pub fn cancel(self) {
        drop(self);
    }
}

/// Aborts the hyper connection driver when dropped.
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Engine API client bound to a shared [`EndpointSlot`].
///
/// Cheap to clone; clones see the same endpoint.
#[derive(Debug, Clone)]
pub struct EngineClient {
    endpoint: EndpointSlot,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl EngineClient {
    pub fn new(endpoint: EndpointSlot) -> Self {
        Self {
            endpoint,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the default timeouts.
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn endpoint(&self) -> &EndpointSlot {
        &self.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn socket_path(&self) -> Result<PathBuf> {
        self.endpoint
            .current()
            .map(|endpoint| endpoint.socket_path)
            .ok_or(Error::SocketUnavailable)
    }

    /// Send one request and buffer the whole response.
    ///
    /// Non-2xx/3xx statuses are returned as-is; use
    /// [`EngineResponse::into_result`] to turn them into errors.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<EngineResponse> {
        let socket = self.socket_path()?;
        let request = build_request(method.clone(), path, body)?;

        let exchange = async {
            let mut connection = connect(&socket, self.connect_timeout).await?;
            let response = connection
                .sender
                .send_request(request)
                .await
                .map_err(|e| Error::transport(format!("sending request: {e}")))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::transport(format!("reading response body: {e}")))?
                .to_bytes();
            Ok::<_, Error>(EngineResponse { status, body })
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => {
                debug!("{} {} -> {}", method, path, response.status);
                Ok(response)
            }
            Ok(Err(e)) => {
                debug!("{} {} failed: {}", method, path, e);
                Err(e)
            }
            Err(_) => Err(Error::transport(format!(
                "{method} {path} timed out after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }

    /// Send a `GET` and return the body as it arrives.
    ///
    /// Only connecting is time-bounded; the caller decides how long to read.
    pub async fn stream(&self, path: &str) -> Result<ByteStream> {
        let socket = self.socket_path()?;
        let request = build_request(Method::GET, path, None)?;

        let mut connection = connect(&socket, self.connect_timeout).await?;
        let response = connection
            .sender
            .send_request(request)
            .await
            .map_err(|e| Error::transport(format!("sending request: {e}")))?;

        let status = response.status().as_u16();
        debug!("GET {} -> {} (streaming)", path, status);
        Ok(ByteStream {
            status,
            body: response.into_body(),
            _connection: connection.task,
        })
    }
}

// ---------------------------------------------------------------------------
// Connection helpers
// ---------------------------------------------------------------------------

struct Connection {
    sender: http1::SendRequest<Full<Bytes>>,
    task: ConnectionTask,
}

async fn connect(socket: &Path, limit: Duration) -> Result<Connection> {
    let stream = tokio::time::timeout(limit, UnixStream::connect(socket))
        .await
        .map_err(|_| {
            Error::transport(format!(
                "connecting to {} timed out after {}s",
                socket.display(),
                limit.as_secs()
            ))
        })?
        .map_err(|e| Error::transport(format!("connecting to {}: {e}", socket.display())))?;

    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::transport(format!("HTTP handshake failed: {e}")))?;

    let task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            trace!("Engine connection closed: {}", e);
        }
    });

    Ok(Connection {
        sender,
        task: ConnectionTask(task),
    })
}

fn build_request(
    method: Method,
    path: &str,
    body: Option<&serde_json::Value>,
) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, "localhost")
        .header(ACCEPT, "application/json");

    let payload = match body {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Bytes::from(serde_json::to_vec(value)?)
        }
        None => Bytes::new(),
    };

    builder
        .body(Full::new(payload))
        .map_err(|e| Error::transport(format!("invalid request for {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeEngine, FakeResponse};
    use dockwatch_core::{Backend, ResolvedEndpoint};

    #[tokio::test]
    async fn test_request_without_endpoint_is_socket_unavailable() {
        let client = EngineClient::new(EndpointSlot::new());
        let err = client.request(Method::GET, "/_ping", None).await.unwrap_err();
        assert!(matches!(err, Error::SocketUnavailable));
    }

    #[tokio::test]
    async fn test_request_sends_host_header_and_buffers_body() {
        let engine = FakeEngine::start().await;
        engine.route("GET", "/_ping", FakeResponse::text(200, "OK"));

        let client = EngineClient::new(engine.endpoint());
        let response = client.request(Method::GET, "/_ping", None).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"OK");

        let requests = engine.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("host"), Some("localhost"));
    }

    #[tokio::test]
    async fn test_error_status_carries_engine_message() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/containers/missing/json",
            FakeResponse::json(404, r#"{"message":"no such container"}"#),
        );

        let client = EngineClient::new(engine.endpoint());
        let err = client
            .request(Method::GET, "/containers/missing/json", None)
            .await
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "no such container");
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_request_body_is_json() {
        let engine = FakeEngine::start().await;
        engine.route("POST", "/echo", FakeResponse::json(201, "{}"));

        let client = EngineClient::new(engine.endpoint());
        let payload = serde_json::json!({"Name": "x"});
        client
            .request(Method::POST, "/echo", Some(&payload))
            .await
            .unwrap();

        let requests = engine.requests();
        assert_eq!(requests[0].header("content-type"), Some("application/json"));
        assert_eq!(requests[0].body, br#"{"Name":"x"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_missing_socket_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let slot = EndpointSlot::fixed(ResolvedEndpoint {
            backend: Backend::Docker,
            socket_path: dir.path().join("gone.sock"),
        });

        let err = EngineClient::new(slot)
            .request(Method::GET, "/_ping", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/info",
            FakeResponse::json(200, "{}").delayed(Duration::from_millis(500)),
        );

        let client = EngineClient::new(engine.endpoint())
            .with_timeouts(CONNECT_TIMEOUT, Duration::from_millis(100));
        let err = client.request(Method::GET, "/info", None).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/containers/web/logs",
            FakeResponse::chunked(200, vec![b"one ".to_vec(), b"two".to_vec()]),
        );

        let client = EngineClient::new(engine.endpoint());
        let mut stream = client.stream("/containers/web/logs?follow=true").await.unwrap();
        assert_eq!(stream.status(), 200);

        let mut received = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"one two");
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_connection() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/containers/web/logs",
            FakeResponse::chunked(200, vec![b"hello".to_vec()]).held_open(),
        );

        let client = EngineClient::new(engine.endpoint());
        let mut stream = client.stream("/containers/web/logs").await.unwrap();
        assert!(stream.next_chunk().await.unwrap().is_ok());
        stream.cancel();

        engine
            .wait_for_closed(1, Duration::from_secs(2))
            .await
            .expect("server should observe the client hang up");
    }
}
