//! Typed Engine API operations.
//!
//! Thin wrappers over [`EngineClient::request`] that build the path, check
//! the status and hand the body to [`crate::decode`]. Identifiers are
//! percent-encoded before they are placed in a path.

use std::fmt;

use hyper::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use dockwatch_core::prelude::*;
use dockwatch_core::{
    Container, ContainerDetails, EngineInfo, EngineVersion, Image, LogChunk, Network, Volume,
};

use crate::client::{ByteStream, EngineClient};
use crate::decode::{self, PruneReport};
use crate::log_stream;

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Lifecycle operation on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Kill => "kill",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query options for the container logs endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    /// Lines of backlog; `None` asks for everything.
    pub tail: Option<u32>,
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: false,
            tail: Some(200),
            timestamps: false,
        }
    }
}

impl LogOptions {
    pub fn follow(tail: u32, timestamps: bool) -> Self {
        Self {
            follow: true,
            tail: Some(tail),
            timestamps,
        }
    }

    fn query(&self) -> String {
        let tail = self
            .tail
            .map(|t| t.to_string())
            .unwrap_or_else(|| "all".to_string());
        format!(
            "stdout=true&stderr=true&follow={}&tail={}&timestamps={}",
            self.follow, tail, self.timestamps
        )
    }
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Path of the logs endpoint for `id`.
pub fn logs_path(id: &str, options: &LogOptions) -> String {
    format!(
        "/containers/{}/logs?{}",
        encode_segment(id),
        options.query()
    )
}

impl EngineClient {
    // ─────────────────────────────────────────────────────────
    // Engine
    // ─────────────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<()> {
        self.get("/_ping").await.map(|_| ())
    }

    pub async fn info(&self) -> Result<EngineInfo> {
        decode::parse_info(&self.get("/info").await?)
    }

    pub async fn version(&self) -> Result<EngineVersion> {
        decode::parse_version(&self.get("/version").await?)
    }

    // ─────────────────────────────────────────────────────────
    // Containers
    // ─────────────────────────────────────────────────────────

    pub async fn list_containers(&self, all: bool) -> Result<Vec<Container>> {
        let path = format!("/containers/json?all={all}");
        decode::parse_containers(&self.get(&path).await?)
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let path = format!("/containers/{}/json", encode_segment(id));
        decode::parse_container_details(&self.get(&path).await?)
    }

    pub async fn container_action(&self, id: &str, action: ContainerAction) -> Result<()> {
        let path = format!("/containers/{}/{}", encode_segment(id), action.as_str());
        self.send(Method::POST, &path).await
    }

    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let path = format!("/containers/{}?force={force}", encode_segment(id));
        self.send(Method::DELETE, &path).await
    }

    /// Buffered, non-following log fetch.
    pub async fn fetch_logs(&self, id: &str, options: LogOptions) -> Result<Vec<LogChunk>> {
        let options = LogOptions {
            follow: false,
            ..options
        };
        let body = self.get(&logs_path(id, &options)).await?;
        Ok(log_stream::decode_all(&body))
    }

    /// Open a log stream. Non-success statuses are returned as errors after
    /// reading the Engine's message.
    pub async fn open_log_stream(&self, id: &str, options: LogOptions) -> Result<ByteStream> {
        let stream = self.stream(&logs_path(id, &options)).await?;
        let status = stream.status();
        if (200..300).contains(&status) {
            return Ok(stream);
        }

        let body = stream.collect(self.request_timeout()).await.unwrap_or_default();
        Err(Error::http(
            status,
            decode::engine_error_message(status, &body),
        ))
    }

    // ─────────────────────────────────────────────────────────
    // Images, volumes, networks
    // ─────────────────────────────────────────────────────────

    pub async fn list_images(&self) -> Result<Vec<Image>> {
        decode::parse_images(&self.get("/images/json").await?)
    }

    pub async fn remove_image(&self, id: &str, force: bool) -> Result<()> {
        let path = format!("/images/{}?force={force}", encode_segment(id));
        self.send(Method::DELETE, &path).await
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        decode::parse_volumes(&self.get("/volumes").await?)
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        let path = format!("/volumes/{}", encode_segment(name));
        self.send(Method::DELETE, &path).await
    }

    pub async fn prune_volumes(&self) -> Result<PruneReport> {
        let body = self
            .request(Method::POST, "/volumes/prune", None)
            .await?
            .into_result()?;
        decode::parse_prune_report(&body)
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        decode::parse_networks(&self.get("/networks").await?)
    }

    pub async fn remove_network(&self, id: &str) -> Result<()> {
        let path = format!("/networks/{}", encode_segment(id));
        self.send(Method::DELETE, &path).await
    }

    // ─────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────

    async fn get(&self, path: &str) -> Result<bytes::Bytes> {
        self.request(Method::GET, path, None).await?.into_result()
    }

    async fn send(&self, method: Method, path: &str) -> Result<()> {
        self.request(method, path, None).await?.into_result()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{log_frame, FakeEngine, FakeResponse};

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("web"), "web");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_segment("sha256:abc"), "sha256:abc");
    }

    #[test]
    fn test_logs_path() {
        let path = logs_path("web", &LogOptions::follow(50, true));
        assert_eq!(
            path,
            "/containers/web/logs?stdout=true&stderr=true&follow=true&tail=50&timestamps=true"
        );

        let all = LogOptions {
            tail: None,
            ..LogOptions::default()
        };
        assert!(logs_path("web", &all).contains("tail=all"));
    }

    #[tokio::test]
    async fn test_list_containers() {
        let engine = FakeEngine::with_sample_data().await;
        let client = EngineClient::new(engine.endpoint());

        let containers = client.list_containers(true).await.unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(
            engine.requests_to("/containers/json")[0].query("all"),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_info_and_version() {
        let engine = FakeEngine::with_sample_data().await;
        let client = EngineClient::new(engine.endpoint());

        let (info, version) = tokio::try_join!(client.info(), client.version()).unwrap();
        assert_eq!(info.name, "colima");
        assert_eq!(version.api_version, "1.44");
    }

    #[tokio::test]
    async fn test_container_action_posts_to_action_path() {
        let engine = FakeEngine::start().await;
        engine.route("POST", "/containers/web/restart", FakeResponse::empty(204));

        let client = EngineClient::new(engine.endpoint());
        client
            .container_action("web", ContainerAction::Restart)
            .await
            .unwrap();
        assert_eq!(engine.requests()[0].method, "POST");
    }

    #[tokio::test]
    async fn test_not_modified_counts_as_success() {
        let engine = FakeEngine::start().await;
        engine.route("POST", "/containers/web/start", FakeResponse::empty(304));

        let client = EngineClient::new(engine.endpoint());
        assert!(client
            .container_action("web", ContainerAction::Start)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_remove_container_conflict_message() {
        let engine = FakeEngine::start().await;
        engine.route(
            "DELETE",
            "/containers/web",
            FakeResponse::json(
                409,
                r#"{"message":"cannot remove a running container"}"#,
            ),
        );

        let client = EngineClient::new(engine.endpoint());
        let err = client.remove_container("web", false).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot remove a running container");
        assert_eq!(
            engine.requests_to("/containers/web")[0].query("force"),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_remove_image_encodes_reference() {
        let engine = FakeEngine::start().await;
        engine.route("DELETE", "/images/repo%2Fapp:1", FakeResponse::json(200, "[]"));

        let client = EngineClient::new(engine.endpoint());
        client.remove_image("repo/app:1", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_volumes() {
        let engine = FakeEngine::start().await;
        engine.route(
            "POST",
            "/volumes/prune",
            FakeResponse::json(200, r#"{"VolumesDeleted":["old"],"SpaceReclaimed":2048}"#),
        );

        let client = EngineClient::new(engine.endpoint());
        let report = client.prune_volumes().await.unwrap();
        assert_eq!(report.volumes_deleted, vec!["old"]);
        assert_eq!(report.space_reclaimed, 2048);
    }

    #[tokio::test]
    async fn test_fetch_logs_decodes_frames() {
        let engine = FakeEngine::start().await;
        let mut body = log_frame(1, b"ready\n");
        body.extend(log_frame(2, b"warning\n"));
        engine.route(
            "GET",
            "/containers/web/logs",
            FakeResponse::chunked(200, vec![body]),
        );

        let client = EngineClient::new(engine.endpoint());
        let chunks = client
            .fetch_logs("web", LogOptions::follow(10, false))
            .await
            .unwrap();
        assert_eq!(
            chunks,
            vec![LogChunk::stdout("ready\n"), LogChunk::stderr("warning\n")]
        );
        // fetch_logs never follows.
        assert_eq!(
            engine.requests_to("/containers/web/logs")[0].query("follow"),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_open_log_stream_error_status() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/containers/ghost/logs",
            FakeResponse::json(404, r#"{"message":"no such container: ghost"}"#),
        );

        let client = EngineClient::new(engine.endpoint());
        let err = client
            .open_log_stream("ghost", LogOptions::follow(0, false))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "no such container: ghost");
    }
}
