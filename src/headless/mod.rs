//! Headless output - NDJSON events on stdout
//!
//! Every command prints its results as newline-delimited JSON, one event per
//! line, so scripts can drive dockwatch without scraping human text. Each
//! event carries an `"event"` tag and a millisecond `timestamp`.
//!
//! # Example Output
//!
//! ```json
//! {"event":"status","backend":"colima_managed","socket_path":"/home/me/.colima/default/docker.sock","preference":"automatic","info":null,"version":null,"timestamp":1704700001000}
//! {"event":"container","id":"4f1c2d3e4a5b","name":"web","image":"nginx:1.25","state":"running","status":"Up 3 minutes","ports":["8080:80"],"exit_code":null,"project":"shop","timestamp":1704700002000}
//! {"event":"log","container":"web","stream":"stderr","text":"GET / 200\n","timestamp":1704700003000}
//! ```

pub mod runner;

use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use dockwatch_app::{ActionOutcome, SubscriptionState};
use dockwatch_core::{
    Backend, BackendPreference, Container, ContainerDetails, EngineInfo, EngineVersion, Image,
    LogChunk, LogStreamKind, Network, Volume,
};
use dockwatch_engine::port_summary;

pub use runner::{run, run_command};

/// Events emitted by the command runner
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Active backend and, when reachable, engine metadata
    Status {
        backend: Backend,
        socket_path: Option<PathBuf>,
        preference: BackendPreference,
        info: Option<EngineInfo>,
        version: Option<EngineVersion>,
        timestamp: i64,
    },

    /// One row of `ps`
    Container {
        id: String,
        name: String,
        image: String,
        state: String,
        status: String,
        ports: Vec<String>,
        exit_code: Option<i64>,
        project: Option<String>,
        timestamp: i64,
    },

    /// One row of `images`
    Image {
        id: String,
        name: String,
        size: i64,
        containers: i64,
        timestamp: i64,
    },

    /// One row of `volumes`
    Volume {
        name: String,
        driver: String,
        mountpoint: String,
        timestamp: i64,
    },

    /// One row of `networks`
    Network {
        id: String,
        name: String,
        driver: String,
        scope: String,
        builtin: bool,
        timestamp: i64,
    },

    /// Full inspection of one container
    ContainerDetails {
        details: Box<ContainerDetails>,
        timestamp: i64,
    },

    /// A piece of container output
    Log {
        container: String,
        stream: LogStreamKind,
        text: String,
        timestamp: i64,
    },

    /// Follow subscription changed state
    LogState {
        container: String,
        state: SubscriptionState,
        timestamp: i64,
    },

    /// A mutation finished successfully
    ActionCompleted {
        action: String,
        outcome: ActionOutcome,
        timestamp: i64,
    },

    /// Persisted settings
    Settings {
        path: PathBuf,
        preference: BackendPreference,
        custom_socket: Option<PathBuf>,
        timestamp: i64,
    },

    /// Error; `fatal` errors end the command with a non-zero exit code
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Write this event to stdout as one line of JSON.
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn status(
        backend: Backend,
        socket_path: Option<PathBuf>,
        preference: BackendPreference,
        info: Option<EngineInfo>,
        version: Option<EngineVersion>,
    ) -> Self {
        Self::Status {
            backend,
            socket_path,
            preference,
            info,
            version,
            timestamp: Self::now(),
        }
    }

    pub fn container(container: &Container) -> Self {
        Self::Container {
            id: container.short_id().to_string(),
            name: container.name.clone(),
            image: container.image.clone(),
            state: container.state.clone(),
            status: container.status.clone(),
            ports: port_summary(&container.ports),
            exit_code: container.exit_code(),
            project: container.compose_project().map(str::to_string),
            timestamp: Self::now(),
        }
    }

    pub fn image(image: &Image) -> Self {
        Self::Image {
            id: image.short_id().to_string(),
            name: image.display_name().to_string(),
            size: image.size,
            containers: image.containers,
            timestamp: Self::now(),
        }
    }

    pub fn volume(volume: &Volume) -> Self {
        Self::Volume {
            name: volume.name.clone(),
            driver: volume.driver.clone(),
            mountpoint: volume.mountpoint.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn network(network: &Network) -> Self {
        Self::Network {
            id: network.id.clone(),
            name: network.name.clone(),
            driver: network.driver.clone(),
            scope: network.scope.clone(),
            builtin: network.is_builtin(),
            timestamp: Self::now(),
        }
    }

    pub fn container_details(details: ContainerDetails) -> Self {
        Self::ContainerDetails {
            details: Box::new(details),
            timestamp: Self::now(),
        }
    }

    pub fn log(container: &str, chunk: LogChunk) -> Self {
        Self::Log {
            container: container.to_string(),
            stream: chunk.stream,
            text: chunk.text,
            timestamp: Self::now(),
        }
    }

    pub fn log_state(container: &str, state: SubscriptionState) -> Self {
        Self::LogState {
            container: container.to_string(),
            state,
            timestamp: Self::now(),
        }
    }

    pub fn action_completed(action: impl Into<String>, outcome: ActionOutcome) -> Self {
        Self::ActionCompleted {
            action: action.into(),
            outcome,
            timestamp: Self::now(),
        }
    }

    pub fn settings(
        path: PathBuf,
        preference: BackendPreference,
        custom_socket: Option<PathBuf>,
    ) -> Self {
        Self::Settings {
            path,
            preference,
            custom_socket,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            message: message.into(),
            fatal,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwatch_app::PruneReport;
    use dockwatch_core::PortMapping;
    use std::collections::BTreeMap;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    fn port(container_port: u16, host_port: u16) -> PortMapping {
        PortMapping {
            host_ip: Some("0.0.0.0".to_string()),
            container_port,
            host_port: Some(host_port),
            protocol: "tcp".to_string(),
        }
    }

    #[test]
    fn test_container_row_serialization() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "com.docker.compose.project".to_string(),
            "shop".to_string(),
        );
        let container = Container {
            id: "4f1c2d3e4a5b6c7d8e9f".to_string(),
            name: "web".to_string(),
            image: "nginx:1.25".to_string(),
            state: "exited".to_string(),
            status: "Exited (137) 2 hours ago".to_string(),
            created: None,
            ports: vec![port(80, 8080), port(80, 8080), port(90, 9090)],
            labels,
        };

        let value = to_value(&HeadlessEvent::container(&container));
        assert_eq!(value["event"], "container");
        assert_eq!(value["id"], "4f1c2d3e4a5b");
        assert_eq!(value["ports"], serde_json::json!(["8080:80", "9090:90"]));
        assert_eq!(value["exit_code"], 137);
        assert_eq!(value["project"], "shop");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_status_serialization() {
        let event = HeadlessEvent::status(
            Backend::ColimaManaged,
            Some(PathBuf::from("/home/me/.colima/default/docker.sock")),
            BackendPreference::Automatic,
            None,
            None,
        );
        let value = to_value(&event);

        assert_eq!(value["event"], "status");
        assert_eq!(value["backend"], "colima_managed");
        assert_eq!(value["preference"], "automatic");
        assert!(value["info"].is_null());
    }

    #[test]
    fn test_log_serialization() {
        let value = to_value(&HeadlessEvent::log("web", LogChunk::stderr("boom\n")));

        assert_eq!(value["event"], "log");
        assert_eq!(value["container"], "web");
        assert_eq!(value["stream"], "stderr");
        assert_eq!(value["text"], "boom\n");
    }

    #[test]
    fn test_log_state_serialization() {
        let value = to_value(&HeadlessEvent::log_state(
            "web",
            SubscriptionState::Disconnected,
        ));

        assert_eq!(value["event"], "log_state");
        assert_eq!(value["state"], "disconnected");
    }

    #[test]
    fn test_pruned_action_serialization() {
        let outcome = ActionOutcome::Pruned(PruneReport {
            volumes_deleted: vec!["old".to_string()],
            space_reclaimed: 42,
        });
        let value = to_value(&HeadlessEvent::action_completed("prune volumes", outcome));

        assert_eq!(value["event"], "action_completed");
        assert_eq!(value["outcome"]["kind"], "pruned");
        assert_eq!(value["outcome"]["volumes_deleted"][0], "old");
        assert_eq!(value["outcome"]["space_reclaimed"], 42);
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("No Docker socket found", true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "No Docker socket found");
        assert_eq!(value["fatal"], true);
    }
}
