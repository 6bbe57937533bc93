//! Domain types shared by the engine client, the state container and any
//! front end that renders them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Backend selection
// ─────────────────────────────────────────────────────────────────────────────

/// The concrete runtime whose socket is currently servicing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Docker,
    ColimaManaged,
    CustomSocket,
    Unavailable,
}

impl Backend {
    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Docker => "Docker",
            Backend::ColimaManaged => "Colima",
            Backend::CustomSocket => "Custom socket",
            Backend::Unavailable => "Unavailable",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Backend::Unavailable)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted user choice restricting which candidate sockets are probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    #[default]
    Automatic,
    ForceDocker,
    ForceColima,
}

impl FromStr for BackendPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" => Ok(Self::Automatic),
            "docker" | "force_docker" => Ok(Self::ForceDocker),
            "colima" | "force_colima" => Ok(Self::ForceColima),
            other => Err(Error::config(format!(
                "unknown backend '{other}' (expected auto, docker or colima)"
            ))),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendPreference::Automatic => "auto",
            BackendPreference::ForceDocker => "docker",
            BackendPreference::ForceColima => "colima",
        };
        f.write_str(s)
    }
}

/// A socket path worth probing, tagged with the backend it would select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCandidate {
    pub backend: Backend,
    pub path: PathBuf,
}

impl SocketCandidate {
    pub fn new(backend: Backend, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }
}

/// The socket every request is sent to, verified at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEndpoint {
    pub backend: Backend,
    pub socket_path: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Containers
// ─────────────────────────────────────────────────────────────────────────────

/// Matches the exit code Docker embeds in status text, e.g. `Exited (137) 2 hours ago`.
static EXIT_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Exited \((-?\d+)\)").expect("Invalid exit code regex"));

/// One published port of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
}

/// A container as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Machine state: `running`, `exited`, `dead`, `paused`, ...
    pub state: String,
    /// Human status text, e.g. `Up 3 minutes` or `Exited (1) 5 seconds ago`.
    pub status: String,
    pub created: Option<DateTime<Utc>>,
    pub ports: Vec<PortMapping>,
    pub labels: BTreeMap<String, String>,
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Exit code parsed from the status text, when the container has exited.
    pub fn exit_code(&self) -> Option<i64> {
        EXIT_CODE_PATTERN
            .captures(&self.status)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn is_error(&self) -> bool {
        self.state == "dead" || self.exit_code().is_some_and(|code| code != 0)
    }

    pub fn short_id(&self) -> &str {
        short(&self.id)
    }

    /// Compose project this container belongs to, if it was started by compose.
    pub fn compose_project(&self) -> Option<&str> {
        self.labels
            .get("com.docker.compose.project")
            .map(String::as_str)
    }
}

/// A `KEY=VALUE` environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// A network a container is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAttachment {
    pub name: String,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub mac_address: Option<String>,
}

/// A bind mount or volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    /// `bind`, `volume`, `tmpfs`, ...
    pub kind: String,
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub read_write: bool,
}

/// Runtime state block of a container inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Extended view of a single container. Fetched on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub created: Option<DateTime<Utc>>,
    pub state: ContainerState,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub restart_count: i64,
    pub env: Vec<EnvVar>,
    pub networks: Vec<NetworkAttachment>,
    pub mounts: Vec<MountInfo>,
    pub labels: BTreeMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Images, volumes, networks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub created: Option<DateTime<Utc>>,
    /// Number of containers using the image, `-1` when the engine didn't compute it.
    pub containers: i64,
}

impl Image {
    /// Image id without the `sha256:` prefix, truncated to 12 characters.
    pub fn short_id(&self) -> &str {
        short(self.id.strip_prefix("sha256:").unwrap_or(&self.id))
    }

    /// First usable tag, falling back to the short id for dangling images.
    pub fn display_name(&self) -> &str {
        self.repo_tags
            .iter()
            .find(|tag| tag.as_str() != "<none>:<none>")
            .map(String::as_str)
            .unwrap_or_else(|| self.short_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub scope: String,
    pub created: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub internal: bool,
    pub created: Option<DateTime<Utc>>,
}

impl Network {
    /// Networks the engine creates itself and refuses to delete.
    pub fn is_builtin(&self) -> bool {
        matches!(self.name.as_str(), "bridge" | "host" | "none")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of `GET /info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub server_version: String,
    pub operating_system: String,
    pub architecture: String,
    pub cpus: i64,
    pub memory_bytes: i64,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_stopped: i64,
    pub images: i64,
}

/// Summary of `GET /version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineVersion {
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
    pub go_version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logs
// ─────────────────────────────────────────────────────────────────────────────

/// Which output stream a piece of log text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStreamKind {
    Stdout,
    Stderr,
}

/// Decoded log text ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub stream: LogStreamKind,
    pub text: String,
}

impl LogChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: LogStreamKind::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: LogStreamKind::Stderr,
            text: text.into(),
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
