//! Docker socket discovery
//!
//! Finds the unix socket of a running engine and classifies which backend it
//! belongs to. Priority, highest first:
//!
//! 1. An explicit custom socket path
//! 2. `DOCKER_HOST` (`unix://` or `unix:` form only)
//! 3. The candidate group selected by [`BackendPreference`]
//! 4. Automatic: Colima sockets, then Docker sockets
//!
//! The first candidate that is a real socket on disk wins. Resolution never
//! fails; "nothing found" is reported as `None` (backend `Unavailable`).

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use dockwatch_core::prelude::*;
use dockwatch_core::{Backend, BackendPreference, ResolvedEndpoint, SocketCandidate};

/// System-wide Docker socket.
pub const DEFAULT_SYSTEM_SOCKET: &str = "/var/run/docker.sock";

/// Environment variable holding a Docker host override.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

const COLIMA_DIR: &str = ".colima";
const COLIMA_DEFAULT_PROFILE: &str = "default";
const SOCKET_FILENAME: &str = "docker.sock";

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Filesystem roots the resolver derives candidate paths from.
#[derive(Debug, Clone)]
pub struct ResolverEnv {
    pub home_dir: Option<PathBuf>,
    pub system_socket: PathBuf,
}

impl ResolverEnv {
    /// Roots of the current user on this machine.
    pub fn from_system() -> Self {
        Self {
            home_dir: dirs::home_dir(),
            system_socket: PathBuf::from(DEFAULT_SYSTEM_SOCKET),
        }
    }

    /// Roots below an arbitrary home directory (used by tests).
    pub fn with_home(home: impl Into<PathBuf>, system_socket: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home.into()),
            system_socket: system_socket.into(),
        }
    }
}

impl Default for ResolverEnv {
    fn default() -> Self {
        Self::from_system()
    }
}

/// Locates a reachable engine socket.
#[derive(Debug, Clone, Default)]
pub struct SocketResolver {
    env: ResolverEnv,
}

impl SocketResolver {
    pub fn new(env: ResolverEnv) -> Self {
        Self { env }
    }

    /// Colima sockets: the fixed well-known paths, then one per profile directory.
    pub fn colima_candidates(&self) -> Vec<SocketCandidate> {
        let Some(home) = &self.env.home_dir else {
            return Vec::new();
        };
        let colima_dir = home.join(COLIMA_DIR);

        let mut candidates = vec![
            SocketCandidate::new(
                Backend::ColimaManaged,
                colima_dir.join(COLIMA_DEFAULT_PROFILE).join(SOCKET_FILENAME),
            ),
            SocketCandidate::new(Backend::ColimaManaged, colima_dir.join(SOCKET_FILENAME)),
        ];

        candidates.extend(
            colima_profiles(&colima_dir).into_iter().map(|profile| {
                SocketCandidate::new(
                    Backend::ColimaManaged,
                    colima_dir.join(profile).join(SOCKET_FILENAME),
                )
            }),
        );

        candidates
    }

    /// Docker sockets: the user-scoped run directory, then the system socket.
    pub fn docker_candidates(&self) -> Vec<SocketCandidate> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(home) = &self.env.home_dir {
            candidates.push(SocketCandidate::new(
                Backend::Docker,
                home.join(".docker").join("run").join(SOCKET_FILENAME),
            ));
        }
        candidates.push(SocketCandidate::new(
            Backend::Docker,
            self.env.system_socket.clone(),
        ));
        candidates
    }

    /// Candidate list for a preference, in probe order.
    pub fn candidates(&self, preference: BackendPreference) -> Vec<SocketCandidate> {
        match preference {
            BackendPreference::ForceDocker => self.docker_candidates(),
            BackendPreference::ForceColima => self.colima_candidates(),
            BackendPreference::Automatic => {
                let mut all = self.colima_candidates();
                all.extend(self.docker_candidates());
                all
            }
        }
    }

    /// Pick the active endpoint.
    ///
    /// `env_override` is the raw `DOCKER_HOST` value, if any.
    pub fn resolve(
        &self,
        preference: BackendPreference,
        custom_path: Option<&Path>,
        env_override: Option<&str>,
    ) -> Option<ResolvedEndpoint> {
        if let Some(path) = custom_path {
            if let Some(socket_path) = validate_socket(path) {
                info!("Using custom socket {}", socket_path.display());
                return Some(ResolvedEndpoint {
                    backend: Backend::CustomSocket,
                    socket_path,
                });
            }
            warn!("Custom socket {} is not a usable socket", path.display());
        }

        if let Some(path) = env_override.and_then(parse_unix_host) {
            if let Some(socket_path) = validate_socket(&path) {
                let backend = classify_path(&path);
                info!(
                    "Using {} socket from {}: {}",
                    backend,
                    DOCKER_HOST_ENV,
                    socket_path.display()
                );
                return Some(ResolvedEndpoint {
                    backend,
                    socket_path,
                });
            }
            debug!("{} points at {}, which is not a socket", DOCKER_HOST_ENV, path.display());
        }

        for candidate in self.candidates(preference) {
            if let Some(socket_path) = validate_socket(&candidate.path) {
                info!("Resolved {} socket {}", candidate.backend, socket_path.display());
                return Some(ResolvedEndpoint {
                    backend: candidate.backend,
                    socket_path,
                });
            }
            trace!("No socket at {}", candidate.path.display());
        }

        info!("No engine socket found (preference: {})", preference);
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared endpoint slot
// ─────────────────────────────────────────────────────────────────────────────

/// The currently resolved endpoint, shared by every request.
///
/// Only [`EndpointSlot::resolve_with`] writes to it; readers always see the
/// latest value at call time and never wait on a resolution in progress.
#[derive(Debug, Clone, Default)]
pub struct EndpointSlot {
    inner: Arc<RwLock<Option<ResolvedEndpoint>>>,
}

impl EndpointSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot pre-populated with a known endpoint.
    pub fn fixed(endpoint: ResolvedEndpoint) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(endpoint))),
        }
    }

    pub fn current(&self) -> Option<ResolvedEndpoint> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn backend(&self) -> Backend {
        self.current()
            .map(|endpoint| endpoint.backend)
            .unwrap_or(Backend::Unavailable)
    }

    /// Run a resolution and store its outcome, including "nothing found".
    pub fn resolve_with(
        &self,
        resolver: &SocketResolver,
        preference: BackendPreference,
        custom_path: Option<&Path>,
        env_override: Option<&str>,
    ) -> Option<ResolvedEndpoint> {
        let resolved = resolver.resolve(preference, custom_path, env_override);
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = resolved.clone();
        resolved
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Read the `DOCKER_HOST` override from the process environment.
pub fn docker_host_from_env() -> Option<String> {
    std::env::var(DOCKER_HOST_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Extract a socket path from a `DOCKER_HOST`-style value.
///
/// Accepts `unix:///path`, `unix:/path` and bare absolute paths. Any other
/// scheme (`tcp://`, `ssh://`, ...) yields `None`.
pub fn parse_unix_host(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    let path = if let Some(rest) = value.strip_prefix("unix://") {
        rest
    } else if let Some(rest) = value.strip_prefix("unix:") {
        rest
    } else if value.starts_with('/') {
        value
    } else {
        return None;
    };

    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Resolve symlinks and confirm the target is a socket.
///
/// Returns the real path on success.
pub fn validate_socket(path: &Path) -> Option<PathBuf> {
    let real = dunce::canonicalize(path).ok()?;
    let metadata = std::fs::metadata(&real).ok()?;
    if is_socket(&metadata) {
        Some(real)
    } else {
        None
    }
}

#[cfg(unix)]
fn is_socket(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_socket()
}

#[cfg(not(unix))]
fn is_socket(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Backend implied by where a socket lives.
fn classify_path(path: &Path) -> Backend {
    let in_colima_dir = path
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name == COLIMA_DIR || name == "colima"));
    if in_colima_dir {
        Backend::ColimaManaged
    } else {
        Backend::Docker
    }
}

/// Profile directories below `~/.colima`, sorted, excluding the default profile.
fn colima_profiles(colima_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(colima_dir) else {
        return Vec::new();
    };

    let mut profiles: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            name != COLIMA_DEFAULT_PROFILE && !name.starts_with('_') && !name.starts_with('.')
        })
        .collect();
    profiles.sort();
    profiles
}
