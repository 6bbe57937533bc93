//! Decoding of Engine API JSON bodies into domain records.
//!
//! Wire structs mirror the Engine's PascalCase field names and are private to
//! this module; every `parse_*` function returns the normalized domain type.
//! Missing optional fields decode to their defaults rather than failing.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use dockwatch_core::prelude::*;
use dockwatch_core::{
    Container, ContainerDetails, ContainerState, EngineInfo, EngineVersion, EnvVar, Image,
    MountInfo, Network, NetworkAttachment, PortMapping, Volume,
};

/// Number of entries kept by [`port_summary`].
pub const PORT_SUMMARY_LIMIT: usize = 2;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireContainer {
    id: String,
    names: Option<Vec<String>>,
    image: String,
    state: String,
    status: String,
    created: i64,
    ports: Option<Vec<WirePort>>,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WirePort {
    #[serde(rename = "IP")]
    ip: Option<String>,
    private_port: u16,
    public_port: Option<u16>,
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireInspect {
    id: String,
    name: String,
    created: String,
    path: String,
    args: Option<Vec<String>>,
    state: WireState,
    restart_count: i64,
    config: WireConfig,
    network_settings: WireNetworkSettings,
    mounts: Option<Vec<WireMount>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireState {
    status: String,
    running: bool,
    exit_code: i64,
    error: String,
    started_at: String,
    finished_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireConfig {
    image: String,
    env: Option<Vec<String>>,
    cmd: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    working_dir: String,
    tty: bool,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireNetworkSettings {
    networks: Option<HashMap<String, WireEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireEndpoint {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    gateway: String,
    mac_address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireMount {
    #[serde(rename = "Type")]
    kind: String,
    source: String,
    destination: String,
    mode: String,
    #[serde(rename = "RW")]
    rw: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireImage {
    id: String,
    repo_tags: Option<Vec<String>>,
    size: i64,
    created: i64,
    containers: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireVolumeList {
    volumes: Option<Vec<WireVolume>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireVolume {
    name: String,
    driver: String,
    mountpoint: String,
    scope: String,
    created_at: String,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireNetwork {
    id: String,
    name: String,
    driver: String,
    scope: String,
    internal: bool,
    created: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireInfo {
    name: String,
    server_version: String,
    operating_system: String,
    architecture: String,
    #[serde(rename = "NCPU")]
    ncpu: i64,
    mem_total: i64,
    containers: i64,
    containers_running: i64,
    containers_stopped: i64,
    images: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WireVersion {
    version: String,
    api_version: String,
    os: String,
    arch: String,
    go_version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct WirePrune {
    volumes_deleted: Option<Vec<String>>,
    space_reclaimed: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ---------------------------------------------------------------------------
// Public results that only exist at the API layer
// ---------------------------------------------------------------------------

/// Outcome of `POST /volumes/prune`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PruneReport {
    pub volumes_deleted: Vec<String>,
    pub space_reclaimed: u64,
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

pub fn parse_containers(body: &[u8]) -> Result<Vec<Container>> {
    let wire: Vec<WireContainer> = from_body(body, "container list")?;
    Ok(wire.into_iter().map(container_from_wire).collect())
}

pub fn parse_container_details(body: &[u8]) -> Result<ContainerDetails> {
    let wire: WireInspect = from_body(body, "container inspection")?;

    let mut networks: Vec<NetworkAttachment> = wire
        .network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| NetworkAttachment {
            name,
            ip_address: non_empty(endpoint.ip_address),
            gateway: non_empty(endpoint.gateway),
            mac_address: non_empty(endpoint.mac_address),
        })
        .collect();
    networks.sort_by_key(|n| n.name.to_lowercase());

    let mut mounts: Vec<MountInfo> = wire
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|m| MountInfo {
            kind: m.kind,
            source: m.source,
            destination: m.destination,
            mode: m.mode,
            read_write: m.rw,
        })
        .collect();
    mounts.sort_by_key(|m| m.destination.to_lowercase());

    let command = match wire.config.cmd {
        Some(cmd) if !cmd.is_empty() => cmd,
        _ => std::iter::once(wire.path)
            .filter(|p| !p.is_empty())
            .chain(wire.args.unwrap_or_default())
            .collect(),
    };

    Ok(ContainerDetails {
        name: strip_name(&wire.name),
        id: wire.id,
        image: wire.config.image,
        created: parse_timestamp(&wire.created),
        state: ContainerState {
            status: wire.state.status,
            running: wire.state.running,
            exit_code: wire.state.exit_code,
            error: non_empty(wire.state.error),
            started_at: parse_timestamp(&wire.state.started_at),
            finished_at: parse_timestamp(&wire.state.finished_at),
        },
        command,
        entrypoint: wire.config.entrypoint.unwrap_or_default(),
        working_dir: non_empty(wire.config.working_dir),
        tty: wire.config.tty,
        restart_count: wire.restart_count,
        env: parse_env(&wire.config.env.unwrap_or_default()),
        networks,
        mounts,
        labels: wire.config.labels.unwrap_or_default(),
    })
}

pub fn parse_images(body: &[u8]) -> Result<Vec<Image>> {
    let wire: Vec<WireImage> = from_body(body, "image list")?;
    Ok(wire
        .into_iter()
        .map(|i| Image {
            id: i.id,
            repo_tags: i.repo_tags.unwrap_or_default(),
            size: i.size,
            created: timestamp_from_unix(i.created),
            containers: i.containers,
        })
        .collect())
}

pub fn parse_volumes(body: &[u8]) -> Result<Vec<Volume>> {
    let wire: WireVolumeList = from_body(body, "volume list")?;
    Ok(wire
        .volumes
        .unwrap_or_default()
        .into_iter()
        .map(|v| Volume {
            created: parse_timestamp(&v.created_at),
            name: v.name,
            driver: v.driver,
            mountpoint: v.mountpoint,
            scope: v.scope,
            labels: v.labels.unwrap_or_default(),
        })
        .collect())
}

pub fn parse_networks(body: &[u8]) -> Result<Vec<Network>> {
    let wire: Vec<WireNetwork> = from_body(body, "network list")?;
    Ok(wire
        .into_iter()
        .map(|n| Network {
            created: parse_timestamp(&n.created),
            id: n.id,
            name: n.name,
            driver: n.driver,
            scope: n.scope,
            internal: n.internal,
        })
        .collect())
}

pub fn parse_info(body: &[u8]) -> Result<EngineInfo> {
    let w: WireInfo = from_body(body, "engine info")?;
    Ok(EngineInfo {
        name: w.name,
        server_version: w.server_version,
        operating_system: w.operating_system,
        architecture: w.architecture,
        cpus: w.ncpu,
        memory_bytes: w.mem_total,
        containers: w.containers,
        containers_running: w.containers_running,
        containers_stopped: w.containers_stopped,
        images: w.images,
    })
}

pub fn parse_version(body: &[u8]) -> Result<EngineVersion> {
    let w: WireVersion = from_body(body, "engine version")?;
    Ok(EngineVersion {
        version: w.version,
        api_version: w.api_version,
        os: w.os,
        arch: w.arch,
        go_version: w.go_version,
    })
}

pub fn parse_prune_report(body: &[u8]) -> Result<PruneReport> {
    let w: WirePrune = from_body(body, "prune report")?;
    Ok(PruneReport {
        volumes_deleted: w.volumes_deleted.unwrap_or_default(),
        space_reclaimed: w.space_reclaimed,
    })
}

/// Human-readable message for a failed response.
///
/// Uses the Engine's `{"message": ...}` body when present, otherwise falls
/// back to `Docker error (<status>)`.
pub fn engine_error_message(status: u16, body: &[u8]) -> String {
    match serde_json::from_slice::<WireError>(body) {
        Ok(err) if !err.message.trim().is_empty() => err.message.trim().to_string(),
        _ => format!("Docker error ({status})"),
    }
}

// ---------------------------------------------------------------------------
// Field normalization
// ---------------------------------------------------------------------------

/// Compact `host:container` list of published ports.
///
/// Only host-bound ports count. Entries are sorted by host port, container
/// port and protocol, deduplicated (the Engine lists IPv4 and IPv6 bindings
/// separately) and capped at [`PORT_SUMMARY_LIMIT`].
pub fn port_summary(ports: &[PortMapping]) -> Vec<String> {
    let mut bound: Vec<(u16, u16, &str)> = ports
        .iter()
        .filter_map(|p| {
            p.host_port
                .map(|host| (host, p.container_port, p.protocol.as_str()))
        })
        .collect();
    bound.sort();

    let mut seen = HashSet::new();
    let mut summary = Vec::new();
    for (host, container, _) in bound {
        let entry = format!("{host}:{container}");
        if seen.insert(entry.clone()) {
            summary.push(entry);
            if summary.len() == PORT_SUMMARY_LIMIT {
                break;
            }
        }
    }
    summary
}

/// Parse an Engine timestamp.
///
/// Accepts RFC 3339 (with any fractional precision) and zone-less ISO-8601.
/// Empty strings, unparsable values and Go's zero time (`0001-01-01T00:00:00Z`)
/// are `None`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|naive| naive.and_utc())
        })?;

    if parsed.year() <= 1 {
        None
    } else {
        Some(parsed)
    }
}

/// Convert Unix seconds to a timestamp; non-positive values are `None`.
pub fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        None
    } else {
        DateTime::from_timestamp(secs, 0)
    }
}

/// Split `KEY=VALUE` entries on the first `=`.
///
/// An entry without `=` becomes a key with an empty value.
pub fn parse_env(entries: &[String]) -> Vec<EnvVar> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => EnvVar {
                key: key.to_string(),
                value: value.to_string(),
            },
            None => EnvVar {
                key: entry.clone(),
                value: String::new(),
            },
        })
        .collect()
}

fn container_from_wire(wire: WireContainer) -> Container {
    let name = wire
        .names
        .as_deref()
        .and_then(|names| names.first())
        .map(|n| strip_name(n))
        .unwrap_or_else(|| wire.id.chars().take(12).collect());

    let ports = wire
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortMapping {
            host_ip: p.ip.filter(|ip| !ip.is_empty()),
            container_port: p.private_port,
            host_port: p.public_port.filter(|port| *port != 0),
            protocol: if p.kind.is_empty() {
                "tcp".to_string()
            } else {
                p.kind
            },
        })
        .collect();

    Container {
        id: wire.id,
        name,
        image: wire.image,
        state: wire.state,
        status: wire.status,
        created: timestamp_from_unix(wire.created),
        ports,
        labels: wire.labels.unwrap_or_default(),
    }
}

/// Drop the single leading `/` the Engine puts on container names.
fn strip_name(name: &str) -> String {
    name.strip_prefix('/').unwrap_or(name).to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn from_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::decode(format!("{what}: {e}")))
}
