//! Published engine state

use std::fmt;

use serde::Serialize;

use dockwatch_core::{
    Backend, Container, EngineInfo, EngineVersion, Image, Network, ResolvedEndpoint, Volume,
};

/// A list the service keeps in its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Containers,
    Images,
    Volumes,
    Networks,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Containers,
        Collection::Images,
        Collection::Volumes,
        Collection::Networks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Containers => "containers",
            Collection::Images => "images",
            Collection::Volumes => "volumes",
            Collection::Networks => "networks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of everything known about the engine.
///
/// A new snapshot is published for every change; readers never observe a
/// partially applied update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub backend: Backend,
    pub endpoint: Option<ResolvedEndpoint>,
    pub info: Option<EngineInfo>,
    pub version: Option<EngineVersion>,
    pub containers: Vec<Container>,
    pub images: Vec<Image>,
    pub volumes: Vec<Volume>,
    pub networks: Vec<Network>,
    /// Most recent surfaced error message.
    pub last_error: Option<String>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            backend: Backend::Unavailable,
            endpoint: None,
            info: None,
            version: None,
            containers: Vec::new(),
            images: Vec::new(),
            volumes: Vec::new(),
            networks: Vec::new(),
            last_error: None,
        }
    }
}

impl EngineSnapshot {
    pub fn running_containers(&self) -> usize {
        self.containers.iter().filter(|c| c.is_running()).count()
    }

    pub fn container(&self, id_or_name: &str) -> Option<&Container> {
        self.containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name || c.id.starts_with(id_or_name))
    }

    pub fn len_of(&self, collection: Collection) -> usize {
        match collection {
            Collection::Containers => self.containers.len(),
            Collection::Images => self.images.len(),
            Collection::Volumes => self.volumes.len(),
            Collection::Networks => self.networks.len(),
        }
    }

    /// Empty one collection, used when fetching it failed.
    pub(crate) fn clear(&mut self, collection: Collection) {
        match collection {
            Collection::Containers => self.containers.clear(),
            Collection::Images => self.images.clear(),
            Collection::Volumes => self.volumes.clear(),
            Collection::Networks => self.networks.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn container(id: &str, name: &str, state: &str) -> Container {
        Container {
            id: id.to_string(),
            name: name.to_string(),
            image: "img".to_string(),
            state: state.to_string(),
            status: String::new(),
            created: None,
            ports: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_snapshot_is_unavailable() {
        let snapshot = EngineSnapshot::default();
        assert_eq!(snapshot.backend, Backend::Unavailable);
        assert_eq!(snapshot.len_of(Collection::Containers), 0);
    }

    #[test]
    fn test_container_lookup() {
        let snapshot = EngineSnapshot {
            containers: vec![
                container("abc123", "web", "running"),
                container("def456", "db", "exited"),
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.running_containers(), 1);
        assert_eq!(snapshot.container("db").unwrap().id, "def456");
        assert_eq!(snapshot.container("abc").unwrap().name, "web");
        assert!(snapshot.container("zzz").is_none());
    }

    #[test]
    fn test_clear_collection() {
        let mut snapshot = EngineSnapshot {
            containers: vec![container("a", "a", "running")],
            ..Default::default()
        };
        snapshot.clear(Collection::Containers);
        assert!(snapshot.containers.is_empty());
    }
}
