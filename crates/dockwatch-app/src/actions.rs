//! ActionDispatcher - mutations with read-after-write refresh
//!
//! Every action is a single POST or DELETE. On success the collection the
//! action touched is re-fetched in full; on failure the error is published
//! once and returned, and nothing is re-fetched.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use dockwatch_core::prelude::*;
use dockwatch_engine::{ContainerAction, PruneReport};

use crate::service::DockerService;
use crate::state::Collection;

/// A mutation the user can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Container { id: String, action: ContainerAction },
    RemoveContainer { id: String, force: bool },
    RemoveImage { id: String, force: bool },
    RemoveVolume { name: String },
    PruneVolumes,
    RemoveNetwork { id: String },
}

impl Action {
    /// Collection re-fetched after the action succeeds.
    pub fn affects(&self) -> Collection {
        match self {
            Action::Container { .. } | Action::RemoveContainer { .. } => Collection::Containers,
            Action::RemoveImage { .. } => Collection::Images,
            Action::RemoveVolume { .. } | Action::PruneVolumes => Collection::Volumes,
            Action::RemoveNetwork { .. } => Collection::Networks,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Container { id, action } => write!(f, "{action} container {id}"),
            Action::RemoveContainer { id, force } => {
                write!(f, "remove container {id}{}", if *force { " (force)" } else { "" })
            }
            Action::RemoveImage { id, force } => {
                write!(f, "remove image {id}{}", if *force { " (force)" } else { "" })
            }
            Action::RemoveVolume { name } => write!(f, "remove volume {name}"),
            Action::PruneVolumes => f.write_str("prune volumes"),
            Action::RemoveNetwork { id } => write!(f, "remove network {id}"),
        }
    }
}

/// What a successful action produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    Done,
    Pruned(PruneReport),
}

/// Issues actions against the engine and keeps the published state current.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    service: Arc<DockerService>,
}

impl ActionDispatcher {
    pub fn new(service: Arc<DockerService>) -> Self {
        Self { service }
    }

    pub async fn dispatch(&self, action: Action) -> Result<ActionOutcome> {
        let client = self.service.client();
        let result = match &action {
            Action::Container { id, action } => client
                .container_action(id, *action)
                .await
                .map(|_| ActionOutcome::Done),
            Action::RemoveContainer { id, force } => client
                .remove_container(id, *force)
                .await
                .map(|_| ActionOutcome::Done),
            Action::RemoveImage { id, force } => client
                .remove_image(id, *force)
                .await
                .map(|_| ActionOutcome::Done),
            Action::RemoveVolume { name } => client
                .remove_volume(name)
                .await
                .map(|_| ActionOutcome::Done),
            Action::PruneVolumes => client.prune_volumes().await.map(ActionOutcome::Pruned),
            Action::RemoveNetwork { id } => client
                .remove_network(id)
                .await
                .map(|_| ActionOutcome::Done),
        };

        match result {
            Ok(outcome) => {
                info!("Action succeeded: {}", action);
                // The refresh publishes its own error; the action still succeeded.
                if let Err(e) = self.service.refresh(action.affects()).await {
                    debug!("Refresh after {} failed: {}", action, e);
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!("Action failed: {}: {}", action, e);
                self.service.record_error(&e);
                Err(e)
            }
        }
    }

    pub async fn start(&self, id: &str) -> Result<ActionOutcome> {
        self.container(id, ContainerAction::Start).await
    }

    pub async fn stop(&self, id: &str) -> Result<ActionOutcome> {
        self.container(id, ContainerAction::Stop).await
    }

    pub async fn restart(&self, id: &str) -> Result<ActionOutcome> {
        self.container(id, ContainerAction::Restart).await
    }

    pub async fn kill(&self, id: &str) -> Result<ActionOutcome> {
        self.container(id, ContainerAction::Kill).await
    }

    async fn container(&self, id: &str, action: ContainerAction) -> Result<ActionOutcome> {
        self.dispatch(Action::Container {
            id: id.to_string(),
            action,
        })
        .await
    }
}
