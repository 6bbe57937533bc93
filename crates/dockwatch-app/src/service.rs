//! DockerService - the single writer of published engine state
//!
//! All reads from the engine go through this type. Each completed operation
//! publishes a fresh [`EngineSnapshot`] on a `watch` channel; consumers call
//! [`DockerService::subscribe`] and only ever see whole snapshots.
//!
//! Refreshes of the same collection are last-write-wins: if two overlap, the
//! one that completes last is what stays published.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use dockwatch_core::prelude::*;
use dockwatch_core::{Backend, BackendPreference, ContainerDetails, LogChunk};
use dockwatch_engine::{
    docker_host_from_env, EndpointSlot, EngineClient, FollowOptions, LogOptions, LogSubscription,
    ResolverEnv, SocketResolver,
};

use crate::config::BackendSettings;
use crate::state::{Collection, EngineSnapshot};

pub struct DockerService {
    client: EngineClient,
    resolver: SocketResolver,
    settings: RwLock<BackendSettings>,
    env_override: Option<String>,
    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
}

impl std::fmt::Debug for DockerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerService")
            .field("backend", &self.client.endpoint().backend())
            .finish_non_exhaustive()
    }
}

impl DockerService {
    pub fn new(
        settings: BackendSettings,
        resolver: SocketResolver,
        env_override: Option<String>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(EngineSnapshot::default()));
        Self {
            client: EngineClient::new(EndpointSlot::new()),
            resolver,
            settings: RwLock::new(settings),
            env_override,
            snapshot_tx,
        }
    }

    /// A service for this machine: system socket locations and `DOCKER_HOST`.
    pub fn from_system(settings: BackendSettings) -> Self {
        Self::new(
            settings,
            SocketResolver::new(ResolverEnv::from_system()),
            docker_host_from_env(),
        )
    }

    /// A service bound to an already known endpoint, skipping discovery.
    pub fn with_endpoint(endpoint: EndpointSlot) -> Self {
        let service = Self::new(BackendSettings::default(), SocketResolver::default(), None);
        let current = endpoint.current();
        let service = Self {
            client: EngineClient::new(endpoint),
            ..service
        };
        service.publish(|s| {
            s.backend = current
                .as_ref()
                .map(|e| e.backend)
                .unwrap_or(Backend::Unavailable);
            s.endpoint = current;
        });
        service
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn backend_settings(&self) -> BackendSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ─────────────────────────────────────────────────────────
    // Backend selection
    // ─────────────────────────────────────────────────────────

    /// Re-run socket discovery and publish the outcome.
    pub fn resolve(&self) -> Backend {
        let settings = self.backend_settings();
        let resolved = self.client.endpoint().resolve_with(
            &self.resolver,
            settings.preference,
            settings.custom_socket.as_deref(),
            self.env_override.as_deref(),
        );

        let backend = resolved
            .as_ref()
            .map(|e| e.backend)
            .unwrap_or(Backend::Unavailable);
        self.publish(|s| {
            s.backend = backend;
            s.endpoint = resolved;
            if !backend.is_available() {
                s.info = None;
                s.version = None;
            }
        });
        backend
    }

    pub fn set_backend_preference(&self, preference: BackendPreference) -> Backend {
        {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            settings.preference = preference;
        }
        info!("Backend preference set to {}", preference);
        self.resolve()
    }

    pub fn set_custom_socket(&self, path: Option<PathBuf>) -> Backend {
        {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            settings.custom_socket = path;
        }
        self.resolve()
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    /// Resolve, then fetch engine metadata and every collection concurrently.
    ///
    /// Every part is attempted; the first error is returned.
    pub async fn refresh_all(&self) -> Result<()> {
        self.publish(|s| s.last_error = None);
        if !self.resolve().is_available() {
            let err = Error::SocketUnavailable;
            self.publish(|s| {
                for collection in Collection::ALL {
                    s.clear(collection);
                }
                s.last_error = Some(err.to_string());
            });
            return Err(err);
        }

        let (engine, containers, images, volumes, networks) = tokio::join!(
            self.refresh_engine(),
            self.refresh(Collection::Containers),
            self.refresh(Collection::Images),
            self.refresh(Collection::Volumes),
            self.refresh(Collection::Networks),
        );
        engine
            .and(containers)
            .and(images)
            .and(volumes)
            .and(networks)
    }

    /// Fetch `/info` and `/version` together.
    pub async fn refresh_engine(&self) -> Result<()> {
        let (info, version) = tokio::join!(self.client.info(), self.client.version());
        match (info, version) {
            (Ok(info), Ok(version)) => {
                self.publish(|s| {
                    s.info = Some(info);
                    s.version = Some(version);
                });
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Engine metadata refresh failed: {}", e);
                let message = e.to_string();
                self.publish(|s| {
                    s.info = None;
                    s.version = None;
                    s.last_error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Re-fetch one collection. On failure the collection is emptied and the
    /// error published.
    pub async fn refresh(&self, collection: Collection) -> Result<()> {
        let outcome = match collection {
            Collection::Containers => self
                .client
                .list_containers(true)
                .await
                .map(|list| Box::new(move |s: &mut EngineSnapshot| s.containers = list) as Apply),
            Collection::Images => self
                .client
                .list_images()
                .await
                .map(|list| Box::new(move |s: &mut EngineSnapshot| s.images = list) as Apply),
            Collection::Volumes => self
                .client
                .list_volumes()
                .await
                .map(|list| Box::new(move |s: &mut EngineSnapshot| s.volumes = list) as Apply),
            Collection::Networks => self
                .client
                .list_networks()
                .await
                .map(|list| Box::new(move |s: &mut EngineSnapshot| s.networks = list) as Apply),
        };

        match outcome {
            Ok(apply) => {
                self.publish(apply);
                debug!("Refreshed {}", collection);
                Ok(())
            }
            Err(e) => {
                warn!("Refreshing {} failed: {}", collection, e);
                let message = e.to_string();
                self.publish(|s| {
                    s.clear(collection);
                    s.last_error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Inspect one container. Details are returned, never cached.
    pub async fn inspect(&self, id: &str) -> Result<ContainerDetails> {
        self.client
            .inspect_container(id)
            .await
            .inspect_err(|e| self.record_error(e))
    }

    /// One-shot log fetch.
    pub async fn fetch_logs(&self, id: &str, options: LogOptions) -> Result<Vec<LogChunk>> {
        self.client
            .fetch_logs(id, options)
            .await
            .inspect_err(|e| self.record_error(e))
    }

    /// Start a reconnecting log follower. The caller owns the subscription.
    pub fn follow_logs(&self, id: &str, options: FollowOptions) -> LogSubscription {
        LogSubscription::spawn(self.client.clone(), id, options)
    }

    pub fn clear_error(&self) {
        self.publish(|s| s.last_error = None);
    }

    // ─────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────

    pub(crate) fn record_error(&self, err: &Error) {
        let message = err.to_string();
        self.publish(|s| s.last_error = Some(message));
    }

    /// Apply `update` to a copy of the current snapshot and publish it.
    pub(crate) fn publish(&self, update: impl FnOnce(&mut EngineSnapshot)) {
        self.snapshot_tx.send_modify(|current| {
            let mut next = EngineSnapshot::clone(current);
            update(&mut next);
            *current = Arc::new(next);
        });
    }
}

type Apply = Box<dyn FnOnce(&mut EngineSnapshot) + Send>;
