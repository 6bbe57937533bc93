//! Container detail view and the log subscriptions it owns
//!
//! Closing or dropping a [`DetailView`] cancels every log subscription it
//! started, so no log stream outlives the view that asked for it.

use std::sync::Arc;

use dockwatch_core::prelude::*;
use dockwatch_core::ContainerDetails;
use dockwatch_engine::{FollowOptions, LogSubscription};

use crate::service::DockerService;

#[derive(Debug)]
pub struct DetailView {
    service: Arc<DockerService>,
    container_id: String,
    details: ContainerDetails,
    subscriptions: Vec<LogSubscription>,
    closed: bool,
}

impl DetailView {
    /// Inspect `container_id` and open a view on it.
    pub async fn open(service: Arc<DockerService>, container_id: impl Into<String>) -> Result<Self> {
        let container_id = container_id.into();
        let details = service.inspect(&container_id).await?;
        debug!("Opened detail view for {}", details.name);
        Ok(Self {
            service,
            container_id,
            details,
            subscriptions: Vec::new(),
            closed: false,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn details(&self) -> &ContainerDetails {
        &self.details
    }

    /// Re-inspect the container. Details are always fetched fresh.
    pub async fn reload(&mut self) -> Result<&ContainerDetails> {
        self.details = self.service.inspect(&self.container_id).await?;
        Ok(&self.details)
    }

    /// Start following this container's logs.
    pub fn follow_logs(&mut self, options: FollowOptions) -> &mut LogSubscription {
        let subscription = self.service.follow_logs(&self.container_id, options);
        self.subscriptions.push(subscription);
        let last = self.subscriptions.len() - 1;
        &mut self.subscriptions[last]
    }

    pub fn subscriptions(&self) -> &[LogSubscription] {
        &self.subscriptions
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel every owned subscription.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for subscription in &mut self.subscriptions {
            subscription.cancel();
        }
        self.subscriptions.clear();
        debug!("Closed detail view for {}", self.container_id);
    }
}

impl Drop for DetailView {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwatch_engine::test_utils::{log_frame, FakeEngine, FakeResponse};
    use dockwatch_engine::{FollowEvent, SubscriptionState};
    use std::time::Duration;

    const INSPECT: &str = r#"{"Id": "aaaaaaaaaaaa1111", "Name": "/web", "Config": {"Image": "nginx:1.25", "Env": ["A=1"]}}"#;

    async fn engine_with_logs() -> FakeEngine {
        let engine = FakeEngine::start().await;
        engine.route("GET", "/containers/web/json", FakeResponse::json(200, INSPECT));
        engine.route(
            "GET",
            "/containers/web/logs",
            FakeResponse::chunked(200, vec![log_frame(1, b"hi\n")]).held_open(),
        );
        engine
    }

    async fn wait_for_output(subscription: &mut LogSubscription) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), subscription.next_event())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, FollowEvent::Output(_)) {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_open_inspects_container() {
        let engine = engine_with_logs().await;
        let service = Arc::new(DockerService::with_endpoint(engine.endpoint()));

        let view = DetailView::open(service, "web").await.unwrap();
        assert_eq!(view.details().name, "web");
        assert_eq!(view.details().env[0].key, "A");
    }

    #[tokio::test]
    async fn test_open_missing_container_fails() {
        let engine = FakeEngine::start().await;
        let service = Arc::new(DockerService::with_endpoint(engine.endpoint()));

        let err = DetailView::open(service, "ghost").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_close_cancels_subscriptions() {
        let engine = engine_with_logs().await;
        let service = Arc::new(DockerService::with_endpoint(engine.endpoint()));
        let mut view = DetailView::open(service, "web").await.unwrap();

        let subscription = view.follow_logs(FollowOptions::default());
        wait_for_output(subscription).await;
        assert_eq!(subscription.state(), SubscriptionState::Streaming);

        view.close();
        assert!(view.is_closed());
        assert!(view.subscriptions().is_empty());
        engine
            .wait_for_closed(1, Duration::from_secs(2))
            .await
            .expect("log stream should close with the view");
    }

    #[tokio::test]
    async fn test_drop_cancels_subscriptions() {
        let engine = engine_with_logs().await;
        let service = Arc::new(DockerService::with_endpoint(engine.endpoint()));
        let mut view = DetailView::open(service, "web").await.unwrap();

        wait_for_output(view.follow_logs(FollowOptions::default())).await;
        wait_for_output(view.follow_logs(FollowOptions::default())).await;
        drop(view);

        engine
            .wait_for_closed(2, Duration::from_secs(2))
            .await
            .expect("both log streams should close when the view is dropped");
    }
}
