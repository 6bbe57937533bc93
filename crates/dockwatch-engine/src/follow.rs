//! Live log subscriptions with automatic reconnection.
//!
//! A [`LogSubscription`] owns a background task that keeps a follow-mode log
//! stream open for one container:
//!
//! ```text
//!   Idle ──▶ Connecting ──▶ Streaming ──┐
//!               ▲                        │ failure / HTTP error / end of body
//!               │                        ▼
//!               └──── backoff ──── Disconnected
//!
//!   any state ──cancel()/drop──▶ Cancelled
//! ```
//!
//! The first attempt requests `tail` lines of backlog; every reconnect asks
//! for `tail=0` so lines already shown are not repeated. Failures are
//! reported as [`FollowEvent::Failed`]; while one is still unread, newer
//! failures replace its message instead of queueing behind it.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use dockwatch_core::prelude::*;
use dockwatch_core::LogChunk;

use crate::api::LogOptions;
use crate::client::{ByteStream, EngineClient};
use crate::log_stream::LogDecoder;

/// Delay between a disconnect and the next attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(600);

/// Backlog requested on the first attempt.
pub const DEFAULT_BACKLOG: u32 = 200;

/// Capacity of the event channel (bounded, log output can be bursty).
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle of a log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Streaming,
    Disconnected,
    Cancelled,
}

/// What a subscription delivers to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    State(SubscriptionState),
    Output(Vec<LogChunk>),
    /// One connection attempt or stream failed; reconnection follows.
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FollowOptions {
    pub backlog: u32,
    pub timestamps: bool,
    pub backoff: Duration,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            timestamps: false,
            backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// What travels over the subscription channel.
#[derive(Debug)]
enum Signal {
    Event(FollowEvent),
    /// A failure is waiting in the shared slot.
    Failure,
}

impl From<FollowEvent> for Signal {
    fn from(event: FollowEvent) -> Self {
        Signal::Event(event)
    }
}

/// Latest unread failure message.
type FailureSlot = Arc<Mutex<Option<String>>>;

// ---------------------------------------------------------------------------
// LogSubscription
// ---------------------------------------------------------------------------

/// Handle to a running log follower.
///
/// Dropping the handle cancels the follower.
pub struct LogSubscription {
    container_id: String,
    events: mpsc::Receiver<Signal>,
    failure: FailureSlot,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<RwLock<SubscriptionState>>,
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("container_id", &self.container_id)
            .field("state", &self.state())
            .finish()
    }
}

impl LogSubscription {
    /// Start following `container_id`.
    pub fn spawn(
        client: EngineClient,
        container_id: impl Into<String>,
        options: FollowOptions,
    ) -> Self {
        let container_id = container_id.into();
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(SubscriptionState::Idle));
        let failure = FailureSlot::default();

        let task = tokio::spawn(run_follow_task(
            client,
            container_id.clone(),
            options,
            Outbox {
                events: events_tx,
                failure: Arc::clone(&failure),
            },
            shutdown_rx,
            Arc::clone(&state),
        ));

        Self {
            container_id,
            events,
            failure,
            shutdown_tx,
            state,
            task: Some(task),
            cancelled: false,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Next event, or `None` once the subscription is cancelled.
    pub async fn next_event(&mut self) -> Option<FollowEvent> {
        if self.cancelled {
            return None;
        }
        self.recv().await
    }

    async fn recv(&mut self) -> Option<FollowEvent> {
        loop {
            match self.events.recv().await? {
                Signal::Event(event) => return Some(event),
                Signal::Failure => {
                    let message = self
                        .failure
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .take();
                    if let Some(message) = message {
                        return Some(FollowEvent::Failed(message));
                    }
                }
            }
        }
    }

    /// Wait for an event, then gather everything else that arrives within
    /// `window`. Consecutive output events are merged into one.
    pub async fn next_batch(&mut self, window: Duration) -> Option<Vec<FollowEvent>> {
        let first = self.next_event().await?;
        let mut batch = vec![first];
        let deadline = Instant::now() + window;

        loop {
            let next = tokio::select! {
                event = self.recv() => event,
                _ = tokio::time::sleep_until(deadline) => break,
            };
            let Some(event) = next else {
                break;
            };
            match event {
                FollowEvent::Output(more) => {
                    if let Some(FollowEvent::Output(existing)) = batch.last_mut() {
                        existing.extend(more);
                    } else {
                        batch.push(FollowEvent::Output(more));
                    }
                }
                other => batch.push(other),
            }
        }

        Some(batch)
    }

    /// Stop following. No further events are delivered after this returns.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let _ = self.shutdown_tx.send(true);
        self.events.close();
        set_state(&self.state, SubscriptionState::Cancelled);
        debug!("Log subscription for {} cancelled", self.container_id);
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// How one streaming connection ended.
enum StreamEnd {
    /// The consumer cancelled or went away.
    Stopped,
    /// The Engine closed the body after sending output.
    Closed,
    /// Transport failure, or the body closed before any output.
    Failed(String),
}

/// Sending half of a subscription.
struct Outbox {
    events: mpsc::Sender<Signal>,
    failure: FailureSlot,
}

impl Outbox {
    /// Store `message` as the latest failure. A marker is queued only when
    /// no earlier failure is still waiting to be read.
    fn record_failure(&self, message: String) -> Option<Signal> {
        let mut slot = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        let pending = slot.replace(message).is_some();
        (!pending).then_some(Signal::Failure)
    }
}

async fn run_follow_task(
    client: EngineClient,
    container_id: String,
    options: FollowOptions,
    outbox: Outbox,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<RwLock<SubscriptionState>>,
) {
    let mut tail = options.backlog;
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        attempt += 1;

        if !transition(&state, &outbox, &mut shutdown_rx, SubscriptionState::Connecting).await
        {
            break;
        }

        debug!(
            "Opening log stream for {} (attempt {}, tail={})",
            container_id, attempt, tail
        );
        let log_options = LogOptions::follow(tail, options.timestamps);
        let opened = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            opened = client.open_log_stream(&container_id, log_options) => opened,
        };
        // Backlog is only wanted once; it is already on screen after this.
        tail = 0;

        let failure = match opened {
            Ok(stream) => {
                if !transition(&state, &outbox, &mut shutdown_rx, SubscriptionState::Streaming)
                    .await
                {
                    break;
                }
                match pump(stream, &outbox, &mut shutdown_rx).await {
                    StreamEnd::Stopped => break,
                    StreamEnd::Closed => {
                        info!("Log stream for {} ended, reconnecting", container_id);
                        None
                    }
                    StreamEnd::Failed(message) => Some(message),
                }
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failure {
            warn!("Log stream for {} failed: {}", container_id, message);
            if let Some(marker) = outbox.record_failure(message) {
                if !emit(&outbox, &mut shutdown_rx, marker).await {
                    break;
                }
            }
        }

        if !transition(&state, &outbox, &mut shutdown_rx, SubscriptionState::Disconnected).await
        {
            break;
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(options.backoff) => {}
        }
    }

    set_state(&state, SubscriptionState::Cancelled);
    debug!("Log follower for {} exiting", container_id);
}

/// Forward one open stream to the consumer until it ends.
async fn pump(
    mut stream: ByteStream,
    outbox: &Outbox,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut decoder = LogDecoder::new();
    let mut received = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return StreamEnd::Stopped,
            next = stream.next_chunk() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                received = true;
                let chunks = decoder.push(&bytes);
                if !chunks.is_empty()
                    && !emit(outbox, shutdown_rx, FollowEvent::Output(chunks)).await
                {
                    return StreamEnd::Stopped;
                }
            }
            Some(Err(e)) => {
                let rest = decoder.finish();
                if !rest.is_empty() && !emit(outbox, shutdown_rx, FollowEvent::Output(rest)).await
                {
                    return StreamEnd::Stopped;
                }
                return StreamEnd::Failed(e.to_string());
            }
            None => {
                let rest = decoder.finish();
                if !rest.is_empty() && !emit(outbox, shutdown_rx, FollowEvent::Output(rest)).await
                {
                    return StreamEnd::Stopped;
                }
                return if received {
                    StreamEnd::Closed
                } else {
                    StreamEnd::Failed("log stream closed by Docker".to_string())
                };
            }
        }
    }
}

/// Deliver an event. Returns `false` if the subscription should stop.
async fn emit(
    outbox: &Outbox,
    shutdown_rx: &mut watch::Receiver<bool>,
    signal: impl Into<Signal>,
) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => false,
        sent = outbox.events.send(signal.into()) => sent.is_ok(),
    }
}

async fn transition(
    state: &RwLock<SubscriptionState>,
    outbox: &Outbox,
    shutdown_rx: &mut watch::Receiver<bool>,
    next: SubscriptionState,
) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    set_state(state, next);
    emit(outbox, shutdown_rx, FollowEvent::State(next)).await
}

fn set_state(state: &RwLock<SubscriptionState>, next: SubscriptionState) {
    let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
    // Cancelled is terminal.
    if *guard != SubscriptionState::Cancelled {
        *guard = next;
    }
}
