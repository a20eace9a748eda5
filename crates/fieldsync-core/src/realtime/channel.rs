//! Topic-multiplexed realtime channel.
//!
//! One socket carries every topic. Consumers register per topic and get a
//! [`Subscription`] handle; the server is told to subscribe when a topic
//! gains its first consumer and to unsubscribe when it loses its last. The
//! run loop owns the connection: it reconnects with backoff, re-sends the
//! active topics on every new connection, and pings to detect dead links.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, ReconnectPolicy};
use super::connector::{ChannelError, Connector};
use super::message::{ClientMessage, EventKind, ServerEvent};

// ============================================================================
// Constants
// ============================================================================

/// How often a ping is sent on an idle connection.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 25;

/// How long to wait for a pong before treating the link as dead.
pub const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;

pub type Consumer = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            pong_timeout: Duration::from_secs(DEFAULT_PONG_TIMEOUT_SECS),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Default)]
struct Registry {
    topics: BTreeMap<String, Vec<(u64, Consumer)>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Registry {
    /// Send on the current link, if any. Returns false when the link is gone.
    fn send(&mut self, message: ClientMessage) -> bool {
        let Some(tx) = &self.outbound else {
            return false;
        };
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode control message");
                return true;
            }
        };
        if tx.send(frame).is_err() {
            self.outbound = None;
            return false;
        }
        true
    }
}

struct ChannelInner {
    registry: Mutex<Registry>,
    state: watch::Sender<ChannelState>,
    closed: watch::Sender<bool>,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl ChannelInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Channel state changed");
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut registry = self.registry();
        let Some(consumers) = registry.topics.get_mut(topic) else {
            return;
        };
        consumers.retain(|(cid, _)| *cid != id);
        if consumers.is_empty() {
            registry.topics.remove(topic);
            registry.send(ClientMessage::Unsubscribe {
                topic: topic.to_string(),
            });
            debug!(topic = %topic, "Last consumer left, unsubscribed");
        }
    }

    /// Install a fresh link and re-send every active topic on it.
    fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        {
            let mut registry = self.registry();
            registry.outbound = Some(outbound);
            let topics: Vec<String> = registry.topics.keys().cloned().collect();
            for topic in topics {
                registry.send(ClientMessage::Subscribe { topic });
            }
        }
        self.set_state(ChannelState::Connected);
    }

    fn detach(&self) {
        self.registry().outbound = None;
    }

    /// Route one inbound frame. Returns true for a pong.
    fn dispatch(&self, text: &str) -> bool {
        let Some(event) = ServerEvent::parse(text) else {
            debug!(len = text.len(), "Dropping malformed realtime message");
            return false;
        };
        if event.kind.is_control() {
            debug!(kind = ?event.kind, status = ?event.status, "Control message");
            return event.kind == EventKind::Pong;
        }
        let Some(topic) = event.topic.as_deref() else {
            debug!(kind = ?event.kind, "Dropping event without a topic");
            return false;
        };
        let consumers: Vec<Consumer> = self
            .registry()
            .topics
            .get(topic)
            .map(|list| list.iter().map(|(_, c)| Arc::clone(c)).collect())
            .unwrap_or_default();
        for consumer in consumers {
            consumer(&event);
        }
        false
    }
}

enum LinkEnd {
    Closed,
    Lost(&'static str),
}

/// Shared handle to one realtime connection. Clones refer to the same channel.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl Default for RealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeChannel {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ChannelInner {
                registry: Mutex::new(Registry::default()),
                state,
                closed,
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Topics with at least one consumer.
    pub fn active_topics(&self) -> Vec<String> {
        self.inner.registry().topics.keys().cloned().collect()
    }

    /// Register `consumer` for events on `topic`.
    ///
    /// Works before the channel is connected; the topic is sent to the
    /// server once a connection comes up.
    pub fn subscribe<F>(&self, topic: &str, consumer: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.inner.registry();
        let consumers = registry.topics.entry(topic.to_string()).or_default();
        let first = consumers.is_empty();
        consumers.push((id, Arc::new(consumer)));
        if first {
            registry.send(ClientMessage::Subscribe {
                topic: topic.to_string(),
            });
            debug!(topic = %topic, "First consumer, subscribed");
        }
        Subscription {
            channel: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id: Some(id),
        }
    }

    /// Start the connection loop.
    ///
    /// The task ends with `Ok(())` after [`close`](Self::close), or with
    /// [`ChannelError::ReconnectExhausted`] when the policy runs out of attempts.
    pub fn connect<C: Connector>(
        &self,
        connector: C,
        config: ChannelConfig,
    ) -> Result<JoinHandle<Result<(), ChannelError>>, ChannelError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyRunning);
        }
        self.inner.closed.send_replace(false);
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            let result = run(&inner, connector, config).await;
            inner.detach();
            inner.set_state(ChannelState::Disconnected);
            inner.running.store(false, Ordering::SeqCst);
            result
        }))
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
        self.inner.detach();
        info!("Realtime channel closed");
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn run<C: Connector>(
    inner: &Arc<ChannelInner>,
    connector: C,
    config: ChannelConfig,
) -> Result<(), ChannelError> {
    let mut backoff = Backoff::new(config.reconnect.clone());
    inner.set_state(ChannelState::Connecting);

    loop {
        if inner.is_closed() {
            return Ok(());
        }

        let attempt = tokio::select! {
            link = connector.connect(&config.url) => link,
            _ = wait_closed(inner.closed.subscribe()) => return Ok(()),
        };

        match attempt {
            Ok(link) => {
                if inner.is_closed() {
                    return Ok(());
                }
                backoff.reset();
                inner.attach(link.outbound);
                info!(url = %config.url, "Realtime channel connected");

                let end = pump(inner, link.inbound, &config).await;
                inner.detach();
                match end {
                    LinkEnd::Closed => return Ok(()),
                    LinkEnd::Lost(reason) => warn!(reason, "Realtime connection lost"),
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = backoff.attempts() + 1, "Realtime connect failed")
            }
        }

        if inner.is_closed() {
            return Ok(());
        }
        inner.set_state(ChannelState::Reconnecting);
        let Some(delay) = backoff.next_delay() else {
            let attempts = backoff.attempts();
            error!(attempts, "Giving up on realtime connection");
            return Err(ChannelError::ReconnectExhausted { attempts });
        };
        debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_closed(inner.closed.subscribe()) => return Ok(()),
        }
    }
}

/// Drive one connection until it drops, goes quiet, or the channel is closed.
async fn pump(
    inner: &ChannelInner,
    mut inbound: mpsc::UnboundedReceiver<String>,
    config: &ChannelConfig,
) -> LinkEnd {
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(text) => {
                    if inner.dispatch(&text) {
                        pong_deadline = None;
                    }
                }
                None => return LinkEnd::Lost("connection closed"),
            },
            _ = ping.tick() => {
                if !inner.registry().send(ClientMessage::Ping) {
                    return LinkEnd::Lost("send failed");
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + config.pong_timeout);
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                return LinkEnd::Lost("no pong before timeout");
            }
            _ = wait_closed(inner.closed.subscribe()) => return LinkEnd::Closed,
        }
    }
}

/// Handle for one registered consumer.
///
/// Dropping the handle unsubscribes, as does calling [`unsubscribe`](Self::unsubscribe).
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    channel: Weak<ChannelInner>,
    topic: String,
    id: Option<u64>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(inner) = self.channel.upgrade() {
            inner.remove(&self.topic, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.id.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
