//! Pub/sub message broker — channel-scoped event and directed-message delivery.
//!
//! Grounded in the reference implementation's `MessageBroker` /
//! `InMemoryMessageBroker` (`a2a_server.message_broker`), generalized from
//! this crate's existing per-task [`EventQueue`](super::event_queue::EventQueue)
//! broadcast-channel pattern to a channel-keyed registry: a `broadcast`
//! channel per channel name, plus an agent registry table.
//!
//! Channel naming is normalized to `events:<type>` for every backend (the
//! reference implementation's in-memory broker used the raw, unprefixed
//! `<type>` as its dict key while its Redis-backed twin used the prefixed
//! form — the two were never reconciled). Callers pass the bare event type;
//! [`Broker::publish`] and [`Broker::subscribe`] apply the prefix internally,
//! so there is no way to construct the pre-spec inconsistent form by accident.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::A2AResult;
use crate::types::{AgentCard, Message};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default freshness horizon for agent registrations: an entry whose
/// `last_seen` is older than this is excluded from [`Broker::discover_agents`].
pub const DEFAULT_AGENT_FRESHNESS: Duration = Duration::from_secs(90);

/// A single delivered broker event: the channel it arrived on and its payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BrokerEvent {
    /// Fully-qualified channel name, e.g. `events:task.completed`.
    pub channel: String,
    /// Event payload.
    pub data: Value,
}

/// A live subscription to a broker channel.
///
/// Dropping this value does not by itself unsubscribe — the broker has no
/// way to observe a drop on a plain `broadcast::Receiver`. Call
/// [`Broker::unsubscribe`] explicitly, or rely on the broadcast channel's
/// natural behavior of delivering to receivers only while they're held.
pub struct BrokerSubscription {
    /// Identifies this subscription for [`Broker::unsubscribe`].
    pub id: u64,
    /// The channel subscribed to (fully-qualified, `events:<type>`).
    pub channel: String,
    rx: broadcast::Receiver<BrokerEvent>,
}

impl BrokerSubscription {
    /// Receive the next event on this subscription.
    ///
    /// Returns `None` once the channel has been torn down (last unsubscribe).
    pub async fn recv(&mut self) -> Option<BrokerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, missed = n, "broker subscriber lagged, dropping slowest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Prefix a bare event type into its fully-qualified `events:<type>` channel name.
pub fn events_channel(event_type: &str) -> String {
    format!("events:{event_type}")
}

/// The per-task channel name for a given task id.
pub fn task_channel(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// The conventional channel a directed message to `to_agent` is published on.
fn direct_channel(to_agent: &str) -> String {
    format!("events:message.to.{to_agent}")
}

struct ChannelState {
    tx: broadcast::Sender<BrokerEvent>,
    subscriber_count: usize,
}

struct AgentEntry {
    card: AgentCard,
    last_seen: Duration,
}

/// Trait for the pub/sub + agent registry broker.
///
/// Mirrors the reference `MessageBroker` surface: `register_agent`/
/// `unregister_agent`/`discover_agents`/`get_agent`/`publish_event`/
/// `publish_message`/`subscribe_to_events`/`unsubscribe_from_events`,
/// renamed to idiomatic Rust names.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `data` to every subscriber of `events:<event_type>`.
    ///
    /// A no-op (not an error) if the channel has no subscribers.
    async fn publish(&self, event_type: &str, data: Value) -> A2AResult<()>;

    /// Subscribe to a channel (bare event type — the `events:` prefix is
    /// applied internally). Returns a [`BrokerSubscription`] the caller
    /// polls with [`BrokerSubscription::recv`].
    async fn subscribe(&self, event_type: &str) -> A2AResult<BrokerSubscription>;

    /// Subscribe to an already-fully-qualified channel name (used for
    /// `task:<id>` channels and the `events:*` monitor firehose).
    async fn subscribe_channel(&self, channel: &str) -> A2AResult<BrokerSubscription>;

    /// Publish to an already-fully-qualified channel name (used for
    /// `task:<id>` channels, e.g. worker-pushed output chunks).
    async fn publish_to_channel(&self, channel: &str, data: Value) -> A2AResult<()>;

    /// Tear down a subscription. Idempotent — unsubscribing an unknown id
    /// on a known channel, or any id on an unknown channel, is a no-op.
    async fn unsubscribe(&self, subscription: BrokerSubscription) -> A2AResult<()>;

    /// Translate a directed message into an event on the conventional
    /// `events:message.to.<agent>` channel.
    async fn send(&self, to_agent: &str, message: Message) -> A2AResult<()>;

    /// Register (or refresh) an agent in the discovery table. Publishes
    /// `agent.registered`.
    async fn register_agent(&self, card: AgentCard) -> A2AResult<()>;

    /// Remove an agent from the discovery table. Publishes `agent.unregistered`.
    async fn unregister_agent(&self, name: &str) -> A2AResult<()>;

    /// Refresh an agent's `last_seen` heartbeat without re-publishing its card.
    async fn touch_agent(&self, name: &str) -> A2AResult<()>;

    /// List registered agents whose `last_seen` is within the freshness horizon.
    async fn discover_agents(&self) -> A2AResult<Vec<AgentCard>>;

    /// Look up a single agent by name, regardless of freshness.
    async fn get_agent(&self, name: &str) -> A2AResult<Option<AgentCard>>;

    /// Subscribe to every event published through this broker, regardless of
    /// channel — a firehose tap for monitoring/dashboard use, distinct from
    /// the per-channel `subscribe`.
    async fn subscribe_monitor(&self) -> BrokerSubscription;
}

/// In-process broker backed by one `broadcast` channel per channel name.
///
/// Per-publisher FIFO within a channel falls directly out of `broadcast`'s
/// single ordered queue — the same guarantee this crate's per-task
/// [`EventQueue`](super::event_queue::EventQueue) already relies on, reused
/// here rather than reimplemented.
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, ChannelState>>,
    agents: RwLock<HashMap<String, AgentEntry>>,
    freshness: Duration,
    next_sub_id: std::sync::atomic::AtomicU64,
    monitor_tx: broadcast::Sender<BrokerEvent>,
}

impl InMemoryBroker {
    /// Create a new broker with the default agent-freshness horizon (90s).
    pub fn new() -> Self {
        Self::with_freshness(DEFAULT_AGENT_FRESHNESS)
    }

    /// Create a new broker with a custom agent-freshness horizon.
    pub fn with_freshness(freshness: Duration) -> Self {
        let (monitor_tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            channels: Mutex::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            freshness,
            next_sub_id: std::sync::atomic::AtomicU64::new(1),
            monitor_tx,
        }
    }

    async fn publish_channel(&self, channel: &str, data: Value) -> A2AResult<()> {
        let channels = self.channels.lock().await;
        let event = BrokerEvent {
            channel: channel.to_string(),
            data,
        };
        let _ = self.monitor_tx.send(event.clone());

        let Some(state) = channels.get(channel) else {
            debug!(channel, "publish to channel with no subscribers, dropping");
            return Ok(());
        };

        match state.tx.send(event) {
            Ok(count) => debug!(channel, subscribers = count, "published broker event"),
            Err(_) => debug!(channel, "publish to channel with no live receivers"),
        }
        Ok(())
    }

    async fn subscribe_internal(&self, channel: &str) -> BrokerSubscription {
        let mut channels = self.channels.lock().await;
        let state = channels.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel, "starting channel — first subscriber");
            let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
            ChannelState {
                tx,
                subscriber_count: 0,
            }
        });
        state.subscriber_count += 1;
        let rx = state.tx.subscribe();
        let id = self
            .next_sub_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        BrokerSubscription {
            id,
            channel: channel.to_string(),
            rx,
        }
    }

    fn now() -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, event_type: &str, data: Value) -> A2AResult<()> {
        self.publish_channel(&events_channel(event_type), data).await
    }

    async fn subscribe(&self, event_type: &str) -> A2AResult<BrokerSubscription> {
        self.subscribe_channel(&events_channel(event_type)).await
    }

    async fn subscribe_channel(&self, channel: &str) -> A2AResult<BrokerSubscription> {
        Ok(self.subscribe_internal(channel).await)
    }

    async fn publish_to_channel(&self, channel: &str, data: Value) -> A2AResult<()> {
        self.publish_channel(channel, data).await
    }

    async fn unsubscribe(&self, subscription: BrokerSubscription) -> A2AResult<()> {
        let mut channels = self.channels.lock().await;
        if let Some(state) = channels.get_mut(&subscription.channel) {
            state.subscriber_count = state.subscriber_count.saturating_sub(1);
            if state.subscriber_count == 0 {
                debug!(channel = %subscription.channel, "last unsubscribe, tearing down channel");
                channels.remove(&subscription.channel);
            }
        }
        // Unknown channel / already-removed: idempotent no-op.
        Ok(())
    }

    async fn send(&self, to_agent: &str, message: Message) -> A2AResult<()> {
        let data = serde_json::to_value(&message)
            .map_err(|e| crate::error::A2AError::internal_error(e.to_string()))?;
        self.publish_channel(&direct_channel(to_agent), data).await
    }

    async fn register_agent(&self, card: AgentCard) -> A2AResult<()> {
        let name = card.name.clone();
        {
            let mut agents = self.agents.write().await;
            agents.insert(
                name.clone(),
                AgentEntry {
                    card: card.clone(),
                    last_seen: Self::now(),
                },
            );
        }
        self.publish(
            "agent.registered",
            serde_json::json!({"name": name}),
        )
        .await
    }

    async fn unregister_agent(&self, name: &str) -> A2AResult<()> {
        {
            let mut agents = self.agents.write().await;
            agents.remove(name);
        }
        self.publish(
            "agent.unregistered",
            serde_json::json!({"name": name}),
        )
        .await
    }

    async fn touch_agent(&self, name: &str) -> A2AResult<()> {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(name) {
            entry.last_seen = Self::now();
        }
        Ok(())
    }

    async fn discover_agents(&self) -> A2AResult<Vec<AgentCard>> {
        let now = Self::now();
        let agents = self.agents.read().await;
        Ok(agents
            .values()
            .filter(|entry| now.saturating_sub(entry.last_seen) <= self.freshness)
            .map(|entry| entry.card.clone())
            .collect())
    }

    async fn get_agent(&self, name: &str) -> A2AResult<Option<AgentCard>> {
        let agents = self.agents.read().await;
        Ok(agents.get(name).map(|entry| entry.card.clone()))
    }

    async fn subscribe_monitor(&self) -> BrokerSubscription {
        let id = self
            .next_sub_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        BrokerSubscription {
            id,
            channel: "*".to_string(),
            rx: self.monitor_tx.subscribe(),
        }
    }
}

/// Shared handle to a broker, convenient for wiring into axum state.
pub type SharedBroker = Arc<dyn Broker>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentCapabilities, AgentCard};

    fn test_card(name: &str) -> AgentCard {
        AgentCard {
            name: name.to_string(),
            description: "test agent".to_string(),
            version: "1.0".to_string(),
            supported_interfaces: vec![],
            provider: None,
            documentation_url: None,
            capabilities: AgentCapabilities::default(),
            security_schemes: None,
            security_requirements: vec![],
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills: vec![],
            signatures: None,
            icon_url: None,
            additional_interfaces: None,
            preferred_transport: None,
            protocol_version: None,
            url: "http://localhost".to_string(),
            supports_authenticated_extended_card: None,
            security: None,
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_is_not_an_error() {
        let broker = InMemoryBroker::new();
        let result = broker.publish("task.completed", serde_json::json!({"ok": true})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn per_publisher_fifo_order_preserved() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("orders").await.unwrap();

        for i in 0..100 {
            broker.publish("orders", serde_json::json!({"seq": i})).await.unwrap();
        }

        for expected in 0..100 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.data["seq"], expected);
        }
    }

    #[tokio::test]
    async fn fan_out_to_multiple_subscribers() {
        let broker = InMemoryBroker::new();
        let mut s1 = broker.subscribe("task.completed").await.unwrap();
        let mut s2 = broker.subscribe("task.completed").await.unwrap();
        let mut s3 = broker.subscribe("task.completed").await.unwrap();

        broker
            .publish("task.completed", serde_json::json!({"task_id": "t1"}))
            .await
            .unwrap();

        for sub in [&mut s1, &mut s2, &mut s3] {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.channel, "events:task.completed");
            assert_eq!(event.data["task_id"], "t1");
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe("chatter").await.unwrap();
        broker.unsubscribe(sub).await.unwrap();

        // Unsubscribing again with a fabricated (already-removed) channel is a no-op.
        let sub2 = broker.subscribe("chatter").await.unwrap();
        broker.unsubscribe(sub2).await.unwrap();
        broker.publish("chatter", serde_json::json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn register_agent_publishes_and_is_discoverable() {
        let broker = InMemoryBroker::new();
        let mut events = broker.subscribe("agent.registered").await.unwrap();

        broker.register_agent(test_card("alice")).await.unwrap();

        let evt = events.recv().await.unwrap();
        assert_eq!(evt.data["name"], "alice");

        let discovered = broker.discover_agents().await.unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].name, "alice");
    }

    #[tokio::test]
    async fn stale_agent_excluded_from_discovery() {
        let broker = InMemoryBroker::with_freshness(Duration::from_millis(0));
        broker.register_agent(test_card("bob")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let discovered = broker.discover_agents().await.unwrap();
        assert!(discovered.is_empty());
        // get_agent ignores freshness.
        assert!(broker.get_agent("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn directed_message_lands_on_conventional_channel() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe_channel("events:message.to.bob").await.unwrap();

        let message = Message {
            message_id: "m1".to_string(),
            role: crate::types::Role::Agent,
            kind: "message".to_string(),
            parts: vec![crate::types::Part::text("hi bob")],
            context_id: None,
            task_id: None,
            metadata: None,
            extensions: None,
            reference_task_ids: None,
        };
        broker.send("bob", message).await.unwrap();

        let evt = sub.recv().await.unwrap();
        assert_eq!(evt.data["message_id"], "m1");
    }
}
