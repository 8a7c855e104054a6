//! Typed message routing between agents.
//!
//! A published message resolves its recipients through the routing table
//! (message type -> categories); consensus-flagged messages are handed to the
//! [`ConsensusEngine`](crate::consensus::ConsensusEngine) instead. Critical
//! and high priority messages deliver synchronously; medium and low priority
//! messages queue onto an internal FIFO drained by a pump.

use crate::consensus::{ConsensusEngine, ConsensusResult};
use crate::registry::AgentRegistry;
use crate::types::{AgentId, Category, HiveError, MessageId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Delivery priority of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl MessagePriority {
    /// Whether messages at this priority deliver before `publish` returns.
    pub fn is_synchronous(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

/// An immutable message published through the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub message_id: MessageId,

    /// The registered agent that sent this message
    pub sender: AgentId,

    /// The sender's declared category
    pub sender_category: Category,

    /// Routing key looked up in the routing table
    pub message_type: String,

    /// Opaque payload
    pub payload: serde_json::Value,

    /// Delivery priority
    #[serde(default)]
    pub priority: MessagePriority,

    /// Whether publishing must run a consensus poll instead of delivering
    #[serde(default)]
    pub requires_consensus: bool,

    /// Direct address overriding the routing table (used for targeted
    /// messages such as improvement recommendations)
    #[serde(default)]
    pub target_category: Option<Category>,

    /// When the message was constructed
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message.
    pub fn new(
        sender: impl Into<AgentId>,
        sender_category: impl Into<Category>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            sender_category: sender_category.into(),
            message_type: message_type.into(),
            payload,
            priority: MessagePriority::Medium,
            requires_consensus: false,
            target_category: None,
            sent_at: Utc::now(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Flag the message as requiring a consensus poll.
    pub fn with_consensus(mut self) -> Self {
        self.requires_consensus = true;
        self
    }

    /// Address the message directly to a category, bypassing the table.
    pub fn with_target_category(mut self, category: impl Into<Category>) -> Self {
        self.target_category = Some(category.into());
        self
    }

    /// Strategy name proposed in the payload, if any.
    pub fn proposed_strategy(&self) -> Option<&str> {
        self.payload
            .get("strategy")
            .or_else(|| self.payload.get("name"))
            .and_then(|v| v.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.sender.is_empty() {
            return Err(HiveError::MalformedMessage("empty sender".to_string()));
        }
        if self.message_type.is_empty() {
            return Err(HiveError::MalformedMessage(
                "empty message type".to_string(),
            ));
        }
        Ok(())
    }
}

/// A per-agent message callback.
///
/// Handlers run on the publishing (or pump) thread; a panicking handler is
/// isolated to its own recipient and reported in the routing result.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &Message) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// A delivery that failed for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub agent_id: AgentId,
    pub error: String,
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    /// The routed message
    pub message_id: MessageId,

    /// Routing key of the message
    pub message_type: String,

    /// Agents the message was delivered to, in registration order
    pub delivered_to: Vec<AgentId>,

    /// Recipients whose handler failed or panicked
    pub failed: Vec<DeliveryFailure>,

    /// True when the message was queued for asynchronous delivery and has
    /// not been delivered yet
    pub queued: bool,
}

/// What `publish` produced: a delivery result, or a consensus poll outcome
/// for consensus-flagged messages.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Routed(RoutingResult),
    Consensus(ConsensusResult),
}

impl PublishOutcome {
    /// The routing result, if this was a plain delivery.
    pub fn routed(&self) -> Option<&RoutingResult> {
        match self {
            Self::Routed(r) => Some(r),
            Self::Consensus(_) => None,
        }
    }

    /// The consensus result, if a poll ran.
    pub fn consensus(&self) -> Option<&ConsensusResult> {
        match self {
            Self::Consensus(c) => Some(c),
            Self::Routed(_) => None,
        }
    }
}

/// Routes messages to interested agent categories.
pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    consensus: Arc<ConsensusEngine>,
    /// message type -> receiving categories (configuration, not code)
    table: HashMap<String, Vec<Category>>,
    subscribers: RwLock<HashMap<AgentId, Arc<dyn MessageHandler>>>,
    /// FIFO for medium/low priority messages; a single queue preserves
    /// per-sender submission order
    pending: Mutex<VecDeque<Message>>,
    /// Serializes drain-and-deliver so two concurrent flushers cannot
    /// deliver a later batch ahead of an earlier one
    draining: Mutex<()>,
}

impl MessageRouter {
    /// Create a router over a routing table.
    pub fn new(
        registry: Arc<AgentRegistry>,
        consensus: Arc<ConsensusEngine>,
        table: HashMap<String, Vec<Category>>,
    ) -> Self {
        Self {
            registry,
            consensus,
            table,
            subscribers: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            draining: Mutex::new(()),
        }
    }

    /// Attach a handler invoked for every message delivered to `agent_id`.
    pub fn subscribe(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.registry.get(agent_id)?;
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .insert(agent_id.to_string(), handler);
        Ok(())
    }

    /// Publish a message.
    ///
    /// Consensus-flagged messages run a poll and return its result. Critical
    /// and high priority messages deliver before returning; medium and low
    /// priority messages are queued and the result is marked `queued`.
    /// Unroutable message types are not an error: they deliver to nobody.
    pub fn publish(&self, message: Message) -> Result<PublishOutcome> {
        message.validate()?;
        // UnknownSender check
        self.registry.get(&message.sender)?;

        if message.requires_consensus {
            return Ok(PublishOutcome::Consensus(self.consensus.poll(&message)));
        }

        if message.priority.is_synchronous() {
            Ok(PublishOutcome::Routed(self.deliver(&message)))
        } else {
            let result = RoutingResult {
                message_id: message.message_id.clone(),
                message_type: message.message_type.clone(),
                delivered_to: Vec::new(),
                failed: Vec::new(),
                queued: true,
            };
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .push_back(message);
            Ok(PublishOutcome::Routed(result))
        }
    }

    /// Drain the pending queue, delivering in submission order.
    ///
    /// Concurrent callers are serialized: a batch finishes delivering before
    /// the next drain starts, so queue order is preserved end to end.
    pub fn flush_pending(&self) -> Vec<RoutingResult> {
        let _drain = self.draining.lock().expect("drain lock poisoned");
        let drained: Vec<Message> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain(..).collect()
        };

        if !drained.is_empty() {
            tracing::debug!("Delivering {} queued messages", drained.len());
        }
        drained.iter().map(|m| self.deliver(m)).collect()
    }

    /// Number of messages waiting in the queue.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Spawn a background task draining the queue every `interval`.
    pub fn spawn_pump(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                router.flush_pending();
            }
        })
    }

    fn resolve_categories(&self, message: &Message) -> Vec<Category> {
        if let Some(target) = &message.target_category {
            return vec![target.clone()];
        }
        self.table
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default()
    }

    fn deliver(&self, message: &Message) -> RoutingResult {
        let categories = self.resolve_categories(message);
        let mut delivered_to = Vec::new();
        let mut failed = Vec::new();

        // Snapshot recipients and their handlers, then release the lock:
        // handlers are free to call back into the router (subscribe or
        // publish) without deadlocking the delivering thread.
        let recipients: Vec<(AgentId, Option<Arc<dyn MessageHandler>>)> = {
            let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
            self.registry
                .list_active(None)
                .into_iter()
                .filter(|a| categories.contains(&a.category))
                .map(|a| {
                    let handler = subscribers.get(&a.id).cloned();
                    (a.id, handler)
                })
                .collect()
        };

        for (agent_id, handler) in recipients {
            // Delivery timestamp is recorded regardless of handler outcome.
            let _ = self.registry.touch(&agent_id);

            if let Some(handler) = handler {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.on_message(message)
                }));
                match outcome {
                    Ok(Ok(())) => delivered_to.push(agent_id),
                    Ok(Err(e)) => {
                        tracing::warn!("Handler for {} failed: {}", agent_id, e);
                        failed.push(DeliveryFailure {
                            agent_id,
                            error: e.to_string(),
                        });
                    }
                    Err(_) => {
                        tracing::warn!("Handler for {} panicked", agent_id);
                        failed.push(DeliveryFailure {
                            agent_id,
                            error: "handler panicked".to_string(),
                        });
                    }
                }
            } else {
                delivered_to.push(agent_id);
            }
        }

        RoutingResult {
            message_id: message.message_id.clone(),
            message_type: message.message_type.clone(),
            delivered_to,
            failed,
            queued: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiveConfig;
    use crate::knowledge::KnowledgeStore;

    fn router_with(table: HashMap<String, Vec<Category>>) -> (Arc<MessageRouter>, Arc<AgentRegistry>) {
        let config = Arc::new(HiveConfig::default());
        let registry = Arc::new(AgentRegistry::new(config.clone()));
        registry.register("queen", "overseer", 10).unwrap();
        registry.register("opt-1", "optimization", 3).unwrap();
        registry.register("opt-2", "optimization", 4).unwrap();
        registry.register("mon-1", "monitoring", 5).unwrap();

        let knowledge = Arc::new(KnowledgeStore::new(registry.clone(), 0.02));
        let consensus = Arc::new(ConsensusEngine::new(
            registry.clone(),
            knowledge,
            config.consensus_threshold,
        ));
        (
            Arc::new(MessageRouter::new(registry.clone(), consensus, table)),
            registry,
        )
    }

    fn table() -> HashMap<String, Vec<Category>> {
        HashMap::from([(
            "price_change".to_string(),
            vec!["optimization".to_string(), "monitoring".to_string()],
        )])
    }

    #[test]
    fn test_synchronous_delivery_to_matching_categories() {
        let (router, registry) = router_with(table());

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::High),
            )
            .unwrap();

        let result = outcome.routed().unwrap();
        assert_eq!(result.delivered_to, vec!["opt-1", "opt-2", "mon-1"]);
        assert!(!result.queued);
        assert!(registry.get("opt-1").unwrap().last_activity.is_some());
    }

    #[test]
    fn test_unroutable_type_delivers_to_nobody() {
        let (router, _) = router_with(table());

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "unknown_event", serde_json::json!({}))
                    .with_priority(MessagePriority::Critical),
            )
            .unwrap();

        let result = outcome.routed().unwrap();
        assert!(result.delivered_to.is_empty());
        assert!(result.failed.is_empty());
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let (router, _) = router_with(table());
        let err = router
            .publish(Message::new("ghost", "overseer", "price_change", serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, HiveError::AgentNotFound(_)));
    }

    #[test]
    fn test_malformed_message_rejected() {
        let (router, _) = router_with(table());
        let err = router
            .publish(Message::new("queen", "overseer", "", serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, HiveError::MalformedMessage(_)));
    }

    #[test]
    fn test_retired_agents_excluded() {
        let (router, registry) = router_with(table());
        registry
            .set_status("opt-2", crate::types::AgentStatus::Retired)
            .unwrap();

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::High),
            )
            .unwrap();

        assert_eq!(outcome.routed().unwrap().delivered_to, vec!["opt-1", "mon-1"]);
    }

    #[test]
    fn test_low_priority_queues_in_fifo_order() {
        let (router, _) = router_with(table());

        for i in 0..3 {
            let outcome = router
                .publish(
                    Message::new(
                        "queen",
                        "overseer",
                        "price_change",
                        serde_json::json!({"seq": i}),
                    )
                    .with_priority(MessagePriority::Low),
                )
                .unwrap();
            assert!(outcome.routed().unwrap().queued);
        }
        assert_eq!(router.pending_len(), 3);

        let delivered: Vec<RoutingResult> = router.flush_pending();
        assert_eq!(delivered.len(), 3);
        assert!(delivered.iter().all(|r| !r.queued));
        assert_eq!(router.pending_len(), 0);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let (router, _) = router_with(table());

        router
            .subscribe(
                "opt-1",
                Arc::new(|_: &Message| -> anyhow::Result<()> {
                    Err(anyhow::anyhow!("downstream broke"))
                }),
            )
            .unwrap();

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::Critical),
            )
            .unwrap();

        let result = outcome.routed().unwrap();
        // One recipient failed; the others still received the message.
        assert_eq!(result.delivered_to, vec!["opt-2", "mon-1"]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].agent_id, "opt-1");
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let (router, _) = router_with(table());

        router
            .subscribe(
                "opt-1",
                Arc::new(|_: &Message| -> anyhow::Result<()> { panic!("boom") }),
            )
            .unwrap();

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::Critical),
            )
            .unwrap();

        let result = outcome.routed().unwrap();
        assert_eq!(result.delivered_to, vec!["opt-2", "mon-1"]);
        assert_eq!(result.failed[0].error, "handler panicked");
    }

    #[test]
    fn test_target_category_bypasses_table() {
        let (router, _) = router_with(table());

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "improvement_recommendation", serde_json::json!({}))
                    .with_priority(MessagePriority::High)
                    .with_target_category("monitoring"),
            )
            .unwrap();

        assert_eq!(outcome.routed().unwrap().delivered_to, vec!["mon-1"]);
    }

    #[test]
    fn test_handler_may_reenter_router() {
        let (router, _) = router_with(table());

        // A handler that re-subscribes and publishes from inside delivery.
        // Delivery must not hold the subscriber lock across the callback, or
        // both calls would hang.
        let reentrant = Arc::clone(&router);
        router
            .subscribe(
                "opt-1",
                Arc::new(move |_: &Message| -> anyhow::Result<()> {
                    reentrant.subscribe("opt-1", Arc::new(|_: &Message| Ok(())))?;
                    reentrant.publish(
                        Message::new("opt-1", "optimization", "side_note", serde_json::json!({}))
                            .with_priority(MessagePriority::High),
                    )?;
                    Ok(())
                }),
            )
            .unwrap();

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::High),
            )
            .unwrap();

        assert_eq!(
            outcome.routed().unwrap().delivered_to,
            vec!["opt-1", "opt-2", "mon-1"]
        );
    }

    #[test]
    fn test_concurrent_flush_preserves_order() {
        let (router, _) = router_with(table());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router
            .subscribe(
                "mon-1",
                Arc::new(move |msg: &Message| -> anyhow::Result<()> {
                    let seq = msg.payload["seq"].as_u64().unwrap();
                    sink.lock().unwrap().push(seq);
                    Ok(())
                }),
            )
            .unwrap();

        for i in 0..20u64 {
            router
                .publish(
                    Message::new(
                        "queen",
                        "overseer",
                        "price_change",
                        serde_json::json!({"seq": i}),
                    )
                    .with_priority(MessagePriority::Low),
                )
                .unwrap();
        }

        let flushers: Vec<_> = (0..2)
            .map(|_| {
                let router = Arc::clone(&router);
                std::thread::spawn(move || {
                    router.flush_pending();
                })
            })
            .collect();
        for handle in flushers {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..20u64).collect::<Vec<u64>>());
        assert_eq!(router.pending_len(), 0);
    }

    #[test]
    fn test_consensus_flag_delegates_to_poll() {
        let (router, _) = router_with(table());

        let outcome = router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::Critical)
                    .with_consensus(),
            )
            .unwrap();

        let result = outcome.consensus().unwrap();
        assert_eq!(result.votes.len(), 4);
    }

    #[tokio::test]
    async fn test_pump_drains_queue() {
        let (router, _) = router_with(table());

        router
            .publish(
                Message::new("queen", "overseer", "price_change", serde_json::json!({}))
                    .with_priority(MessagePriority::Low),
            )
            .unwrap();
        assert_eq!(router.pending_len(), 1);

        let pump = router.spawn_pump(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(router.pending_len(), 0);
        pump.abort();
    }
}
