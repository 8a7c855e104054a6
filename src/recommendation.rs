//! Performance-feedback loop: detect declining agents and recommend
//! peer-proven strategies they have not tried yet.

use crate::knowledge::KnowledgeStore;
use crate::performance::{PerformanceTracker, Trend};
use crate::registry::AgentRegistry;
use crate::routing::{Message, MessagePriority, MessageRouter, PublishOutcome};
use crate::types::{AgentId, Category, EntryId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A recommendation issued during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// The declining agent
    pub agent_id: AgentId,

    /// The category the recommendation message was addressed to
    pub category: Category,

    /// The metric that is declining
    pub metric: String,

    /// Name of the recommended strategy
    pub strategy: String,

    /// The knowledge entry the strategy came from
    pub entry_id: EntryId,

    /// The routed recommendation message
    pub message_id: MessageId,

    /// When the recommendation was issued
    pub issued_at: DateTime<Utc>,
}

/// Scans performance trends and routes improvement recommendations.
pub struct RecommendationEngine {
    registry: Arc<AgentRegistry>,
    knowledge: Arc<KnowledgeStore>,
    tracker: Arc<PerformanceTracker>,
    router: Arc<MessageRouter>,
    /// Minimum samples a metric needs before it is considered
    min_samples: usize,
    /// Non-blocking overlap guard: a sweep in progress makes new sweeps no-ops
    sweeping: AtomicBool,
}

impl RecommendationEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        knowledge: Arc<KnowledgeStore>,
        tracker: Arc<PerformanceTracker>,
        router: Arc<MessageRouter>,
        min_samples: usize,
    ) -> Self {
        Self {
            registry,
            knowledge,
            tracker,
            router,
            min_samples,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Scan every active agent's metrics and issue recommendations for
    /// declining ones.
    ///
    /// Returns the recommendations issued this sweep; empty when nothing
    /// declined, no untried strategy exists, or another sweep is running.
    pub fn sweep(&self) -> Vec<Recommendation> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sweep already in progress, skipping");
            return Vec::new();
        }

        // Guard, not a trailing store: an unwinding sweep must still release
        // the flag or every later sweep would be a silent no-op.
        let _guard = SweepGuard(&self.sweeping);
        self.run_sweep()
    }

    fn run_sweep(&self) -> Vec<Recommendation> {
        let root = match self.registry.root() {
            Some(root) => root,
            None => {
                tracing::debug!("No overseer registered, sweep emits nothing");
                return Vec::new();
            }
        };
        let root_category = match self.registry.get(&root) {
            Ok(record) => record.category,
            Err(_) => return Vec::new(),
        };

        let mut recommendations = Vec::new();
        for agent in self.registry.list_active(None) {
            let applied = self.tracker.applied(&agent.id);

            for metric in self.tracker.metrics_for(&agent.id) {
                if self.tracker.sample_count(&agent.id, &metric) < self.min_samples {
                    continue;
                }
                if self.tracker.trend(&agent.id, &metric) != Trend::Declining {
                    continue;
                }

                let entry = match self.knowledge.find_untried(&metric, &applied) {
                    Some(entry) => entry,
                    None => continue,
                };
                let strategy = match entry.strategy_name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };

                let message = Message::new(
                    root.clone(),
                    root_category.clone(),
                    "improvement_recommendation",
                    serde_json::json!({
                        "agent_id": agent.id,
                        "metric": metric,
                        "strategy": strategy,
                        "entry_id": entry.entry_id,
                        "shared_by": entry.source,
                    }),
                )
                .with_priority(MessagePriority::High)
                .with_target_category(agent.category.clone());

                let message_id = message.message_id.clone();
                match self.router.publish(message) {
                    Ok(PublishOutcome::Routed(result)) => {
                        tracing::info!(
                            "Recommended {} to {} for declining {} (delivered to {})",
                            strategy,
                            agent.id,
                            metric,
                            result.delivered_to.len()
                        );
                    }
                    Ok(PublishOutcome::Consensus(_)) => {}
                    Err(e) => {
                        tracing::warn!("Failed to route recommendation to {}: {}", agent.id, e);
                        continue;
                    }
                }

                recommendations.push(Recommendation {
                    agent_id: agent.id.clone(),
                    category: agent.category.clone(),
                    metric,
                    strategy,
                    entry_id: entry.entry_id,
                    message_id,
                    issued_at: Utc::now(),
                });
            }
        }

        recommendations
    }

    /// Spawn a background task sweeping every `interval`.
    pub fn spawn_scheduler(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let issued = engine.sweep();
                if !issued.is_empty() {
                    tracing::info!("Sweep issued {} recommendations", issued.len());
                }
            }
        })
    }
}

/// Clears the in-progress flag when the sweep returns or unwinds.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
