//! The hive facade: wires the coordination components together and exposes
//! the synchronous API consumed by the surrounding layers.

use crate::config::HiveConfig;
use crate::consensus::{ConsensusEngine, VoteStrategy};
use crate::knowledge::{KnowledgeCategory, KnowledgeStore};
use crate::performance::{PerformanceTracker, Trend};
use crate::recommendation::{Recommendation, RecommendationEngine};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::routing::{Message, MessageHandler, MessagePriority, MessageRouter, PublishOutcome};
use crate::types::{AgentId, AgentStatus, Category, EntryId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-agent report: score, per-metric trends, applied strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentRecord,
    /// Trend per tracked metric, sorted by metric name
    pub trends: BTreeMap<String, Trend>,
    /// Strategies the agent has already tried, sorted
    pub applied_strategies: Vec<String>,
}

/// Aggregate hive state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveStatus {
    pub total_agents: usize,
    pub active_agents: usize,
    /// Agent count per category, sorted by category
    pub agents_by_category: BTreeMap<Category, usize>,
    pub knowledge_entries: usize,
    /// Knowledge entry count per category, sorted by category tag
    pub knowledge_by_category: BTreeMap<String, usize>,
}

/// The coordination engine.
///
/// Construct one per process; all methods take `&self` and are safe to call
/// from concurrent tasks or threads.
pub struct Hive {
    registry: Arc<AgentRegistry>,
    knowledge: Arc<KnowledgeStore>,
    tracker: Arc<PerformanceTracker>,
    consensus: Arc<ConsensusEngine>,
    router: Arc<MessageRouter>,
    recommender: Arc<RecommendationEngine>,
}

impl Hive {
    /// Build a hive with the default probabilistic vote strategy.
    pub fn new(config: HiveConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build a hive with an injected vote strategy (deterministic in tests).
    pub fn with_vote_strategy(
        config: HiveConfig,
        strategy: Arc<dyn VoteStrategy>,
    ) -> Result<Self> {
        Self::build(config, Some(strategy))
    }

    fn build(config: HiveConfig, strategy: Option<Arc<dyn VoteStrategy>>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let registry = Arc::new(AgentRegistry::new(config.clone()));
        let knowledge = Arc::new(KnowledgeStore::new(
            registry.clone(),
            config.knowledge_score_bonus,
        ));
        let consensus = Arc::new(match strategy {
            Some(strategy) => ConsensusEngine::with_strategy(
                registry.clone(),
                knowledge.clone(),
                config.consensus_threshold,
                strategy,
            ),
            None => ConsensusEngine::new(
                registry.clone(),
                knowledge.clone(),
                config.consensus_threshold,
            ),
        });
        let tracker = Arc::new(PerformanceTracker::new(registry.clone(), config.trend_window));
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            consensus.clone(),
            config.routing.clone(),
        ));
        let recommender = Arc::new(RecommendationEngine::new(
            registry.clone(),
            knowledge.clone(),
            tracker.clone(),
            router.clone(),
            config.recommendation_min_samples,
        ));

        Ok(Self {
            registry,
            knowledge,
            tracker,
            consensus,
            router,
            recommender,
        })
    }

    /// Register an agent and broadcast an `agent_joined` notification.
    pub fn register_agent(
        &self,
        id: impl Into<AgentId>,
        category: impl Into<Category>,
        autonomy_level: u8,
    ) -> Result<AgentRecord> {
        let record = self.registry.register(id, category, autonomy_level)?;

        // Informational broadcast; unroutable when no table entry exists,
        // which delivers to nobody and is fine.
        let joined = Message::new(
            record.id.clone(),
            record.category.clone(),
            "agent_joined",
            serde_json::json!({
                "agent_id": record.id,
                "category": record.category,
                "autonomy_level": record.autonomy_level,
            }),
        )
        .with_priority(MessagePriority::Low);
        if let Err(e) = self.router.publish(joined) {
            tracing::warn!("agent_joined broadcast failed: {}", e);
        }

        Ok(record)
    }

    /// Publish a message through the router.
    pub fn publish(&self, message: Message) -> Result<PublishOutcome> {
        self.router.publish(message)
    }

    /// Share a learning and broadcast it as `knowledge_shared`.
    pub fn share_knowledge(
        &self,
        agent_id: &str,
        category: KnowledgeCategory,
        data: serde_json::Value,
    ) -> Result<EntryId> {
        let entry_id = self.knowledge.record(agent_id, category, data)?;

        let record = self.registry.get(agent_id)?;
        let shared = Message::new(
            record.id,
            record.category,
            "knowledge_shared",
            serde_json::json!({
                "entry_id": entry_id.clone(),
                "category": knowledge_category_tag(category),
            }),
        )
        .with_priority(MessagePriority::Low);
        if let Err(e) = self.router.publish(shared) {
            tracing::warn!("knowledge_shared broadcast failed: {}", e);
        }

        Ok(entry_id)
    }

    /// Append a metric sample for an agent.
    pub fn record_metric(&self, agent_id: &str, metric: &str, value: f64) -> Result<()> {
        self.tracker.record_metric(agent_id, metric, value)
    }

    /// Record a success/failure outcome for an agent.
    pub fn record_outcome(&self, agent_id: &str, success: bool) -> Result<()> {
        self.tracker.record_outcome(agent_id, success)
    }

    /// Record that an agent has tried a strategy.
    pub fn mark_applied(&self, agent_id: &str, strategy: &str) -> Result<()> {
        self.tracker.mark_applied(agent_id, strategy)
    }

    /// Transition an agent's lifecycle status.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        self.registry.set_status(agent_id, status)
    }

    /// Attach a message handler for an agent.
    pub fn subscribe(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.router.subscribe(agent_id, handler)
    }

    /// Run one recommendation sweep.
    pub fn sweep(&self) -> Vec<Recommendation> {
        self.recommender.sweep()
    }

    /// Report on a single agent.
    pub fn agent_report(&self, agent_id: &str) -> Result<AgentReport> {
        let agent = self.registry.get(agent_id)?;

        let mut trends = BTreeMap::new();
        for metric in self.tracker.metrics_for(agent_id) {
            let trend = self.tracker.trend(agent_id, &metric);
            trends.insert(metric, trend);
        }

        let mut applied_strategies: Vec<String> =
            self.tracker.applied(agent_id).into_iter().collect();
        applied_strategies.sort();

        Ok(AgentReport {
            agent,
            trends,
            applied_strategies,
        })
    }

    /// Aggregate hive status.
    pub fn status(&self) -> HiveStatus {
        let agents = self.registry.list_all();
        let mut agents_by_category: BTreeMap<Category, usize> = BTreeMap::new();
        for agent in &agents {
            *agents_by_category.entry(agent.category.clone()).or_insert(0) += 1;
        }

        let mut knowledge_by_category: BTreeMap<String, usize> = BTreeMap::new();
        for (category, count) in self.knowledge.counts() {
            knowledge_by_category.insert(knowledge_category_tag(category).to_string(), count);
        }

        HiveStatus {
            total_agents: agents.len(),
            active_agents: agents.iter().filter(|a| a.is_active()).count(),
            agents_by_category,
            knowledge_entries: self.knowledge.len(),
            knowledge_by_category,
        }
    }

    /// Export the full state as a stable JSON document: agent records in
    /// registration order, knowledge entries in append order, and the
    /// aggregate status.
    pub fn export_state(&self) -> Result<serde_json::Value> {
        let agents = serde_json::to_value(self.registry.list_all())
            .map_err(|e| anyhow::anyhow!("serializing agents: {e}"))?;
        let knowledge = serde_json::to_value(self.knowledge.snapshot())
            .map_err(|e| anyhow::anyhow!("serializing knowledge: {e}"))?;
        let status = serde_json::to_value(self.status())
            .map_err(|e| anyhow::anyhow!("serializing status: {e}"))?;

        Ok(serde_json::json!({
            "agents": agents,
            "knowledge": knowledge,
            "status": status,
        }))
    }

    /// Spawn the queue pump and sweep scheduler on the current tokio runtime.
    pub fn spawn_background(
        &self,
        pump_interval: Duration,
        sweep_interval: Duration,
    ) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        (
            self.router.spawn_pump(pump_interval),
            self.recommender.spawn_scheduler(sweep_interval),
        )
    }

    /// Deliver queued medium/low priority messages now.
    pub fn flush_pending(&self) -> usize {
        self.router.flush_pending().len()
    }

    /// Direct access to the registry (read-side helpers).
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Direct access to the knowledge store.
    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    /// Direct access to the performance tracker.
    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    /// Direct access to the consensus engine.
    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }
}

fn knowledge_category_tag(category: KnowledgeCategory) -> &'static str {
    match category {
        KnowledgeCategory::SuccessfulStrategy => "successful_strategy",
        KnowledgeCategory::FailedStrategy => "failed_strategy",
        KnowledgeCategory::CustomerInsight => "customer_insight",
        KnowledgeCategory::Optimization => "optimization",
        KnowledgeCategory::MarketIntelligence => "market_intelligence",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hive() -> Hive {
        Hive::new(HiveConfig::default()).unwrap()
    }

    #[test]
    fn test_register_and_report() {
        let hive = hive();
        hive.register_agent("queen", "overseer", 10).unwrap();
        hive.register_agent("worker-1", "optimization", 3).unwrap();

        hive.record_metric("worker-1", "revenue", 100.0).unwrap();
        hive.record_metric("worker-1", "revenue", 110.0).unwrap();
        hive.mark_applied("worker-1", "bundle_pricing").unwrap();

        let report = hive.agent_report("worker-1").unwrap();
        assert_eq!(report.agent.id, "worker-1");
        assert_eq!(report.trends.get("revenue"), Some(&Trend::Improving));
        assert_eq!(report.applied_strategies, vec!["bundle_pricing"]);
    }

    #[test]
    fn test_status_counts() {
        let hive = hive();
        hive.register_agent("queen", "overseer", 10).unwrap();
        hive.register_agent("opt-1", "optimization", 3).unwrap();
        hive.register_agent("opt-2", "optimization", 3).unwrap();
        hive.set_status("opt-2", AgentStatus::Retired).unwrap();

        hive.share_knowledge(
            "opt-1",
            KnowledgeCategory::CustomerInsight,
            serde_json::json!({"note": "weekday churn spike"}),
        )
        .unwrap();

        let status = hive.status();
        assert_eq!(status.total_agents, 3);
        assert_eq!(status.active_agents, 2);
        assert_eq!(status.agents_by_category["optimization"], 2);
        assert_eq!(status.knowledge_entries, 1);
        assert_eq!(status.knowledge_by_category["customer_insight"], 1);
    }

    #[test]
    fn test_export_state_shape() {
        let hive = hive();
        hive.register_agent("queen", "overseer", 10).unwrap();
        hive.share_knowledge(
            "queen",
            KnowledgeCategory::MarketIntelligence,
            serde_json::json!({"competitor": "undercutting"}),
        )
        .unwrap();

        let state = hive.export_state().unwrap();
        assert_eq!(state["agents"].as_array().unwrap().len(), 1);
        assert_eq!(state["agents"][0]["id"], "queen");
        assert_eq!(state["agents"][0]["status"], "active");
        assert_eq!(state["knowledge"].as_array().unwrap().len(), 1);
        assert_eq!(state["status"]["total_agents"], 1);

        // Exports are snapshots: a second export after a change differs only
        // where the state changed.
        let before = state.clone();
        hive.register_agent("opt-1", "optimization", 3).unwrap();
        let after = hive.export_state().unwrap();
        assert_eq!(before["agents"].as_array().unwrap().len(), 1);
        assert_eq!(after["agents"].as_array().unwrap().len(), 2);
        assert_eq!(before["knowledge"], after["knowledge"]);
    }

    #[test]
    fn test_share_knowledge_bumps_score() {
        let hive = hive();
        hive.register_agent("queen", "overseer", 10).unwrap();
        let before = hive.registry().get("queen").unwrap().performance_score;

        hive.share_knowledge(
            "queen",
            KnowledgeCategory::Optimization,
            serde_json::json!({"note": "batch the invoices"}),
        )
        .unwrap();

        let after = hive.registry().get("queen").unwrap().performance_score;
        assert!((after - before - 0.02).abs() < 1e-9);
    }
}
