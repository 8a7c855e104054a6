//! Weighted-vote consensus over the active agent population.
//!
//! A poll snapshots the active agents and the knowledge store at poll start,
//! asks the configured [`VoteStrategy`] for each agent's vote, and aggregates
//! a performance-weighted approval fraction against the configured threshold.

use crate::knowledge::{KnowledgeCategory, KnowledgeEntry, KnowledgeStore};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::routing::Message;
use crate::types::{AgentId, MessageId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decides how a single agent votes on a message.
///
/// Injectable so production can use a probabilistic strategy while tests
/// supply a deterministic one.
pub trait VoteStrategy: Send + Sync {
    /// Whether `agent` approves `message`, given the knowledge snapshot
    /// taken at poll start.
    fn vote(&self, agent: &AgentRecord, message: &Message, knowledge: &[KnowledgeEntry]) -> bool;
}

/// Default production strategy: approval probability starts at the agent's
/// performance score, boosted when the proposed strategy has a matching
/// successful-strategy entry and penalized when it has a failed one.
#[derive(Debug, Clone)]
pub struct ProbabilisticVote {
    /// Probability adjustment per matching knowledge entry kind
    pub knowledge_bias: f64,
}

impl Default for ProbabilisticVote {
    fn default() -> Self {
        Self { knowledge_bias: 0.2 }
    }
}

impl ProbabilisticVote {
    fn approval_probability(
        &self,
        agent: &AgentRecord,
        message: &Message,
        knowledge: &[KnowledgeEntry],
    ) -> f64 {
        let mut probability = agent.performance_score;

        if let Some(proposed) = message.proposed_strategy() {
            let succeeded = knowledge.iter().any(|e| {
                e.category == KnowledgeCategory::SuccessfulStrategy
                    && e.strategy_name() == Some(proposed)
            });
            let failed = knowledge.iter().any(|e| {
                e.category == KnowledgeCategory::FailedStrategy
                    && e.strategy_name() == Some(proposed)
            });
            if succeeded {
                probability += self.knowledge_bias;
            }
            if failed {
                probability -= self.knowledge_bias;
            }
        }

        probability.clamp(0.05, 0.95)
    }
}

impl VoteStrategy for ProbabilisticVote {
    fn vote(&self, agent: &AgentRecord, message: &Message, knowledge: &[KnowledgeEntry]) -> bool {
        let probability = self.approval_probability(agent, message, knowledge);
        rand::thread_rng().gen::<f64>() < probability
    }
}

/// Deterministic strategy for tests: approve iff the agent's performance
/// score is at least `min_score`.
#[derive(Debug, Clone, Copy)]
pub struct ScoreThresholdVote {
    pub min_score: f64,
}

impl VoteStrategy for ScoreThresholdVote {
    fn vote(&self, agent: &AgentRecord, _message: &Message, _knowledge: &[KnowledgeEntry]) -> bool {
        agent.performance_score >= self.min_score
    }
}

/// One agent's vote with the weight it carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusVote {
    pub agent_id: AgentId,
    pub approve: bool,
    /// The agent's performance score at poll time
    pub weight: f64,
}

/// Why a poll resolved the way it did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusReason {
    ThresholdMet,
    ThresholdNotMet,
    NoActiveAgents,
}

/// Immutable outcome of a consensus poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// The message that triggered the poll
    pub message_id: MessageId,

    /// Per-agent votes with weights
    pub votes: Vec<ConsensusVote>,

    /// Weighted approval fraction: sum of approving weights over all weights
    pub approval_fraction: f64,

    /// Threshold the fraction was compared against
    pub threshold: f64,

    /// Final decision
    pub approved: bool,

    /// Why the poll resolved this way
    pub reason: ConsensusReason,
}

/// Runs weighted polls across the active agents.
pub struct ConsensusEngine {
    registry: Arc<AgentRegistry>,
    knowledge: Arc<KnowledgeStore>,
    threshold: f64,
    strategy: Arc<dyn VoteStrategy>,
}

impl ConsensusEngine {
    /// Create an engine with the default probabilistic strategy.
    pub fn new(registry: Arc<AgentRegistry>, knowledge: Arc<KnowledgeStore>, threshold: f64) -> Self {
        Self::with_strategy(
            registry,
            knowledge,
            threshold,
            Arc::new(ProbabilisticVote::default()),
        )
    }

    /// Create an engine with an injected vote strategy.
    pub fn with_strategy(
        registry: Arc<AgentRegistry>,
        knowledge: Arc<KnowledgeStore>,
        threshold: f64,
        strategy: Arc<dyn VoteStrategy>,
    ) -> Self {
        Self {
            registry,
            knowledge,
            threshold,
            strategy,
        }
    }

    /// Poll every active agent about `message`.
    ///
    /// Agents that register mid-poll are not consulted; an empty quorum
    /// yields a negative result with `NoActiveAgents`, never a failure.
    pub fn poll(&self, message: &Message) -> ConsensusResult {
        let agents = self.registry.list_active(None);
        if agents.is_empty() {
            tracing::warn!(
                "Consensus poll for message {} with no active agents",
                message.message_id
            );
            return ConsensusResult {
                message_id: message.message_id.clone(),
                votes: Vec::new(),
                approval_fraction: 0.0,
                threshold: self.threshold,
                approved: false,
                reason: ConsensusReason::NoActiveAgents,
            };
        }

        let knowledge = self.knowledge.snapshot();

        let mut votes = Vec::with_capacity(agents.len());
        let mut total_weight = 0.0;
        let mut approving_weight = 0.0;
        for agent in &agents {
            let approve = self.strategy.vote(agent, message, &knowledge);
            let weight = agent.performance_score;
            total_weight += weight;
            if approve {
                approving_weight += weight;
            }
            votes.push(ConsensusVote {
                agent_id: agent.id.clone(),
                approve,
                weight,
            });
        }

        let approval_fraction = if total_weight > 0.0 {
            approving_weight / total_weight
        } else {
            0.0
        };
        let approved = approval_fraction >= self.threshold;

        tracing::info!(
            "Consensus on {} ({}): {:.3} vs threshold {:.2} -> {}",
            message.message_id,
            message.message_type,
            approval_fraction,
            self.threshold,
            if approved { "approved" } else { "rejected" }
        );

        ConsensusResult {
            message_id: message.message_id.clone(),
            votes,
            approval_fraction,
            threshold: self.threshold,
            approved,
            reason: if approved {
                ConsensusReason::ThresholdMet
            } else {
                ConsensusReason::ThresholdNotMet
            },
        }
    }
}
