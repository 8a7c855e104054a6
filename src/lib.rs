//! Multi-agent coordination and consensus engine.
//!
//! This crate provides the coordination core for a hive of autonomous worker
//! agents:
//!
//! - **Agent Registry**: identity, reporting hierarchy, and live performance
//!   scores for every agent
//! - **Message Routing**: typed messages delivered to the agent categories
//!   interested in them, driven by a configurable routing table
//! - **Weighted Consensus**: decisions flagged as critical are put to a
//!   performance-weighted vote across the active agents
//! - **Shared Knowledge**: an append-only log of successful and failed
//!   strategies that propagates learnings across the hive
//! - **Performance Feedback**: rolling metric history with trend detection,
//!   feeding a recommendation sweep that points declining agents at
//!   peer-proven strategies they have not tried
//!
//! # Usage
//!
//! ```
//! use hivemind::{Hive, HiveConfig, KnowledgeCategory};
//!
//! let config = HiveConfig::default()
//!     .with_route("price_change", vec!["optimization".to_string()]);
//! let hive = Hive::new(config).unwrap();
//!
//! hive.register_agent("queen", "overseer", 10).unwrap();
//! hive.register_agent("opt-1", "optimization", 3).unwrap();
//!
//! hive.share_knowledge(
//!     "opt-1",
//!     KnowledgeCategory::SuccessfulStrategy,
//!     serde_json::json!({"name": "bundle_pricing", "metric": "conversion_rate"}),
//! )
//! .unwrap();
//!
//! let status = hive.status();
//! assert_eq!(status.active_agents, 2);
//! ```

pub mod config;
pub mod consensus;
pub mod hive;
pub mod knowledge;
pub mod performance;
pub mod recommendation;
pub mod registry;
pub mod routing;
pub mod types;

// Re-export main types for convenience
pub use config::{HierarchyConfig, HiveConfig};
pub use consensus::{
    ConsensusEngine, ConsensusReason, ConsensusResult, ConsensusVote, ProbabilisticVote,
    ScoreThresholdVote, VoteStrategy,
};
pub use hive::{AgentReport, Hive, HiveStatus};
pub use knowledge::{KnowledgeCategory, KnowledgeEntry, KnowledgeStore};
pub use performance::{PerformanceSample, PerformanceTracker, Trend};
pub use recommendation::{Recommendation, RecommendationEngine};
pub use registry::{AgentRecord, AgentRegistry};
pub use routing::{
    DeliveryFailure, Message, MessageHandler, MessagePriority, MessageRouter, PublishOutcome,
    RoutingResult,
};
pub use types::{AgentId, AgentStatus, Category, EntryId, HiveError, MessageId, Result};
