//! Configuration for the coordination engine.
//!
//! Routing rules, hierarchy resolution, and the various thresholds are data,
//! not code: they deserialize from TOML so deployments can tune them without
//! touching the engine.

use crate::types::{Category, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration for a [`crate::Hive`](crate::hive::Hive).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Weighted approval fraction required for a consensus poll to pass
    pub consensus_threshold: f64,

    /// Maximum hops from any agent to the root overseer
    pub max_hierarchy_depth: usize,

    /// Number of trailing samples considered when computing a trend
    pub trend_window: usize,

    /// Minimum samples a metric needs before a sweep will consider it
    pub recommendation_min_samples: usize,

    /// Performance bump applied when an agent shares knowledge
    pub knowledge_score_bonus: f64,

    /// Routing table: message type -> categories that receive it
    pub routing: HashMap<String, Vec<Category>>,

    /// Hierarchy resolution rules
    pub hierarchy: HierarchyConfig,

    /// Initial performance score per category; falls back to role defaults
    pub initial_scores: HashMap<Category, f64>,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.70,
            max_hierarchy_depth: 3,
            trend_window: 10,
            recommendation_min_samples: 5,
            knowledge_score_bonus: 0.02,
            routing: HashMap::new(),
            hierarchy: HierarchyConfig::default(),
            initial_scores: HashMap::new(),
        }
    }
}

impl HiveConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| crate::types::HiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate threshold and window ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(crate::types::HiveError::Config(format!(
                "consensus_threshold must be in [0, 1], got {}",
                self.consensus_threshold
            )));
        }
        if self.trend_window < 2 {
            return Err(crate::types::HiveError::Config(
                "trend_window must be at least 2".to_string(),
            ));
        }
        if self.max_hierarchy_depth == 0 {
            return Err(crate::types::HiveError::Config(
                "max_hierarchy_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Add a routing table entry (builder-style, mostly for tests and setup code).
    pub fn with_route(mut self, message_type: impl Into<String>, categories: Vec<Category>) -> Self {
        self.routing.insert(message_type.into(), categories);
        self
    }

    /// Initial performance score for a newly registered agent.
    pub fn initial_score(&self, category: &str, autonomy_level: u8) -> f64 {
        if let Some(score) = self.initial_scores.get(category) {
            return score.clamp(0.0, 1.0);
        }
        if autonomy_level == self.hierarchy.overseer_autonomy {
            0.90
        } else if self.hierarchy.is_leader_category(category) {
            0.75
        } else {
            0.60
        }
    }
}

/// Rules for resolving `reports_to` at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Autonomy level reserved for the root overseer
    pub overseer_autonomy: u8,

    /// Suffix marking a category as a leader category (e.g. "optimization_lead")
    pub leader_suffix: String,

    /// Explicit worker category -> leader category overrides
    pub leader_of: HashMap<Category, Category>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            overseer_autonomy: 10,
            leader_suffix: "_lead".to_string(),
            leader_of: HashMap::new(),
        }
    }
}

impl HierarchyConfig {
    /// Whether a category is a leader category (reports directly to the root).
    pub fn is_leader_category(&self, category: &str) -> bool {
        category.ends_with(&self.leader_suffix)
            || self.leader_of.values().any(|leader| leader == category)
    }

    /// The leader category a worker category reports into.
    pub fn leader_category_for(&self, category: &str) -> Category {
        self.leader_of
            .get(category)
            .cloned()
            .unwrap_or_else(|| format!("{}{}", category, self.leader_suffix))
    }
}
