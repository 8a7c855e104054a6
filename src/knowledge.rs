//! Shared knowledge store.
//!
//! An append-only, categorized log of learnings shared by agents. Entries are
//! never mutated or deleted while the process runs; sharing knowledge earns
//! the source agent a small performance bump.

use crate::registry::AgentRegistry;
use crate::types::{AgentId, EntryId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Category of a shared learning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    /// A strategy that worked and is worth copying
    SuccessfulStrategy,
    /// A strategy that failed; peers should avoid or downweight it
    FailedStrategy,
    /// An observation about customers
    CustomerInsight,
    /// A process or cost optimization
    Optimization,
    /// External market observation
    MarketIntelligence,
}

/// An immutable shared learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique entry identifier
    pub entry_id: EntryId,

    /// Category of the learning
    pub category: KnowledgeCategory,

    /// The agent that shared it
    pub source: AgentId,

    /// Opaque payload; strategy entries conventionally carry "name" and
    /// "metric" fields
    pub data: serde_json::Value,

    /// When the entry was shared
    pub shared_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Strategy name, for strategy-category entries.
    pub fn strategy_name(&self) -> Option<&str> {
        self.data.get("name").and_then(|v| v.as_str())
    }

    /// The metric a strategy claims to improve.
    pub fn target_metric(&self) -> Option<&str> {
        self.data.get("metric").and_then(|v| v.as_str())
    }
}

/// Append-only store of shared learnings.
#[derive(Debug)]
pub struct KnowledgeStore {
    registry: Arc<AgentRegistry>,
    score_bonus: f64,
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl KnowledgeStore {
    /// Create an empty store. `score_bonus` is credited to an agent each time
    /// it shares an entry.
    pub fn new(registry: Arc<AgentRegistry>, score_bonus: f64) -> Self {
        Self {
            registry,
            score_bonus,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append a learning shared by `agent_id`.
    ///
    /// Fails with `AgentNotFound` if the agent is unregistered. Sharing
    /// credits the agent's performance score.
    pub fn record(
        &self,
        agent_id: &str,
        category: KnowledgeCategory,
        data: serde_json::Value,
    ) -> Result<EntryId> {
        // Validate the source before appending.
        self.registry.get(agent_id)?;

        let entry = KnowledgeEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            category,
            source: agent_id.to_string(),
            data,
            shared_at: Utc::now(),
        };
        let entry_id = entry.entry_id.clone();

        self.entries
            .write()
            .expect("knowledge lock poisoned")
            .push(entry);
        self.registry.adjust_performance(agent_id, self.score_bonus)?;

        tracing::debug!("Agent {} shared {:?} knowledge", agent_id, category);
        Ok(entry_id)
    }

    /// Entries of a category, most recent first. `limit` of 0 means unbounded.
    pub fn query(&self, category: KnowledgeCategory, limit: usize) -> Vec<KnowledgeEntry> {
        let entries = self.entries.read().expect("knowledge lock poisoned");
        let iter = entries.iter().rev().filter(|e| e.category == category);
        if limit == 0 {
            iter.cloned().collect()
        } else {
            iter.take(limit).cloned().collect()
        }
    }

    /// Most recent successful strategy targeting `metric` whose name is not
    /// in `applied`.
    pub fn find_untried(
        &self,
        metric: &str,
        applied: &HashSet<String>,
    ) -> Option<KnowledgeEntry> {
        let entries = self.entries.read().expect("knowledge lock poisoned");
        entries
            .iter()
            .rev()
            .filter(|e| e.category == KnowledgeCategory::SuccessfulStrategy)
            .filter(|e| e.target_metric() == Some(metric))
            .find(|e| {
                e.strategy_name()
                    .map(|name| !applied.contains(name))
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// All entries in append order.
    pub fn snapshot(&self) -> Vec<KnowledgeEntry> {
        self.entries.read().expect("knowledge lock poisoned").clone()
    }

    /// Number of entries per category.
    pub fn counts(&self) -> HashMap<KnowledgeCategory, usize> {
        let entries = self.entries.read().expect("knowledge lock poisoned");
        let mut counts = HashMap::new();
        for entry in entries.iter() {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("knowledge lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
