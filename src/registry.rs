//! Agent identity, hierarchy, and live performance scores.
//!
//! The registry is the single owner of agent records: every mutation funnels
//! through its methods, and readers only ever see fully-written records.

use crate::config::HiveConfig;
use crate::types::{AgentId, AgentStatus, Category, HiveError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Caller-supplied unique identifier
    pub id: AgentId,

    /// Category tag used for routing and hierarchy resolution
    pub category: Category,

    /// Autonomy level from 1 to 10; 10 is reserved for the root overseer
    pub autonomy_level: u8,

    /// Parent in the reporting tree; `None` only for the root overseer.
    /// Immutable once assigned at registration.
    pub reports_to: Option<AgentId>,

    /// Lifecycle status
    pub status: AgentStatus,

    /// Performance score in [0, 1]
    pub performance_score: f64,

    /// When the agent registered
    pub registered_at: DateTime<Utc>,

    /// Last time a message was delivered to this agent
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Whether this agent participates in routing and consensus.
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Whether this agent is the root overseer.
    pub fn is_root(&self) -> bool {
        self.reports_to.is_none()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    agents: HashMap<AgentId, AgentRecord>,
    /// Registration order, for deterministic listings
    order: Vec<AgentId>,
    root: Option<AgentId>,
}

/// Registry of all agents in the hive.
#[derive(Debug)]
pub struct AgentRegistry {
    config: Arc<HiveConfig>,
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new(config: Arc<HiveConfig>) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a new agent and resolve its place in the hierarchy.
    ///
    /// The root overseer (autonomy level reserved in config, default 10) must
    /// register first; leaders report to the root; workers report to the
    /// earliest-registered active agent of their leader category, falling
    /// back to the root.
    pub fn register(
        &self,
        id: impl Into<AgentId>,
        category: impl Into<Category>,
        autonomy_level: u8,
    ) -> Result<AgentRecord> {
        let id = id.into();
        let category = category.into();
        let hierarchy = &self.config.hierarchy;

        let mut inner = self.inner.write().expect("registry lock poisoned");

        if inner.agents.contains_key(&id) {
            return Err(HiveError::DuplicateAgent(id));
        }

        let reports_to = if autonomy_level == hierarchy.overseer_autonomy {
            if let Some(root) = &inner.root {
                return Err(HiveError::HierarchyViolation(format!(
                    "overseer already registered: {root}"
                )));
            }
            None
        } else {
            let root = inner.root.clone().ok_or_else(|| {
                HiveError::HierarchyViolation("no overseer registered yet".to_string())
            })?;

            if hierarchy.is_leader_category(&category) {
                Some(root)
            } else {
                let leader_category = hierarchy.leader_category_for(&category);
                let parent = inner
                    .order
                    .iter()
                    .filter_map(|id| inner.agents.get(id))
                    .find(|a| a.category == leader_category && a.is_active())
                    .map(|a| a.id.clone());
                Some(parent.unwrap_or(root))
            }
        };

        // Chain length is counted in nodes: root alone is depth 1. The new
        // agent adds one node below its parent's chain.
        if let Some(parent) = &reports_to {
            let parent_hops = Self::depth_to_root(&inner, parent)?;
            if parent_hops + 2 > self.config.max_hierarchy_depth {
                return Err(HiveError::HierarchyViolation(format!(
                    "registering {id} under {parent} would exceed max depth {}",
                    self.config.max_hierarchy_depth
                )));
            }
        }

        let record = AgentRecord {
            id: id.clone(),
            category: category.clone(),
            autonomy_level,
            reports_to,
            status: AgentStatus::Active,
            performance_score: self.config.initial_score(&category, autonomy_level),
            registered_at: Utc::now(),
            last_activity: None,
        };

        if record.is_root() {
            inner.root = Some(id.clone());
        }
        inner.agents.insert(id.clone(), record.clone());
        inner.order.push(id.clone());

        tracing::info!(
            "Registered agent {} (category={}, autonomy={}, reports_to={:?})",
            id,
            category,
            autonomy_level,
            record.reports_to
        );

        Ok(record)
    }

    /// Get a snapshot of an agent record.
    pub fn get(&self, id: &str) -> Result<AgentRecord> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))
    }

    /// Adjust an agent's performance score; the result is clamped to [0, 1].
    pub fn adjust_performance(&self, id: &str, delta: f64) -> Result<f64> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let record = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))?;
        record.performance_score = (record.performance_score + delta).clamp(0.0, 1.0);
        Ok(record.performance_score)
    }

    /// Transition an agent's lifecycle status.
    ///
    /// Allowed: active <-> idle, active -> retired, idle -> retired.
    /// Retirement is terminal; retired agents stay queryable.
    pub fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let record = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))?;

        let allowed = matches!(
            (record.status, status),
            (AgentStatus::Active, AgentStatus::Idle)
                | (AgentStatus::Idle, AgentStatus::Active)
                | (AgentStatus::Active, AgentStatus::Retired)
                | (AgentStatus::Idle, AgentStatus::Retired)
        );
        if !allowed {
            return Err(HiveError::InvalidTransition {
                from: record.status,
                to: status,
            });
        }

        tracing::info!("Agent {} status: {} -> {}", id, record.status, status);
        record.status = status;
        Ok(())
    }

    /// Record message delivery to an agent.
    pub fn touch(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let record = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))?;
        record.last_activity = Some(Utc::now());
        Ok(())
    }

    /// All active agents in registration order, optionally filtered by category.
    pub fn list_active(&self, category: Option<&str>) -> Vec<AgentRecord> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .filter(|a| a.is_active())
            .filter(|a| category.map(|c| a.category == c).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// All agents (any status) in registration order.
    pub fn list_all(&self) -> Vec<AgentRecord> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .cloned()
            .collect()
    }

    /// The root overseer's id, if one has registered.
    pub fn root(&self) -> Option<AgentId> {
        self.inner.read().expect("registry lock poisoned").root.clone()
    }

    /// Follow `reports_to` from an agent to the root, failing on cycles or
    /// chains longer than the configured depth.
    pub fn path_to_root(&self, id: &str) -> Result<Vec<AgentId>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut path = vec![id.to_string()];
        let mut seen: HashSet<AgentId> = HashSet::from([id.to_string()]);
        let mut current = inner
            .agents
            .get(id)
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))?;

        while let Some(parent_id) = &current.reports_to {
            if !seen.insert(parent_id.clone()) {
                return Err(HiveError::HierarchyViolation(format!(
                    "cycle detected at {parent_id}"
                )));
            }
            if path.len() >= self.config.max_hierarchy_depth {
                return Err(HiveError::HierarchyViolation(format!(
                    "{id} does not reach the root within {} hops",
                    self.config.max_hierarchy_depth
                )));
            }
            current = inner
                .agents
                .get(parent_id)
                .ok_or_else(|| HiveError::AgentNotFound(parent_id.clone()))?;
            path.push(parent_id.clone());
        }

        Ok(path)
    }

    fn depth_to_root(inner: &RegistryInner, id: &str) -> Result<usize> {
        let mut depth = 0;
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut current = inner
            .agents
            .get(id)
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))?;

        while let Some(parent_id) = &current.reports_to {
            if !seen.insert(parent_id) {
                return Err(HiveError::HierarchyViolation(format!(
                    "cycle detected at {parent_id}"
                )));
            }
            depth += 1;
            current = inner
                .agents
                .get(parent_id)
                .ok_or_else(|| HiveError::AgentNotFound(parent_id.clone()))?;
        }

        Ok(depth)
    }
}
