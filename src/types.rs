//! Common types used across the coordination engine.

use serde::{Deserialize, Serialize};

/// Unique identifier for a registered agent (caller-supplied).
pub type AgentId = String;

/// Agent category tag (e.g. "acquisition", "optimization", "optimization_lead").
pub type Category = String;

/// Unique identifier for a knowledge entry.
pub type EntryId = String;

/// Unique identifier for a message.
pub type MessageId = String;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent is participating in routing and consensus
    Active,
    /// Agent is temporarily out of rotation but may return
    Idle,
    /// Agent is permanently out of rotation; record stays queryable
    Retired,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Error types for coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Hierarchy violation: {0}")]
    HierarchyViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HiveError>;
