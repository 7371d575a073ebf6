//! Decision trace and entity-link domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured record of a coordinator choice, with rationale and links to
/// precedent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub id: String,
    pub project_key: String,
    pub decision_type: String,
    pub epic_id: Option<String>,
    pub bead_id: Option<String>,
    pub agent_name: String,
    pub decision: Value,
    pub rationale: Option<String>,
    pub inputs_gathered: Value,
    pub policy_evaluated: Value,
    pub alternatives: Value,
    pub precedent_cited: Value,
    pub outcome_event_id: Option<i64>,
    pub quality_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Directed relation from a decision to an entity (cell, pattern, file,
/// agent, or memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cell,
    Pattern,
    File,
    Agent,
    Memory,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Pattern => "pattern",
            Self::File => "file",
            Self::Agent => "agent",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLink {
    pub decision_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub link_type: String,
    /// Clamped to `[0, 1]` at construction time.
    pub strength: f64,
}

impl EntityLink {
    pub fn new(
        decision_id: impl Into<String>,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        link_type: impl Into<String>,
        strength: f64,
    ) -> Self {
        Self {
            decision_id: decision_id.into(),
            entity_kind,
            entity_id: entity_id.into(),
            link_type: link_type.into(),
            strength: strength.clamp(0.0, 1.0),
        }
    }
}
