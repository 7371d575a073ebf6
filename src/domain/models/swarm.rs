//! Decomposition, strategy, spawn, and review state models for the swarm
//! lifecycle state machine (spec §4.7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decomposition strategy the coordinator selects a prompt template for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    FileBased,
    RiskBased,
    FeatureBased,
    ResearchBased,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileBased => "file-based",
            Self::RiskBased => "risk-based",
            Self::FeatureBased => "feature-based",
            Self::ResearchBased => "research-based",
        }
    }

    /// Tie-break priority order per spec §4.7: file-based > risk-based >
    /// feature-based > research-based.
    pub fn priority_rank(&self) -> u8 {
        match self {
            Self::FileBased => 0,
            Self::RiskBased => 1,
            Self::FeatureBased => 2,
            Self::ResearchBased => 3,
        }
    }
}

/// Raw subtask as parsed from the coordinator LLM's decomposition JSON,
/// before validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSubtask {
    pub title: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<usize>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDecomposition {
    pub subtasks: Vec<RawSubtask>,
}

/// A subtask that passed validation and is ready to become a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSubtask {
    pub index: usize,
    pub title: String,
    pub files: Vec<String>,
    pub dependencies: Vec<usize>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadTree {
    pub subtasks: Vec<ValidatedSubtask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub valid: bool,
    pub bead_tree: Option<BeadTree>,
    pub error: Option<String>,
}

/// The review state machine's states (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    NotReviewed,
    Reviewing,
    Approved,
    NeedsChanges,
    Blocked,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReviewed => "not_reviewed",
            Self::Reviewing => "reviewing",
            Self::Approved => "approved",
            Self::NeedsChanges => "needs_changes",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_reviewed" => Some(Self::NotReviewed),
            "reviewing" => Some(Self::Reviewing),
            "approved" => Some(Self::Approved),
            "needs_changes" => Some(Self::NeedsChanges),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Durable per-cell review tracking: `attempt` survives process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub bead_id: String,
    pub state: ReviewState,
    pub attempt: u32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome status reported by a worker's review feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Approved,
    NeedsChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub status: FeedbackStatus,
    pub summary: String,
    pub issues: Vec<String>,
}

/// Result of `SwarmCoordinator::complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub bead_id: String,
    pub scope_violation: bool,
    pub files_out_of_scope: Vec<String>,
}

/// Result of a third-consecutive-rejection transition to `blocked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedOutcome {
    pub status: &'static str,
    pub reason: String,
}

/// A worker spawn contract: everything a worker prompt needs embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnContract {
    pub bead_id: String,
    pub epic_id: String,
    pub files: Vec<String>,
    pub shared_context: Value,
}

/// Strategy selection result: winner plus up to one runner-up with scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySelection {
    pub strategy: Strategy,
    pub confidence: f64,
    pub alternatives: Vec<(Strategy, f64)>,
}
