//! Cell domain model — work items, epics, dependencies, and blocked-cache.
//!
//! A cell is a single work item. An epic is simply a cell of type `epic`
//! with children; it carries no behavior beyond the parent link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `<project-slug>-<base36-epoch-suffix>-<random-hash>`, e.g.
/// `swarmmail-m3x0af-4q9k2p`. See `Hive::resolve_id` for the accepted
/// suffix/substring/full-id resolution rules.
pub type CellId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "bug" => Some(Self::Bug),
            "feature" => Some(Self::Feature),
            "epic" => Some(Self::Epic),
            "chore" => Some(Self::Chore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
    Tombstone,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "closed" => Some(Self::Closed),
            "tombstone" => Some(Self::Tombstone),
            _ => None,
        }
    }

    /// `closed` and `tombstone` cells don't block dependents.
    pub fn unblocks_dependents(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub project_key: String,
    pub title: String,
    pub description: Option<String>,
    pub cell_type: CellType,
    pub status: CellStatus,
    /// Lower number = higher priority.
    pub priority: i32,
    pub parent_id: Option<CellId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The directed relationship a dependency edge carries. All three kinds
/// participate in the DAG-acyclicity check; only `Blocks` drives
/// ready-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    Blocks,
    Related,
    DiscoveredFrom,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Related => "related",
            Self::DiscoveredFrom => "discovered-from",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(Self::Blocks),
            "related" => Some(Self::Related),
            "discovered-from" => Some(Self::DiscoveredFrom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub cell_id: CellId,
    pub depends_on_id: CellId,
    pub relationship: Relationship,
}

/// A comment attached to a cell, carried through JSONL export/import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
}

/// One line of the JSONL export/import format from spec §4.6/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: CellId,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: i32,
    pub issue_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub depends_on_id: CellId,
    #[serde(rename = "type")]
    pub relationship: String,
}

/// Outcome of importing one JSONL line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOutcome {
    Created,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub dry_run: bool,
}

/// Filters accepted by `Hive::query_cells`.
#[derive(Debug, Clone, Default)]
pub struct CellFilter {
    pub status: Option<CellStatus>,
    pub cell_type: Option<CellType>,
    pub parent_id: Option<CellId>,
    pub ready: Option<bool>,
    pub id: Option<CellId>,
    pub limit: Option<u32>,
}
