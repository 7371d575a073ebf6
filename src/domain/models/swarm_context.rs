//! Per-bead checkpoint used for worker recovery across process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recovery sub-record: last progress, files modified, error context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recovery {
    pub last_progress: Option<String>,
    pub files_modified: Vec<String>,
    pub error_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmContext {
    pub epic_id: String,
    pub bead_id: String,
    pub strategy: String,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
    pub directives: Value,
    pub recovery: Recovery,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
