//! Checkpoint for streaming consumers of the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub stream: String,
    pub checkpoint: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}
