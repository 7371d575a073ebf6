//! Agent domain model — a named participant in one project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub project_key: String,
    pub name: String,
    pub program: Option<String>,
    pub model: Option<String>,
    pub task_description: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}
