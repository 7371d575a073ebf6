//! Distributed mutex row used to serialize specific admin operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub resource: String,
    pub holder: String,
    /// Fence token: a claimant whose `seq` supersedes the stale holder's
    /// may harvest an expired lock.
    pub seq: i64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
