//! File reservation domain model — a time-bounded lease over file paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub project_key: String,
    pub agent_name: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Active iff not released and not yet expired, per spec §3.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

/// Result of a `ReservationMgr::reserve` call: all-or-nothing per spec §4.5.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReserveOutcome {
    pub granted: Vec<Reservation>,
    pub conflicts: Vec<crate::error::ReservationConflict>,
}
