//! Mailbox domain model — messages, recipients, and importance levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Importance level attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Importance {
    fn default() -> Self {
        Self::Normal
    }
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => Self::Normal,
        }
    }
}

/// Broadcast recipient sentinel: `"*"` addresses every agent currently
/// registered in the project at send time.
pub const BROADCAST_RECIPIENT: &str = "*";

/// A message sent from one agent to one or more recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_key: String,
    pub from_agent: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient delivery state, cascade-deleted with the parent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub message_id: String,
    pub agent_name: String,
    pub read_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

/// A lightweight inbox entry: headers only, no body, as returned by
/// `Mailbox::inbox` (spec §4.4 — bodies are fetched one at a time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: String,
    pub from_agent: String,
    pub subject: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    /// Present only when the caller opted into `include_bodies`.
    pub body: Option<String>,
}

/// Aggregate summary for a message thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub message_count: usize,
    pub participants: Vec<String>,
    pub last_activity: DateTime<Utc>,
    /// Prose summary from a pluggable summarizer, if one was supplied.
    pub prose: Option<String>,
}
