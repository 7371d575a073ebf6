//! The event domain model — the atomic unit of state change.
//!
//! An event is never modified or deleted after append. Order within a
//! project is total and given by `id`. The union of event types is closed
//! and versioned at the wire level (see [`EventType`]); anything the
//! running binary does not recognize round-trips as [`EventType::Unknown`]
//! so older readers stay forward-compatible with newer writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A project namespace identifier. Typically a canonical filesystem path,
/// but treated as an opaque string everywhere in this crate.
pub type ProjectKey = String;

/// The closed (but forward-compatible) set of wire event types from
/// spec §6. Unknown values deserialize to `Unknown` carrying the original
/// tag, so the projector can skip them without losing the tag for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    AgentActive,
    MessageSent,
    MessageRead,
    MessageAcked,
    FileReserved,
    FileReleased,
    CellCreated,
    CellUpdated,
    CellStatusChanged,
    CellClosed,
    EpicCreated,
    DependencyAdded,
    DependencyRemoved,
    SwarmCheckpointed,
    DecisionRecorded,
    MemoryStored,
    MemoryUpdated,
    MemoryDeleted,
    MemoryValidated,
    MemoryFound,
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// The wire tag as it appears in `data`'s sibling `type` field. Used
    /// when we need the original string even for `Unknown` (deserializing
    /// `#[serde(other)]` loses the source string, so callers that must
    /// retain it should read the raw `type` column instead of this enum).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentRegistered => "agent_registered",
            Self::AgentActive => "agent_active",
            Self::MessageSent => "message_sent",
            Self::MessageRead => "message_read",
            Self::MessageAcked => "message_acked",
            Self::FileReserved => "file_reserved",
            Self::FileReleased => "file_released",
            Self::CellCreated => "cell_created",
            Self::CellUpdated => "cell_updated",
            Self::CellStatusChanged => "cell_status_changed",
            Self::CellClosed => "cell_closed",
            Self::EpicCreated => "epic_created",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::SwarmCheckpointed => "swarm_checkpointed",
            Self::DecisionRecorded => "decision_recorded",
            Self::MemoryStored => "memory_stored",
            Self::MemoryUpdated => "memory_updated",
            Self::MemoryDeleted => "memory_deleted",
            Self::MemoryValidated => "memory_validated",
            Self::MemoryFound => "memory_found",
            Self::Unknown => "unknown",
        }
    }
}

/// A single row in the append-only `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing id; also the total-order sequence number
    /// within `project_key`.
    pub id: i64,
    pub project_key: ProjectKey,
    /// Raw wire type tag as stored, so unknown types survive round-trips
    /// byte-for-byte even though [`EventType::Unknown`] loses the tag.
    pub event_type: String,
    pub timestamp_ms: i64,
    /// Type-specific JSON payload. Opaque for unknown event types.
    pub data: Value,
}

impl Event {
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_else(Utc::now)
    }

    pub fn kind(&self) -> EventType {
        serde_json::from_value(Value::String(self.event_type.clone())).unwrap_or(EventType::Unknown)
    }
}

/// A not-yet-persisted event, built by a component before handing it to
/// [`crate::event_log::EventLog::append`].
#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub project_key: ProjectKey,
    pub event_type: String,
    pub data: Value,
    /// Caller-supplied idempotency key. If an event with this key was
    /// already appended, `append` returns the prior event's id instead of
    /// inserting a duplicate.
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    pub fn new(project_key: impl Into<ProjectKey>, event_type: EventType, data: Value) -> Self {
        Self {
            project_key: project_key.into(),
            event_type: event_type.as_str().to_string(),
            data,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
