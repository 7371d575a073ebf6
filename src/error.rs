//! Crate-wide error taxonomy.
//!
//! Mirrors the six error kinds every component is required to surface
//! (validation, not-found, conflict, state, projection, IO), each carrying
//! the operation name and enough structured context that a caller never has
//! to re-derive "what conflicted with what" from a string.

use thiserror::Error;

/// A reservation conflict: one requested path collided with an existing
/// active reservation held by another agent.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReservationConflict {
    pub path: String,
    pub holders: Vec<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Every variant carries the failing operation's name so a caller (and a
/// human reading a log line) never has to guess which call produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, schema mismatch, or a rejected decomposition plan.
    #[error("{operation}: validation failed: {message}")]
    Validation {
        operation: &'static str,
        message: String,
    },

    /// A referenced id (agent, cell, message, reservation, memory, lock)
    /// does not exist in this project.
    #[error("{operation}: not found: {message} (id={id})")]
    NotFound {
        operation: &'static str,
        message: String,
        id: String,
    },

    /// A file reservation could not be granted because it collides with an
    /// active exclusive reservation.
    #[error("{operation}: reservation conflict on {} path(s)", conflicts.len())]
    ReservationConflict {
        operation: &'static str,
        conflicts: Vec<ReservationConflict>,
    },

    /// Adding a dependency edge would introduce a cycle in the DAG.
    #[error("{operation}: cycle detected: {}", path.join(" -> "))]
    Cycle {
        operation: &'static str,
        path: Vec<String>,
    },

    /// An id (or id fragment) resolved to more than one cell.
    #[error("{operation}: ambiguous id {fragment:?}, candidates: {}", candidates.join(", "))]
    AmbiguousId {
        operation: &'static str,
        fragment: String,
        candidates: Vec<String>,
    },

    /// A unique constraint was violated (duplicate agent name, duplicate
    /// idempotency key, etc).
    #[error("{operation}: duplicate key: {message}")]
    Duplicate {
        operation: &'static str,
        message: String,
    },

    /// The operation is not valid given the entity's current state (e.g.
    /// reviewing a tombstoned cell).
    #[error("{operation}: invalid state: {message}")]
    State {
        operation: &'static str,
        message: String,
    },

    /// The projector failed to apply a committed-but-not-yet-visible event;
    /// the append transaction was rolled back. Signals possible schema
    /// drift between the event payload and the handler.
    #[error("{operation}: projection failed: {message}")]
    Projection {
        operation: &'static str,
        message: String,
    },

    /// Database, embedding provider, or filesystem failure.
    #[error("{operation}: io error: {message}")]
    Io {
        operation: &'static str,
        message: String,
    },
}

impl Error {
    pub fn validation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { operation, message: message.into() }
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound { operation, message: message.into(), id: id.into() }
    }

    pub fn state(operation: &'static str, message: impl Into<String>) -> Self {
        Self::State { operation, message: message.into() }
    }

    pub fn projection(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Projection { operation, message: message.into() }
    }

    pub fn io(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Io { operation, message: message.into() }
    }
}

/// sqlx errors surface as `Error::Io` unless a caller maps them to a more
/// specific variant (e.g. a unique-constraint violation to `Duplicate`).
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Error::Duplicate {
                    operation: "store",
                    message: db_err.message().to_string(),
                };
            }
        }
        Error::Io {
            operation: "store",
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation {
            operation: "serde",
            message: err.to_string(),
        }
    }
}
