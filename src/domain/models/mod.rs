//! Domain models: plain data types with no persistence or IO concerns.

pub mod agent;
pub mod cell;
pub mod cursor;
pub mod decision;
pub mod event;
pub mod lock;
pub mod memory;
pub mod message;
pub mod reservation;
pub mod swarm;
pub mod swarm_context;

pub use agent::Agent;
pub use cell::{
    Cell, CellFilter, CellId, CellRecord, CellStatus, CellType, Comment, Dependency,
    DependencyRecord, ImportOutcome, ImportReport, Relationship,
};
pub use cursor::Cursor;
pub use decision::{DecisionTrace, EntityKind, EntityLink};
pub use event::{Event, EventType, NewEvent, ProjectKey};
pub use lock::Lock;
pub use memory::{
    DecayBoundaries, DecayTier, Memory, MemoryEntity, MemoryLink, MemoryLinkKind, MemoryStats,
    MemoryValidation, RetrievalMethod, ScoredMemory, TaxonomyNode,
};
pub use message::{
    Importance, Message, MessageHeader, Recipient, ThreadSummary, BROADCAST_RECIPIENT,
};
pub use reservation::{ReserveOutcome, Reservation};
pub use swarm::{
    BeadTree, BlockedOutcome, CompletionOutcome, DecompositionResult, FeedbackStatus, RawSubtask,
    RawDecomposition, ReviewFeedback, ReviewRecord, ReviewState, SpawnContract, Strategy,
    StrategySelection, ValidatedSubtask,
};
pub use swarm_context::{Recovery, SwarmContext};
