//! swarmmail — local-first coordination runtime for multi-agent LLM swarms.
//!
//! A human-facing coordinator agent decomposes a task into a tree of work
//! items ("cells"), spawns parallel worker agents, mediates file-editing
//! conflicts between them, reviews their output, and persists decisions,
//! messages, and learnings into an append-only event log. A separate
//! semantic memory subsystem embeds free-text learnings and retrieves them
//! by vector similarity.
//!
//! The crate is a library surface only: the MCP/CLI wrapper layer, host
//! agent prompt templates, and the embedding model itself are external
//! collaborators. Everything here is reached through [`SwarmSession`],
//! which composes one instance of each component over a single [`Store`].

pub mod coordinator;
pub mod config;
pub mod domain;
pub mod embeddings;
pub mod error;
pub mod event_log;
pub mod hive;
pub mod lock;
pub mod mailbox;
pub mod projector;
pub mod reservation;
pub mod semantic_memory;
pub mod session;
pub mod store;
pub mod telemetry;

pub use config::SwarmMailConfig;
pub use error::{Error, Result};
pub use session::SwarmSession;
pub use store::Store;
