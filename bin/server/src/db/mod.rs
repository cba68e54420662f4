//! Database repositories for the concierge server.
//!
//! This module provides data access for:
//! - Conversation checkpoints

pub mod checkpoint;

pub use checkpoint::PgCheckpointStore;
