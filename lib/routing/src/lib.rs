//! Dialog routing for the travel concierge.
//!
//! This crate provides the state machine that decides which assistant runs
//! next in a conversation:
//!
//! - **Actions**: structured decoding of an assistant's reply
//! - **Router**: the transition table from action to next node
//! - **Engine**: the turn driver, approval gate and single-writer lease
//! - **Checkpoints**: versioned snapshots written after every step
//! - **Catalog**: the travel assistants and their tool tiers

pub mod action;
pub mod catalog;
pub mod checkpoint;
pub mod contract;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod router;
pub mod table;

pub use action::{Action, ActionDecoder, Decoded, ESCALATION_TOOL};
pub use catalog::travel_table;
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use contract::{AssistantRequest, AssistantRunner, IdentityResolver, ToolInvoker};
pub use engine::{Decision, Engine, EngineConfig, IdentityPolicy, TurnInput, TurnOutcome};
pub use envelope::Envelope;
pub use error::{
    AssistantError, CheckpointError, IdentityError, RoutingError, RoutingTableError, TurnError,
};
pub use router::{Node, route};
pub use table::{RoutingTable, RoutingTableBuilder};
