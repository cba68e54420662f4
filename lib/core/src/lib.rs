//! Shared identifiers and error plumbing for the travel concierge.
//!
//! Every other crate in the workspace depends on this one for the typed
//! conversation/message identifiers and the rootcause-backed `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ApprovalId, ConversationId, MessageId, ParseIdError};
