//! Conversation state for the travel concierge.
//!
//! This crate provides:
//!
//! - **Messages**: the append-only history with tool-call linkage
//! - **State**: the dialog stack of active specialists and the approval resume point
//! - **Tool tiers**: per-assistant safe/sensitive classification
//! - **Handoffs**: the synthetic entry/exit/denial acknowledgments

pub mod error;
pub mod handoff;
pub mod message;
pub mod state;
pub mod tool;

pub use error::{ToolError, ToolTableError};
pub use handoff::{Handoff, deny_tool_call, enter_specialist, leave_specialist};
pub use message::{Message, MessageRole, ToolCall, ToolResult};
pub use state::{Assistant, ConversationState, DialogStack, Domain, ResolvedIdentity, ResumePoint};
pub use tool::{ToolDefinition, ToolId, ToolTable, ToolTableBuilder, ToolTier};
