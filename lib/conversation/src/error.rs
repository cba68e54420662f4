//! Error types for the conversation crate.
//!
//! - `ToolError`: a business tool invocation failed
//! - `ToolTableError`: the tool classification table is inconsistent

use crate::state::Assistant;
use crate::tool::ToolId;
use std::fmt;

/// Errors from tool invocation.
///
/// These never abort a turn; the engine feeds them back to the active
/// assistant as a failed tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The tool backend does not know the tool.
    NotFound { name: String },
    /// The tool ran and failed (not-found record, constraint violation, ...).
    ExecutionFailed { name: String, reason: String },
    /// The arguments were rejected.
    InvalidInput { name: String, reason: String },
    /// The tool needs a traveller identity the conversation does not have.
    MissingIdentity { name: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "tool not found: {name}"),
            Self::ExecutionFailed { name, reason } => {
                write!(f, "tool '{name}' execution failed: {reason}")
            }
            Self::InvalidInput { name, reason } => {
                write!(f, "invalid input for tool '{name}': {reason}")
            }
            Self::MissingIdentity { name } => {
                write!(f, "tool '{name}' requires a resolved traveller identity")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from building a tool classification table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTableError {
    /// A tool is both safe and sensitive for the same assistant.
    AmbiguousTier { assistant: Assistant, tool: ToolId },
}

impl fmt::Display for ToolTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousTier { assistant, tool } => {
                write!(
                    f,
                    "tool '{tool}' is both safe and sensitive for the {assistant} assistant"
                )
            }
        }
    }
}

impl std::error::Error for ToolTableError {}
