//! Error types for the routing crate.
//!
//! Lower layers return plain enums; the engine converts them into a
//! `TurnError` and hands callers a rootcause `Report<TurnError>`:
//! - `RoutingError`: an action matched no transition (fail-closed)
//! - `CheckpointError`: the checkpoint store failed or saw a concurrent writer
//! - `AssistantError` / `IdentityError`: external collaborators failed
//! - `RoutingTableError`: the startup configuration is inconsistent
//! - `TurnError`: what a caller of the engine sees

use concierge_conversation::{Assistant, Domain, ToolId, ToolTableError};
use concierge_core::{ApprovalId, ConversationId};
use std::fmt;

/// An action that does not match any transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The assistant asked for a tool it does not bind.
    UnknownTool { assistant: Assistant, tool: ToolId },
    /// A specialist tried to transfer instead of escalating first.
    TransferFromSpecialist { from: Domain, target: Domain },
    /// Transfer to a specialist the routing table does not configure.
    UnknownTransferTarget { target: Domain },
    /// The primary assistant tried to escalate.
    EscalateFromPrimary,
    /// A transfer or escalation call was missing its correlation id.
    MissingCorrelationId { tool: String },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { assistant, tool } => {
                write!(f, "the {assistant} assistant has no tool named '{tool}'")
            }
            Self::TransferFromSpecialist { from, target } => {
                write!(f, "the {from} assistant cannot transfer to {target}")
            }
            Self::UnknownTransferTarget { target } => {
                write!(f, "no assistant is configured for {target}")
            }
            Self::EscalateFromPrimary => {
                write!(f, "the primary assistant has nothing to escalate to")
            }
            Self::MissingCorrelationId { tool } => {
                write!(f, "tool call '{tool}' has no correlation id")
            }
        }
    }
}

impl std::error::Error for RoutingError {}

/// Errors from checkpoint persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// Another writer committed first.
    VersionConflict {
        conversation_id: ConversationId,
        expected: u64,
        found: u64,
    },
    /// The store could not be reached or the write failed.
    Unavailable { reason: String },
    /// A stored checkpoint could not be decoded.
    Corrupt {
        conversation_id: ConversationId,
        reason: String,
    },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionConflict {
                conversation_id,
                expected,
                found,
            } => write!(
                f,
                "checkpoint version conflict for {conversation_id}: expected {expected}, found {found}"
            ),
            Self::Unavailable { reason } => write!(f, "checkpoint store unavailable: {reason}"),
            Self::Corrupt {
                conversation_id,
                reason,
            } => write!(f, "corrupt checkpoint for {conversation_id}: {reason}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// Errors from running an assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    /// The model backend could not be reached.
    Unavailable { reason: String },
    /// The backend answered with something that is not a message.
    InvalidResponse { reason: String },
}

impl fmt::Display for AssistantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "assistant backend unavailable: {reason}"),
            Self::InvalidResponse { reason } => {
                write!(f, "assistant backend returned an invalid response: {reason}")
            }
        }
    }
}

impl std::error::Error for AssistantError {}

/// Errors from identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No traveller matches the reference.
    NotFound { user_ref: String },
    /// The lookup could not be performed.
    Unavailable { reason: String },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { user_ref } => write!(f, "no traveller found for '{user_ref}'"),
            Self::Unavailable { reason } => write!(f, "identity lookup unavailable: {reason}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Errors from assembling a routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingTableError {
    /// The tool partition is inconsistent.
    Tools(ToolTableError),
    /// Tools or transfers reference an assistant without a label.
    UnlabelledAssistant { assistant: Assistant },
    /// A pseudo-tool name shadows a business tool.
    PseudoToolCollision { name: String },
}

impl fmt::Display for RoutingTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tools(e) => write!(f, "invalid tool table: {e}"),
            Self::UnlabelledAssistant { assistant } => {
                write!(f, "the {assistant} assistant is referenced but not configured")
            }
            Self::PseudoToolCollision { name } => {
                write!(f, "routing pseudo-tool '{name}' collides with a business tool")
            }
        }
    }
}

impl std::error::Error for RoutingTableError {}

impl From<ToolTableError> for RoutingTableError {
    fn from(e: ToolTableError) -> Self {
        Self::Tools(e)
    }
}

/// Why a turn could not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The assistant's action matched no transition; nothing was committed.
    Routing(RoutingError),
    /// The checkpoint store failed; retry the turn.
    Persistence(CheckpointError),
    /// Another turn for this conversation is in flight.
    ConcurrentTurn { conversation_id: ConversationId },
    /// The conversation waits for approve/reject and accepts nothing else.
    AwaitingApproval {
        conversation_id: ConversationId,
        approval_id: ApprovalId,
    },
    /// A decision arrived for a conversation that is not suspended.
    NotSuspended { conversation_id: ConversationId },
    /// No checkpoint exists for the conversation.
    NotFound { conversation_id: ConversationId },
    /// The traveller could not be identified and the policy requires it.
    IdentityUnavailable { reason: String },
    /// The assistant backend failed.
    Assistant(AssistantError),
    /// The turn kept looping without reaching a reply.
    StepLimitExceeded { limit: usize },
}

impl TurnError {
    /// Returns true if resubmitting the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::ConcurrentTurn { .. } | Self::Assistant(_)
        )
    }

    /// Returns the text shown to the traveller for this failure.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ConcurrentTurn { .. } => {
                "I'm still working on your previous message. Please wait a moment."
            }
            Self::AwaitingApproval { .. } => {
                "Please approve or reject the pending action before continuing."
            }
            Self::NotSuspended { .. } => "There is no pending action to approve.",
            Self::IdentityUnavailable { .. } => {
                "I couldn't find your booking profile. Please check your passenger details."
            }
            Self::NotFound { .. } => "I couldn't find that conversation.",
            Self::Routing(_)
            | Self::Persistence(_)
            | Self::Assistant(_)
            | Self::StepLimitExceeded { .. } => {
                "Sorry, something went wrong on my side. Please try again."
            }
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing(e) => write!(f, "routing failed: {e}"),
            Self::Persistence(e) => write!(f, "persistence failed: {e}"),
            Self::ConcurrentTurn { conversation_id } => {
                write!(f, "a turn is already in flight for {conversation_id}")
            }
            Self::AwaitingApproval {
                conversation_id,
                approval_id,
            } => write!(f, "{conversation_id} is awaiting decision {approval_id}"),
            Self::NotSuspended { conversation_id } => {
                write!(f, "{conversation_id} has no pending approval")
            }
            Self::NotFound { conversation_id } => {
                write!(f, "conversation not found: {conversation_id}")
            }
            Self::IdentityUnavailable { reason } => {
                write!(f, "traveller identity unavailable: {reason}")
            }
            Self::Assistant(e) => write!(f, "assistant failed: {e}"),
            Self::StepLimitExceeded { limit } => {
                write!(f, "turn exceeded {limit} steps without a reply")
            }
        }
    }
}

impl std::error::Error for TurnError {}

impl From<RoutingError> for TurnError {
    fn from(e: RoutingError) -> Self {
        Self::Routing(e)
    }
}

impl From<CheckpointError> for TurnError {
    fn from(e: CheckpointError) -> Self {
        match e {
            // A lost optimistic race means a second writer for the same conversation.
            CheckpointError::VersionConflict {
                conversation_id, ..
            } => Self::ConcurrentTurn { conversation_id },
            other => Self::Persistence(other),
        }
    }
}

impl From<AssistantError> for TurnError {
    fn from(e: AssistantError) -> Self {
        Self::Assistant(e)
    }
}
