//! The dialog state machine.
//!
//! [`route`] is a pure function from the active assistant and its decoded
//! action to the next node. The engine executes nodes; the router never
//! touches state.
//!
//! ```text
//! Primary      --Reply-------------> Terminal
//! Primary      --InvokeTool(safe)--> Tool --> Primary
//! Primary      --Transfer(d)-------> EnteringAssistant(d) --> d
//! d            --Reply-------------> Terminal
//! d            --InvokeTool(safe)--> Tool --> d
//! d            --InvokeTool(sens)--> AwaitingApproval --approve--> Tool --> d
//!                                                     --reject---> d
//! d            --Escalate----------> LeavingAssistant --> Primary
//! ```

use crate::action::Action;
use crate::error::RoutingError;
use crate::table::RoutingTable;
use concierge_conversation::{Assistant, Domain, ToolCall, ToolId, ToolTier};
use serde::{Deserialize, Serialize};

/// A node of the dialog state machine.
///
/// The engine checkpoints the next node to run alongside the state, so a
/// turn interrupted between steps resumes exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    /// Run an assistant.
    Assistant { assistant: Assistant },
    /// Execute a tool, then return to `assistant`.
    Tool { assistant: Assistant, call: ToolCall },
    /// Halted before a sensitive tool; only approve or reject may continue.
    AwaitingApproval { assistant: Assistant, call: ToolCall },
    /// Push a specialist and acknowledge the transfer.
    EnteringAssistant {
        domain: Domain,
        correlation_id: String,
    },
    /// Pop a specialist and acknowledge the return to the primary.
    LeavingAssistant {
        domain: Domain,
        correlation_id: String,
    },
    /// The turn is over.
    Terminal,
}

impl Node {
    /// Returns true if the node needs no further execution this turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// Returns the sensitive tool awaiting approval, if any.
    #[must_use]
    pub fn awaiting(&self) -> Option<(Assistant, ToolId)> {
        match self {
            Self::AwaitingApproval { assistant, call } => {
                Some((*assistant, ToolId::new(call.name.clone())))
            }
            _ => None,
        }
    }
}

/// Picks the node that follows `action` produced by `from`.
///
/// # Errors
///
/// Returns a `RoutingError` when the action matches no transition. The caller
/// must abort the turn without committing anything past the last checkpoint.
pub fn route(table: &RoutingTable, from: Assistant, action: &Action) -> Result<Node, RoutingError> {
    match (from, action) {
        (_, Action::Reply { .. }) => Ok(Node::Terminal),

        (assistant, Action::InvokeTool { call }) => {
            let tool = ToolId::new(call.name.clone());
            match table.classify(assistant, &tool) {
                Some(ToolTier::Safe) => Ok(Node::Tool {
                    assistant,
                    call: call.clone(),
                }),
                Some(ToolTier::Sensitive) => Ok(Node::AwaitingApproval {
                    assistant,
                    call: call.clone(),
                }),
                None => Err(RoutingError::UnknownTool { assistant, tool }),
            }
        }

        (
            Assistant::Primary,
            Action::Transfer {
                target,
                correlation_id,
                ..
            },
        ) => {
            if !table.has_specialist(*target) {
                return Err(RoutingError::UnknownTransferTarget { target: *target });
            }
            Ok(Node::EnteringAssistant {
                domain: *target,
                correlation_id: correlation_id.clone(),
            })
        }

        (Assistant::Specialist(from), Action::Transfer { target, .. }) => {
            Err(RoutingError::TransferFromSpecialist {
                from,
                target: *target,
            })
        }

        (Assistant::Primary, Action::Escalate { .. }) => Err(RoutingError::EscalateFromPrimary),

        (Assistant::Specialist(domain), Action::Escalate { correlation_id, .. }) => {
            Ok(Node::LeavingAssistant {
                domain,
                correlation_id: correlation_id.clone(),
            })
        }
    }
}
