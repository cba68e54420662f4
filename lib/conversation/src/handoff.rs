//! Synthetic acknowledgments for handoffs and denials.
//!
//! These transformers touch nothing but the state. Each appends at most one
//! tool message answering the originating correlation id, and does nothing
//! when that id is already answered, so replaying a step after a crash
//! cannot duplicate an acknowledgment or a push/pop.

use crate::message::Message;
use crate::state::{ConversationState, Domain};
use concierge_core::MessageId;

/// Outcome of applying a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The transition ran and appended this acknowledgment.
    Applied(MessageId),
    /// The correlation id was already answered; nothing changed.
    AlreadyApplied,
}

impl Handoff {
    /// Returns true if this call changed the state.
    #[must_use]
    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Activates a specialist: pushes it and acknowledges the transfer.
pub fn enter_specialist(
    state: &mut ConversationState,
    domain: Domain,
    label: &str,
    correlation_id: &str,
) -> Handoff {
    if state.has_result_for(correlation_id) {
        return Handoff::AlreadyApplied;
    }

    state.dialog_stack_mut().push(domain);
    acknowledge(
        state,
        Message::tool_text(correlation_id, format!("Entering the {label} assistant.")),
    )
}

/// Returns control to the primary assistant: pops and acknowledges.
///
/// `label` names the specialist being left.
pub fn leave_specialist(state: &mut ConversationState, label: &str, correlation_id: &str) -> Handoff {
    if state.has_result_for(correlation_id) {
        return Handoff::AlreadyApplied;
    }

    state.dialog_stack_mut().pop();
    acknowledge(
        state,
        Message::tool_text(
            correlation_id,
            format!("Leaving the {label} assistant. Returning to the primary assistant."),
        ),
    )
}

/// Answers a rejected sensitive tool call without running it.
pub fn deny_tool_call(state: &mut ConversationState, correlation_id: &str, reason: &str) -> Handoff {
    if state.has_result_for(correlation_id) {
        return Handoff::AlreadyApplied;
    }

    acknowledge(
        state,
        Message::tool_error(
            correlation_id,
            format!(
                "The user denied this action. Reason: {reason}. \
                 Continue assisting, taking the user's input into account."
            ),
        ),
    )
}

fn acknowledge(state: &mut ConversationState, message: Message) -> Handoff {
    let id = message.id;
    state.append(message);
    Handoff::Applied(id)
}
