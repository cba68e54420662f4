//! Conversation state and the dialog stack.
//!
//! The state is the single record threaded through every routing step. It
//! is checkpointed after each step, so everything here must serialize.

use crate::message::{Message, MessageRole};
use crate::tool::ToolId;
use chrono::{DateTime, Utc};
use concierge_core::{ApprovalId, ConversationId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A specialist domain the primary assistant can hand off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Flight search, changes and cancellations.
    Flight,
    /// Hotel search and bookings.
    Hotel,
    /// Car rental search and bookings.
    CarRental,
    /// Trip recommendations and excursion bookings.
    Excursion,
}

impl Domain {
    /// Every specialist domain, in routing-table order.
    pub const ALL: [Domain; 4] = [Self::Flight, Self::Hotel, Self::CarRental, Self::Excursion];

    /// Returns the stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flight => "flight",
            Self::Hotel => "hotel",
            Self::CarRental => "car_rental",
            Self::Excursion => "excursion",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An assistant that can be active in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assistant {
    /// The dispatcher that owns the conversation when no specialist is active.
    Primary,
    /// A specialist for one domain.
    Specialist(Domain),
}

impl Assistant {
    /// Returns the specialist domain, if any.
    #[must_use]
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Self::Primary => None,
            Self::Specialist(domain) => Some(*domain),
        }
    }
}

impl From<Domain> for Assistant {
    fn from(domain: Domain) -> Self {
        Self::Specialist(domain)
    }
}

impl fmt::Display for Assistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Specialist(domain) => write!(f, "{domain}"),
        }
    }
}

/// Stack of active specialists.
///
/// The top is the active specialist; an empty stack means the primary
/// assistant is active. The primary is never pushed, which the element type
/// enforces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogStack {
    frames: Vec<Domain>,
}

impl DialogStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a specialist.
    ///
    /// Pushing the specialist that is already on top is a no-op so repeated
    /// transfer requests do not grow the stack. Returns true if pushed.
    pub fn push(&mut self, domain: Domain) -> bool {
        if self.top() == Some(domain) {
            return false;
        }
        self.frames.push(domain);
        true
    }

    /// Pops the active specialist. Popping an empty stack is a no-op.
    pub fn pop(&mut self) -> Option<Domain> {
        self.frames.pop()
    }

    /// Returns the active specialist, if any.
    #[must_use]
    pub fn top(&self) -> Option<Domain> {
        self.frames.last().copied()
    }

    /// Returns the assistant that should handle the next step.
    #[must_use]
    pub fn active_assistant(&self) -> Assistant {
        self.top().map_or(Assistant::Primary, Assistant::Specialist)
    }

    /// Returns the stack depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true when the primary assistant is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates from bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &Domain> {
        self.frames.iter()
    }
}

/// Opaque reference to the traveller behind the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedIdentity(String);

impl ResolvedIdentity {
    /// Wraps an identity reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the raw reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a suspended conversation continues once a decision arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Identifies this particular suspension.
    pub approval_id: ApprovalId,
    /// The assistant that requested the tool.
    pub assistant: Assistant,
    /// The sensitive tool awaiting approval.
    pub tool_id: ToolId,
    /// Arguments the tool will receive if approved.
    pub arguments: JsonValue,
    /// Correlation id of the originating tool call.
    pub correlation_id: String,
    /// When execution was suspended.
    pub suspended_at: DateTime<Utc>,
}

/// The mutable record threaded through every routing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// The conversation this state belongs to.
    pub conversation_id: ConversationId,
    /// Append-only history.
    messages: Vec<Message>,
    /// Active specialists.
    dialog_stack: DialogStack,
    /// Traveller reference, set once.
    resolved_identity: Option<ResolvedIdentity>,
    /// Set only while awaiting approval.
    pending_resume_point: Option<ResumePoint>,
    /// When the conversation started.
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    /// Creates an empty conversation with the primary assistant active.
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            dialog_stack: DialogStack::new(),
            resolved_identity: None,
            pending_resume_point: None,
            created_at: Utc::now(),
        }
    }

    /// Appends a message to the history.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns the full history in append order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the last message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the most recent assistant message text.
    #[must_use]
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Returns true if the pending call with `correlation_id` is answered.
    ///
    /// Only messages after the latest assistant message carrying that call
    /// are considered, so an id reused by a later reply starts unanswered.
    #[must_use]
    pub fn has_result_for(&self, correlation_id: &str) -> bool {
        for message in self.messages.iter().rev() {
            if message.answers() == Some(correlation_id) {
                return true;
            }
            if message.role == MessageRole::Assistant
                && message.tool_calls.iter().any(|c| c.id == correlation_id)
            {
                return false;
            }
        }
        false
    }

    /// Returns the dialog stack.
    #[must_use]
    pub fn dialog_stack(&self) -> &DialogStack {
        &self.dialog_stack
    }

    /// Returns the dialog stack for the handoff handlers.
    pub(crate) fn dialog_stack_mut(&mut self) -> &mut DialogStack {
        &mut self.dialog_stack
    }

    /// Returns the assistant that should handle the next step.
    #[must_use]
    pub fn active_assistant(&self) -> Assistant {
        self.dialog_stack.active_assistant()
    }

    /// Returns the resolved traveller identity.
    #[must_use]
    pub fn resolved_identity(&self) -> Option<&ResolvedIdentity> {
        self.resolved_identity.as_ref()
    }

    /// Records the traveller identity.
    ///
    /// The identity is write-once; later calls are ignored. Returns true if
    /// the identity was recorded by this call.
    pub fn resolve_identity(&mut self, identity: ResolvedIdentity) -> bool {
        if self.resolved_identity.is_some() {
            return false;
        }
        self.resolved_identity = Some(identity);
        true
    }

    /// Returns the pending approval, if suspended.
    #[must_use]
    pub fn pending_resume_point(&self) -> Option<&ResumePoint> {
        self.pending_resume_point.as_ref()
    }

    /// Returns true while a sensitive tool awaits a decision.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.pending_resume_point.is_some()
    }

    /// Records the point to resume from once a decision arrives.
    pub fn suspend(&mut self, resume_point: ResumePoint) {
        self.pending_resume_point = Some(resume_point);
    }

    /// Clears and returns the resume point.
    pub fn take_resume_point(&mut self) -> Option<ResumePoint> {
        self.pending_resume_point.take()
    }
}
