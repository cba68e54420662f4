//! Contracts for the engine's external collaborators.
//!
//! The engine only talks to the model backend, the tool backend and the
//! traveller directory through these traits. The server crate provides HTTP
//! implementations; tests provide scripted ones.

use crate::error::{AssistantError, IdentityError};
use async_trait::async_trait;
use concierge_conversation::{
    Assistant, ConversationState, Message, ResolvedIdentity, ToolDefinition, ToolError, ToolId,
};
use serde_json::Value as JsonValue;

/// Everything an assistant needs to produce its next message.
#[derive(Debug, Clone, Copy)]
pub struct AssistantRequest<'a> {
    /// The assistant to run.
    pub assistant: Assistant,
    /// Its display label.
    pub label: &'a str,
    /// The conversation so far.
    pub state: &'a ConversationState,
    /// The tools, including routing pseudo-tools, the assistant may call.
    pub tools: &'a [ToolDefinition],
}

/// Runs an assistant against a conversation.
#[async_trait]
pub trait AssistantRunner: Send + Sync {
    /// Produces the assistant's next message.
    ///
    /// The message is either plain text or carries tool calls; the engine
    /// decodes it into an action.
    async fn run(&self, request: AssistantRequest<'_>) -> Result<Message, AssistantError>;
}

/// Executes business tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes a tool.
    ///
    /// The engine never inspects the result beyond success or failure.
    async fn invoke(
        &self,
        tool: &ToolId,
        arguments: &JsonValue,
        identity: Option<&ResolvedIdentity>,
    ) -> Result<JsonValue, ToolError>;
}

/// Resolves an external user reference into a traveller identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Looks up the traveller.
    async fn resolve(&self, user_ref: &str) -> Result<ResolvedIdentity, IdentityError>;
}
