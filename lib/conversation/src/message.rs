//! Message types for conversations.

use chrono::{DateTime, Utc};
use concierge_core::MessageId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The traveller.
    User,
    /// Primary or specialist assistant output.
    Assistant,
    /// Tool result, including synthetic acknowledgments.
    Tool,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message role.
    pub role: MessageRole,
    /// Message content.
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Result linkage for tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    /// Creates a new message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Creates a successful tool result message.
    ///
    /// The content mirrors the JSON result so models that only read `content`
    /// still see the data.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, result: JsonValue) -> Self {
        let content = match &result {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        };
        let mut msg = Self::new(MessageRole::Tool, content);
        msg.tool_result = Some(ToolResult::success(tool_call_id, result));
        msg
    }

    /// Creates a tool message carrying plain text, used for acknowledgments.
    #[must_use]
    pub fn tool_text(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::tool(tool_call_id, JsonValue::String(text.into()))
    }

    /// Creates a failed tool result message.
    #[must_use]
    pub fn tool_error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut msg = Self::new(MessageRole::Tool, format!("Error: {error}"));
        msg.tool_result = Some(ToolResult::failure(tool_call_id, error));
        msg
    }

    /// Adds a tool call.
    #[must_use]
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    /// Returns true if this message has tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Returns the tool call id this message answers, if it is a tool result.
    #[must_use]
    pub fn answers(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.tool_call_id.as_str())
    }
}

/// A tool call made by an assistant.
///
/// `id` is the correlation id linking the request to its result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id for this call.
    pub id: String,
    /// The tool name as the model produced it.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: JsonValue,
}

impl ToolCall {
    /// Creates a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool call ID this result is for.
    pub tool_call_id: String,
    /// The result value.
    pub result: JsonValue,
    /// Error message if the tool failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Creates a successful tool result.
    #[must_use]
    pub fn success(tool_call_id: impl Into<String>, result: JsonValue) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result,
            error: None,
        }
    }

    /// Creates a failed tool result.
    #[must_use]
    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: JsonValue::Null,
            error: Some(error.into()),
        }
    }

    /// Returns true if the tool call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
