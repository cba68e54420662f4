//! Decoding assistant output into a routing action.
//!
//! An assistant answers with plain text, a business tool call, or one of the
//! routing pseudo-tools (a transfer to a specialist or an escalation back to
//! the primary). Only one action is acted on per step; any further tool
//! calls in the same message are returned as `skipped` so the engine can
//! answer them.

use crate::error::RoutingError;
use concierge_conversation::{Domain, Message, ToolCall, ToolDefinition};
use serde_json::json;
use std::collections::BTreeMap;

/// Default name of the escalation pseudo-tool.
pub const ESCALATION_TOOL: &str = "CompleteOrEscalate";

/// What the active assistant asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Plain text for the traveller.
    Reply { text: String },
    /// A business tool call.
    InvokeTool { call: ToolCall },
    /// Hand the conversation to a specialist.
    Transfer {
        target: Domain,
        request: String,
        correlation_id: String,
    },
    /// Give control back to the primary assistant.
    Escalate {
        reason: String,
        correlation_id: String,
    },
}

impl Action {
    /// Returns the correlation id of the call behind this action, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Reply { .. } => None,
            Self::InvokeTool { call } => Some(&call.id),
            Self::Transfer { correlation_id, .. } | Self::Escalate { correlation_id, .. } => {
                Some(correlation_id)
            }
        }
    }
}

/// A decoded action plus the tool calls that were not acted on.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub action: Action,
    pub skipped: Vec<ToolCall>,
}

/// Maps pseudo-tool names to routing actions.
#[derive(Debug, Clone)]
pub struct ActionDecoder {
    transfers: BTreeMap<String, Domain>,
    escalation: String,
}

impl Default for ActionDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionDecoder {
    /// Creates a decoder with the standard pseudo-tool names.
    #[must_use]
    pub fn new() -> Self {
        let transfers = Domain::ALL
            .into_iter()
            .map(|domain| (transfer_tool_name(domain).to_string(), domain))
            .collect();
        Self {
            transfers,
            escalation: ESCALATION_TOOL.to_string(),
        }
    }

    /// Renames the transfer pseudo-tool for `domain`.
    #[must_use]
    pub fn with_transfer(mut self, name: impl Into<String>, domain: Domain) -> Self {
        self.transfers.retain(|_, target| *target != domain);
        self.transfers.insert(name.into(), domain);
        self
    }

    /// Renames the escalation pseudo-tool.
    #[must_use]
    pub fn with_escalation(mut self, name: impl Into<String>) -> Self {
        self.escalation = name.into();
        self
    }

    /// Returns the escalation pseudo-tool name.
    #[must_use]
    pub fn escalation_tool(&self) -> &str {
        &self.escalation
    }

    /// Returns true if `name` is a transfer or escalation pseudo-tool.
    #[must_use]
    pub fn is_pseudo_tool(&self, name: &str) -> bool {
        name == self.escalation || self.transfers.contains_key(name)
    }

    /// Returns every pseudo-tool name.
    pub fn pseudo_tool_names(&self) -> impl Iterator<Item = &str> {
        self.transfers
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(self.escalation.as_str()))
    }

    /// Decodes an assistant message.
    ///
    /// A transfer or escalation takes precedence over business tool calls in
    /// the same message; otherwise the first tool call wins.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::MissingCorrelationId` if the selected call has
    /// an empty id.
    pub fn decode(&self, message: &Message) -> Result<Decoded, RoutingError> {
        self.decode_preferring(message, |_| false)
    }

    /// Decodes an assistant message, selecting the first business call for
    /// which `preferred` holds when no pseudo-tool call is present.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::MissingCorrelationId` if the selected call has
    /// an empty id.
    pub fn decode_preferring(
        &self,
        message: &Message,
        preferred: impl Fn(&ToolCall) -> bool,
    ) -> Result<Decoded, RoutingError> {
        if message.tool_calls.is_empty() {
            return Ok(Decoded {
                action: Action::Reply {
                    text: message.content.clone(),
                },
                skipped: Vec::new(),
            });
        }

        let selected = message
            .tool_calls
            .iter()
            .position(|call| self.is_pseudo_tool(&call.name))
            .or_else(|| message.tool_calls.iter().position(preferred))
            .unwrap_or(0);

        let mut skipped = message.tool_calls.clone();
        let call = skipped.remove(selected);
        if call.id.is_empty() {
            return Err(RoutingError::MissingCorrelationId { tool: call.name });
        }

        let action = if call.name == self.escalation {
            Action::Escalate {
                reason: string_arg(&call, "reason"),
                correlation_id: call.id,
            }
        } else if let Some(target) = self.transfers.get(&call.name) {
            Action::Transfer {
                target: *target,
                request: string_arg(&call, "request"),
                correlation_id: call.id,
            }
        } else {
            Action::InvokeTool { call }
        };

        Ok(Decoded { action, skipped })
    }

    /// Returns the transfer declarations offered to the primary assistant.
    #[must_use]
    pub fn transfer_declarations(&self, labels: &BTreeMap<Domain, String>) -> Vec<ToolDefinition> {
        self.transfers
            .iter()
            .filter_map(|(name, domain)| {
                let label = labels.get(domain)?;
                Some(
                    ToolDefinition::new(
                        name.clone(),
                        format!("Transfers work to the {label} assistant."),
                    )
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {
                            "request": {
                                "type": "string",
                                "description": "Any follow-up questions or details the specialist needs"
                            }
                        },
                        "required": ["request"]
                    })),
                )
            })
            .collect()
    }

    /// Returns the escalation declaration offered to every specialist.
    #[must_use]
    pub fn escalation_declaration(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.escalation.clone(),
            "Marks the current task as completed or escalates control of the dialog \
             to the primary assistant, who can re-route based on the user's needs.",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "cancel": {"type": "boolean", "default": true},
                "reason": {"type": "string"}
            }
        }))
    }
}

fn transfer_tool_name(domain: Domain) -> &'static str {
    match domain {
        Domain::Flight => "ToFlightBookingAssistant",
        Domain::Hotel => "ToHotelBookingAssistant",
        Domain::CarRental => "ToCarRentalAssistant",
        Domain::Excursion => "ToExcursionAssistant",
    }
}

fn string_arg(call: &ToolCall, key: &str) -> String {
    call.arguments
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
