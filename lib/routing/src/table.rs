//! The routing table: which specialists exist and what each may call.

use crate::action::{ActionDecoder, Decoded};
use crate::error::{RoutingError, RoutingTableError};
use concierge_conversation::{
    Assistant, Domain, Message, ToolDefinition, ToolId, ToolTable, ToolTableBuilder, ToolTier,
};
use std::collections::BTreeMap;

/// Startup configuration shared by every conversation.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    tools: ToolTable,
    labels: BTreeMap<Domain, String>,
    decoder: ActionDecoder,
}

impl RoutingTable {
    /// Starts building a table.
    #[must_use]
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    /// Classifies a business tool for an assistant.
    #[must_use]
    pub fn classify(&self, assistant: Assistant, tool: &ToolId) -> Option<ToolTier> {
        self.tools.classify(assistant, tool)
    }

    /// Returns the display label of a specialist.
    #[must_use]
    pub fn label(&self, domain: Domain) -> Option<&str> {
        self.labels.get(&domain).map(String::as_str)
    }

    /// Returns the display label of any assistant.
    #[must_use]
    pub fn assistant_label(&self, assistant: Assistant) -> &str {
        match assistant {
            Assistant::Primary => "Primary",
            Assistant::Specialist(domain) => self.label(domain).unwrap_or(domain.as_str()),
        }
    }

    /// Returns true if transfers to `domain` are configured.
    #[must_use]
    pub fn has_specialist(&self, domain: Domain) -> bool {
        self.labels.contains_key(&domain)
    }

    /// Returns the action decoder.
    #[must_use]
    pub fn decoder(&self) -> &ActionDecoder {
        &self.decoder
    }

    /// Decodes a reply from `assistant`.
    ///
    /// Pseudo-tool calls win, then the first sensitive call, then the first
    /// call of any kind.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::MissingCorrelationId` if the selected call has
    /// an empty id.
    pub fn decode(&self, assistant: Assistant, message: &Message) -> Result<Decoded, RoutingError> {
        self.decoder.decode_preferring(message, |call| {
            self.classify(assistant, &ToolId::new(call.name.as_str()))
                == Some(ToolTier::Sensitive)
        })
    }

    /// Returns every tool declaration the assistant is offered.
    ///
    /// The primary assistant sees its business tools plus one transfer
    /// pseudo-tool per configured specialist. Specialists see their business
    /// tools plus the escalation pseudo-tool.
    #[must_use]
    pub fn declarations_for(&self, assistant: Assistant) -> Vec<ToolDefinition> {
        let mut declarations = self.tools.declarations_for(assistant);
        match assistant {
            Assistant::Primary => {
                declarations.extend(self.decoder.transfer_declarations(&self.labels));
            }
            Assistant::Specialist(_) => {
                declarations.push(self.decoder.escalation_declaration());
            }
        }
        declarations
    }
}

/// Builder for [`RoutingTable`].
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    tools: ToolTableBuilder,
    labels: BTreeMap<Domain, String>,
    decoder: ActionDecoder,
}

impl RoutingTableBuilder {
    /// Configures a specialist under a display label.
    #[must_use]
    pub fn specialist(mut self, domain: Domain, label: impl Into<String>) -> Self {
        self.labels.insert(domain, label.into());
        self
    }

    /// Binds safe tools to an assistant.
    #[must_use]
    pub fn safe<I, T>(mut self, assistant: Assistant, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToolId>,
    {
        self.tools = self.tools.safe(assistant, tools);
        self
    }

    /// Binds sensitive tools to an assistant.
    #[must_use]
    pub fn sensitive<I, T>(mut self, assistant: Assistant, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToolId>,
    {
        self.tools = self.tools.sensitive(assistant, tools);
        self
    }

    /// Replaces the decoder, e.g. to rename the pseudo-tools.
    #[must_use]
    pub fn decoder(mut self, decoder: ActionDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Registers a model-facing declaration.
    #[must_use]
    pub fn define(mut self, definition: ToolDefinition) -> Self {
        self.tools = self.tools.define(definition);
        self
    }

    /// Validates and builds the table.
    ///
    /// # Errors
    ///
    /// - `RoutingTableError::Tools` if a tool is both safe and sensitive
    /// - `RoutingTableError::UnlabelledAssistant` if tools are bound to a
    ///   specialist that was never configured
    /// - `RoutingTableError::PseudoToolCollision` if a business tool uses a
    ///   transfer or escalation name
    pub fn build(self) -> Result<RoutingTable, RoutingTableError> {
        let tools = self.tools.build()?;
        let decoder = self.decoder;

        let assistants =
            std::iter::once(Assistant::Primary).chain(Domain::ALL.map(Assistant::Specialist));
        for assistant in assistants {
            let mut bound = tools.tools_for(assistant).peekable();
            let unlabelled = assistant
                .domain()
                .is_some_and(|domain| !self.labels.contains_key(&domain));
            if unlabelled && bound.peek().is_some() {
                return Err(RoutingTableError::UnlabelledAssistant { assistant });
            }
            if let Some((tool, _)) = bound.find(|(tool, _)| decoder.is_pseudo_tool(tool.as_str())) {
                return Err(RoutingTableError::PseudoToolCollision {
                    name: tool.to_string(),
                });
            }
        }

        Ok(RoutingTable {
            tools,
            labels: self.labels,
            decoder,
        })
    }
}
