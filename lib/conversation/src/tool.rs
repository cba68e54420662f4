//! Tool classification by safety tier.
//!
//! Each assistant binds a closed set of tools, partitioned into a safe
//! (read-only) tier and a sensitive (mutating) tier. The table is built once
//! at startup and rejects a tool that lands in both tiers.

use crate::error::ToolTableError;
use crate::state::Assistant;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a business tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

impl ToolId {
    /// Creates a tool id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tool name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Safety tier of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// Read-only; runs without approval.
    Safe,
    /// Mutating; runs only after approval.
    Sensitive,
}

/// Declaration of a tool handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for input parameters.
    pub input_schema: JsonValue,
}

impl ToolDefinition {
    /// Creates a definition with an empty object schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Tiers {
    safe: BTreeSet<ToolId>,
    sensitive: BTreeSet<ToolId>,
}

/// Per-assistant safe/sensitive partition.
#[derive(Debug, Clone, Default)]
pub struct ToolTable {
    tiers: BTreeMap<Assistant, Tiers>,
    definitions: BTreeMap<ToolId, ToolDefinition>,
}

impl ToolTable {
    /// Starts building a table.
    #[must_use]
    pub fn builder() -> ToolTableBuilder {
        ToolTableBuilder::default()
    }

    /// Classifies a tool for an assistant.
    ///
    /// Sensitive is checked first. `None` means the assistant does not bind
    /// the tool at all.
    #[must_use]
    pub fn classify(&self, assistant: Assistant, tool: &ToolId) -> Option<ToolTier> {
        let tiers = self.tiers.get(&assistant)?;
        if tiers.sensitive.contains(tool) {
            Some(ToolTier::Sensitive)
        } else if tiers.safe.contains(tool) {
            Some(ToolTier::Safe)
        } else {
            None
        }
    }

    /// Returns every tool bound to an assistant, with its tier.
    pub fn tools_for(&self, assistant: Assistant) -> impl Iterator<Item = (&ToolId, ToolTier)> {
        self.tiers.get(&assistant).into_iter().flat_map(|tiers| {
            tiers
                .safe
                .iter()
                .map(|t| (t, ToolTier::Safe))
                .chain(tiers.sensitive.iter().map(|t| (t, ToolTier::Sensitive)))
        })
    }

    /// Returns the model-facing declarations for an assistant's tools.
    ///
    /// Tools registered without a definition get a bare one so the model
    /// still sees the name.
    #[must_use]
    pub fn declarations_for(&self, assistant: Assistant) -> Vec<ToolDefinition> {
        self.tools_for(assistant)
            .map(|(id, _)| {
                self.definitions
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| ToolDefinition::new(id.as_str(), ""))
            })
            .collect()
    }
}

/// Builder for [`ToolTable`].
#[derive(Debug, Default)]
pub struct ToolTableBuilder {
    tiers: BTreeMap<Assistant, Tiers>,
    definitions: BTreeMap<ToolId, ToolDefinition>,
}

impl ToolTableBuilder {
    /// Binds safe tools to an assistant.
    #[must_use]
    pub fn safe<I, T>(mut self, assistant: Assistant, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToolId>,
    {
        let tiers = self.tiers.entry(assistant).or_default();
        tiers.safe.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Binds sensitive tools to an assistant.
    #[must_use]
    pub fn sensitive<I, T>(mut self, assistant: Assistant, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToolId>,
    {
        let tiers = self.tiers.entry(assistant).or_default();
        tiers.sensitive.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Registers a model-facing declaration.
    #[must_use]
    pub fn define(mut self, definition: ToolDefinition) -> Self {
        self.definitions
            .insert(ToolId::new(definition.name.clone()), definition);
        self
    }

    /// Validates tier closure and builds the table.
    ///
    /// # Errors
    ///
    /// Returns `ToolTableError::AmbiguousTier` if an assistant binds the same
    /// tool as both safe and sensitive.
    pub fn build(self) -> Result<ToolTable, ToolTableError> {
        for (assistant, tiers) in &self.tiers {
            if let Some(tool) = tiers.safe.intersection(&tiers.sensitive).next() {
                return Err(ToolTableError::AmbiguousTier {
                    assistant: *assistant,
                    tool: tool.clone(),
                });
            }
        }

        Ok(ToolTable {
            tiers: self.tiers,
            definitions: self.definitions,
        })
    }
}
