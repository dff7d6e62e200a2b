//! Immutable catalog of retrieval tools.
//!
//! A registry is assembled once through [`ToolRegistryBuilder`] and never
//! mutated afterwards. Changing the catalog means building a new registry
//! and swapping the `Arc`, so a router never reads a half-updated catalog.

use crate::adapter::RetrieverAdapter;
use crate::error::RegistryError;
use crate::types::Capability;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Shape of the records a tool returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Row,
    Passage,
    GraphPath,
}

impl RecordKind {
    pub fn for_capability(capability: Capability) -> Self {
        match capability {
            Capability::Structured => RecordKind::Row,
            Capability::Semantic => RecordKind::Passage,
            Capability::Graph => RecordKind::GraphPath,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSchema {
    pub record_kind: RecordKind,
    /// Fields a downstream step can bind to
    pub fields: Vec<String>,
    /// Field used when a chain binds to this tool's output
    pub binding_field: String,
}

/// Routing metadata for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub capability: Capability,
    pub description: String,
    /// Domain words that route a question towards this tool
    pub keywords: Vec<String>,
    pub input_schema: Value,
    pub output_schema: OutputSchema,
    /// Relative cost; cheaper tools win ties within a capability
    pub cost_hint: u32,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            capability,
            description: String::new(),
            keywords: Vec::new(),
            input_schema: default_input_schema(),
            output_schema: OutputSchema {
                record_kind: RecordKind::for_capability(capability),
                fields: Vec::new(),
                binding_field: "name".to_string(),
            },
            cost_hint: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_schema.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_binding_field(mut self, field: impl Into<String>) -> Self {
        self.output_schema.binding_field = field.into();
        self
    }

    pub fn with_cost_hint(mut self, cost_hint: u32) -> Self {
        self.cost_hint = cost_hint;
        self
    }
}

/// JSON schema of [`crate::types::SubQuery`], shared by every adapter.
fn default_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "text": {"type": "string"},
            "boundValues": {"type": "array", "items": {"type": "string"}},
            "filters": {"type": "object"}
        },
        "required": ["text"]
    })
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    adapter: Arc<dyn RetrieverAdapter>,
}

/// Read-only mapping from tool name to descriptor and adapter.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn describe(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.tools
            .get(name)
            .map(|tool| &tool.descriptor)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Every descriptor, sorted by name.
    pub fn list_all(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|tool| &tool.descriptor).collect()
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn RetrieverAdapter>> {
        self.tools.get(name).map(|tool| Arc::clone(&tool.adapter))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn with_capability(&self, capability: Capability) -> Vec<&ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| &tool.descriptor)
            .filter(|d| d.capability == capability)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistryBuilder {
    /// Add a tool. Names are unique and must match the adapter's own name
    /// and capability.
    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        adapter: Arc<dyn RetrieverAdapter>,
    ) -> Result<Self, RegistryError> {
        if adapter.name() != descriptor.name || adapter.capability() != descriptor.capability {
            return Err(RegistryError::AdapterMismatch {
                name: descriptor.name,
            });
        }
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }

        tracing::debug!(
            tool = %descriptor.name,
            capability = %descriptor.capability,
            "Registered tool"
        );
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                adapter,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}
