pub mod airtable_tools;
pub mod registry;

pub use registry::{RecordTool, ToolRegistry};

use crate::airtable::AirtableClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Capability class of an operation.
///
/// This is a static property of each tool's definition, never inferred at
/// runtime: mutating tools are parked in the confirmation gate, read-only
/// tools execute immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    ReadOnly,
    Mutating,
}

impl ToolCapability {
    pub fn requires_confirmation(self) -> bool {
        matches!(self, ToolCapability::Mutating)
    }
}

/// Tool signature advertised to the AI
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments, in Claude API format
    pub input_schema: Value,
    pub capability: ToolCapability,
}

/// Result of executing a tool
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: content.into(),
        }
    }
}

/// Build the fixed tool catalogue over one Airtable base
pub fn create_default_registry(client: Arc<AirtableClient>) -> ToolRegistry {
    use airtable_tools::*;

    let registry = ToolRegistry::new();
    registry.register(Arc::new(SearchRecordsTool::new(client.clone())));
    registry.register(Arc::new(SearchRelatedRecordsTool::new(client.clone())));
    registry.register(Arc::new(ListRecordsTool::new(client.clone())));
    registry.register(Arc::new(CreateRecordTool::new(client.clone())));
    registry.register(Arc::new(UpdateRecordTool::new(client.clone())));
    registry.register(Arc::new(DescribeTableFieldsTool::new(client)));
    registry
}
