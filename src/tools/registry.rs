use crate::tools::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait that all record-store tools implement
#[async_trait]
pub trait RecordTool: Send + Sync {
    /// Returns the tool definition for the AI API
    fn definition(&self) -> ToolDefinition;

    /// Executes the tool with the given parameters
    async fn execute(&self, params: Value) -> ToolResult;

    /// Returns the tool's name
    fn name(&self) -> String {
        self.definition().name
    }
}

/// Registry holding the fixed tool catalogue.
///
/// Uses interior mutability (RwLock) so registration does not require
/// `&mut self`; after startup the catalogue is immutable in practice.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn RecordTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool
    pub fn register(&self, tool: Arc<dyn RecordTool>) {
        let name = tool.definition().name;
        self.tools.write().insert(name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn RecordTool>> {
        self.tools.read().get(name).cloned()
    }

    /// Tool definitions for the AI, sorted by name so the advertised
    /// catalogue is deterministic across calls
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|tool| tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Static capability lookup. Unknown tools classify as read-only: they
    /// fail at execution with a "not found" result the model can react to,
    /// which must not get stuck waiting for user approval.
    pub fn is_mutating(&self, name: &str) -> bool {
        self.get(name)
            .map(|tool| tool.definition().capability.requires_confirmation())
            .unwrap_or(false)
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        let tool = match self.get(name) {
            Some(t) => t,
            None => return ToolResult::error(format!("Tool '{}' not found", name)),
        };

        tool.execute(params).await
    }

    /// Get count of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCapability;
    use serde_json::json;

    struct StubTool {
        name: &'static str,
        capability: ToolCapability,
    }

    #[async_trait]
    impl RecordTool for StubTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: format!("Stub {} tool", self.name),
                input_schema: json!({"type": "object", "properties": {}}),
                capability: self.capability,
            }
        }

        async fn execute(&self, _params: Value) -> ToolResult {
            ToolResult::success("ok")
        }
    }

    fn stub_registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool {
            name: "search_records",
            capability: ToolCapability::ReadOnly,
        }));
        registry.register(Arc::new(StubTool {
            name: "update_record",
            capability: ToolCapability::Mutating,
        }));
        registry
    }

    #[test]
    fn test_static_capability_classification() {
        let registry = stub_registry();
        assert!(!registry.is_mutating("search_records"));
        assert!(registry.is_mutating("update_record"));
        assert!(!registry.is_mutating("no_such_tool"));
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let registry = stub_registry();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["search_records", "update_record"]);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_returns_error_result() {
        let registry = stub_registry();
        let result = registry.execute("no_such_tool", json!({})).await;
        assert!(!result.success);
        assert!(result.content.contains("not found"));
    }
}
