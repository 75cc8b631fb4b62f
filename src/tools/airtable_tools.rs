//! The six record-store tools advertised to the AI.
//!
//! Read-only tools execute immediately inside the orchestration loop;
//! mutating tools (create/update) are held for user confirmation. Each tool
//! converts classified Airtable failures into error results carrying a
//! recovery hint, so a failed call becomes transcript content the model can
//! react to instead of an aborted turn.

use crate::airtable::{AirtableClient, AirtableError, AirtableRecord};
use crate::tools::{RecordTool, ToolCapability, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: u32 = 100;

fn require_str(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("Missing required string parameter '{}'", key))
}

fn require_object(params: &Value, key: &str) -> Result<Value, String> {
    params
        .get(key)
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| format!("Missing required object parameter '{}'", key))
}

fn records_json(records: &[AirtableRecord]) -> String {
    serde_json::to_string_pretty(&json!({
        "found": records.len(),
        "records": records,
    }))
    .unwrap_or_else(|_| "{}".to_string())
}

fn failure_result(error: AirtableError) -> ToolResult {
    ToolResult::error(format!("{}\n{}", error, error.recovery_hint()))
}

pub struct SearchRecordsTool {
    client: Arc<AirtableClient>,
}

impl SearchRecordsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for SearchRecordsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_records".to_string(),
            description: "Search for records in a table by free text. Returns matching records with their ids and fields.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"},
                    "query": {"type": "string", "description": "Text to search for"}
                },
                "required": ["table", "query"]
            }),
            capability: ToolCapability::ReadOnly,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let query = match require_str(&params, "query") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match self.client.search_records(&table, &query).await {
            Ok(records) => ToolResult::success(records_json(&records)),
            Err(e) => failure_result(e),
        }
    }
}

pub struct SearchRelatedRecordsTool {
    client: Arc<AirtableClient>,
}

impl SearchRelatedRecordsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for SearchRelatedRecordsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_related_records".to_string(),
            description: "Find records in a table whose linked-record fields contain BOTH given record ids. Use to check whether a join record (e.g. a deal for a customer and a project) already exists.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table to search in"},
                    "record_id_a": {"type": "string", "description": "First linked record id"},
                    "record_id_b": {"type": "string", "description": "Second linked record id"}
                },
                "required": ["table", "record_id_a", "record_id_b"]
            }),
            capability: ToolCapability::ReadOnly,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let id_a = match require_str(&params, "record_id_a") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let id_b = match require_str(&params, "record_id_b") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match self.client.search_related_records(&table, &id_a, &id_b).await {
            Ok(records) => ToolResult::success(records_json(&records)),
            Err(e) => failure_result(e),
        }
    }
}

pub struct ListRecordsTool {
    client: Arc<AirtableClient>,
}

impl ListRecordsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for ListRecordsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_records".to_string(),
            description: "Get records from a table, up to max_records.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"},
                    "max_records": {"type": "number", "description": "Maximum records to return", "default": DEFAULT_LIST_LIMIT}
                },
                "required": ["table"]
            }),
            capability: ToolCapability::ReadOnly,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let max_records = params
            .get("max_records")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_LIST_LIMIT);

        match self.client.list_records(&table, max_records).await {
            Ok(records) => ToolResult::success(records_json(&records)),
            Err(e) => failure_result(e),
        }
    }
}

pub struct CreateRecordTool {
    client: Arc<AirtableClient>,
}

impl CreateRecordTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for CreateRecordTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_record".to_string(),
            description: "Create a new record in a table. Linked-record fields must be arrays of record ids, dates ISO formatted, select fields must use existing option values only.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"},
                    "fields": {"type": "object", "description": "Field name to value map"}
                },
                "required": ["table", "fields"]
            }),
            capability: ToolCapability::Mutating,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let fields = match require_object(&params, "fields") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match self.client.create_record(&table, &fields).await {
            Ok(record) => ToolResult::success(
                serde_json::to_string_pretty(&record).unwrap_or_else(|_| "{}".to_string()),
            ),
            Err(e) => failure_result(e),
        }
    }
}

pub struct UpdateRecordTool {
    client: Arc<AirtableClient>,
}

impl UpdateRecordTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for UpdateRecordTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_record".to_string(),
            description: "Update fields of an existing record. Use the record id returned by a previous search.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"},
                    "record_id": {"type": "string", "description": "Id of the record to update"},
                    "fields": {"type": "object", "description": "Field name to new value map"}
                },
                "required": ["table", "record_id", "fields"]
            }),
            capability: ToolCapability::Mutating,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let record_id = match require_str(&params, "record_id") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let fields = match require_object(&params, "fields") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match self.client.update_record(&table, &record_id, &fields).await {
            Ok(record) => ToolResult::success(
                serde_json::to_string_pretty(&record).unwrap_or_else(|_| "{}".to_string()),
            ),
            Err(e) => failure_result(e),
        }
    }
}

pub struct DescribeTableFieldsTool {
    client: Arc<AirtableClient>,
}

impl DescribeTableFieldsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordTool for DescribeTableFieldsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "describe_table_fields".to_string(),
            description: "List the field names available in a table plus a sample record. Call before creating or updating when unsure about field names.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "Table name"}
                },
                "required": ["table"]
            }),
            capability: ToolCapability::ReadOnly,
        }
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let table = match require_str(&params, "table") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match self.client.describe_table_fields(&table).await {
            Ok(summary) => ToolResult::success(
                serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string()),
            ),
            Err(e) => failure_result(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::create_default_registry;

    fn test_client() -> Arc<AirtableClient> {
        Arc::new(AirtableClient::new("test-key", "appTESTBASE000000", None).unwrap())
    }

    #[test]
    fn test_default_catalogue_has_six_tools() {
        let registry = create_default_registry(test_client());
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_only_create_and_update_are_mutating() {
        let registry = create_default_registry(test_client());

        assert!(registry.is_mutating("create_record"));
        assert!(registry.is_mutating("update_record"));
        assert!(!registry.is_mutating("search_records"));
        assert!(!registry.is_mutating("search_related_records"));
        assert!(!registry.is_mutating("list_records"));
        assert!(!registry.is_mutating("describe_table_fields"));
    }

    #[tokio::test]
    async fn test_missing_parameter_is_an_error_result() {
        let tool = SearchRecordsTool::new(test_client());
        let result = tool.execute(json!({"table": "Customers"})).await;
        assert!(!result.success);
        assert!(result.content.contains("query"));
    }
}
