//! Airtable REST client with classified failures.
//!
//! Thin data-plane wrapper: list / search / create / update against one base.
//! Failures are classified so the dispatcher can feed a recovery hint back to
//! the model instead of aborting the conversation.

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

const DEFAULT_ENDPOINT: &str = "https://api.airtable.com/v0";

/// Record ids issued by Airtable: "rec" + 14 chars
const RECORD_ID_PREFIX: &str = "rec";
const RECORD_ID_MIN_LEN: usize = 15;

/// Classified record-store failure
#[derive(Debug, Clone)]
pub enum AirtableError {
    /// Record or table does not exist
    NotFound(String),
    /// Malformed request: bad record id, wrong value format
    InvalidArgument(String),
    /// Unknown field name or select option not in the schema
    SchemaMismatch(String),
    /// Network failure or unclassified server error
    Transport(String),
}

impl AirtableError {
    /// Guidance appended to tool results so the model can self-correct
    /// on its next step
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            AirtableError::NotFound(_) => {
                "The record was not found. Search again with search_records to get a valid record id."
            }
            AirtableError::InvalidArgument(_) => {
                "The request was malformed. Check the record id and value formats: dates as \"YYYY-MM-DD\", numbers unquoted, linked records as [\"recXXXXXXXXXXXXXX\"]."
            }
            AirtableError::SchemaMismatch(_) => {
                "A field name or select option does not exist in this table. Call describe_table_fields and use only the exact field names and select values it returns. Never invent new select options."
            }
            AirtableError::Transport(_) => {
                "The record store could not be reached. Tell the user the system is temporarily unavailable."
            }
        }
    }
}

impl fmt::Display for AirtableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AirtableError::NotFound(msg) => write!(f, "not found: {}", msg),
            AirtableError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            AirtableError::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            AirtableError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for AirtableError {}

/// A single Airtable record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Result of a field-discovery call: every field name seen across a sample
/// of records, plus one sample record for format reference
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub available_fields: Vec<String>,
    pub sample_record: Value,
}

#[derive(Debug, Deserialize)]
struct RecordsPage {
    records: Vec<AirtableRecord>,
}

#[derive(Debug, Serialize)]
struct CreateRecordBody<'a> {
    fields: &'a Value,
}

#[derive(Debug, Serialize)]
struct UpdateRecordsBody<'a> {
    records: Vec<UpdateRecordEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateRecordEntry<'a> {
    id: &'a str,
    fields: &'a Value,
}

pub struct AirtableClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
    base_id: String,
}

impl AirtableClient {
    pub fn new(api_key: &str, base_id: &str, endpoint: Option<&str>) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        auth_headers.insert(header::AUTHORIZATION, auth_value);

        Ok(Self {
            client: crate::http::shared_client().clone(),
            auth_headers,
            endpoint: endpoint.unwrap_or(DEFAULT_ENDPOINT).to_string(),
            base_id: base_id.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.base_id, table)
    }

    /// Fetch up to `max_records` records from a table
    pub async fn list_records(
        &self,
        table: &str,
        max_records: u32,
    ) -> Result<Vec<AirtableRecord>, AirtableError> {
        log::info!("[AIRTABLE] Listing records from table {}", table);

        let url = format!("{}?maxRecords={}", self.table_url(table), max_records);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers.clone())
            .send()
            .await
            .map_err(|e| AirtableError::Transport(e.to_string()))?;

        let page: RecordsPage = Self::parse_response(response).await?;
        log::info!("[AIRTABLE] Got {} records from {}", page.records.len(), table);
        Ok(page.records)
    }

    /// Substring search: keep records whose serialized fields contain the term
    pub async fn search_records(
        &self,
        table: &str,
        search_term: &str,
    ) -> Result<Vec<AirtableRecord>, AirtableError> {
        log::info!("[AIRTABLE] Searching '{}' in table {}", search_term, table);

        let records = self.list_records(table, 100).await?;
        let needle = search_term.to_lowercase();
        let matches: Vec<AirtableRecord> = records
            .into_iter()
            .filter(|record| {
                serde_json::to_string(&record.fields)
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect();

        log::info!("[AIRTABLE] Found {} matching records", matches.len());
        Ok(matches)
    }

    /// Keep records whose linked-record fields contain both given record ids.
    /// Used to find a join row (e.g. a deal linking a customer and a project).
    pub async fn search_related_records(
        &self,
        table: &str,
        record_id_a: &str,
        record_id_b: &str,
    ) -> Result<Vec<AirtableRecord>, AirtableError> {
        log::info!(
            "[AIRTABLE] Searching {} for records linked to {} and {}",
            table,
            record_id_a,
            record_id_b
        );

        let records = self.list_records(table, 100).await?;
        let matches: Vec<AirtableRecord> = records
            .into_iter()
            .filter(|record| {
                record_links_to(record, record_id_a) && record_links_to(record, record_id_b)
            })
            .collect();

        log::info!("[AIRTABLE] Found {} related records", matches.len());
        Ok(matches)
    }

    /// Create a record with the given fields object
    pub async fn create_record(
        &self,
        table: &str,
        fields: &Value,
    ) -> Result<AirtableRecord, AirtableError> {
        log::info!("[AIRTABLE] Creating record in table {}", table);

        let response = self
            .client
            .post(&self.table_url(table))
            .headers(self.auth_headers.clone())
            .json(&CreateRecordBody { fields })
            .send()
            .await
            .map_err(|e| AirtableError::Transport(e.to_string()))?;

        let record: AirtableRecord = Self::parse_response(response).await?;
        log::info!("[AIRTABLE] Created record {}", record.id);
        Ok(record)
    }

    /// Update a single record. The id is validated before any request goes
    /// out — the model occasionally hallucinates ids.
    pub async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Value,
    ) -> Result<AirtableRecord, AirtableError> {
        validate_record_id(record_id)?;

        log::info!("[AIRTABLE] Updating record {} in table {}", record_id, table);

        let body = UpdateRecordsBody {
            records: vec![UpdateRecordEntry {
                id: record_id,
                fields,
            }],
        };

        let response = self
            .client
            .patch(&self.table_url(table))
            .headers(self.auth_headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| AirtableError::Transport(e.to_string()))?;

        let mut page: RecordsPage = Self::parse_response(response).await?;
        page.records.pop().ok_or_else(|| {
            AirtableError::NotFound(format!("record {} missing from update response", record_id))
        })
    }

    /// Sample a few records and report the union of their field names
    pub async fn describe_table_fields(&self, table: &str) -> Result<FieldSummary, AirtableError> {
        log::info!("[AIRTABLE] Describing fields of table {}", table);

        let records = self.list_records(table, 3).await?;

        let mut available_fields: Vec<String> = Vec::new();
        for record in &records {
            for field_name in record.fields.keys() {
                if !available_fields.contains(field_name) {
                    available_fields.push(field_name.clone());
                }
            }
        }
        available_fields.sort();

        let sample_record = records
            .first()
            .map(|r| Value::Object(r.fields.clone()))
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(FieldSummary {
            available_fields,
            sample_record,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AirtableError> {
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| AirtableError::Transport(format!("failed to parse response: {}", e)))
    }
}

/// True if any linked-record field of the record contains the target id
fn record_links_to(record: &AirtableRecord, target_id: &str) -> bool {
    record.fields.values().any(|value| match value {
        Value::Array(items) => items
            .iter()
            .any(|item| item.as_str() == Some(target_id)),
        _ => false,
    })
}

fn validate_record_id(record_id: &str) -> Result<(), AirtableError> {
    if !record_id.starts_with(RECORD_ID_PREFIX) || record_id.len() < RECORD_ID_MIN_LEN {
        return Err(AirtableError::InvalidArgument(format!(
            "invalid record id: {}",
            record_id
        )));
    }
    Ok(())
}

/// Map an Airtable error response onto the failure taxonomy.
/// Body markers take precedence over the bare status code.
fn classify_error(status: u16, body: &str) -> AirtableError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    if status == 404
        || body.contains("NOT_FOUND")
        || body.contains("ROW_DOES_NOT_EXIST")
        || body.contains("does not exist in this table")
    {
        return AirtableError::NotFound(message);
    }

    if body.contains("UNKNOWN_FIELD_NAME")
        || body.contains("INVALID_MULTIPLE_CHOICE_OPTIONS")
        || body.contains("Insufficient permissions to create new select option")
        || status == 422
    {
        return AirtableError::SchemaMismatch(message);
    }

    if status == 400 || body.contains("INVALID_REQUEST") || body.contains("INVALID_VALUE") {
        return AirtableError::InvalidArgument(message);
    }

    AirtableError::Transport(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with(fields: Value) -> AirtableRecord {
        AirtableRecord {
            id: "recAAAAAAAAAAAAAA".to_string(),
            fields: fields.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_record_links_to_matches_linked_field() {
        let record = record_with(json!({
            "שם העסקה": "עסקה 12",
            "מזהה לקוח ראשי (ID_Client)": ["rec0GDfLEzXXCUX9X"],
            "מזהה פרויקט (ID_Project)": ["recLF0iMhQEx6lMqX"],
        }));

        assert!(record_links_to(&record, "rec0GDfLEzXXCUX9X"));
        assert!(record_links_to(&record, "recLF0iMhQEx6lMqX"));
        assert!(!record_links_to(&record, "recDOESNOTEXIST00"));
    }

    #[test]
    fn test_record_links_to_ignores_scalar_fields() {
        let record = record_with(json!({"הערות": "rec0GDfLEzXXCUX9X"}));
        assert!(!record_links_to(&record, "rec0GDfLEzXXCUX9X"));
    }

    #[test]
    fn test_validate_record_id() {
        assert!(validate_record_id("recLF0iMhQEx6lMqX").is_ok());
        assert!(validate_record_id("tbl9p6XdUrecy2h7G").is_err());
        assert!(validate_record_id("rec123").is_err());
        assert!(validate_record_id("").is_err());
    }

    #[test]
    fn test_classify_unknown_field() {
        let err = classify_error(
            422,
            r#"{"error":{"type":"UNKNOWN_FIELD_NAME","message":"Unknown field name: \"סטטוס ישן\""}}"#,
        );
        assert!(matches!(err, AirtableError::SchemaMismatch(_)));
        assert!(err.recovery_hint().contains("describe_table_fields"));
    }

    #[test]
    fn test_classify_row_does_not_exist() {
        let err = classify_error(
            404,
            r#"{"error":{"type":"ROW_DOES_NOT_EXIST","message":"Record not found"}}"#,
        );
        assert!(matches!(err, AirtableError::NotFound(_)));
    }

    #[test]
    fn test_classify_invalid_request_body() {
        let err = classify_error(
            400,
            r#"{"error":{"type":"INVALID_REQUEST_BODY","message":"Could not parse request body"}}"#,
        );
        assert!(matches!(err, AirtableError::InvalidArgument(_)));
    }

    #[test]
    fn test_classify_server_error_is_transport() {
        let err = classify_error(500, "internal error");
        assert!(matches!(err, AirtableError::Transport(_)));
    }
}
