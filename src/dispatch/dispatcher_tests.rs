//! Offline tests for the orchestration loop and the confirmation gate.
//!
//! A scripted MockAiClient plays the reasoning engine; recording stub tools
//! play the record store. Every path is exercised without network access:
//! final answers, read-only execution, failure feedback, suspension on a
//! mutating proposal, approval, rejection, supersession, ambiguity, the step
//! bound and transport failures.

use crate::ai::types::{AiError, AiResponse, ToolCall};
use crate::ai::{AiClient, MockAiClient};
use crate::dispatch::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::execution::PendingActionManager;
use crate::session::store::SessionStore;
use crate::tools::{RecordTool, ToolCapability, ToolDefinition, ToolRegistry, ToolResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Stub tool that records every execution in a shared log
struct RecordingTool {
    name: &'static str,
    capability: ToolCapability,
    result: ToolResult,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RecordTool for RecordingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: format!("Recording stub for {}", self.name),
            input_schema: json!({"type": "object", "properties": {}}),
            capability: self.capability,
        }
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        self.log.lock().push(self.name.to_string());
        self.result.clone()
    }
}

struct TestHarness {
    dispatcher: MessageDispatcher,
    sessions: Arc<SessionStore>,
    pending: Arc<PendingActionManager>,
    /// Names of tools actually executed, in order
    executed: Arc<Mutex<Vec<String>>>,
}

impl TestHarness {
    fn new(responses: Vec<Result<AiResponse, AiError>>) -> Self {
        Self::with_failing_search(responses, false)
    }

    fn with_failing_search(
        responses: Vec<Result<AiResponse, AiError>>,
        search_fails: bool,
    ) -> Self {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ToolRegistry::new());

        let search_result = if search_fails {
            ToolResult::error(
                "not found: no customer matched\nThe record was not found. Search again with search_records to get a valid record id.",
            )
        } else {
            ToolResult::success(
                json!({
                    "found": 1,
                    "records": [{
                        "id": "rec0GDfLEzXXCUX9X",
                        "fields": {"שם מלא": "דני לוי", "סטטוס": "התחיל הרשמה"}
                    }]
                })
                .to_string(),
            )
        };

        registry.register(Arc::new(RecordingTool {
            name: "search_records",
            capability: ToolCapability::ReadOnly,
            result: search_result,
            log: executed.clone(),
        }));
        registry.register(Arc::new(RecordingTool {
            name: "search_related_records",
            capability: ToolCapability::ReadOnly,
            result: ToolResult::success(json!({"found": 0, "records": []}).to_string()),
            log: executed.clone(),
        }));
        registry.register(Arc::new(RecordingTool {
            name: "update_record",
            capability: ToolCapability::Mutating,
            result: ToolResult::success(
                json!({"id": "rec0GDfLEzXXCUX9X", "fields": {"סטטוס": "לקוח בתהליך"}}).to_string(),
            ),
            log: executed.clone(),
        }));
        registry.register(Arc::new(RecordingTool {
            name: "create_record",
            capability: ToolCapability::Mutating,
            result: ToolResult::success(
                json!({"id": "recNEWDEAL0000001", "fields": {}}).to_string(),
            ),
            log: executed.clone(),
        }));

        let sessions = Arc::new(SessionStore::new(Duration::from_secs(60), 20, 2));
        let pending = Arc::new(PendingActionManager::new());
        let dispatcher = MessageDispatcher::new(
            AiClient::Mock(MockAiClient::new(responses)),
            registry,
            sessions.clone(),
            pending.clone(),
            5,
        );

        TestHarness {
            dispatcher,
            sessions,
            pending,
            executed,
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

fn tool_call(id: &str, name: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: json!({"table": "לקוחות", "query": "דני"}),
    }
}

fn update_call(id: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "update_record".to_string(),
        arguments: json!({
            "table": "לקוחות",
            "record_id": "rec0GDfLEzXXCUX9X",
            "fields": {"סטטוס": "לקוח בתהליך"}
        }),
    }
}

#[tokio::test]
async fn plain_answer_round_trip() {
    let harness = TestHarness::new(vec![Ok(AiResponse::text("שלום! איך אפשר לעזור?".into()))]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "מה המצב עם הפרויקטים?")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert_eq!(result.response, "שלום! איך אפשר לעזור?");
    assert_eq!(result.steps, 1);
    assert!(harness.executed().is_empty());

    // user turn + assistant answer stored
    let snapshot = harness.sessions.snapshot("sender-1").unwrap();
    assert_eq!(snapshot.turn_count, 2);
}

#[tokio::test]
async fn read_only_tool_executes_and_loop_continues() {
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools(
            "".into(),
            vec![tool_call("tu_1", "search_records")],
        )),
        Ok(AiResponse::text("🔍 מצאתי את דני לוי".into())),
    ]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "חפש את דני")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert_eq!(result.steps, 2);
    assert_eq!(result.tools_executed, vec!["search_records"]);
    assert_eq!(harness.executed(), vec!["search_records"]);

    // The second reasoning call saw the grown transcript: user message,
    // tool-request turn, tool-result turn
    let trace = harness.dispatcher.mock_trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].message_count, 1);
    assert_eq!(trace[1].message_count, 3);
}

#[tokio::test]
async fn tool_failure_becomes_transcript_content_not_a_crash() {
    let harness = TestHarness::with_failing_search(
        vec![
            Ok(AiResponse::with_tools(
                "".into(),
                vec![tool_call("tu_1", "search_records")],
            )),
            Ok(AiResponse::text("לא מצאתי לקוח כזה במערכת".into())),
        ],
        true,
    );

    let result = harness
        .dispatcher
        .handle_message("sender-1", "חפש את דני")
        .await;

    // The engine got another turn after the failure and produced an answer
    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert_eq!(result.response, "לא מצאתי לקוח כזה במערכת");
    assert_eq!(harness.dispatcher.mock_trace().len(), 2);
}

#[tokio::test]
async fn mutating_proposal_suspends_for_confirmation() {
    let harness = TestHarness::new(vec![Ok(AiResponse::with_tools(
        "אעדכן את הסטטוס".into(),
        vec![update_call("tu_1")],
    ))]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::AwaitingConfirmation);
    assert!(result.response.contains("❓ האם לבצע את הפעולה? (כן/לא)"));
    assert!(result.response.contains("סטטוס"));
    assert!(harness.pending.has_pending("sender-1"));
    // Nothing executed before approval
    assert!(harness.executed().is_empty());
}

#[tokio::test]
async fn mixed_invocation_set_is_parked_whole() {
    // A turn proposing a read-only call alongside a mutating one must not
    // execute the read-only part separately
    let harness = TestHarness::new(vec![Ok(AiResponse::with_tools(
        "".into(),
        vec![tool_call("tu_1", "search_records"), update_call("tu_2")],
    ))]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::AwaitingConfirmation);
    assert!(harness.executed().is_empty());
    let pending = harness.pending.get("sender-1").unwrap();
    assert_eq!(pending.tool_calls.len(), 2);
}

#[tokio::test]
async fn approval_executes_each_invocation_exactly_once() {
    let harness = TestHarness::new(vec![Ok(AiResponse::with_tools(
        "".into(),
        vec![update_call("tu_1")],
    ))]);

    harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    let result = harness.dispatcher.handle_message("sender-1", "כן").await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(result.action_completed);
    assert_eq!(result.response, "✅ הפעולה בוצעה בהצלחה!");
    assert_eq!(harness.executed(), vec!["update_record"]);
    assert!(!harness.pending.has_pending("sender-1"));
}

#[tokio::test]
async fn rejection_executes_nothing() {
    let harness = TestHarness::new(vec![Ok(AiResponse::with_tools(
        "".into(),
        vec![update_call("tu_1")],
    ))]);

    harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    let result = harness.dispatcher.handle_message("sender-1", "לא").await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(result.action_cancelled);
    assert!(harness.executed().is_empty());
    assert!(!harness.pending.has_pending("sender-1"));
}

#[tokio::test]
async fn ambiguous_reply_keeps_pending_and_asks_again() {
    let harness = TestHarness::new(vec![Ok(AiResponse::with_tools(
        "".into(),
        vec![update_call("tu_1")],
    ))]);

    harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    let result = harness.dispatcher.handle_message("sender-1", "אולי").await;

    assert_eq!(result.outcome, DispatchOutcome::NeedsClarification);
    assert!(result.response.contains("כן"));
    assert!(result.response.contains("לא"));
    // Unclear never executes or discards
    assert!(harness.pending.has_pending("sender-1"));
    assert!(harness.executed().is_empty());
}

#[tokio::test]
async fn unrelated_request_supersedes_pending() {
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools("".into(), vec![update_call("tu_1")])),
        Ok(AiResponse::text("🔍 מחפש את אברהם".into())),
    ]);

    harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    let result = harness
        .dispatcher
        .handle_message("sender-1", "חפש את הלקוח אברהם")
        .await;

    // The parked update was discarded, never executed, and the new request
    // went through normal orchestration
    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(harness.executed().is_empty());
    assert!(!harness.pending.has_pending("sender-1"));
}

#[tokio::test]
async fn greeting_sweeps_pending_aside_and_starts_fresh() {
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools("".into(), vec![update_call("tu_1")])),
        Ok(AiResponse::text("שלום! במה אפשר לעזור?".into())),
    ]);

    harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    let result = harness.dispatcher.handle_message("sender-1", "היי").await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(!harness.pending.has_pending("sender-1"));
    assert!(harness.executed().is_empty());

    // Fresh conversation: only the greeting and its answer remain
    let snapshot = harness.sessions.snapshot("sender-1").unwrap();
    assert_eq!(snapshot.turn_count, 2);
}

#[tokio::test]
async fn step_bound_synthesizes_nonempty_summary() {
    // The engine keeps requesting searches forever; the bound must trip
    let responses = (0..5)
        .map(|i| {
            Ok(AiResponse::with_tools(
                "".into(),
                vec![tool_call(&format!("tu_{}", i), "search_records")],
            ))
        })
        .collect();
    let harness = TestHarness::new(responses);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "חפש את דני")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert_eq!(result.steps, 5);
    assert!(!result.response.is_empty());
    assert!(result.response.contains("search_records"));
    assert_eq!(harness.dispatcher.mock_trace().len(), 5);
}

#[tokio::test]
async fn engine_transport_failure_surfaces_as_failed_turn() {
    let harness = TestHarness::new(vec![Err(AiError::with_status("overloaded", 529))]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "חפש את דני")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Error);
    assert!(result.error.as_deref().unwrap_or("").contains("overloaded"));
    // Only one attempt: the loop does not retry transport failures
    assert_eq!(harness.dispatcher.mock_trace().len(), 1);
}

#[tokio::test]
async fn empty_engine_answer_is_replaced_with_fallback() {
    let harness = TestHarness::new(vec![Ok(AiResponse::text("   ".into()))]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "מה קורה עם העסקה?")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(!result.response.trim().is_empty());
}

#[tokio::test]
async fn update_description_shows_current_and_proposed_values() {
    // A search earlier in the turn supplies the record's current values; the
    // confirmation prompt must show current ⬇ proposed for each field
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools(
            "".into(),
            vec![tool_call("tu_1", "search_records")],
        )),
        Ok(AiResponse::with_tools("".into(), vec![update_call("tu_2")])),
    ]);

    let result = harness
        .dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;

    assert_eq!(result.outcome, DispatchOutcome::AwaitingConfirmation);
    assert!(result.response.contains("דני לוי"));
    assert!(result.response.contains("התחיל הרשמה"));
    assert!(result.response.contains("לקוח בתהליך"));
    assert!(result.response.contains("⬇️"));
}

#[tokio::test]
async fn approval_after_expiry_falls_through_to_orchestration() {
    let executed = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(RecordingTool {
        name: "update_record",
        capability: ToolCapability::Mutating,
        result: ToolResult::success("{}".to_string()),
        log: executed.clone(),
    }));

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(60), 20, 2));
    let pending = Arc::new(PendingActionManager::with_timeout(Duration::from_millis(1)));
    let dispatcher = MessageDispatcher::new(
        AiClient::Mock(MockAiClient::new(vec![
            Ok(AiResponse::with_tools("".into(), vec![update_call("tu_1")])),
            Ok(AiResponse::text("על מה אתה מאשר? לא ממתינה פעולה.".into())),
        ])),
        registry,
        sessions,
        pending.clone(),
        5,
    );

    dispatcher
        .handle_message("sender-1", "עדכן את הלקוח דני לסטטוס בתהליך")
        .await;
    std::thread::sleep(Duration::from_millis(10));

    // The stale approval must not execute the forgotten write
    let result = dispatcher.handle_message("sender-1", "כן").await;
    assert_eq!(result.outcome, DispatchOutcome::Answer);
    assert!(executed.lock().is_empty());
}
