//! Turn-by-turn orchestration: alternates between the reasoning engine and
//! the tool catalogue until the model produces a final answer, a mutating
//! proposal suspends the turn into the confirmation gate, or the step bound
//! trips.

use crate::ai::types::{ClaudeContentBlock, ClaudeMessage, ToolCall, ToolResponse};
use crate::ai::{AiClient, TraceEntry};
use crate::execution::{ConfirmationReply, PendingAction, PendingActionManager};
use crate::session::store::{SessionStore, Turn, TurnContent, TurnRole};
use crate::session::topic::TopicBoundaryDetector;
use crate::tools::ToolRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Outcome class of one handled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Final natural-language answer
    Answer,
    /// A mutating proposal is parked; the user must approve or reject
    AwaitingConfirmation,
    /// The reply to a pending action could not be classified
    NeedsClarification,
    /// Transport failure talking to the reasoning engine
    Error,
}

/// What the HTTP boundary returns for one inbound message
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: DispatchOutcome,
    pub response: String,
    pub tools_executed: Vec<String>,
    pub steps: usize,
    pub action_completed: bool,
    pub action_cancelled: bool,
    pub error: Option<String>,
}

impl DispatchResult {
    fn base(outcome: DispatchOutcome, response: impl Into<String>) -> Self {
        DispatchResult {
            outcome,
            response: response.into(),
            tools_executed: Vec::new(),
            steps: 0,
            action_completed: false,
            action_cancelled: false,
            error: None,
        }
    }

    pub fn answer(response: impl Into<String>) -> Self {
        Self::base(DispatchOutcome::Answer, response)
    }

    pub fn awaiting_confirmation(prompt: impl Into<String>) -> Self {
        Self::base(DispatchOutcome::AwaitingConfirmation, prompt)
    }

    pub fn clarification(prompt: impl Into<String>) -> Self {
        Self::base(DispatchOutcome::NeedsClarification, prompt)
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::base(DispatchOutcome::Error, "");
        result.error = Some(message);
        result
    }

    fn with_stats(mut self, tools_executed: Vec<String>, steps: usize) -> Self {
        self.tools_executed = tools_executed;
        self.steps = steps;
        self
    }
}

/// Routes messages through the confirmation gate and the reasoning loop
pub struct MessageDispatcher {
    ai: AiClient,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    pending: Arc<PendingActionManager>,
    detector: TopicBoundaryDetector,
    system_prompt: String,
    max_steps: usize,
}

impl MessageDispatcher {
    pub fn new(
        ai: AiClient,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        pending: Arc<PendingActionManager>,
        max_steps: usize,
    ) -> Self {
        Self {
            ai,
            registry,
            sessions,
            pending,
            detector: TopicBoundaryDetector::default(),
            system_prompt: super::prompt::build_system_prompt(),
            max_steps,
        }
    }

    /// Handle one inbound message for a sender
    pub async fn handle_message(&self, sender_id: &str, text: &str) -> DispatchResult {
        let transcript = self.sessions.history(sender_id);

        // A live pending action intercepts the message before anything else:
        // an unclear reply must never silently execute or discard it
        if let Some(action) = self.pending.get(sender_id) {
            match ConfirmationReply::classify(text) {
                ConfirmationReply::Approve => {
                    return self.execute_pending(sender_id, action).await;
                }
                ConfirmationReply::Reject => {
                    self.pending.cancel(sender_id);
                    self.append_declined_results(sender_id, &action);
                    log::info!("Pending action {} rejected by {}", action.id, sender_id);
                    let mut result = DispatchResult::answer("❌ הפעולה בוטלה לפי בקשתך");
                    result.action_cancelled = true;
                    return result;
                }
                ConfirmationReply::Unrelated => {
                    // Supersession: drop the parked action, then treat this
                    // message as a normal new request
                    self.pending.cancel(sender_id);
                    self.append_declined_results(sender_id, &action);
                    log::info!("Pending action {} superseded by a new request", action.id);
                    if self.detector.should_reset(text, &transcript) {
                        self.sessions.reset(sender_id);
                    }
                }
                ConfirmationReply::Ambiguous => {
                    // Only a deterministic boundary (greeting / start-over)
                    // may sweep a pending action aside; heuristics don't get
                    // to discard a held write
                    if self.detector.is_explicit_boundary(text) {
                        self.pending.cancel(sender_id);
                        let epoch = self.sessions.reset(sender_id);
                        log::info!(
                            "Pending action {} dropped by explicit boundary (epoch {})",
                            action.id,
                            epoch
                        );
                    } else {
                        return DispatchResult::clarification(
                            "לא הבנתי את התגובה. אנא כתוב \"כן\" לאישור או \"לא\" לביטול.",
                        );
                    }
                }
            }
        } else if self.detector.should_reset(text, &transcript) {
            let epoch = self.sessions.reset(sender_id);
            log::info!("Session {} reset for new topic (epoch {})", sender_id, epoch);
        }

        self.run_loop(sender_id, text).await
    }

    /// Execute an approved pending action: every held invocation is attempted
    /// independently and the outcomes are aggregated into one response.
    async fn execute_pending(&self, sender_id: &str, action: PendingAction) -> DispatchResult {
        self.pending.cancel(sender_id);
        log::info!(
            "Executing approved action {} for {} ({} invocations)",
            action.id,
            sender_id,
            action.tool_calls.len()
        );

        let mut responses = Vec::new();
        let mut executed = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        for call in &action.tool_calls {
            executed.push(call.name.clone());
            let result = self.registry.execute(&call.name, call.arguments.clone()).await;
            if result.success {
                log::info!("Approved tool {} completed", call.name);
                responses.push(ToolResponse::success(call.id.clone(), result.content));
            } else {
                log::warn!("Approved tool {} failed: {}", call.name, result.content);
                failures.push((call.name.clone(), result.content.clone()));
                responses.push(ToolResponse::error(call.id.clone(), result.content));
            }
        }

        // Complete the suspended turn's request/response pairing
        self.sessions.append(sender_id, Turn::tool_results(responses));

        let total = executed.len();
        let succeeded = total - failures.len();
        let response = if failures.is_empty() {
            "✅ הפעולה בוצעה בהצלחה!".to_string()
        } else {
            let details = failures
                .iter()
                .map(|(name, error)| format!("{}: {}", name, error))
                .collect::<Vec<_>>()
                .join("; ");
            if succeeded == 0 {
                format!("❌ אירעה שגיאה בביצוע הפעולה: {}", details)
            } else {
                format!(
                    "⚠️ הושלמו {} מתוך {} פעולות. שגיאות: {}",
                    succeeded, total, details
                )
            }
        };

        self.sessions.append(sender_id, Turn::assistant(response.clone()));

        let mut result = DispatchResult::answer(response).with_stats(executed, 0);
        result.action_completed = failures.is_empty();
        result
    }

    /// Close the dangling tool_use pair of a declined proposal so the stored
    /// transcript stays valid for replay
    fn append_declined_results(&self, sender_id: &str, action: &PendingAction) {
        let responses = action
            .tool_calls
            .iter()
            .map(|call| {
                ToolResponse::error(
                    call.id.clone(),
                    "The user declined this action. Do not retry it unless asked again.".to_string(),
                )
            })
            .collect();
        self.sessions.append(sender_id, Turn::tool_results(responses));
    }

    /// The bounded reasoning loop for one inbound message
    async fn run_loop(&self, sender_id: &str, text: &str) -> DispatchResult {
        let epoch = self.sessions.epoch(sender_id);
        self.sessions.append(sender_id, Turn::user(text));
        let mut turns = self.sessions.history(sender_id);

        let definitions = self.registry.definitions();
        let mut tools_executed: Vec<String> = Vec::new();
        let mut steps = 0usize;

        while steps < self.max_steps {
            steps += 1;
            log::info!(
                "[LOOP] sender={} epoch={} step={}/{}",
                sender_id,
                epoch,
                steps,
                self.max_steps
            );

            let messages = transcript_to_messages(&turns);
            let response = match self
                .ai
                .converse(&self.system_prompt, messages, &definitions)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    // Transport failure: not retried here, surfaced to the
                    // caller as a failed turn
                    log::error!("Reasoning engine call failed: {}", e);
                    return DispatchResult::error(format!("AI generation error: {}", e));
                }
            };

            if !response.has_tool_calls() {
                // No tool requests — this is the final answer
                let answer = if response.content.trim().is_empty() {
                    fallback_answer(&tools_executed)
                } else {
                    response.content
                };
                self.sessions.append(sender_id, Turn::assistant(answer.clone()));
                log::info!("[LOOP] sender={} finished in {} steps", sender_id, steps);
                return DispatchResult::answer(answer).with_stats(tools_executed, steps);
            }

            // Keep the model's raw turn so the request/response pairing
            // survives replay on later steps
            let request_turn =
                Turn::tool_requests(response.content.clone(), response.tool_calls.clone());
            self.sessions.append(sender_id, request_turn.clone());
            turns.push(request_turn);

            let needs_confirmation = response
                .tool_calls
                .iter()
                .any(|call| self.registry.is_mutating(&call.name));

            if needs_confirmation {
                // Park the whole invocation set, not just the mutating part:
                // the user must see one coherent description of everything
                // this turn wants to do
                let description = self.describe_proposal(&response.tool_calls, &turns);
                self.pending.put(sender_id, response.tool_calls, text);
                log::info!(
                    "[LOOP] sender={} suspended awaiting confirmation at step {}",
                    sender_id,
                    steps
                );
                return DispatchResult::awaiting_confirmation(description)
                    .with_stats(tools_executed, steps);
            }

            // Read-only requests execute immediately; a failure becomes a
            // structured tool result the model can react to on its next step
            let mut responses = Vec::new();
            for call in &response.tool_calls {
                tools_executed.push(call.name.clone());
                log::info!("[LOOP] executing tool {}", call.name);
                let result = self.registry.execute(&call.name, call.arguments.clone()).await;
                if !result.success {
                    log::warn!("[LOOP] tool {} failed: {}", call.name, result.content);
                }
                responses.push(if result.success {
                    ToolResponse::success(call.id.clone(), result.content)
                } else {
                    ToolResponse::error(call.id.clone(), result.content)
                });
            }

            let results_turn = Turn::tool_results(responses);
            self.sessions.append(sender_id, results_turn.clone());
            turns.push(results_turn);
        }

        // Step bound reached without a final answer: degrade, never go silent
        log::warn!(
            "[LOOP] sender={} hit max steps ({}), synthesizing summary",
            sender_id,
            self.max_steps
        );
        let answer = fallback_answer(&tools_executed);
        self.sessions.append(sender_id, Turn::assistant(answer.clone()));
        DispatchResult::answer(answer).with_stats(tools_executed, steps)
    }

    /// Human-readable description of a proposed invocation set. Updates show
    /// the record's current values, resolved from tool results earlier in
    /// the transcript.
    fn describe_proposal(&self, calls: &[ToolCall], turns: &[Turn]) -> String {
        let mut description = String::from("🔔 בקשת אישור:\n\n");

        for call in calls {
            match call.name.as_str() {
                "create_record" => {
                    let table = call
                        .arguments
                        .get("table")
                        .and_then(|v| v.as_str())
                        .unwrap_or("רשומה");
                    description.push_str(&format!("🆕 יצירת רשומה חדשה בטבלת {}\n", table));
                    if let Some(fields) = call.arguments.get("fields").and_then(|f| f.as_object()) {
                        for (name, value) in fields {
                            description.push_str(&format!("📝 {}: {}\n", name, display_value(value)));
                        }
                    }
                    description.push('\n');
                }
                "update_record" => {
                    let record_id = call
                        .arguments
                        .get("record_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    let current = find_record_fields(turns, record_id);
                    let subject = current
                        .as_ref()
                        .and_then(|fields| fields.get("שם מלא"))
                        .and_then(|v| v.as_str())
                        .unwrap_or(if record_id.is_empty() { "רשומה" } else { record_id });
                    description.push_str(&format!("🔄 עדכון עבור: {}\n", subject));

                    if let Some(fields) = call.arguments.get("fields").and_then(|f| f.as_object()) {
                        for (name, new_value) in fields {
                            let current_value = current
                                .as_ref()
                                .and_then(|f| f.get(name))
                                .map(display_value)
                                .unwrap_or_else(|| "(לא ידוע)".to_string());
                            description.push_str(&format!(
                                "📝 {}:\n   {}\n   ⬇️\n   {}\n\n",
                                name,
                                current_value,
                                display_value(new_value)
                            ));
                        }
                    }
                }
                other => {
                    description.push_str(&format!("🔍 {}\n", other));
                }
            }
        }

        description.push_str("❓ האם לבצע את הפעולה? (כן/לא)");
        description
    }

    /// Request trace recorded by the mock AI client (test support)
    pub fn mock_trace(&self) -> Vec<TraceEntry> {
        self.ai.mock_trace()
    }
}

/// Replay the transcript in Claude message form.
///
/// Every tool_use block must be answered by a tool_result in the next
/// message or the API rejects the request. A requests turn can be left
/// unanswered when its pending action expired unresolved, so synthetic
/// results are injected for those.
fn transcript_to_messages(turns: &[Turn]) -> Vec<ClaudeMessage> {
    let mut messages = Vec::new();

    for (index, turn) in turns.iter().enumerate() {
        match &turn.content {
            TurnContent::Text { text } => match turn.role {
                TurnRole::User => messages.push(ClaudeMessage::user(text.clone())),
                TurnRole::Assistant => messages.push(ClaudeMessage::assistant(text.clone())),
                TurnRole::Tool => {}
            },
            TurnContent::ToolRequests { preamble, calls } => {
                let mut blocks = Vec::new();
                if !preamble.trim().is_empty() {
                    blocks.push(ClaudeContentBlock::text(preamble.clone()));
                }
                blocks.extend(calls.iter().map(|call| ClaudeContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                messages.push(ClaudeMessage::assistant_with_blocks(blocks));

                let answered = matches!(
                    turns.get(index + 1).map(|t| &t.content),
                    Some(TurnContent::ToolResults { .. })
                );
                if !answered {
                    let synthetic = calls
                        .iter()
                        .map(|call| {
                            ClaudeContentBlock::tool_result(
                                call.id.clone(),
                                "This action was never executed (confirmation expired or was withdrawn).".to_string(),
                                true,
                            )
                        })
                        .collect();
                    messages.push(ClaudeMessage::user_with_tool_results(synthetic));
                }
            }
            TurnContent::ToolResults { responses } => {
                let blocks = responses
                    .iter()
                    .map(|response| {
                        ClaudeContentBlock::tool_result(
                            response.tool_call_id.clone(),
                            response.content.clone(),
                            response.is_error,
                        )
                    })
                    .collect();
                messages.push(ClaudeMessage::user_with_tool_results(blocks));
            }
        }
    }

    messages
}

/// Find a record's current field values in earlier tool results
fn find_record_fields(turns: &[Turn], record_id: &str) -> Option<Map<String, Value>> {
    if record_id.is_empty() {
        return None;
    }

    for turn in turns.iter().rev() {
        let TurnContent::ToolResults { responses } = &turn.content else {
            continue;
        };
        for response in responses {
            let Ok(parsed) = serde_json::from_str::<Value>(&response.content) else {
                continue;
            };
            // Search results carry {records: [...]}, create/update results a
            // bare record object
            if let Some(records) = parsed.get("records").and_then(|r| r.as_array()) {
                for record in records {
                    if record.get("id").and_then(|id| id.as_str()) == Some(record_id) {
                        if let Some(fields) = record.get("fields").and_then(|f| f.as_object()) {
                            return Some(fields.clone());
                        }
                    }
                }
            } else if parsed.get("id").and_then(|id| id.as_str()) == Some(record_id) {
                if let Some(fields) = parsed.get("fields").and_then(|f| f.as_object()) {
                    return Some(fields.clone());
                }
            }
        }
    }

    None
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Non-empty best-effort answer when the loop could not produce one
fn fallback_answer(tools_executed: &[String]) -> String {
    if tools_executed.is_empty() {
        return "לא הבנתי את הבקשה. אנא נסח מחדש.".to_string();
    }

    let mut unique: Vec<&str> = Vec::new();
    for name in tools_executed {
        if !unique.contains(&name.as_str()) {
            unique.push(name.as_str());
        }
    }

    format!(
        "הפעולה בוצעה חלקית: הושלמו {} קריאות מידע ({}). אנא בדוק את התוצאות במערכת או נסח את הבקשה מחדש.",
        tools_executed.len(),
        unique.join(", ")
    )
}
