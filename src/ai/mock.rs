use crate::ai::types::{AiError, AiResponse, ClaudeMessage};
use crate::tools::ToolDefinition;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One recorded `converse` invocation: what the dispatcher sent in.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Number of transcript messages replayed to the model
    pub message_count: usize,
    /// Names of the tools advertised in the catalogue
    pub tool_names: Vec<String>,
}

/// Scripted AI client for offline dispatcher tests.
///
/// Pops one pre-configured response per `converse` call and records the
/// shape of each request so tests can assert on transcript replay.
pub struct MockAiClient {
    responses: Mutex<VecDeque<Result<AiResponse, AiError>>>,
    trace: Mutex<Vec<TraceEntry>>,
}

impl MockAiClient {
    pub fn new(responses: Vec<Result<AiResponse, AiError>>) -> Self {
        MockAiClient {
            responses: Mutex::new(responses.into()),
            trace: Mutex::new(Vec::new()),
        }
    }

    pub async fn converse(
        &self,
        _system: &str,
        messages: Vec<ClaudeMessage>,
        tools: &[ToolDefinition],
    ) -> Result<AiResponse, AiError> {
        self.trace.lock().push(TraceEntry {
            message_count: messages.len(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::new("MockAiClient: response queue exhausted")))
    }

    /// All requests seen so far, in order
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().clone()
    }
}
