pub mod claude;
pub mod mock;
pub mod types;

pub use claude::ClaudeClient;
pub use mock::{MockAiClient, TraceEntry};
pub use types::{AiError, AiResponse, ClaudeMessage, ToolCall, ToolResponse};

use crate::tools::ToolDefinition;

/// Unified AI client: the real Messages API, or a scripted mock so the
/// orchestration loop is testable without network access
pub enum AiClient {
    Claude(ClaudeClient),
    Mock(MockAiClient),
}

impl AiClient {
    /// Send the full transcript and tool catalogue, get back the model's turn.
    /// The underlying collaborator is stateless across calls.
    pub async fn converse(
        &self,
        system: &str,
        messages: Vec<ClaudeMessage>,
        tools: &[ToolDefinition],
    ) -> Result<AiResponse, AiError> {
        match self {
            AiClient::Claude(client) => client.converse(system, messages, tools).await,
            AiClient::Mock(client) => client.converse(system, messages, tools).await,
        }
    }

    /// Request trace recorded by the mock client (empty for the real client)
    pub fn mock_trace(&self) -> Vec<TraceEntry> {
        match self {
            AiClient::Mock(client) => client.trace(),
            _ => Vec::new(),
        }
    }
}
