// ABOUTME: Defines the ModelBackend trait - (history, tools) in, one Decision out -
// ABOUTME: and LlmBackend, which derives decisions from any LlmClient.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ContentBlock, Decision, DecisionRequest, FINAL_ANSWER_TOOL, LlmClient, Request, ToolDefinition};
use crate::error::ModelError;

/// Turns a conversation and the available tools into a single decision.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Decide the next action.
    async fn decide(&self, req: &DecisionRequest) -> Result<Decision, ModelError>;
}

/// A decision backend over a chat-completion client.
///
/// A call to the `final_answer` pseudo-tool, or a reply with no tool call,
/// becomes a final answer. Only the first tool call of a reply is honoured.
pub struct LlmBackend {
    client: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: Option<f64>,
}

impl LlmBackend {
    /// Create a backend over `client`.
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tokens: 4096,
            temperature: None,
        }
    }

    /// Set max tokens per decision.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling temperature.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl ModelBackend for LlmBackend {
    async fn decide(&self, req: &DecisionRequest) -> Result<Decision, ModelError> {
        let mut request = Request::new(&req.model)
            .system(&req.system)
            .messages(req.history.iter().cloned())
            .tools(req.tools.iter().cloned())
            .tools([ToolDefinition::final_answer()])
            .max_tokens(self.max_tokens);
        if let Some(t) = self.temperature {
            request = request.temperature(t);
        }

        let response = self.client.create_message(&request).await?;

        let calls = response.tool_uses();
        if calls.len() > 1 {
            tracing::warn!(
                count = calls.len(),
                "model proposed several tool calls; executing only the first"
            );
        }

        match calls.first() {
            Some(ContentBlock::ToolUse { name, input, .. }) if name == FINAL_ANSWER_TOOL => {
                let text = match input.get("answer") {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => {
                        return Err(ModelError::Malformed(
                            "final_answer call without an 'answer' argument".into(),
                        ));
                    }
                };
                Ok(Decision::FinalAnswer { text })
            }
            Some(ContentBlock::ToolUse { id, name, input }) => Ok(Decision::ToolCall {
                id: id.clone(),
                name: name.clone(),
                args: input.clone(),
            }),
            _ => {
                let text = response.text();
                if text.trim().is_empty() {
                    Err(ModelError::Malformed("empty response".into()))
                } else {
                    Ok(Decision::FinalAnswer { text })
                }
            }
        }
    }
}
