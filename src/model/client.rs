// ABOUTME: Defines the LlmClient trait - the chat-completion seam that lets the
// ABOUTME: decision backend work with any compatible provider.

use async_trait::async_trait;

use super::{Request, Response};
use crate::error::ModelError;

/// Trait for chat-completion client implementations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Create a message (non-streaming).
    async fn create_message(&self, req: &Request) -> Result<Response, ModelError>;
}
