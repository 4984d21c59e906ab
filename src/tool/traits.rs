// ABOUTME: Defines the Tool trait - the single capability contract every agent
// ABOUTME: tool satisfies, whether it runs locally, remotely, or as another agent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::ToolResult;
use crate::error::ToolError;

/// Where a tool's work actually happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Runs in this process (code execution, planning).
    Local,
    /// Starts a nested run of another agent.
    AgentProxy,
    /// Forwards to an external tool server.
    Remote,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Local => write!(f, "local"),
            ToolKind::AgentProxy => write!(f, "agent_proxy"),
            ToolKind::Remote => write!(f, "remote"),
        }
    }
}

/// Execution context handed to a tool by the run that invokes it.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Run that issued the call.
    pub run_id: String,

    /// Agent executing that run.
    pub agent: String,

    /// Cancelled when the calling run is cancelled.
    pub cancel: CancellationToken,

    /// Upper bound on how long the call may take, if any.
    pub timeout: Option<Duration>,

    /// Steps the calling run has left, inherited by nested runs.
    pub remaining_steps: usize,
}

impl ToolContext {
    /// Create a context for a standalone call outside any run.
    pub fn detached() -> Self {
        Self {
            run_id: String::new(),
            agent: String::new(),
            cancel: CancellationToken::new(),
            timeout: None,
            remaining_steps: usize::MAX,
        }
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A capability that can be invoked by an agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of this tool.
    fn name(&self) -> &str;

    /// Returns a human-readable description for the model.
    fn description(&self) -> &str;

    /// Returns the JSON Schema for the tool's input parameters.
    fn schema(&self) -> serde_json::Value;

    /// Where this tool runs.
    fn kind(&self) -> ToolKind {
        ToolKind::Local
    }

    /// Execute the tool with already-validated parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}
