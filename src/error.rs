// ABOUTME: Defines all error types for the canopy library using thiserror.
// ABOUTME: Each subsystem has its own error enum, unified under CanopyError.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level error type for the canopy library.
#[derive(Debug, thiserror::Error)]
pub enum CanopyError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Errors from model backend operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Http(_) | ModelError::Timeout(_) | ModelError::Malformed(_) => true,
            ModelError::Deserialize(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::Configuration(_) => false,
        }
    }
}

/// Arguments that do not satisfy a tool's parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid arguments for '{tool}': {}", .violations.join("; "))]
pub struct SchemaError {
    pub tool: String,
    pub violations: Vec<String>,
}

/// Errors from tool operations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{0}' registered twice")]
    Duplicate(String),

    #[error("Tool '{0}' is not available to this agent")]
    NotAvailable(String),

    #[error(transparent)]
    InvalidParams(#[from] SchemaError),

    #[error("Execution failed: {0}")]
    Execution(#[source] anyhow::Error),

    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Agent '{caller}' is not authorized to call agent '{target}'")]
    Unauthorized { caller: String, target: String },

    #[error("Tool call cancelled")]
    Cancelled,

    #[error("{0}")]
    Rejected(String),
}

impl ToolError {
    /// Whether this error must end the calling run instead of being fed back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolError::Unauthorized { .. } | ToolError::Cancelled)
    }
}

/// Errors from the sandboxed code executor.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Policy violation: {0}")]
    Violation(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the agent dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Agent '{caller}' is not authorized to call agent '{target}'")]
    Unauthorized { caller: String, target: String },

    #[error("Maximum nesting depth ({0}) reached")]
    DepthExceeded(usize),

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Run task for {0} ended without reporting an outcome")]
    Lost(String),
}

/// Errors from MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Why a run finished with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    StepBudgetExhausted { max_steps: usize },
    Unauthorized { caller: String, target: String },
    Cancelled,
    TooManyValidationFailures { count: usize },
    WallClockExceeded { after_ms: u64 },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::StepBudgetExhausted { max_steps } => {
                write!(f, "step budget exhausted after {} steps", max_steps)
            }
            FailureReason::Unauthorized { caller, target } => {
                write!(f, "agent '{}' may not call agent '{}'", caller, target)
            }
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::TooManyValidationFailures { count } => {
                write!(f, "{} consecutive invalid tool calls", count)
            }
            FailureReason::WallClockExceeded { after_ms } => {
                write!(f, "wall-clock limit exceeded after {}ms", after_ms)
            }
        }
    }
}

/// A terminal error that crossed a run boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("run {run_id} ({agent}) did not succeed: {reason}")]
pub struct RunError {
    pub run_id: String,
    pub agent: String,
    pub reason: FailureReason,
    /// Best-effort partial answer, when one could be salvaged.
    pub partial: Option<String>,
}
