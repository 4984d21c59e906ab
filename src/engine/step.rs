// ABOUTME: Step records - the immutable, ordered units of progress appended
// ABOUTME: to a run: model decisions, tool calls, tool results, and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Decision;
use crate::tool::ToolResult;

/// The four kinds of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ModelDecision,
    ToolCall,
    ToolResult,
    Error,
}

/// What went wrong in an error step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Arguments failed schema validation.
    Validation,
    /// The model named a tool that does not exist.
    UnknownTool,
    /// The tool exists but this agent did not declare it.
    NotAvailable,
    /// The model backend failed after retries.
    Model,
    /// The run ended on a terminal error.
    Terminal,
}

/// Kind-specific content of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    ModelDecision {
        decision: Decision,
    },
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        tool: String,
        result: ToolResult,
    },
    Error {
        class: ErrorClass,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
}

impl StepPayload {
    pub fn kind(&self) -> StepKind {
        match self {
            StepPayload::ModelDecision { .. } => StepKind::ModelDecision,
            StepPayload::ToolCall { .. } => StepKind::ToolCall,
            StepPayload::ToolResult { .. } => StepKind::ToolResult,
            StepPayload::Error { .. } => StepKind::Error,
        }
    }
}

/// One immutable entry in a run's step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Position in the run's log, starting at 0.
    pub index: usize,
    /// Value of the run's step counter when this step was recorded.
    pub round: usize,
    #[serde(flatten)]
    pub payload: StepPayload,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.payload.kind()
    }

    /// A one-line human summary, for logs and headless output.
    pub fn summary(&self) -> String {
        match &self.payload {
            StepPayload::ModelDecision {
                decision: Decision::FinalAnswer { text },
            } => format!("final answer: {}", crate::tool::truncate_chars(text, 120)),
            StepPayload::ModelDecision {
                decision: Decision::ToolCall { name, .. },
            } => format!("decided to call {}", name),
            StepPayload::ToolCall { tool, args, .. } => {
                format!("calling {} {}", tool, crate::tool::truncate_chars(&args.to_string(), 120))
            }
            StepPayload::ToolResult { tool, result, .. } if result.is_error => {
                format!("{} failed: {}", tool, result.preview(120))
            }
            StepPayload::ToolResult { tool, result, .. } => {
                format!("{} returned: {}", tool, result.preview(120))
            }
            StepPayload::Error { message, .. } => format!("error: {}", message),
        }
    }
}
