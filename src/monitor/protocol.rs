// ABOUTME: Wire protocol of the monitoring feed - client commands and server
// ABOUTME: messages, both JSON objects tagged by a `type` field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::{BusEvent, BusItem};
use crate::dispatch::RunNode;
use crate::engine::{RunState, RunStatus, Step};

/// A request from a monitoring client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    Submit { agent: String, task: String },
    Status { run_id: String },
    Tree,
    Steps { run_id: String },
    Cancel { run_id: String },
    /// Drop a finished run and its descendants from the run table.
    Reap { run_id: String },
}

/// Everything the server sends: replies to commands plus forwarded bus items.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Submitted {
        run_id: String,
        agent: String,
    },
    Status {
        run_id: String,
        agent: String,
        status: RunStatus,
        step_count: usize,
        max_steps: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Tree {
        runs: Vec<RunNode>,
    },
    Steps {
        run_id: String,
        steps: Vec<Step>,
    },
    Cancelled {
        run_ids: Vec<String>,
    },
    Reaped {
        run_ids: Vec<String>,
    },
    Event {
        event: Arc<BusEvent>,
    },
    Gap {
        missed: u64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Status reply built from a run snapshot.
    pub fn status(state: &RunState) -> Self {
        ServerMessage::Status {
            run_id: state.run_id.clone(),
            agent: state.agent.clone(),
            status: state.status,
            step_count: state.step_count,
            max_steps: state.max_steps,
            final_answer: state.final_answer.clone(),
            reason: state.failure.as_ref().map(ToString::to_string),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"error","message":"failed to encode message: {}"}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

impl From<BusItem> for ServerMessage {
    fn from(item: BusItem) -> Self {
        match item {
            BusItem::Event(event) => ServerMessage::Event { event },
            BusItem::Gap { missed } => ServerMessage::Gap { missed },
        }
    }
}

/// Parse one client frame.
pub fn parse_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}
