// ABOUTME: Event types carried on the observability bus: run starts,
// ABOUTME: appended steps, and status transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{RunStatus, Step};
use crate::error::FailureReason;

/// Something observable that happened to a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    RunStarted {
        run_id: String,
        agent: String,
        parent_run_id: Option<String>,
        task: String,
        max_steps: usize,
        timestamp: DateTime<Utc>,
    },
    Step {
        run_id: String,
        agent: String,
        step: Step,
    },
    StatusChanged {
        run_id: String,
        agent: String,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<FailureReason>,
        timestamp: DateTime<Utc>,
    },
}

impl BusEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            BusEvent::RunStarted { run_id, .. }
            | BusEvent::Step { run_id, .. }
            | BusEvent::StatusChanged { run_id, .. } => run_id,
        }
    }

    /// Whether this is `run_id` entering a terminal status.
    pub fn settles(&self, run_id: &str) -> bool {
        matches!(self, BusEvent::StatusChanged { run_id: id, status, .. } if id == run_id && status.is_terminal())
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BusItem {
    Event(Arc<BusEvent>),
    /// The subscriber fell behind and `missed` events were dropped.
    Gap { missed: u64 },
}
