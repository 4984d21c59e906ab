// ABOUTME: RunState and RunStatus - the per-run record owned by its step engine,
// ABOUTME: plus RunOutcome, the terminal summary handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Step;
use crate::error::{FailureReason, RunError};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Returns true once the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State of one (agent, task) execution.
///
/// Mutated only by the engine driving the run; everyone else reads snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: String,
    pub agent: String,
    pub parent_run_id: Option<String>,
    pub task: String,
    pub steps: Vec<Step>,
    pub status: RunStatus,
    pub step_count: usize,
    pub max_steps: usize,
    pub final_answer: Option<String>,
    pub failure: Option<FailureReason>,
    pub partial_answer: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// A fresh pending run.
    pub fn new(
        run_id: impl Into<String>,
        agent: impl Into<String>,
        task: impl Into<String>,
        parent_run_id: Option<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            agent: agent.into(),
            parent_run_id,
            task: task.into(),
            steps: Vec::new(),
            status: RunStatus::Pending,
            step_count: 0,
            max_steps,
            final_answer: None,
            failure: None,
            partial_answer: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Summarize a terminal run.
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id.clone(),
            agent: self.agent.clone(),
            status: self.status,
            answer: self.final_answer.clone(),
            failure: self.failure.clone(),
            partial_answer: self.partial_answer.clone(),
            steps_taken: self.step_count,
        }
    }
}

/// The terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub agent: String,
    pub status: RunStatus,
    pub answer: Option<String>,
    pub failure: Option<FailureReason>,
    pub partial_answer: Option<String>,
    pub steps_taken: usize,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// The final answer, or the terminal error that replaced it.
    pub fn into_result(self) -> Result<String, RunError> {
        match (self.status, self.answer) {
            (RunStatus::Succeeded, Some(answer)) => Ok(answer),
            (_, _) => Err(RunError {
                run_id: self.run_id,
                agent: self.agent,
                reason: self.failure.unwrap_or(FailureReason::Cancelled),
                partial: self.partial_answer,
            }),
        }
    }
}
