// ABOUTME: AgentProxyTool - exposes an agent as a tool. Calling it starts a
// ABOUTME: nested run through the dispatcher and waits for its terminal state.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use super::{AgentSpec, Dispatcher};
use crate::engine::RunOutcome;
use crate::error::{DispatchError, ToolError};
use crate::tool::{Tool, ToolContext, ToolKind, ToolResult};

/// A tool that invokes a managed agent.
pub struct AgentProxyTool {
    spec: Arc<AgentSpec>,
    dispatcher: Weak<Dispatcher>,
}

impl AgentProxyTool {
    pub fn new(spec: Arc<AgentSpec>, dispatcher: Weak<Dispatcher>) -> Self {
        Self { spec, dispatcher }
    }
}

#[async_trait]
impl Tool for AgentProxyTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::AgentProxy
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the managed agent. Be as detailed and verbose as necessary."
                },
                "additional_args": {
                    "type": "object",
                    "description": "Extra inputs the managed agent may need, such as file paths or data."
                }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| ToolError::Rejected("dispatcher has shut down".to_string()))?;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let task = compose_task(&params)?;
        let child = match dispatcher.spawn_child(ctx, &self.spec.name, task) {
            Ok(child) => child,
            Err(DispatchError::Unauthorized { caller, target }) => {
                return Err(ToolError::Unauthorized { caller, target });
            }
            Err(e) => return Ok(ToolResult::error(e.to_string())),
        };

        // Dropping this call (a timeout upstream) abandons the child.
        let guard = child.cancel.clone().drop_guard();
        let outcome = dispatcher.await_run(&child.run_id).await;
        guard.disarm();

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        match outcome {
            Ok(outcome) => Ok(report(&self.spec.name, outcome)),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

fn compose_task(params: &Value) -> Result<String, ToolError> {
    let task = params
        .get("task")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Rejected("missing 'task'".to_string()))?;

    match params.get("additional_args") {
        Some(Value::Object(extra)) if !extra.is_empty() => {
            let rendered = serde_json::to_string_pretty(extra)
                .map_err(|e| ToolError::Execution(e.into()))?;
            Ok(format!(
                "{}\n\nYou have been provided with these additional arguments:\n{}",
                task, rendered
            ))
        }
        _ => Ok(task.to_string()),
    }
}

fn report(agent: &str, outcome: RunOutcome) -> ToolResult {
    let run_id = outcome.run_id.clone();
    let status = outcome.status;
    let result = match outcome.into_result() {
        Ok(answer) => ToolResult::text(format!(
            "Here is the final answer from your managed agent '{}':\n{}",
            agent, answer
        )),
        Err(err) => {
            let mut message = format!("Managed agent '{}' did not finish: {}", agent, err.reason);
            if let Some(partial) = err.partial {
                message.push_str("\nPartial answer:\n");
                message.push_str(&partial);
            }
            ToolResult::error(message)
        }
    };
    result
        .with_metadata("run_id", run_id)
        .with_metadata("status", status)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::RunStatus;
    use crate::error::FailureReason;

    fn outcome(status: RunStatus) -> RunOutcome {
        RunOutcome {
            run_id: "child".into(),
            agent: "deep_analyzer_agent".into(),
            status,
            answer: None,
            failure: None,
            partial_answer: None,
            steps_taken: 2,
        }
    }

    #[test]
    fn test_compose_task_appends_additional_args() {
        let task = compose_task(&json!({
            "task": "summarize",
            "additional_args": { "path": "report.pdf" }
        }))
        .unwrap();
        assert!(task.starts_with("summarize\n\n"));
        assert!(task.contains("\"path\": \"report.pdf\""));

        let plain = compose_task(&json!({ "task": "t", "additional_args": {} })).unwrap();
        assert_eq!(plain, "t");
    }

    #[test]
    fn test_report_success() {
        let mut done = outcome(RunStatus::Succeeded);
        done.answer = Some("42".into());
        let result = report("deep_analyzer_agent", done);

        assert!(!result.is_error);
        assert_eq!(
            result.content,
            "Here is the final answer from your managed agent 'deep_analyzer_agent':\n42"
        );
        assert_eq!(result.metadata["run_id"], "child");
        assert_eq!(result.metadata["status"], "succeeded");
    }

    #[test]
    fn test_report_failure_carries_reason_and_partial() {
        let mut failed = outcome(RunStatus::Failed);
        failed.failure = Some(FailureReason::StepBudgetExhausted { max_steps: 2 });
        failed.partial_answer = Some("half done".into());
        let result = report("deep_analyzer_agent", failed);

        assert!(result.is_error);
        assert!(result.content.contains("step budget exhausted"));
        assert!(result.content.ends_with("Partial answer:\nhalf done"));
    }
}
