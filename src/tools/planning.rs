// ABOUTME: PlanningTool - an in-memory plan store agents use to lay out and
// ABOUTME: track multi-step work: create, update, list, get, activate, mark, delete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ToolError;
use crate::tool::{Tool, ToolContext, ToolResult};

const DESCRIPTION: &str = "A planning tool for creating and managing plans for complex tasks. \
It creates plans, updates plan steps, and tracks progress.
- Base your plan on the available tools and team members, and name them explicitly in your steps.
- Solve the complex task in at most 5 steps.
- `create` needs a unique plan_id, a title and a non-empty list of steps.";

/// Progress of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl StepStatus {
    fn symbol(self) -> &'static str {
        match self {
            StepStatus::NotStarted => "[ ]",
            StepStatus::InProgress => "[→]",
            StepStatus::Completed => "[✓]",
            StepStatus::Blocked => "[!]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Action {
    Create,
    Update,
    List,
    Get,
    SetActive,
    MarkStep,
    Delete,
}

#[derive(Debug, Deserialize)]
struct Params {
    action: Action,
    plan_id: Option<String>,
    title: Option<String>,
    steps: Option<Vec<String>>,
    step_index: Option<i64>,
    step_status: Option<StepStatus>,
    step_notes: Option<String>,
}

/// A plan and the status of each of its steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    pub steps: Vec<String>,
    pub statuses: Vec<StepStatus>,
    pub notes: Vec<String>,
}

impl Plan {
    fn count(&self, status: StepStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    /// Human-readable rendering with progress figures.
    pub fn render(&self) -> String {
        let header = format!("Plan: {} (ID: {})", self.title, self.plan_id);
        let mut out = format!("{}\n{}\n\n", header, "=".repeat(header.chars().count()));

        let total = self.steps.len();
        let completed = self.count(StepStatus::Completed);
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        out.push_str(&format!(
            "Progress: {}/{} steps completed ({:.1}%)\n",
            completed, total, percentage
        ));
        out.push_str(&format!(
            "Status: {} completed, {} in progress, {} blocked, {} not started\n\nSteps:\n",
            completed,
            self.count(StepStatus::InProgress),
            self.count(StepStatus::Blocked),
            self.count(StepStatus::NotStarted),
        ));

        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {} {}\n", i, self.statuses[i].symbol(), step));
            if !self.notes[i].is_empty() {
                out.push_str(&format!("   Notes: {}\n", self.notes[i]));
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct PlanStore {
    plans: Vec<Plan>,
    active: Option<String>,
}

impl PlanStore {
    fn get_mut(&mut self, plan_id: &str) -> Result<&mut Plan, String> {
        self.plans
            .iter_mut()
            .find(|p| p.plan_id == plan_id)
            .ok_or_else(|| format!("No plan found with ID: {}", plan_id))
    }

    fn resolve_id(&self, plan_id: Option<String>) -> Result<String, String> {
        plan_id
            .or_else(|| self.active.clone())
            .ok_or_else(|| "No active plan. Please specify a plan_id or set an active plan.".to_string())
    }
}

/// Shared in-memory plans. One instance serves every agent that declares it.
#[derive(Debug, Default)]
pub struct PlanningTool {
    store: Mutex<PlanStore>,
}

impl PlanningTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of a plan, for inspection.
    pub async fn plan(&self, plan_id: &str) -> Option<Plan> {
        let store = self.store.lock().await;
        store.plans.iter().find(|p| p.plan_id == plan_id).cloned()
    }

    async fn apply(&self, params: Params) -> Result<String, String> {
        let mut store = self.store.lock().await;
        let required = |value: Option<String>, name: &str, action: &str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("Parameter `{}` is required for action: {}", name, action))
        };

        match params.action {
            Action::Create => {
                let plan_id = required(params.plan_id, "plan_id", "create")?;
                if store.plans.iter().any(|p| p.plan_id == plan_id) {
                    return Err(format!(
                        "A plan with ID '{}' already exists. Use 'update' to modify existing plans.",
                        plan_id
                    ));
                }
                let title = required(params.title, "title", "create")?;
                let steps = params
                    .steps
                    .filter(|s| !s.is_empty())
                    .ok_or("Parameter `steps` must be a non-empty list of strings for action: create")?;

                let plan = Plan {
                    plan_id: plan_id.clone(),
                    title,
                    statuses: vec![StepStatus::NotStarted; steps.len()],
                    notes: vec![String::new(); steps.len()],
                    steps,
                };
                let rendered = plan.render();
                store.plans.push(plan);
                store.active = Some(plan_id.clone());
                Ok(format!("Plan created successfully with ID: {}\n\n{}", plan_id, rendered))
            }
            Action::Update => {
                let plan_id = required(params.plan_id, "plan_id", "update")?;
                let plan = store.get_mut(&plan_id)?;
                if let Some(title) = params.title.filter(|t| !t.is_empty()) {
                    plan.title = title;
                }
                if let Some(steps) = params.steps.filter(|s| !s.is_empty()) {
                    // Unchanged steps at the same position keep their progress.
                    let mut statuses = Vec::with_capacity(steps.len());
                    let mut notes = Vec::with_capacity(steps.len());
                    for (i, step) in steps.iter().enumerate() {
                        if plan.steps.get(i) == Some(step) {
                            statuses.push(plan.statuses[i]);
                            notes.push(plan.notes[i].clone());
                        } else {
                            statuses.push(StepStatus::NotStarted);
                            notes.push(String::new());
                        }
                    }
                    plan.steps = steps;
                    plan.statuses = statuses;
                    plan.notes = notes;
                }
                Ok(format!("Plan updated successfully: {}\n\n{}", plan_id, plan.render()))
            }
            Action::List => {
                if store.plans.is_empty() {
                    return Err("No plans available. Create a plan with the 'create' action.".into());
                }
                let mut out = String::from("Available plans:\n");
                for plan in &store.plans {
                    let marker = if store.active.as_deref() == Some(plan.plan_id.as_str()) {
                        " (active)"
                    } else {
                        ""
                    };
                    out.push_str(&format!(
                        "• {}{}: {} - {}/{} steps completed\n",
                        plan.plan_id,
                        marker,
                        plan.title,
                        plan.count(StepStatus::Completed),
                        plan.steps.len()
                    ));
                }
                Ok(out)
            }
            Action::Get => {
                let plan_id = store.resolve_id(params.plan_id)?;
                Ok(store.get_mut(&plan_id)?.render())
            }
            Action::SetActive => {
                let plan_id = required(params.plan_id, "plan_id", "set_active")?;
                let rendered = store.get_mut(&plan_id)?.render();
                store.active = Some(plan_id.clone());
                Ok(format!("Plan '{}' is now the active plan.\n\n{}", plan_id, rendered))
            }
            Action::MarkStep => {
                let plan_id = store.resolve_id(params.plan_id)?;
                let plan = store.get_mut(&plan_id)?;
                let index = params
                    .step_index
                    .ok_or("Parameter `step_index` is required for action: mark_step")?;
                let index = usize::try_from(index)
                    .ok()
                    .filter(|i| *i < plan.steps.len())
                    .ok_or_else(|| {
                        format!(
                            "Invalid step_index: {}. Valid indices range from 0 to {}.",
                            index,
                            plan.steps.len() as i64 - 1
                        )
                    })?;
                if let Some(status) = params.step_status {
                    plan.statuses[index] = status;
                }
                if let Some(notes) = params.step_notes.filter(|n| !n.is_empty()) {
                    plan.notes[index] = notes;
                }
                Ok(format!(
                    "Step {} updated successfully in plan '{}'.\n\n{}",
                    index,
                    plan_id,
                    plan.render()
                ))
            }
            Action::Delete => {
                let plan_id = required(params.plan_id, "plan_id", "delete")?;
                store.get_mut(&plan_id)?;
                store.plans.retain(|p| p.plan_id != plan_id);
                if store.active.as_deref() == Some(plan_id.as_str()) {
                    store.active = None;
                }
                Ok(format!("Plan '{}' has been deleted.", plan_id))
            }
        }
    }
}

#[async_trait]
impl Tool for PlanningTool {
    fn name(&self) -> &str {
        "planning"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "list", "get", "set_active", "mark_step", "delete"],
                    "description": "The action to execute."
                },
                "plan_id": {
                    "type": ["string", "null"],
                    "description": "Unique plan identifier. Required for create, update, set_active and delete; get and mark_step default to the active plan."
                },
                "title": {
                    "type": ["string", "null"],
                    "description": "Plan title. Required for create, optional for update."
                },
                "steps": {
                    "type": ["array", "null"],
                    "items": { "type": "string" },
                    "description": "Plan steps. Required for create, optional for update."
                },
                "step_index": {
                    "type": ["integer", "null"],
                    "description": "0-based index of the step to mark. Required for mark_step."
                },
                "step_status": {
                    "type": ["string", "null"],
                    "enum": ["not_started", "in_progress", "completed", "blocked", null],
                    "description": "New status for the step, used with mark_step."
                },
                "step_notes": {
                    "type": ["string", "null"],
                    "description": "Notes for the step, used with mark_step."
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: Params = serde_json::from_value(params)
            .map_err(|e| ToolError::Rejected(format!("invalid planning arguments: {}", e)))?;
        let action = params.action;

        match self.apply(params).await {
            Ok(output) => {
                tracing::debug!(run_id = %ctx.run_id, ?action, "plan updated");
                Ok(ToolResult::text(output))
            }
            Err(message) => Ok(ToolResult::error(message)),
        }
    }
}
