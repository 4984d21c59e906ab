// ABOUTME: Built-in local tools beyond code execution.
// ABOUTME: Currently the shared planning tool.

mod planning;

pub use planning::{Plan, PlanningTool, StepStatus};
