// ABOUTME: CodeTool - exposes the SandboxedExecutor to agents as a local tool
// ABOUTME: taking a single `code` argument.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ExecutionLimits, Interpreter, SandboxedExecutor};
use crate::error::{SandboxError, ToolError};
use crate::tool::{Tool, ToolContext, ToolResult};

/// Runs code through a sandboxed executor.
pub struct CodeTool {
    name: String,
    description: String,
    executor: Arc<SandboxedExecutor>,
    limits: ExecutionLimits,
}

impl CodeTool {
    /// Create a code tool named after its interpreter.
    pub fn new(executor: SandboxedExecutor, limits: ExecutionLimits) -> Self {
        let (name, language) = match executor.interpreter() {
            Interpreter::Python { .. } => ("python_interpreter", "Python"),
            Interpreter::Shell => ("shell", "POSIX shell"),
        };

        let mut description = format!(
            "Evaluates {} code in an isolated sandbox and returns its printed output \
             together with the value of the final expression.",
            language
        );
        if let Some(imports) = executor.policy().authorized_imports() {
            description.push_str(&format!(
                " Only these modules may be imported: {}.",
                imports.join(", ")
            ));
        }

        Self {
            name: name.to_string(),
            description,
            executor: Arc::new(executor),
            limits,
        }
    }

    /// Override the tool name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Deserialize)]
struct Params {
    code: String,
}

#[async_trait]
impl Tool for CodeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code to evaluate"
                }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: Params =
            serde_json::from_value(params).map_err(|e| ToolError::Execution(e.into()))?;

        match self
            .executor
            .execute(&params.code, &self.limits, &ctx.cancel)
            .await
        {
            Ok(output) => {
                let value = output.return_value.as_deref().unwrap_or("None");
                Ok(ToolResult::text(format!(
                    "Stdout:\n{}\nOutput: {}",
                    output.stdout, value
                ))
                .with_metadata("files", &output.files))
            }
            Err(SandboxError::Timeout(after)) => Err(ToolError::Timeout {
                tool: self.name.clone(),
                after,
            }),
            Err(SandboxError::Cancelled) => Err(ToolError::Cancelled),
            Err(e) => Err(ToolError::Sandbox(e)),
        }
    }
}
