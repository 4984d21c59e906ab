// ABOUTME: RemoteTool wraps a tool advertised by an MCP server so agents can
// ABOUTME: call it like any other tool; attach() registers a server's whole set.

use std::sync::Arc;

use async_trait::async_trait;

use super::{McpClient, McpToolInfo};
use crate::error::{CanopyError, ToolError};
use crate::tool::{RegistryBuilder, Tool, ToolContext, ToolKind, ToolResult};

/// A tool that forwards calls to an MCP server.
pub struct RemoteTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
    name: String,
}

impl RemoteTool {
    /// Wrap `info`, optionally exposing it as `<prefix>_<name>`.
    pub fn new(client: Arc<McpClient>, info: McpToolInfo, prefix: Option<&str>) -> Self {
        let name = match prefix {
            Some(p) => format!("{}_{}", p, info.name),
            None => info.name.clone(),
        };
        Self { client, info, name }
    }

    /// The name the server knows this tool by.
    pub fn remote_name(&self) -> &str {
        &self.info.name
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Remote
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let result = self
            .client
            .call_tool(&self.info.name, params)
            .await
            .map_err(|e| ToolError::Execution(e.into()))?;

        let content = result.text();
        if result.is_error {
            Ok(ToolResult::error(content))
        } else {
            Ok(ToolResult::text(content).with_metadata("server", self.client.name()))
        }
    }
}

/// Register every tool `client` advertises. Returns the registered names.
pub async fn attach(
    builder: RegistryBuilder,
    client: Arc<McpClient>,
    prefix: Option<&str>,
) -> Result<(RegistryBuilder, Vec<String>), CanopyError> {
    let tools = client.list_tools().await?;
    let mut builder = builder;
    let mut names = Vec::with_capacity(tools.len());
    for info in tools {
        let tool = RemoteTool::new(client.clone(), info, prefix);
        names.push(tool.name().to_string());
        builder = builder.register(tool)?;
    }
    tracing::info!(server = %client.name(), tools = names.len(), "attached remote tools");
    Ok((builder, names))
}
