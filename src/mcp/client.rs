// ABOUTME: MCP client - performs the handshake, lists a server's tools, and
// ABOUTME: calls them, bounding every request with a timeout.

use std::sync::Arc;
use std::time::Duration;

use super::{
    MCP_PROTOCOL_VERSION, McpClientInfo, McpInitializeParams, McpInitializeResult,
    McpNotification, McpRequest, McpServerConfig, McpToolInfo, McpToolResult, StdioTransport,
    Transport,
};
use crate::error::McpError;

/// Default bound on a single request.
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one tool server.
pub struct McpClient {
    name: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl McpClient {
    /// Launch the configured server process.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport =
            StdioTransport::connect(&config.command, &config.args, &config.env).await?;
        Ok(Self::with_transport(config.name.clone(), Arc::new(transport)))
    }

    /// Wrap an existing transport.
    pub fn with_transport(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout: DEFAULT_MCP_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The server's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let request = McpRequest::new(method, params);
        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| McpError::Timeout(self.timeout))??;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("no result in response to {}", method)))
    }

    /// Perform the initialize handshake.
    pub async fn initialize(&self) -> Result<McpInitializeResult, McpError> {
        let params = McpInitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: McpClientInfo {
                name: "canopy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: McpInitializeResult = serde_json::from_value(result)?;

        self.transport
            .notify(McpNotification::new("notifications/initialized", None))
            .await?;
        tracing::info!(server = %self.name, protocol = %init.protocol_version, "MCP server initialized");
        Ok(init)
    }

    /// List the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut result = self.request("tools/list", None).await?;
        let tools = result
            .get_mut("tools")
            .map(serde_json::Value::take)
            .ok_or_else(|| McpError::Protocol("tools/list result has no 'tools'".into()))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Call a tool by its server-side name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Close the connection.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        self.transport.shutdown().await
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}
