// ABOUTME: Builds a live Dispatcher from config - local tools, remote MCP
// ABOUTME: servers attached at startup, and the OpenAI-compatible backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use canopy::config::CanopyConfig;
use canopy::dispatch::Dispatcher;
use canopy::mcp::{McpClient, attach};

/// Remote servers stay connected for the life of the dispatcher.
pub struct Runtime {
    pub dispatcher: Arc<Dispatcher>,
    pub servers: Vec<Arc<McpClient>>,
}

impl Runtime {
    pub async fn start(config: &CanopyConfig) -> Result<Self> {
        let mut tools = config.local_tools()?;
        let mut servers = Vec::new();

        for server in config.mcp_servers() {
            let client = McpClient::connect(&server)
                .await
                .with_context(|| format!("failed to start MCP server '{}'", server.name))?;
            let client = Arc::new(client);
            client
                .initialize()
                .await
                .with_context(|| format!("MCP server '{}' failed to initialize", server.name))?;
            let (next, names) = attach(tools, client.clone(), Some(&server.name)).await?;
            tracing::info!(server = %server.name, tools = ?names, "remote tools available");
            tools = next;
            servers.push(client);
        }

        let backend = config.model_backend().context("failed to configure model backend")?;
        let dispatcher = Dispatcher::new(
            config.agent_catalog()?,
            tools,
            Arc::new(backend),
            config.bus(),
            config.dispatcher_config(),
        )?;

        Ok(Self { dispatcher, servers })
    }

    /// Cancel every run, then stop the remote servers.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.dispatcher.shutdown(grace).await;
        for server in &self.servers {
            if let Err(e) = server.shutdown().await {
                tracing::warn!(server = %server.name(), error = %e, "MCP server did not shut down cleanly");
            }
        }
    }
}
