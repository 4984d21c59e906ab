// ABOUTME: Tests for McpClient and RemoteTool against an in-memory transport
// ABOUTME: that answers like a small tool server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::error::{McpError, ToolError};
use crate::tool::{Registry, ToolContext, ToolKind};

/// Answers initialize, tools/list and tools/call; records notifications.
#[derive(Default)]
struct FakeServer {
    notifications: Mutex<Vec<String>>,
    hang: bool,
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let (result, error) = match request.method.as_str() {
            "initialize" => (
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "fake", "version": "1.0" }
                })),
                None,
            ),
            "tools/list" => (
                Some(json!({
                    "tools": [{
                        "name": "lookup",
                        "description": "Looks things up",
                        "inputSchema": {
                            "type": "object",
                            "properties": { "query": { "type": "string" } },
                            "required": ["query"]
                        }
                    }]
                })),
                None,
            ),
            "tools/call" => {
                let params = request.params.unwrap_or_default();
                let query = params["arguments"]["query"].as_str().unwrap_or_default().to_string();
                let failed = query == "fail";
                (
                    Some(json!({
                        "content": [{ "type": "text", "text": format!("found {}", query) }],
                        "isError": failed
                    })),
                    None,
                )
            }
            _ => (
                None,
                Some(McpRpcError {
                    code: -32601,
                    message: "Method not found".into(),
                    data: None,
                }),
            ),
        };
        Ok(McpResponse {
            jsonrpc: "2.0".into(),
            id: request.id,
            result,
            error,
        })
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        self.notifications.lock().unwrap().push(notification.method);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        Ok(())
    }
}

fn client(server: Arc<FakeServer>) -> Arc<McpClient> {
    Arc::new(McpClient::with_transport("fake", server))
}

#[tokio::test]
async fn test_initialize_sends_initialized_notification() {
    let server = Arc::new(FakeServer::default());
    let client = client(server.clone());

    let init = client.initialize().await.unwrap();

    assert_eq!(init.protocol_version, MCP_PROTOCOL_VERSION);
    assert_eq!(
        *server.notifications.lock().unwrap(),
        vec!["notifications/initialized".to_string()]
    );
}

#[tokio::test]
async fn test_list_and_call_tools() {
    let client = client(Arc::new(FakeServer::default()));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let result = client.call_tool("lookup", json!({ "query": "rust" })).await.unwrap();
    assert_eq!(result.text(), "found rust");
}

#[tokio::test]
async fn test_rpc_error_surfaces() {
    let client = client(Arc::new(FakeServer::default()));
    let result = client.request("resources/list", None).await;
    assert!(matches!(result, Err(McpError::Rpc { code: -32601, .. })));
}

#[tokio::test]
async fn test_request_timeout() {
    let server = Arc::new(FakeServer {
        hang: true,
        ..FakeServer::default()
    });
    let client = McpClient::with_transport("slow", server).timeout(Duration::from_millis(20));

    let result = client.list_tools().await;
    assert!(matches!(result, Err(McpError::Timeout(_))));
}

#[tokio::test]
async fn test_attach_registers_prefixed_remote_tools() {
    let client = client(Arc::new(FakeServer::default()));

    let (builder, names) = attach(Registry::builder(), client, Some("fake")).await.unwrap();
    let registry = builder.build();

    assert_eq!(names, vec!["fake_lookup"]);
    let spec = registry.resolve("fake_lookup").unwrap();
    assert_eq!(spec.kind(), ToolKind::Remote);
    assert!(spec.validate(&json!({})).is_err());

    let ok = spec
        .execute(json!({ "query": "docs" }), &ToolContext::detached())
        .await
        .unwrap();
    assert!(!ok.is_error);
    assert_eq!(ok.content, "found docs");
    assert_eq!(ok.metadata["server"], "fake");

    let failed = spec
        .execute(json!({ "query": "fail" }), &ToolContext::detached())
        .await
        .unwrap();
    assert!(failed.is_error);
}

#[tokio::test]
async fn test_remote_transport_failure_is_execution_error() {
    let server = Arc::new(FakeServer {
        hang: true,
        ..FakeServer::default()
    });
    let client = Arc::new(McpClient::with_transport("slow", server).timeout(Duration::from_millis(10)));
    let info = McpToolInfo {
        name: "lookup".into(),
        description: String::new(),
        input_schema: json!({ "type": "object" }),
    };
    let tool = RemoteTool::new(client, info, None);

    let err = crate::tool::Tool::execute(&tool, json!({}), &ToolContext::detached())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Execution(_)));
}
