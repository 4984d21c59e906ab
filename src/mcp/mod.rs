// ABOUTME: MCP module - stdio client for Model Context Protocol tool servers
// ABOUTME: and the RemoteTool that exposes their tools to agents.

mod client;
mod remote;
mod transport;
mod types;

pub use client::*;
pub use remote::*;
pub use transport::*;
pub use types::*;

#[cfg(test)]
mod client_test;
