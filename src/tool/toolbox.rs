// ABOUTME: Toolbox - one agent's view of the shared Registry, restricted to
// ABOUTME: its declared tools plus the agents it is allowed to manage.

use std::sync::Arc;

use super::{Registry, ToolKind, ToolSpec};
use crate::model::ToolDefinition;

/// How a requested tool name relates to an agent's toolbox.
#[derive(Debug, Clone)]
pub enum ToolAccess {
    /// The agent may call it.
    Callable(Arc<ToolSpec>),
    /// An agent proxy for an agent this toolbox's owner does not manage.
    Unauthorized(Arc<ToolSpec>),
    /// The tool exists but the agent did not declare it.
    NotDeclared(Arc<ToolSpec>),
    /// No tool by that name exists.
    Unknown,
}

/// A filtered view of a Registry for a single agent.
#[derive(Debug, Clone)]
pub struct Toolbox {
    source: Registry,
    tools: Vec<String>,
    managed_agents: Vec<String>,
}

impl Toolbox {
    /// Create a toolbox over `source`.
    pub fn new(source: Registry, tools: Vec<String>, managed_agents: Vec<String>) -> Self {
        Self {
            source,
            tools,
            managed_agents,
        }
    }

    /// Classify a requested tool name.
    pub fn check(&self, name: &str) -> ToolAccess {
        match self.source.get(name) {
            None => ToolAccess::Unknown,
            Some(spec) if spec.kind() == ToolKind::AgentProxy => {
                if self.managed_agents.iter().any(|a| a == name) {
                    ToolAccess::Callable(spec)
                } else {
                    ToolAccess::Unauthorized(spec)
                }
            }
            Some(spec) if self.tools.iter().any(|t| t == name) => ToolAccess::Callable(spec),
            Some(spec) => ToolAccess::NotDeclared(spec),
        }
    }

    /// Names visible to the model: declared tools then managed agents.
    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.tools
            .iter()
            .chain(self.managed_agents.iter())
            .map(String::as_str)
    }

    /// Definitions for every visible tool that exists in the registry.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.source.definitions(self.visible())
    }

    /// Managed agents with their descriptions, for prompt rendering.
    pub fn managed_agent_lines(&self) -> Vec<String> {
        self.managed_agents
            .iter()
            .filter_map(|n| self.source.get(n))
            .map(|s| format!("- {}: {}", s.name(), s.description()))
            .collect()
    }

    /// Declared tools with their descriptions, for prompt rendering.
    pub fn tool_lines(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter_map(|n| self.source.get(n))
            .map(|s| format!("- {}: {}", s.name(), s.description()))
            .collect()
    }
}
