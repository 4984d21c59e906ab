// ABOUTME: Configuration loading and validation, plus builders that turn a
// ABOUTME: CanopyConfig into the catalog, engine, sandbox, and bus it describes.

mod schema;

pub use schema::*;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::ObservabilityBus;
use crate::dispatch::{AgentCatalog, AgentSpec, DispatcherConfig};
use crate::engine::EngineConfig;
use crate::error::{ConfigError, ModelError};
use crate::mcp::McpServerConfig;
use crate::model::{LlmBackend, OpenAIClient, RetryPolicy};
use crate::sandbox::{CodeTool, ExecutionLimits, Interpreter, SandboxPolicy, SandboxedExecutor};
use crate::tool::RegistryBuilder;
use crate::tools::PlanningTool;

/// Names of the built-in local tools.
pub const LOCAL_TOOLS: &[&str] = &["python_interpreter", "planning"];

/// The agent roster used when the file defines none.
pub fn default_roster() -> BTreeMap<String, AgentSection> {
    let worker = |description: &str| AgentSection {
        description: description.to_string(),
        max_steps: 3,
        tools: vec!["python_interpreter".to_string()],
        ..AgentSection::default()
    };

    BTreeMap::from([
        (
            "planning_agent".to_string(),
            AgentSection {
                description: "A planning agent that can plan the steps to complete the task."
                    .to_string(),
                max_steps: 20,
                tools: vec!["planning".to_string()],
                managed_agents: vec![
                    "deep_analyzer_agent".to_string(),
                    "browser_use_agent".to_string(),
                    "deep_researcher_agent".to_string(),
                ],
                ..AgentSection::default()
            },
        ),
        (
            "deep_analyzer_agent".to_string(),
            worker("A team member that performs systematic, step-by-step analysis of a given task, optionally using attached files or URIs."),
        ),
        (
            "browser_use_agent".to_string(),
            worker("A team member that searches relevant web pages and interacts with them to find answers to specific queries."),
        ),
        (
            "deep_researcher_agent".to_string(),
            worker("A team member that conducts extensive web searches to complete tasks, gathering insights from many sources."),
        ),
        (
            "general_agent".to_string(),
            AgentSection {
                tools: vec!["python_interpreter".to_string()],
                ..AgentSection::default()
            },
        ),
    ])
}

impl CanopyConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::info!(path = %path.display(), agents = config.agents.len(), "loaded config");
        Ok(config)
    }

    /// Read `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::Invalid("no agents configured".into()));
        }
        if self.bus.capacity == 0 {
            return Err(ConfigError::Invalid("bus capacity must be positive".into()));
        }
        for (name, agent) in &self.agents {
            if let Some(tool) = agent
                .tools
                .iter()
                .find(|t| !LOCAL_TOOLS.contains(&t.as_str()))
            {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' declares unknown tool '{}' (remote tools go in mcp_tools)",
                    name, tool
                )));
            }
        }
        // Management graph checks live with the catalog.
        self.agent_catalog().map(|_| ())
    }

    /// Apply a model override to every agent.
    pub fn override_model(&mut self, model: &str) {
        self.model.default_model = model.to_string();
        for agent in self.agents.values_mut() {
            agent.model = Some(model.to_string());
        }
    }

    /// Build the immutable agent catalog.
    pub fn agent_catalog(&self) -> Result<AgentCatalog, ConfigError> {
        AgentCatalog::new(self.agents.iter().map(|(name, agent)| {
            AgentSpec::new(
                name.clone(),
                agent
                    .model
                    .clone()
                    .unwrap_or_else(|| self.model.default_model.clone()),
            )
            .description(agent.description.clone())
            .instructions(agent.instructions.clone())
            .tools(agent.tools.iter().chain(agent.mcp_tools.iter()).cloned())
            .managed_agents(agent.managed_agents.iter().cloned())
            .max_steps(agent.max_steps)
        }))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            max_validation_failures: e.max_validation_failures.max(1),
            retry: RetryPolicy {
                max_retries: e.model_retries,
                base_delay: Duration::from_millis(e.retry_base_delay_ms),
                max_delay: Duration::from_millis(e.retry_max_delay_ms),
            },
            context_char_budget: e.context_char_budget,
            tool_timeout: Duration::from_secs(e.tool_timeout_secs),
            agent_call_timeout: e.agent_call_timeout_secs.map(Duration::from_secs),
            run_timeout: e.run_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_depth: self.engine.max_depth,
            engine: self.engine_config(),
        }
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        let s = &self.sandbox;
        ExecutionLimits {
            timeout: Duration::from_secs(s.timeout_secs),
            max_output_bytes: s.max_output_bytes,
            max_memory_bytes: (s.max_memory_mb > 0).then(|| s.max_memory_mb * 1024 * 1024),
        }
    }

    /// The sandboxed code tool, registered as `python_interpreter` whichever
    /// interpreter backs it.
    pub fn code_tool(&self) -> Result<CodeTool, ConfigError> {
        let s = &self.sandbox;
        let invalid = |e: regex::Error| ConfigError::Invalid(format!("sandbox policy: {}", e));
        let executor = if s.interpreter == "sh" {
            SandboxedExecutor::new(
                Interpreter::Shell,
                SandboxPolicy::shell(&s.allowed_rules).map_err(invalid)?,
            )
        } else {
            SandboxedExecutor::new(
                Interpreter::Python {
                    program: s.interpreter.clone(),
                },
                SandboxPolicy::python(&s.authorized_imports, &s.allowed_rules).map_err(invalid)?,
            )
        };
        Ok(CodeTool::new(executor, self.execution_limits()).named("python_interpreter"))
    }

    /// MCP server configs with names filled in from their table keys.
    pub fn mcp_servers(&self) -> Vec<McpServerConfig> {
        self.mcp_servers
            .iter()
            .map(|(name, server)| McpServerConfig {
                name: name.clone(),
                ..server.clone()
            })
            .collect()
    }

    pub fn bus(&self) -> ObservabilityBus {
        ObservabilityBus::new(self.bus.capacity)
    }

    /// An OpenAI-compatible backend reading its key from `api_key_env`.
    pub fn model_backend(&self) -> Result<LlmBackend, ModelError> {
        let m = &self.model;
        let client = OpenAIClient::from_env(&m.api_key_env)?
            .base_url(m.base_url.clone())
            .timeout(Duration::from_secs(m.request_timeout_secs));
        let mut backend = LlmBackend::new(Arc::new(client));
        if let Some(max_tokens) = m.max_tokens {
            backend = backend.max_tokens(max_tokens);
        }
        if let Some(temperature) = m.temperature {
            backend = backend.temperature(temperature);
        }
        Ok(backend)
    }

    /// A registry builder holding every built-in local tool.
    pub fn local_tools(&self) -> Result<RegistryBuilder, ConfigError> {
        let duplicate = |e: crate::error::ToolError| ConfigError::Invalid(e.to_string());
        RegistryBuilder::new()
            .register(self.code_tool()?)
            .map_err(duplicate)?
            .register(PlanningTool::new())
            .map_err(duplicate)
    }
}

#[cfg(test)]
mod config_test;
