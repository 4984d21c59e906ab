// ABOUTME: Configuration schema for canopy.toml - engine, sandbox, bus, model,
// ABOUTME: agent roster, and MCP server sections, each with defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mcp::McpServerConfig;
use crate::sandbox::BASE_AUTHORIZED_IMPORTS;

/// The whole configuration file. Every section is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanopyConfig {
    pub engine: EngineSection,
    pub sandbox: SandboxSection,
    pub bus: BusSection,
    pub model: ModelSection,
    /// Replaces the built-in roster when present.
    pub agents: BTreeMap<String, AgentSection>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            sandbox: SandboxSection::default(),
            bus: BusSection::default(),
            model: ModelSection::default(),
            agents: super::default_roster(),
            mcp_servers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub max_validation_failures: usize,
    pub model_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub context_char_budget: usize,
    pub tool_timeout_secs: u64,
    pub agent_call_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub max_depth: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_validation_failures: 3,
            model_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5000,
            context_char_budget: 48_000,
            tool_timeout_secs: 120,
            agent_call_timeout_secs: None,
            run_timeout_secs: None,
            max_depth: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    /// `sh` selects the shell interpreter; anything else is a Python program.
    pub interpreter: String,
    /// Imports allowed on top of the base list.
    pub authorized_imports: Vec<String>,
    /// Ids of block rules to lift, e.g. `open`.
    pub allowed_rules: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Address-space ceiling; 0 disables it.
    pub max_memory_mb: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            authorized_imports: Vec::new(),
            allowed_rules: Vec::new(),
            timeout_secs: 30,
            max_output_bytes: 64 * 1024,
            max_memory_mb: 512,
        }
    }
}

impl SandboxSection {
    /// Every module the sandbox will accept.
    pub fn all_imports(&self) -> Vec<String> {
        BASE_AUTHORIZED_IMPORTS
            .iter()
            .map(|s| s.to_string())
            .chain(self.authorized_imports.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSection {
    /// Per-subscriber queue bound.
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            capacity: crate::bus::DEFAULT_BUS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Used by agents that do not name a model.
    pub default_model: String,
    pub request_timeout_secs: u64,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: crate::model::OPENAI_BASE_URL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_model: "gpt-4.1".to_string(),
            request_timeout_secs: 120,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// One `[agents.<name>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub model: Option<String>,
    pub description: String,
    pub instructions: String,
    pub max_steps: usize,
    pub tools: Vec<String>,
    pub managed_agents: Vec<String>,
    /// Remote tools, by registered name, this agent may call.
    pub mcp_tools: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: None,
            description: "A multi-step agent that can perform various tasks.".to_string(),
            instructions: String::new(),
            max_steps: crate::dispatch::DEFAULT_MAX_STEPS,
            tools: Vec::new(),
            managed_agents: Vec::new(),
            mcp_tools: Vec::new(),
        }
    }
}
