// ABOUTME: AgentSpec - the immutable description of an agent - and AgentCatalog,
// ABOUTME: the name-keyed table of specs frozen at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ConfigError;

/// Default step budget for an agent.
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Static description of an agent's capabilities and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    /// Unique agent name; also the name of the tool that invokes it.
    pub name: String,

    /// Shown to managing agents when they choose whom to call.
    pub description: String,

    /// Instruction template rendered into the system prompt.
    pub instructions: String,

    /// Tools this agent may call.
    pub tools: Vec<String>,

    /// Agents this agent may invoke.
    pub managed_agents: Vec<String>,

    /// Maximum number of steps per run.
    pub max_steps: usize,

    /// Model identifier passed to the backend.
    pub model: String,
}

impl AgentSpec {
    /// Create a spec with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Delegates a task to the {} agent.", name),
            name,
            instructions: String::new(),
            tools: Vec::new(),
            managed_agents: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            model: model.into(),
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the instruction template.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Set the callable tools.
    pub fn tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the managed agents.
    pub fn managed_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.managed_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Set the step budget.
    pub fn max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    /// Whether this agent may invoke `agent`.
    pub fn manages(&self, agent: &str) -> bool {
        self.managed_agents.iter().any(|a| a == agent)
    }
}

/// Immutable name→spec table.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: Arc<HashMap<String, Arc<AgentSpec>>>,
}

impl AgentCatalog {
    /// Build a catalog, rejecting duplicate names, unknown or self-managed
    /// agents, zero budgets, and cycles in the management graph.
    pub fn new(specs: impl IntoIterator<Item = AgentSpec>) -> Result<Self, ConfigError> {
        let mut agents = HashMap::new();
        for spec in specs {
            if spec.max_steps == 0 {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' has a step budget of zero",
                    spec.name
                )));
            }
            if spec.manages(&spec.name) {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' cannot manage itself",
                    spec.name
                )));
            }
            if agents.contains_key(&spec.name) {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' defined twice",
                    spec.name
                )));
            }
            agents.insert(spec.name.clone(), Arc::new(spec));
        }

        for spec in agents.values() {
            for managed in &spec.managed_agents {
                if !agents.contains_key(managed) {
                    return Err(ConfigError::Invalid(format!(
                        "agent '{}' manages unknown agent '{}'",
                        spec.name, managed
                    )));
                }
            }
        }

        let catalog = Self {
            agents: Arc::new(agents),
        };
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    fn check_acyclic(&self) -> Result<(), ConfigError> {
        fn visit<'a>(
            catalog: &'a AgentCatalog,
            name: &'a str,
            path: &mut Vec<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> Result<(), ConfigError> {
            if done.contains(name) {
                return Ok(());
            }
            if path.contains(&name) {
                path.push(name);
                return Err(ConfigError::Invalid(format!(
                    "managed agents form a cycle: {}",
                    path.join(" -> ")
                )));
            }
            path.push(name);
            if let Some(spec) = catalog.agents.get(name) {
                for managed in &spec.managed_agents {
                    visit(catalog, managed, path, done)?;
                }
            }
            path.pop();
            done.insert(name);
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.agents.keys() {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<Arc<AgentSpec>> {
        self.agents.get(name).cloned()
    }

    /// All agent names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over all specs.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentSpec>> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
