// ABOUTME: Implements the Registry - an immutable, lock-free table of tool specs
// ABOUTME: frozen at startup by a RegistryBuilder and shared across all runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{ParamSchema, Tool, ToolContext, ToolKind, ToolResult};
use crate::error::{SchemaError, ToolError};
use crate::model::ToolDefinition;

/// A registered tool: its name, compiled parameter schema, and capability.
pub struct ToolSpec {
    name: String,
    description: String,
    kind: ToolKind,
    input_schema: Value,
    params: ParamSchema,
    capability: Arc<dyn Tool>,
}

impl ToolSpec {
    /// Build a spec from a tool, compiling its schema once.
    pub fn new(capability: Arc<dyn Tool>) -> Self {
        let input_schema = capability.schema();
        Self {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            kind: capability.kind(),
            params: ParamSchema::from_json(&input_schema),
            input_schema,
            capability,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn params(&self) -> &ParamSchema {
        &self.params
    }

    /// Validate arguments against this tool's schema.
    pub fn validate(&self, args: &Value) -> Result<(), SchemaError> {
        self.params.validate(&self.name, args)
    }

    /// The definition sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Execute the capability, bounded by the context's timeout and cancellation.
    pub async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let call = self.capability.execute(args, ctx);
        let bounded = async {
            match ctx.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout {
                        tool: self.name.clone(),
                        after: limit,
                    }),
                },
                None => call.await,
            }
        };

        // Agent proxies observe cancellation themselves so the nested run
        // can acknowledge before the call returns.
        if self.kind == ToolKind::AgentProxy {
            return bounded.await;
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            result = bounded => result,
        }
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// Collects tools before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    tools: HashMap<String, Arc<ToolSpec>>,
}

impl RegistryBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register<T: Tool + 'static>(self, tool: T) -> Result<Self, ToolError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a tool from an Arc. Names must be unique.
    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Result<Self, ToolError> {
        if self.tools.contains_key(tool.name()) {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        self.insert(tool);
        Ok(self)
    }

    /// Whether a tool with this name is already registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Insert without the uniqueness check; callers check `contains` first.
    pub(crate) fn insert(&mut self, tool: Arc<dyn Tool>) {
        let spec = ToolSpec::new(tool);
        self.tools.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Freeze into an immutable registry.
    pub fn build(self) -> Registry {
        Registry {
            tools: Arc::new(self.tools),
        }
    }
}

/// An immutable registry of tools, cheap to clone and safe to share.
#[derive(Clone, Default)]
pub struct Registry {
    tools: Arc<HashMap<String, Arc<ToolSpec>>>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve a tool by name. Repeated calls return the same spec.
    pub fn resolve(&self, name: &str) -> Result<Arc<ToolSpec>, ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Validate arguments for a resolved tool.
    pub fn validate(&self, spec: &ToolSpec, args: &Value) -> Result<(), SchemaError> {
        spec.validate(args)
    }

    /// List all tool names, sorted alphabetically.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all tools of one kind, sorted.
    pub fn list_kind(&self, kind: ToolKind) -> Vec<String> {
        let mut names: Vec<_> = self
            .tools
            .values()
            .filter(|t| t.kind == kind)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Model definitions for the named tools, skipping unknown names.
    pub fn definitions<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<ToolDefinition> {
        names
            .into_iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("tools", &self.list()).finish()
    }
}
