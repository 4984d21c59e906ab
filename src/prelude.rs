// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use canopy::prelude::*;` to get started quickly.

pub use crate::bus::{BusEvent, BusItem, ObservabilityBus, until_settled};
pub use crate::config::CanopyConfig;
pub use crate::dispatch::{AgentCatalog, AgentSpec, Dispatcher, DispatcherConfig, RunNode};
pub use crate::engine::{
    EngineConfig, ErrorClass, RunOutcome, RunRequest, RunState, RunStatus, Step, StepEngine, StepKind,
    StepPayload,
};
pub use crate::error::{
    CanopyError, ConfigError, DispatchError, FailureReason, McpError, ModelError, RunError,
    SandboxError, SchemaError, ToolError,
};
pub use crate::mcp::{McpClient, McpServerConfig, RemoteTool};
pub use crate::model::{
    Decision, DecisionRequest, LlmBackend, LlmClient, Message, ModelBackend, OpenAIClient,
    RetryPolicy, ToolDefinition,
};
pub use crate::monitor::{ClientCommand, MonitorSession, ServerMessage};
pub use crate::sandbox::{
    CodeTool, ExecutionLimits, ExecutionOutput, Interpreter, SandboxPolicy, SandboxedExecutor,
};
pub use crate::tool::{Registry, RegistryBuilder, Tool, ToolContext, ToolKind, ToolResult};
pub use crate::tools::PlanningTool;
