// ABOUTME: Shared fixtures for integration tests - a scripted model backend,
// ABOUTME: simple local tools, and helpers that assemble a dispatcher.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canopy::prelude::*;
use canopy::model::ContentBlock;
use serde_json::{Value, json};

type Reply = Box<dyn Fn(&DecisionRequest) -> Decision + Send + Sync>;

/// A backend that plays a per-model script. Each agent in these tests uses its
/// own name as its model id. An exhausted script falls back to `fallback`.
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Option<Decision>,
    seen: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Queue a fixed decision for `model`.
    pub fn then(self, model: &str, decision: Decision) -> Self {
        self.respond(model, move |_| decision.clone())
    }

    /// Queue a decision computed from the request.
    pub fn respond(
        self,
        model: &str,
        reply: impl Fn(&DecisionRequest) -> Decision + Send + Sync + 'static,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Box::new(reply));
        self
    }

    /// Decision repeated once a model's script runs out.
    pub fn fallback(mut self, decision: Decision) -> Self {
        self.fallback = Some(decision);
        self
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn decide(&self, req: &DecisionRequest) -> Result<Decision, ModelError> {
        self.seen.lock().unwrap().push(req.clone());
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&req.model)
            .and_then(VecDeque::pop_front);
        Ok(match (reply, &self.fallback) {
            (Some(reply), _) => match reply(req) {
                Decision::ToolCall { name, args, .. } => Decision::tool_call(name, args),
                other => other,
            },
            (None, Some(fallback)) => match fallback {
                Decision::ToolCall { name, args, .. } => Decision::tool_call(name.clone(), args.clone()),
                other => other.clone(),
            },
            (None, None) => Decision::final_answer(format!("{} done", req.model)),
        })
    }
}

/// Content of the most recent tool result in the history.
pub fn last_tool_result(req: &DecisionRequest) -> Option<(String, bool)> {
    req.history.iter().rev().find_map(|message| {
        message.content.iter().rev().find_map(|block| match block {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
    })
}

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo" }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let text = params["text"].as_str().unwrap_or_default();
        Ok(ToolResult::text(text))
    }
}

/// Sleeps far longer than any test waits.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Blocks for a minute"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ToolResult::text("awake"))
    }
}

/// A shell-backed code tool registered as `python_interpreter`.
pub fn shell_code_tool(timeout: Duration) -> CodeTool {
    let executor = SandboxedExecutor::new(
        Interpreter::Shell,
        SandboxPolicy::shell(&[]).unwrap(),
    );
    let limits = ExecutionLimits {
        timeout,
        max_output_bytes: 64 * 1024,
        max_memory_bytes: None,
    };
    CodeTool::new(executor, limits).named("python_interpreter")
}

pub fn agent(name: &str) -> AgentSpec {
    AgentSpec::new(name, name)
}

pub fn call(agent: &str, task: &str) -> Decision {
    Decision::tool_call(agent, json!({ "task": task }))
}

pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        max_depth: 4,
        engine: EngineConfig {
            retry: RetryPolicy::none(),
            ..EngineConfig::default()
        },
    }
}

/// Dispatcher with `echo`, `sleep`, and a shell `python_interpreter`.
pub fn dispatcher(specs: Vec<AgentSpec>, backend: ScriptedBackend) -> Arc<Dispatcher> {
    dispatcher_on(specs, Arc::new(backend), ObservabilityBus::default())
}

pub fn dispatcher_on(
    specs: Vec<AgentSpec>,
    backend: Arc<ScriptedBackend>,
    bus: ObservabilityBus,
) -> Arc<Dispatcher> {
    let tools = Registry::builder()
        .register(EchoTool)
        .unwrap()
        .register(SleepTool)
        .unwrap()
        .register(shell_code_tool(Duration::from_secs(10)))
        .unwrap();
    Dispatcher::new(AgentCatalog::new(specs).unwrap(), tools, backend, bus, fast_config()).unwrap()
}

pub async fn wait_for_runs(dispatcher: &Dispatcher, count: usize) {
    for _ in 0..500 {
        if dispatcher.run_ids().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} runs, saw {}", count, dispatcher.run_ids().len());
}
