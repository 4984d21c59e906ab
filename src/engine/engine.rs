// ABOUTME: StepEngine - drives one agent's bounded decide/act loop, appending
// ABOUTME: steps to its RunState and publishing every transition on the bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::context::build_history;
use super::prompt::render_system_prompt;
use super::{ErrorClass, RunOutcome, RunState, RunStatus, Step, StepPayload};
use crate::bus::{BusEvent, ObservabilityBus};
use crate::dispatch::AgentSpec;
use crate::error::{FailureReason, ToolError};
use crate::model::{Decision, DecisionRequest, ModelBackend, RetryPolicy};
use crate::tool::{Registry, ToolAccess, ToolContext, ToolKind, ToolResult, Toolbox, truncate_chars};

/// Longest partial answer salvaged from a failed run.
const PARTIAL_ANSWER_CHARS: usize = 2000;

/// Tunables shared by every run an engine drives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consecutive invalid or timed-out tool calls before the run fails.
    pub max_validation_failures: usize,
    pub retry: RetryPolicy,
    /// Character budget for the rendered history.
    pub context_char_budget: usize,
    /// Timeout for local and remote tools.
    pub tool_timeout: Duration,
    /// Timeout for nested agent calls; none by default, the child's budget bounds it.
    pub agent_call_timeout: Option<Duration>,
    /// Wall-clock ceiling for a whole run.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_validation_failures: 3,
            retry: RetryPolicy::default(),
            context_char_budget: 48_000,
            tool_timeout: Duration::from_secs(120),
            agent_call_timeout: None,
            run_timeout: None,
        }
    }
}

/// Everything needed to start one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub spec: Arc<AgentSpec>,
    pub task: String,
    pub parent_run_id: Option<String>,
    /// Effective budget, possibly lower than the agent's own.
    pub max_steps: usize,
    pub cancel: CancellationToken,
}

impl RunRequest {
    /// A top-level run with a fresh id and the agent's own budget.
    pub fn new(spec: Arc<AgentSpec>, task: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            max_steps: spec.max_steps,
            spec,
            task: task.into(),
            parent_run_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn parent(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The pending state this run starts from.
    pub fn initial_state(&self) -> RunState {
        RunState::new(
            self.run_id.clone(),
            self.spec.name.clone(),
            self.task.clone(),
            self.parent_run_id.clone(),
            self.max_steps,
        )
    }
}

/// Drives runs. Cheap to share; holds no per-run state.
pub struct StepEngine {
    backend: Arc<dyn ModelBackend>,
    registry: Registry,
    bus: ObservabilityBus,
    config: EngineConfig,
}

impl StepEngine {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Registry,
        bus: ObservabilityBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            bus,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bus(&self) -> &ObservabilityBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run an agent on a task to completion, returning the outcome and the
    /// final state.
    pub async fn execute(
        &self,
        spec: Arc<AgentSpec>,
        task: impl Into<String>,
        parent_run_id: Option<String>,
    ) -> (RunOutcome, RunState) {
        let mut request = RunRequest::new(spec, task);
        request.parent_run_id = parent_run_id;
        let (tx, rx) = watch::channel(request.initial_state());
        let outcome = self.run(request, tx).await;
        let state = rx.borrow().clone();
        (outcome, state)
    }

    /// Drive `request` to a terminal status. `state` is the only writer of the
    /// run's state; observers hold receivers.
    pub async fn run(&self, request: RunRequest, state: watch::Sender<RunState>) -> RunOutcome {
        let toolbox = Toolbox::new(
            self.registry.clone(),
            request.spec.tools.clone(),
            request.spec.managed_agents.clone(),
        );
        let mut run = ActiveRun {
            engine: self,
            toolbox,
            request,
            state,
            step_count: 0,
            consecutive_failures: 0,
            last_success: None,
        };
        run.start();

        let started = Instant::now();
        let finish = match self.config.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, run.drive()).await {
                Ok(finish) => finish,
                Err(_) => Finish::Failed(
                    FailureReason::WallClockExceeded {
                        after_ms: started.elapsed().as_millis() as u64,
                    },
                    run.partial_answer(),
                ),
            },
            None => run.drive().await,
        };

        run.finalize(finish)
    }
}

impl std::fmt::Debug for StepEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// How a run ended.
#[derive(Debug)]
enum Finish {
    Succeeded(String),
    Failed(FailureReason, Option<String>),
    Cancelled,
}

/// Per-run mutable state, owned by the task driving the run.
struct ActiveRun<'a> {
    engine: &'a StepEngine,
    toolbox: Toolbox,
    request: RunRequest,
    state: watch::Sender<RunState>,
    step_count: usize,
    consecutive_failures: usize,
    last_success: Option<String>,
}

impl ActiveRun<'_> {
    fn run_id(&self) -> &str {
        &self.request.run_id
    }

    fn agent(&self) -> &str {
        &self.request.spec.name
    }

    fn start(&mut self) {
        self.state.send_modify(|s| s.status = RunStatus::Running);
        let now = Utc::now();
        self.engine.bus.publish(BusEvent::RunStarted {
            run_id: self.request.run_id.clone(),
            agent: self.request.spec.name.clone(),
            parent_run_id: self.request.parent_run_id.clone(),
            task: self.request.task.clone(),
            max_steps: self.request.max_steps,
            timestamp: now,
        });
        self.engine.bus.publish(BusEvent::StatusChanged {
            run_id: self.request.run_id.clone(),
            agent: self.request.spec.name.clone(),
            status: RunStatus::Running,
            reason: None,
            timestamp: now,
        });
        tracing::debug!(
            run_id = %self.run_id(),
            agent = %self.agent(),
            max_steps = self.request.max_steps,
            parent = ?self.request.parent_run_id,
            "run started"
        );
    }

    async fn drive(&mut self) -> Finish {
        let max_steps = self.request.max_steps;
        loop {
            if self.request.cancel.is_cancelled() {
                return Finish::Cancelled;
            }

            let engine = self.engine;
            let decision_request = self.decision_request();
            let cancel = self.request.cancel.clone();
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Finish::Cancelled,
                decision = engine.config.retry.run(|| engine.backend.decide(&decision_request)) => decision,
            };

            let finish = match decision {
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id(), agent = %self.agent(), error = %e, "model backend failed");
                    self.append(StepPayload::Error {
                        class: ErrorClass::Model,
                        message: e.to_string(),
                        call_id: None,
                    });
                    None
                }
                Ok(Decision::FinalAnswer { text }) => {
                    self.append(StepPayload::ModelDecision {
                        decision: Decision::FinalAnswer { text: text.clone() },
                    });
                    Some(Finish::Succeeded(text))
                }
                Ok(Decision::ToolCall { id, name, args }) => {
                    self.append(StepPayload::ModelDecision {
                        decision: Decision::ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            args: args.clone(),
                        },
                    });
                    self.call_tool(id, name, args).await
                }
            };

            self.step_count += 1;
            let count = self.step_count;
            self.state.send_modify(|s| s.step_count = count);

            if let Some(finish) = finish {
                return finish;
            }
            if self.step_count >= max_steps {
                return Finish::Failed(
                    FailureReason::StepBudgetExhausted { max_steps },
                    self.partial_answer(),
                );
            }
        }
    }

    fn decision_request(&self) -> DecisionRequest {
        let history = {
            let state = self.state.borrow();
            build_history(
                &self.request.task,
                &state.steps,
                self.engine.config.context_char_budget,
            )
        };
        DecisionRequest {
            model: self.request.spec.model.clone(),
            system: render_system_prompt(&self.request.spec, &self.request.task, &self.toolbox),
            history,
            tools: self.toolbox.definitions(),
        }
    }

    /// Resolve, authorize, validate and execute one tool call. Returns a
    /// finish only when the call ends the run.
    async fn call_tool(&mut self, call_id: String, name: String, args: Value) -> Option<Finish> {
        let spec = match self.toolbox.check(&name) {
            ToolAccess::Callable(spec) => spec,
            ToolAccess::Unauthorized(_) => {
                let caller = self.request.spec.name.clone();
                return self.fail_unauthorized(call_id, caller, name);
            }
            ToolAccess::NotDeclared(_) => {
                self.append(StepPayload::Error {
                    class: ErrorClass::NotAvailable,
                    message: ToolError::NotAvailable(name).to_string(),
                    call_id: Some(call_id),
                });
                return None;
            }
            ToolAccess::Unknown => {
                let available: Vec<&str> = self.toolbox.visible().collect();
                let message = format!(
                    "Unknown tool '{}'. Available tools: {}",
                    name,
                    available.join(", ")
                );
                self.append(StepPayload::Error {
                    class: ErrorClass::UnknownTool,
                    message,
                    call_id: Some(call_id),
                });
                return None;
            }
        };

        if let Err(e) = spec.validate(&args) {
            tracing::warn!(run_id = %self.run_id(), tool = %name, error = %e, "invalid tool arguments");
            self.append(StepPayload::Error {
                class: ErrorClass::Validation,
                message: e.to_string(),
                call_id: Some(call_id),
            });
            return self.count_failure();
        }

        self.append(StepPayload::ToolCall {
            call_id: call_id.clone(),
            tool: name.clone(),
            args: args.clone(),
        });

        let timeout = match spec.kind() {
            ToolKind::AgentProxy => self.engine.config.agent_call_timeout,
            ToolKind::Local | ToolKind::Remote => Some(self.engine.config.tool_timeout),
        };
        let ctx = ToolContext {
            run_id: self.request.run_id.clone(),
            agent: self.request.spec.name.clone(),
            cancel: self.request.cancel.clone(),
            timeout,
            remaining_steps: self.request.max_steps.saturating_sub(self.step_count),
        };

        match spec.execute(args, &ctx).await {
            Ok(result) => {
                if !result.is_error {
                    self.last_success = Some(result.content.clone());
                    self.consecutive_failures = 0;
                }
                self.append(StepPayload::ToolResult {
                    call_id,
                    tool: name,
                    result,
                });
                None
            }
            Err(ToolError::Unauthorized { caller, target }) => {
                self.fail_unauthorized(call_id, caller, target)
            }
            Err(ToolError::Cancelled) if self.request.cancel.is_cancelled() => {
                self.append(StepPayload::Error {
                    class: ErrorClass::Terminal,
                    message: ToolError::Cancelled.to_string(),
                    call_id: Some(call_id),
                });
                Some(Finish::Cancelled)
            }
            Err(e @ ToolError::Timeout { .. }) => {
                tracing::warn!(run_id = %self.run_id(), tool = %name, error = %e, "tool timed out");
                self.append(StepPayload::ToolResult {
                    call_id,
                    tool: name,
                    result: ToolResult::error(e.to_string()),
                });
                self.count_failure()
            }
            Err(e) => {
                tracing::debug!(run_id = %self.run_id(), tool = %name, error = %e, "tool failed");
                self.append(StepPayload::ToolResult {
                    call_id,
                    tool: name,
                    result: ToolResult::error(e.to_string()),
                });
                None
            }
        }
    }

    fn fail_unauthorized(&mut self, call_id: String, caller: String, target: String) -> Option<Finish> {
        tracing::warn!(run_id = %self.run_id(), caller = %caller, callee = %target, "unauthorized agent call");
        let reason = FailureReason::Unauthorized { caller, target };
        self.append(StepPayload::Error {
            class: ErrorClass::Terminal,
            message: reason.to_string(),
            call_id: Some(call_id),
        });
        Some(Finish::Failed(reason, self.partial_answer()))
    }

    fn count_failure(&mut self) -> Option<Finish> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.engine.config.max_validation_failures {
            Some(Finish::Failed(
                FailureReason::TooManyValidationFailures {
                    count: self.consecutive_failures,
                },
                self.partial_answer(),
            ))
        } else {
            None
        }
    }

    fn partial_answer(&self) -> Option<String> {
        self.last_success
            .as_deref()
            .map(|text| truncate_chars(text, PARTIAL_ANSWER_CHARS))
    }

    fn append(&mut self, payload: StepPayload) {
        let round = self.step_count;
        let mut appended = None;
        self.state.send_modify(|s| {
            let step = Step {
                index: s.steps.len(),
                round,
                payload,
                timestamp: Utc::now(),
            };
            s.steps.push(step.clone());
            appended = Some(step);
        });

        if let Some(step) = appended {
            tracing::debug!(
                run_id = %self.run_id(),
                agent = %self.agent(),
                step = step.index,
                "{}",
                step.summary()
            );
            self.engine.bus.publish(BusEvent::Step {
                run_id: self.request.run_id.clone(),
                agent: self.request.spec.name.clone(),
                step,
            });
        }
    }

    fn finalize(self, finish: Finish) -> RunOutcome {
        let (status, answer, failure, partial) = match finish {
            Finish::Succeeded(answer) => (RunStatus::Succeeded, Some(answer), None, None),
            Finish::Failed(reason, partial) => (RunStatus::Failed, None, Some(reason), partial),
            Finish::Cancelled => (
                RunStatus::Cancelled,
                None,
                Some(FailureReason::Cancelled),
                self.partial_answer(),
            ),
        };

        let reason = failure.clone();
        self.state.send_modify(|s| {
            s.status = status;
            s.final_answer = answer;
            s.failure = failure;
            s.partial_answer = partial;
            s.finished_at = Some(Utc::now());
        });

        self.engine.bus.publish(BusEvent::StatusChanged {
            run_id: self.request.run_id.clone(),
            agent: self.request.spec.name.clone(),
            status,
            reason: reason.clone(),
            timestamp: Utc::now(),
        });

        match &reason {
            None => tracing::info!(
                run_id = %self.run_id(),
                agent = %self.agent(),
                steps = self.step_count,
                "run succeeded"
            ),
            Some(reason) => tracing::info!(
                run_id = %self.run_id(),
                agent = %self.agent(),
                steps = self.step_count,
                %status,
                %reason,
                "run finished without an answer"
            ),
        }

        self.state.borrow().outcome()
    }
}
