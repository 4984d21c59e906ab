// ABOUTME: Dispatcher - owns the agent catalog and the concurrent run table,
// ABOUTME: starts top-level and nested runs, and propagates cancellation down the tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{AgentCatalog, AgentProxyTool, AgentSpec};
use crate::bus::ObservabilityBus;
use crate::engine::{EngineConfig, RunOutcome, RunRequest, RunState, RunStatus, StepEngine};
use crate::error::{CanopyError, ConfigError, DispatchError, ToolError};
use crate::model::ModelBackend;
use crate::tool::{Registry, RegistryBuilder, ToolContext};

/// Default limit on how deeply runs may nest.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deepest allowed nesting; top-level runs have depth 0.
    pub max_depth: usize,
    pub engine: EngineConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            engine: EngineConfig::default(),
        }
    }
}

/// A nested run started on behalf of a calling run.
#[derive(Debug, Clone)]
pub struct ChildRun {
    pub run_id: String,
    pub cancel: CancellationToken,
}

struct RunEntry {
    agent: String,
    parent: Option<String>,
    depth: usize,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
    children: Vec<String>,
    handle: Option<JoinHandle<()>>,
}

/// One node of the run tree snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunNode {
    pub run_id: String,
    pub agent: String,
    pub parent_run_id: Option<String>,
    pub depth: usize,
    pub status: RunStatus,
    pub step_count: usize,
    pub max_steps: usize,
    pub started_at: DateTime<Utc>,
    pub children: Vec<RunNode>,
}

impl RunNode {
    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(RunNode::size).sum::<usize>()
    }
}

/// Starts, tracks and cancels runs.
pub struct Dispatcher {
    catalog: AgentCatalog,
    engine: StepEngine,
    runs: DashMap<String, RunEntry>,
    root: CancellationToken,
    max_depth: usize,
    shutting_down: AtomicBool,
}

impl Dispatcher {
    /// Build a dispatcher. Every catalog agent is registered in the final
    /// registry as an agent proxy tool named after the agent.
    pub fn new(
        catalog: AgentCatalog,
        tools: RegistryBuilder,
        backend: Arc<dyn ModelBackend>,
        bus: ObservabilityBus,
        config: DispatcherConfig,
    ) -> Result<Arc<Self>, CanopyError> {
        for name in catalog.names() {
            if tools.contains(&name) {
                return Err(ToolError::Duplicate(name).into());
            }
        }
        for spec in catalog.iter() {
            for tool in &spec.tools {
                if !tools.contains(tool) {
                    return Err(ConfigError::Invalid(format!(
                        "agent '{}' declares unknown tool '{}'",
                        spec.name, tool
                    ))
                    .into());
                }
            }
        }

        Ok(Arc::new_cyclic(|weak| {
            let mut tools = tools;
            for spec in catalog.iter() {
                tools.insert(Arc::new(AgentProxyTool::new(spec.clone(), weak.clone())));
            }
            let engine = StepEngine::new(backend, tools.build(), bus, config.engine);
            Self {
                catalog,
                engine,
                runs: DashMap::new(),
                root: CancellationToken::new(),
                max_depth: config.max_depth,
                shutting_down: AtomicBool::new(false),
            }
        }))
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Registry {
        self.engine.registry()
    }

    pub fn bus(&self) -> &ObservabilityBus {
        self.engine.bus()
    }

    /// Start a top-level run and return its id.
    pub fn submit(self: &Arc<Self>, agent: &str, task: impl Into<String>) -> Result<String, DispatchError> {
        let spec = self
            .catalog
            .get(agent)
            .ok_or_else(|| DispatchError::UnknownAgent(agent.to_string()))?;
        let max_steps = spec.max_steps;
        let child = self.start(spec, task.into(), None, 0, self.root.child_token(), max_steps)?;
        Ok(child.run_id)
    }

    /// Start a nested run of `target` for the run described by `ctx`.
    ///
    /// Fails with `Unauthorized` when the calling agent does not manage
    /// `target`; no run is started in that case.
    pub fn spawn_child(
        self: &Arc<Self>,
        ctx: &ToolContext,
        target: &str,
        task: String,
    ) -> Result<ChildRun, DispatchError> {
        let caller = self
            .catalog
            .get(&ctx.agent)
            .ok_or_else(|| DispatchError::UnknownAgent(ctx.agent.clone()))?;
        if !caller.manages(target) {
            tracing::warn!(run_id = %ctx.run_id, caller = %ctx.agent, callee = %target, "unauthorized agent call");
            return Err(DispatchError::Unauthorized {
                caller: ctx.agent.clone(),
                target: target.to_string(),
            });
        }
        let spec = self
            .catalog
            .get(target)
            .ok_or_else(|| DispatchError::UnknownAgent(target.to_string()))?;

        let depth = self.runs.get(&ctx.run_id).map(|e| e.depth).unwrap_or(0) + 1;
        if depth > self.max_depth {
            return Err(DispatchError::DepthExceeded(self.max_depth));
        }

        let max_steps = spec.max_steps.min(ctx.remaining_steps).max(1);
        self.start(
            spec,
            task,
            Some(ctx.run_id.clone()),
            depth,
            ctx.cancel.child_token(),
            max_steps,
        )
    }

    fn start(
        self: &Arc<Self>,
        spec: Arc<AgentSpec>,
        task: String,
        parent: Option<String>,
        depth: usize,
        cancel: CancellationToken,
        max_steps: usize,
    ) -> Result<ChildRun, DispatchError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }

        let mut request = RunRequest::new(spec, task)
            .max_steps(max_steps)
            .cancel(cancel.clone());
        request.parent_run_id = parent.clone();
        let run_id = request.run_id.clone();
        let agent = request.spec.name.clone();
        let (tx, rx) = watch::channel(request.initial_state());

        self.runs.insert(
            run_id.clone(),
            RunEntry {
                agent: agent.clone(),
                parent: parent.clone(),
                depth,
                started_at: Utc::now(),
                cancel: cancel.clone(),
                state: rx,
                children: Vec::new(),
                handle: None,
            },
        );
        if let Some(parent) = &parent {
            if let Some(mut entry) = self.runs.get_mut(parent) {
                entry.children.push(run_id.clone());
            }
        }

        tracing::debug!(run_id = %run_id, agent = %agent, depth, max_steps, "starting run");

        let this = Arc::clone(self);
        let span = tracing::info_span!("run", run_id = %run_id, agent = %agent);
        let handle = tokio::spawn(
            async move {
                this.engine.run(request, tx).await;
            }
            .instrument(span),
        );
        if let Some(mut entry) = self.runs.get_mut(&run_id) {
            entry.handle = Some(handle);
        }

        Ok(ChildRun { run_id, cancel })
    }

    /// Wait for a run to reach a terminal status.
    pub async fn await_run(&self, run_id: &str) -> Result<RunOutcome, DispatchError> {
        let mut state = self.receiver(run_id)?;
        state
            .wait_for(|s| s.status.is_terminal())
            .await
            .map(|s| s.outcome())
            .map_err(|_| DispatchError::Lost(run_id.to_string()))
    }

    /// Cancel a run and every run beneath it. Resolves once all of them are
    /// terminal, returning the ids that acknowledged, descendants first.
    pub async fn cancel(&self, run_id: &str) -> Result<Vec<String>, DispatchError> {
        let token = self
            .runs
            .get(run_id)
            .map(|e| e.cancel.clone())
            .ok_or_else(|| DispatchError::UnknownRun(run_id.to_string()))?;
        tracing::info!(run_id, "cancelling run tree");
        token.cancel();

        let mut acknowledged = Vec::new();
        for id in self.subtree(run_id) {
            match self.await_run(&id).await {
                Ok(_) | Err(DispatchError::Lost(_)) => acknowledged.push(id),
                Err(_) => {}
            }
        }
        Ok(acknowledged)
    }

    /// Current status of a run.
    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.get(run_id).map(|e| e.state.borrow().status)
    }

    /// A copy of a run's current state.
    pub fn snapshot(&self, run_id: &str) -> Option<RunState> {
        self.runs.get(run_id).map(|e| e.state.borrow().clone())
    }

    /// Watch a run's state as it changes.
    pub fn receiver(&self, run_id: &str) -> Result<watch::Receiver<RunState>, DispatchError> {
        self.runs
            .get(run_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| DispatchError::UnknownRun(run_id.to_string()))
    }

    /// Direct children of a run.
    pub fn children_of(&self, run_id: &str) -> Vec<String> {
        self.runs
            .get(run_id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    /// Parent of a run, if it is nested.
    pub fn parent_of(&self, run_id: &str) -> Option<String> {
        self.runs.get(run_id).and_then(|e| e.parent.clone())
    }

    /// Whether `run_id` is `ancestor` or nested anywhere beneath it.
    pub fn is_within(&self, run_id: &str, ancestor: &str) -> bool {
        let mut current = Some(run_id.to_string());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent_of(&id);
        }
        false
    }

    /// Snapshot of every tracked run, as a forest ordered by start time.
    pub fn tree(&self) -> Vec<RunNode> {
        let mut nodes: HashMap<String, (RunNode, Vec<String>)> = HashMap::new();
        for entry in self.runs.iter() {
            let state = entry.state.borrow();
            let node = RunNode {
                run_id: entry.key().clone(),
                agent: entry.agent.clone(),
                parent_run_id: entry.parent.clone(),
                depth: entry.depth,
                status: state.status,
                step_count: state.step_count,
                max_steps: state.max_steps,
                started_at: entry.started_at,
                children: Vec::new(),
            };
            nodes.insert(entry.key().clone(), (node, entry.children.clone()));
        }

        let mut roots: Vec<String> = nodes
            .values()
            .filter(|(node, _)| {
                node.parent_run_id
                    .as_ref()
                    .is_none_or(|parent| !nodes.contains_key(parent))
            })
            .map(|(node, _)| node.run_id.clone())
            .collect();
        roots.sort_by_key(|id| nodes[id].0.started_at);

        roots
            .iter()
            .filter_map(|id| assemble(id, &mut nodes))
            .collect()
    }

    /// Remove a terminal run and its descendants from the table. Returns the
    /// removed ids; a run that is still active is left in place.
    pub fn reap(&self, run_id: &str) -> Vec<String> {
        let ids = self.subtree(run_id);
        let all_terminal = ids
            .iter()
            .all(|id| self.status(id).is_none_or(|s| s.is_terminal()));
        if !all_terminal {
            return Vec::new();
        }

        if let Some(parent) = self.parent_of(run_id) {
            if let Some(mut entry) = self.runs.get_mut(&parent) {
                entry.children.retain(|c| c != run_id);
            }
        }
        let removed: Vec<String> = ids
            .into_iter()
            .filter(|id| self.runs.remove(id).is_some())
            .collect();
        tracing::debug!(run_id, removed = removed.len(), "reaped runs");
        removed
    }

    /// Ids of all tracked runs.
    pub fn run_ids(&self) -> Vec<String> {
        self.runs.iter().map(|e| e.key().clone()).collect()
    }

    /// Cancel every run and wait up to `grace` for their tasks to finish.
    /// Tasks still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.root.cancel();

        let mut handles: Vec<JoinHandle<()>> = self
            .runs
            .iter_mut()
            .filter_map(|mut e| e.handle.take())
            .collect();
        tracing::info!(runs = handles.len(), "shutting down dispatcher");

        let joined = tokio::time::timeout(grace, futures::future::join_all(handles.iter_mut())).await;
        if joined.is_err() {
            tracing::warn!(?grace, "runs did not stop within the grace period, aborting");
            for handle in &handles {
                handle.abort();
            }
        }
    }

    /// The run and all its descendants, descendants first.
    fn subtree(&self, run_id: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut stack = vec![(run_id.to_string(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                ordered.push(id);
                continue;
            }
            let children = self.children_of(&id);
            stack.push((id, true));
            stack.extend(children.into_iter().map(|c| (c, false)));
        }
        ordered
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("agents", &self.catalog.names())
            .field("runs", &self.runs.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

fn assemble(id: &str, nodes: &mut HashMap<String, (RunNode, Vec<String>)>) -> Option<RunNode> {
    let (mut node, children) = nodes.remove(id)?;
    node.children = children
        .iter()
        .filter_map(|child| assemble(child, nodes))
        .collect();
    Some(node)
}
