// ABOUTME: Tests for the monitoring session - command parsing, submission,
// ABOUTME: queries, ownership-checked cancellation, and event forwarding.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::*;
use crate::bus::{BusEvent, ObservabilityBus};
use crate::dispatch::{AgentCatalog, AgentSpec, Dispatcher, DispatcherConfig};
use crate::engine::{EngineConfig, RunStatus};
use crate::error::{ModelError, ToolError};
use crate::model::{Decision, DecisionRequest, ModelBackend, RetryPolicy};
use crate::tool::{Registry, Tool, ToolContext, ToolResult};

#[derive(Default)]
struct Scripts(Mutex<HashMap<String, VecDeque<Decision>>>);

impl Scripts {
    fn with(self, agent: &str, decisions: Vec<Decision>) -> Self {
        self.0
            .lock()
            .unwrap()
            .insert(agent.to_string(), decisions.into());
        self
    }
}

#[async_trait]
impl ModelBackend for Scripts {
    async fn decide(&self, req: &DecisionRequest) -> Result<Decision, ModelError> {
        let next = self
            .0
            .lock()
            .unwrap()
            .get_mut(&req.model)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(|| Decision::final_answer("done")))
    }
}

struct Nap;

#[async_trait]
impl Tool for Nap {
    fn name(&self) -> &str {
        "nap"
    }

    fn description(&self) -> &str {
        "Sleeps"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ToolResult::text("rested"))
    }
}

fn dispatcher(scripts: Scripts) -> Arc<Dispatcher> {
    dispatcher_on(scripts, ObservabilityBus::default())
}

fn dispatcher_on(scripts: Scripts, bus: ObservabilityBus) -> Arc<Dispatcher> {
    let catalog = AgentCatalog::new([
        AgentSpec::new("boss", "boss").managed_agents(["sleeper"]),
        AgentSpec::new("sleeper", "sleeper").tools(["nap"]),
    ])
    .unwrap();
    Dispatcher::new(
        catalog,
        Registry::builder().register(Nap).unwrap(),
        Arc::new(scripts),
        bus,
        DispatcherConfig {
            max_depth: 4,
            engine: EngineConfig {
                retry: RetryPolicy::none(),
                ..EngineConfig::default()
            },
        },
    )
    .unwrap()
}

fn to_value(message: &ServerMessage) -> Value {
    serde_json::from_str(&message.to_json()).unwrap()
}

async fn wait_for_runs(dispatcher: &Dispatcher, count: usize) {
    for _ in 0..200 {
        if dispatcher.run_ids().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} runs", count);
}

#[test]
fn test_parse_commands() {
    assert_eq!(parse_command(r#"{"type":"ping"}"#).unwrap(), ClientCommand::Ping);
    assert_eq!(
        parse_command(r#"{"type":"submit","agent":"boss","task":"go"}"#).unwrap(),
        ClientCommand::Submit {
            agent: "boss".into(),
            task: "go".into()
        }
    );
    assert!(parse_command(r#"{"type":"launch"}"#).is_err());
}

#[tokio::test]
async fn test_ping_and_bad_frame() {
    let mut session = MonitorSession::new(dispatcher(Scripts::default()));
    assert_eq!(to_value(&session.handle_text(r#"{"type":"ping"}"#).await)["type"], "pong");

    let reply = to_value(&session.handle_text("not json").await);
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().starts_with("bad command"));
}

#[tokio::test]
async fn test_submit_then_status_and_steps() {
    let d = dispatcher(Scripts::default().with("sleeper", vec![Decision::final_answer("zzz")]));
    let mut session = MonitorSession::new(d.clone());

    let reply = session
        .handle(ClientCommand::Submit {
            agent: "sleeper".into(),
            task: "rest".into(),
        })
        .await;
    let ServerMessage::Submitted { run_id, .. } = reply else {
        panic!("expected submitted, got {:?}", reply);
    };
    assert!(session.owns(&run_id));
    d.await_run(&run_id).await.unwrap();

    let status = to_value(&session.handle(ClientCommand::Status { run_id: run_id.clone() }).await);
    assert_eq!(status["type"], "status");
    assert_eq!(status["status"], "succeeded");
    assert_eq!(status["final_answer"], "zzz");
    assert_eq!(status["step_count"], 1);

    let steps = to_value(&session.handle(ClientCommand::Steps { run_id }).await);
    assert_eq!(steps["steps"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_unknown_agent_is_error() {
    let mut session = MonitorSession::new(dispatcher(Scripts::default()));
    let reply = session
        .handle(ClientCommand::Submit {
            agent: "ghost".into(),
            task: "boo".into(),
        })
        .await;
    assert!(matches!(reply, ServerMessage::Error { .. }));
    assert_eq!(session.owned().count(), 0);
}

#[tokio::test]
async fn test_cancel_requires_ownership() {
    let d = dispatcher(
        Scripts::default()
            .with("boss", vec![Decision::tool_call("sleeper", json!({ "task": "rest" }))])
            .with("sleeper", vec![Decision::tool_call("nap", json!({}))]),
    );
    let mut owner = MonitorSession::new(d.clone());
    let mut stranger = MonitorSession::new(d.clone());

    let ServerMessage::Submitted { run_id: root, .. } = owner
        .handle(ClientCommand::Submit {
            agent: "boss".into(),
            task: "delegate".into(),
        })
        .await
    else {
        panic!("submit failed");
    };
    wait_for_runs(&d, 2).await;
    let child = d.children_of(&root)[0].clone();

    let refused = stranger.handle(ClientCommand::Cancel { run_id: root.clone() }).await;
    assert!(matches!(refused, ServerMessage::Error { .. }));
    assert!(owner.owns(&child));
    assert!(!stranger.owns(&child));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        owner.handle(ClientCommand::Cancel { run_id: root.clone() }),
    )
    .await
    .unwrap();
    let ServerMessage::Cancelled { run_ids } = reply else {
        panic!("expected cancelled, got {:?}", reply);
    };
    assert_eq!(run_ids.len(), 2);
    assert_eq!(d.status(&root), Some(RunStatus::Cancelled));
}

#[tokio::test]
async fn test_tree_lists_nested_runs() {
    let d = dispatcher(
        Scripts::default().with("boss", vec![Decision::tool_call("sleeper", json!({ "task": "rest" }))]),
    );
    let mut session = MonitorSession::new(d.clone());
    let run_id = d.submit("boss", "delegate").unwrap();
    d.await_run(&run_id).await.unwrap();

    let tree = to_value(&session.handle(ClientCommand::Tree).await);
    let runs = tree["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["agent"], "boss");
    assert_eq!(runs[0]["children"][0]["agent"], "sleeper");
}

#[tokio::test]
async fn test_events_are_forwarded() {
    let d = dispatcher(Scripts::default());
    let session = MonitorSession::new(d.clone());
    let mut events = Box::pin(session.events());

    let run_id = d.submit("sleeper", "rest").unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    let value = to_value(&first);
    assert_eq!(value["type"], "event");
    assert_eq!(value["event"]["type"], "run_started");
    assert_eq!(value["event"]["run_id"], run_id.as_str());
}

#[test]
fn test_gap_message_shape() {
    let message = ServerMessage::from(crate::bus::BusItem::Gap { missed: 7 });
    assert_eq!(to_value(&message), json!({ "type": "gap", "missed": 7 }));
}

#[tokio::test]
async fn test_reap_removes_finished_owned_runs() {
    let d = dispatcher(
        Scripts::default().with("boss", vec![Decision::tool_call("sleeper", json!({ "task": "rest" }))]),
    );
    let mut owner = MonitorSession::new(d.clone());
    let mut stranger = MonitorSession::new(d.clone());

    let ServerMessage::Submitted { run_id, .. } = owner
        .handle(ClientCommand::Submit {
            agent: "boss".into(),
            task: "delegate".into(),
        })
        .await
    else {
        panic!("submit failed");
    };
    d.await_run(&run_id).await.unwrap();
    assert_eq!(d.run_ids().len(), 2);

    let refused = stranger.handle(ClientCommand::Reap { run_id: run_id.clone() }).await;
    assert!(matches!(refused, ServerMessage::Error { .. }));

    let reply = owner.handle(ClientCommand::Reap { run_id: run_id.clone() }).await;
    let ServerMessage::Reaped { run_ids } = reply else {
        panic!("expected reaped, got {:?}", reply);
    };
    assert_eq!(run_ids.len(), 2);
    assert!(d.run_ids().is_empty());
    assert_eq!(owner.owned().count(), 0);
}

#[tokio::test]
async fn test_reap_refuses_active_run() {
    let d = dispatcher(Scripts::default().with("sleeper", vec![Decision::tool_call("nap", json!({}))]));
    let mut session = MonitorSession::new(d.clone());
    let ServerMessage::Submitted { run_id, .. } = session
        .handle(ClientCommand::Submit {
            agent: "sleeper".into(),
            task: "rest".into(),
        })
        .await
    else {
        panic!("submit failed");
    };

    let reply = to_value(&session.handle(ClientCommand::Reap { run_id: run_id.clone() }).await);
    assert_eq!(reply["type"], "error");
    assert_eq!(d.run_ids(), vec![run_id.clone()]);
    d.cancel(&run_id).await.unwrap();
}

async fn submit(session: &mut MonitorSession, agent: &str) -> String {
    match session
        .handle(ClientCommand::Submit {
            agent: agent.into(),
            task: "t".into(),
        })
        .await
    {
        ServerMessage::Submitted { run_id, .. } => run_id,
        other => panic!("submit failed: {:?}", other),
    }
}

#[tokio::test]
async fn test_close_reaps_finished_and_later_settled_runs() {
    let d = dispatcher(
        Scripts::default()
            .with("boss", vec![Decision::final_answer("quick")])
            .with("sleeper", vec![Decision::tool_call("nap", json!({}))]),
    );
    let unowned = d.submit("boss", "t").unwrap();
    d.await_run(&unowned).await.unwrap();

    let mut session = MonitorSession::new(d.clone());
    let quick = submit(&mut session, "boss").await;
    let napping = submit(&mut session, "sleeper").await;
    d.await_run(&quick).await.unwrap();

    session.close();
    let mut remaining = d.run_ids();
    remaining.sort();
    let mut expected = vec![unowned.clone(), napping.clone()];
    expected.sort();
    assert_eq!(remaining, expected);

    d.cancel(&napping).await.unwrap();
    for _ in 0..200 {
        if d.run_ids().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(d.run_ids(), vec![unowned]);
}

#[tokio::test]
async fn test_pump_answers_frames_and_reports_lag_as_gap() {
    let bus = ObservabilityBus::new(4);
    let d = dispatcher_on(Scripts::default(), bus.clone());

    let (frames_tx, frames_rx) = futures::channel::mpsc::unbounded::<String>();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();
    // A client that takes 5ms to read each message.
    let slow_sink = futures::sink::unfold(out_tx, |tx, message: ServerMessage| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = tx.send(message);
        Ok::<_, Infallible>(tx)
    });
    let pump = tokio::spawn(MonitorSession::new(d).pump(frames_rx, Box::pin(slow_sink)));

    frames_tx.unbounded_send(r#"{"type":"ping"}"#.to_string()).unwrap();
    for _ in 0..200 {
        if bus.subscriber_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for n in 0..50 {
        bus.publish(BusEvent::StatusChanged {
            run_id: format!("run-{}", n),
            agent: "boss".into(),
            status: RunStatus::Running,
            reason: None,
            timestamp: chrono::Utc::now(),
        });
    }

    let mut saw_pong = false;
    let mut missed = 0;
    let mut events = 0;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(500), out_rx.recv()).await {
        match message {
            ServerMessage::Pong => saw_pong = true,
            ServerMessage::Gap { missed: n } => missed += n,
            ServerMessage::Event { .. } => events += 1,
            other => panic!("unexpected message {:?}", other),
        }
    }

    assert!(saw_pong);
    assert!(missed > 0, "slow client never saw a gap");
    assert_eq!(events + missed, 50);

    drop(frames_tx);
    tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
