// ABOUTME: Authorization and registry identity - calls to unmanaged agents end
// ABOUTME: the caller without starting a nested run; lookups return one spec.

mod common;

use std::sync::Arc;

use canopy::prelude::*;
use serde_json::json;

use common::*;

fn roster() -> Vec<AgentSpec> {
    vec![
        agent("lead").managed_agents(["analyst", "researcher"]),
        agent("analyst").managed_agents(["researcher"]),
        agent("researcher").tools(["echo"]),
        agent("loner"),
    ]
}

#[tokio::test]
async fn test_every_unmanaged_target_is_refused() {
    let managed = |caller: &str| -> Vec<&str> {
        match caller {
            "lead" => vec!["analyst", "researcher"],
            "analyst" => vec!["researcher"],
            _ => vec![],
        }
    };
    let names = ["lead", "analyst", "researcher", "loner"];

    for caller in names {
        for target in names {
            if caller == target || managed(caller).contains(&target) {
                continue;
            }
            let d = dispatcher(roster(), ScriptedBackend::new().then(caller, call(target, "x")));
            let run_id = d.submit(caller, "try").unwrap();
            let outcome = d.await_run(&run_id).await.unwrap();

            assert_eq!(outcome.status, RunStatus::Failed, "{} -> {}", caller, target);
            assert_eq!(
                outcome.failure,
                Some(FailureReason::Unauthorized {
                    caller: caller.to_string(),
                    target: target.to_string(),
                })
            );
            assert_eq!(d.run_ids(), vec![run_id.clone()], "{} -> {} started a run", caller, target);

            let state = d.snapshot(&run_id).unwrap();
            let last = state.steps.last().unwrap();
            assert!(matches!(
                last.payload,
                StepPayload::Error { class: ErrorClass::Terminal, .. }
            ));
        }
    }
}

#[tokio::test]
async fn test_nested_refusal_is_reported_to_parent() {
    let backend = ScriptedBackend::new()
        .then("lead", call("analyst", "dig"))
        .respond("lead", |req| {
            let (content, is_error) = last_tool_result(req).unwrap();
            assert!(is_error);
            assert!(content.contains("'analyst'"));
            Decision::final_answer("analyst misbehaved")
        })
        .then("analyst", call("lead", "recurse"));
    let d = dispatcher(roster(), backend);

    let root = d.submit("lead", "plan").unwrap();
    let outcome = d.await_run(&root).await.unwrap();

    assert_eq!(outcome.answer.as_deref(), Some("analyst misbehaved"));
    let child = d.children_of(&root)[0].clone();
    assert!(d.children_of(&child).is_empty());
    assert!(matches!(
        d.snapshot(&child).unwrap().failure,
        Some(FailureReason::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn test_unknown_tool_is_not_an_authorization_failure() {
    let backend = ScriptedBackend::new()
        .then("loner", Decision::tool_call("telepathy", json!({})))
        .then("loner", Decision::final_answer("fine"));
    let d = dispatcher(roster(), backend);

    let run_id = d.submit("loner", "t").unwrap();
    let outcome = d.await_run(&run_id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_registry_resolves_identical_specs() {
    let d = dispatcher(roster(), ScriptedBackend::new());
    for name in d.registry().list() {
        let first = d.registry().resolve(&name).unwrap();
        for _ in 0..10 {
            assert!(Arc::ptr_eq(&first, &d.registry().resolve(&name).unwrap()));
        }
    }
    assert_eq!(
        d.registry().resolve("lead").unwrap().kind(),
        ToolKind::AgentProxy
    );
}
