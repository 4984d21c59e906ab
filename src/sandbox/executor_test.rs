// ABOUTME: Tests for SandboxedExecutor - output capture, limits, cancellation,
// ABOUTME: and policy enforcement. Uses the shell interpreter; Python cases are skipped when absent.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::SandboxError;

fn shell() -> SandboxedExecutor {
    SandboxedExecutor::new(Interpreter::Shell, SandboxPolicy::shell(&[]).unwrap())
}

fn limits(timeout_ms: u64) -> ExecutionLimits {
    ExecutionLimits {
        timeout: Duration::from_millis(timeout_ms),
        max_output_bytes: 4096,
        max_memory_bytes: None,
    }
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_captures_stdout() {
    let out = shell()
        .execute("echo $((2 + 2))", &limits(5000), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out.stdout, "4\n");
    assert!(out.return_value.is_none());
    assert!(out.files.is_empty());
}

#[tokio::test]
async fn test_reports_created_files() {
    let out = shell()
        .execute(
            "echo hi > notes.txt; mkdir -p plots; echo x > plots/a.csv",
            &limits(5000),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.files, vec!["notes.txt", "plots/a.csv"]);
}

#[tokio::test]
async fn test_environment_is_cleared() {
    // SAFETY: test-only variable, read back by a child process.
    unsafe {
        std::env::set_var("CANOPY_SECRET_FOR_TEST", "leak");
    }
    let out = shell()
        .execute(
            "echo \"[$CANOPY_SECRET_FOR_TEST]\"",
            &limits(5000),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.stdout, "[]\n");
}

#[tokio::test]
async fn test_timeout_does_not_block_caller() {
    let started = Instant::now();
    let result = shell()
        .execute("sleep 5", &limits(200), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SandboxError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_output_ceiling() {
    let code = "i=0; while [ $i -lt 2000 ]; do echo xxxxxxxxxxxxxxxxxxxx; i=$((i+1)); done";
    let result = shell()
        .execute(code, &limits(5000), &CancellationToken::new())
        .await;
    match result {
        Err(SandboxError::ResourceExceeded(msg)) => assert!(msg.contains("stdout")),
        other => panic!("expected ResourceExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_error() {
    let result = shell()
        .execute("echo broken >&2; exit 3", &limits(5000), &CancellationToken::new())
        .await;
    match result {
        Err(SandboxError::Runtime(msg)) => assert_eq!(msg, "broken"),
        other => panic!("expected Runtime, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation_kills_execution() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = shell().execute("sleep 5", &limits(10_000), &token).await;
    assert!(matches!(result, Err(SandboxError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_policy_violation_runs_nothing() {
    let result = shell()
        .execute("sudo touch marker", &limits(5000), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(SandboxError::Violation(_))));
}

#[tokio::test]
async fn test_python_final_expression_value() {
    if !python_available() {
        return;
    }
    let executor =
        SandboxedExecutor::new(Interpreter::python(), SandboxPolicy::python(&[], &[]).unwrap());
    let out = executor
        .execute(
            "import math\nprint('computing')\nmath.floor(2.5) + 2",
            &ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.stdout, "computing\n");
    assert_eq!(out.return_value.as_deref(), Some("4"));
}

#[tokio::test]
async fn test_python_disallowed_import_has_no_output() {
    let executor =
        SandboxedExecutor::new(Interpreter::python(), SandboxPolicy::python(&[], &[]).unwrap());
    let result = executor
        .execute(
            "print('side effect')\nimport os",
            &ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    match result {
        Err(SandboxError::Violation(msg)) => assert!(msg.contains("Import of os")),
        other => panic!("expected Violation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_code_tool_formats_output() {
    use crate::tool::{Tool, ToolContext};

    let tool = CodeTool::new(shell(), limits(5000));
    assert_eq!(tool.name(), "shell");

    let result = tool
        .execute(serde_json::json!({"code": "echo 4"}), &ToolContext::detached())
        .await
        .unwrap();
    assert_eq!(result.content, "Stdout:\n4\n\nOutput: None");
    assert!(!result.is_error);
}

#[tokio::test]
async fn test_code_tool_maps_timeout() {
    use crate::error::ToolError;
    use crate::tool::{Tool, ToolContext};

    let tool = CodeTool::new(shell(), limits(100)).named("python_interpreter");
    let result = tool
        .execute(serde_json::json!({"code": "sleep 3"}), &ToolContext::detached())
        .await;
    assert!(matches!(result, Err(ToolError::Timeout { tool, .. }) if tool == "python_interpreter"));
}

#[tokio::test]
async fn test_output_ceiling_spans_both_streams() {
    // 3000 bytes on each stream stays under 4096 per stream but not combined.
    let code = "head -c 3000 /dev/zero; head -c 3000 /dev/zero >&2";
    let result = shell()
        .execute(code, &limits(5000), &CancellationToken::new())
        .await;
    match result {
        Err(SandboxError::ResourceExceeded(msg)) => assert!(msg.contains("combined")),
        other => panic!("expected ResourceExceeded, got {:?}", other),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: &str) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next());
    state != Some('Z')
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_background_descendants() {
    let outside = tempfile::tempdir().unwrap();
    let pid_file = outside.path().join("pid");
    let code = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

    let result = shell()
        .execute(&code, &limits(300), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(SandboxError::Timeout(_))));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let pid = pid.trim();
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(pid), "background process {} survived", pid);
}

#[tokio::test]
async fn test_python_builtins_escape_rejected() {
    let executor =
        SandboxedExecutor::new(Interpreter::python(), SandboxPolicy::python(&[], &[]).unwrap());
    for code in [
        "m = __builtins__['__import__']('os')\nm.getpid()",
        "if True: import os\nos.listdir('/')",
    ] {
        let result = executor
            .execute(code, &ExecutionLimits::default(), &CancellationToken::new())
            .await;
        assert!(
            matches!(result, Err(SandboxError::Violation(_))),
            "{:?} ran: {:?}",
            code,
            result
        );
    }
}

#[tokio::test]
async fn test_python_runtime_guard_holds_when_static_rules_relaxed() {
    if !python_available() {
        return;
    }
    let relaxed = SandboxPolicy::python(&[], &["dynamic_import".to_string(), "dunder".to_string()])
        .unwrap();
    let executor = SandboxedExecutor::new(Interpreter::python(), relaxed);

    let result = executor
        .execute(
            "m = __import__('os')\nm.getpid()",
            &ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    match result {
        Err(SandboxError::Violation(msg)) => assert!(msg.contains("Import of os")),
        other => panic!("expected Violation, got {:?}", other),
    }

    let out = executor
        .execute(
            "m = __import__('math')\nm.floor(2.5)",
            &ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.return_value.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_python_withheld_builtins_unavailable() {
    if !python_available() {
        return;
    }
    // With the dunder rule relaxed only the interpreter-side builtins stand.
    let relaxed = SandboxPolicy::python(&[], &["dunder".to_string()]).unwrap();
    let executor = SandboxedExecutor::new(Interpreter::python(), relaxed);
    let result = executor
        .execute(
            "f = __builtins__['open']",
            &ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    match result {
        Err(SandboxError::Runtime(msg)) => assert!(msg.contains("KeyError")),
        other => panic!("expected Runtime, got {:?}", other),
    }
}
