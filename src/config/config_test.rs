// ABOUTME: Tests for configuration parsing, validation, and the builders that
// ABOUTME: turn a config into catalog, engine, and sandbox settings.

use std::io::Write;
use std::time::Duration;

use super::*;
use crate::tool::ToolKind;

#[test]
fn test_defaults_validate() {
    let config = CanopyConfig::default();
    config.validate().unwrap();
    let catalog = config.agent_catalog().unwrap();
    assert!(catalog.get("planning_agent").unwrap().manages("deep_analyzer_agent"));
    assert_eq!(catalog.get("general_agent").unwrap().model, "gpt-4.1");
}

#[test]
fn test_empty_file_gives_defaults() {
    let config = CanopyConfig::from_toml("").unwrap();
    assert_eq!(config, CanopyConfig::default());
}

#[test]
fn test_agents_table_replaces_roster() {
    let config = CanopyConfig::from_toml(
        r#"
[model]
default_model = "small"

[agents.boss]
instructions = "Lead. Task: {{task}}"
managed_agents = ["helper"]
max_steps = 5

[agents.helper]
model = "tiny"
tools = ["python_interpreter"]
"#,
    )
    .unwrap();

    let catalog = config.agent_catalog().unwrap();
    assert_eq!(catalog.names(), vec!["boss", "helper"]);
    let boss = catalog.get("boss").unwrap();
    assert_eq!(boss.model, "small");
    assert_eq!(boss.max_steps, 5);
    let helper = catalog.get("helper").unwrap();
    assert_eq!(helper.model, "tiny");
    assert_eq!(helper.max_steps, 20);
    assert_eq!(helper.description, "A multi-step agent that can perform various tasks.");
}

#[test]
fn test_unknown_local_tool_rejected() {
    let err = CanopyConfig::from_toml(
        r#"
[agents.a]
tools = ["web_search"]
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("web_search"));
}

#[test]
fn test_management_cycle_rejected() {
    let err = CanopyConfig::from_toml(
        r#"
[agents.a]
managed_agents = ["b"]

[agents.b]
managed_agents = ["a"]
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_unknown_field_rejected() {
    let err = CanopyConfig::from_toml("[engine]\nmax_stepz = 3\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_mcp_tools_join_declared_tools() {
    let config = CanopyConfig::from_toml(
        r#"
[agents.a]
mcp_tools = ["files_read"]

[mcp_servers.files]
command = "mcp-files"
args = ["--root", "/tmp"]
"#,
    )
    .unwrap();

    let spec = config.agent_catalog().unwrap().get("a").unwrap();
    assert_eq!(spec.tools, vec!["files_read"]);

    let servers = config.mcp_servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "files");
    assert_eq!(servers[0].args, vec!["--root", "/tmp"]);
}

#[test]
fn test_engine_config_mapping() {
    let config = CanopyConfig::from_toml(
        r#"
[engine]
max_validation_failures = 0
model_retries = 1
tool_timeout_secs = 7
run_timeout_secs = 60
max_depth = 2
"#,
    )
    .unwrap();

    let engine = config.engine_config();
    assert_eq!(engine.max_validation_failures, 1);
    assert_eq!(engine.retry.max_retries, 1);
    assert_eq!(engine.tool_timeout, Duration::from_secs(7));
    assert_eq!(engine.run_timeout, Some(Duration::from_secs(60)));
    assert_eq!(engine.agent_call_timeout, None);
    assert_eq!(config.dispatcher_config().max_depth, 2);
}

#[test]
fn test_memory_limit_zero_disables() {
    let mut config = CanopyConfig::default();
    assert_eq!(config.execution_limits().max_memory_bytes, Some(512 * 1024 * 1024));
    config.sandbox.max_memory_mb = 0;
    assert_eq!(config.execution_limits().max_memory_bytes, None);
}

#[test]
fn test_local_tools_registered() {
    let config = CanopyConfig::default();
    let registry = config.local_tools().unwrap().build();
    assert_eq!(registry.list(), vec!["planning", "python_interpreter"]);
    assert_eq!(
        registry.get("python_interpreter").unwrap().kind(),
        ToolKind::Local
    );
}

#[test]
fn test_override_model_applies_everywhere() {
    let mut config = CanopyConfig::default();
    config.override_model("local-llm");
    let catalog = config.agent_catalog().unwrap();
    assert!(catalog.iter().all(|spec| spec.model == "local-llm"));
}

#[test]
fn test_load_reports_missing_file() {
    let err = CanopyConfig::load(Path::new("/nonexistent/canopy.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/canopy.toml"));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[bus]\ncapacity = 16\n\n[agents.solo]\n").unwrap();
    let config = CanopyConfig::load(file.path()).unwrap();
    assert_eq!(config.bus.capacity, 16);
    assert_eq!(config.agents.len(), 1);
}

#[test]
fn test_load_or_default_without_file() {
    let config = CanopyConfig::load_or_default(Path::new("/nonexistent/canopy.toml")).unwrap();
    assert_eq!(config.agents.len(), CanopyConfig::default().agents.len());
}
