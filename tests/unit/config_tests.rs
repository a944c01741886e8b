//! Unit tests for `GlobalConfig` parsing, defaults, and validation.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use agent_proxy::config::GlobalConfig;
use agent_proxy::AppError;

const MINIMAL: &str = r#"
[agent]
host_cli = "agent-server"
"#;

#[test]
fn minimal_config_applies_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("valid config");

    assert_eq!(config.db_path, PathBuf::from("data").join("agent-proxy.db"));
    assert_eq!(config.max_sessions_per_user, 10);
    assert_eq!(config.ports.range_low, 9000);
    assert_eq!(config.ports.range_high, 9999);
    assert!(config.agent.host_cli_args.is_empty());
    assert!(config.agent.working_dir.is_none());
    assert!(!config.agent.await_ready);
    assert_eq!(config.stop_grace(), Duration::from_secs(10));
    assert_eq!(config.proxy.scheme, "http");
    assert_eq!(config.proxy.host, "localhost");
    assert_eq!(config.proxy.health_path, "/health");
    assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    assert!(config.monitor.enabled);
    assert_eq!(config.monitor_interval(), Duration::from_secs(30));
    assert_eq!(config.session_timeout(), Duration::from_secs(15));
}

#[test]
fn full_config_overrides_defaults() {
    let raw = r#"
db_path = "/var/lib/agent-proxy/sessions.db"
max_sessions_per_user = 3

[ports]
range_low = 12000
range_high = 12010

[agent]
host_cli = "/usr/local/bin/agent"
host_cli_args = ["serve", "--quiet"]
working_dir = "/srv/agents"
stop_grace_seconds = 2
await_ready = true

[proxy]
scheme = "https"
host = "agents.internal"
health_path = "/ready"
probe_timeout_seconds = 1

[monitor]
enabled = false
interval_seconds = 5
session_timeout_seconds = 3
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("valid config");

    assert_eq!(config.db_path(), "/var/lib/agent-proxy/sessions.db");
    assert_eq!(config.max_sessions_per_user, 3);
    assert_eq!(config.ports.range_low, 12000);
    assert_eq!(config.ports.range_high, 12010);
    assert_eq!(config.agent.host_cli_args, vec!["serve", "--quiet"]);
    assert_eq!(config.agent.working_dir, Some(PathBuf::from("/srv/agents")));
    assert!(config.agent.await_ready);
    assert_eq!(config.stop_grace(), Duration::from_secs(2));
    assert_eq!(config.proxy.scheme, "https");
    assert_eq!(config.proxy.health_path, "/ready");
    assert!(!config.monitor.enabled);
    assert_eq!(config.monitor_interval(), Duration::from_secs(5));
    assert_eq!(config.session_timeout(), Duration::from_secs(3));
}

#[test]
fn missing_agent_section_is_rejected() {
    let err = GlobalConfig::from_toml_str("max_sessions_per_user = 2").unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn malformed_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("[agent\nhost_cli = ").unwrap_err();
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn zero_quota_is_rejected() {
    let raw = format!("max_sessions_per_user = 0\n{MINIMAL}");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("max_sessions_per_user"));
}

#[test]
fn inverted_port_range_is_rejected() {
    let raw = format!("[ports]\nrange_low = 9100\nrange_high = 9000\n{MINIMAL}");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("invalid port range"));
}

#[test]
fn zero_low_port_is_rejected() {
    let raw = format!("[ports]\nrange_low = 0\nrange_high = 10\n{MINIMAL}");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn blank_host_cli_is_rejected() {
    let err = GlobalConfig::from_toml_str("[agent]\nhost_cli = \"  \"").unwrap_err();
    assert!(err.to_string().contains("host_cli"));
}

#[test]
fn zero_monitor_interval_is_rejected() {
    let raw = format!("{MINIMAL}\n[monitor]\ninterval_seconds = 0\n");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("interval_seconds"));
}

#[test]
fn zero_probe_timeout_is_rejected() {
    let raw = format!("{MINIMAL}\n[proxy]\nprobe_timeout_seconds = 0\n");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn relative_health_path_is_rejected() {
    let raw = format!("{MINIMAL}\n[proxy]\nhealth_path = \"health\"\n");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("health_path"));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(MINIMAL.as_bytes()).expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.agent.host_cli, "agent-server");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
