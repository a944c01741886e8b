//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Port range handed out to new sessions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PortConfig {
    /// Lowest allocatable port.
    #[serde(default = "default_range_low")]
    pub range_low: u16,
    /// Highest allocatable port (inclusive).
    #[serde(default = "default_range_high")]
    pub range_high: u16,
}

fn default_range_low() -> u16 {
    9000
}

fn default_range_high() -> u16 {
    9999
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_low: default_range_low(),
            range_high: default_range_high(),
        }
    }
}

/// How backing agent processes are launched and stopped.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSettings {
    /// Agent binary launched for every session.
    pub host_cli: String,
    /// Arguments passed to the agent binary.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Working directory for agent processes; inherits the proxy's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Seconds a graceful stop waits for the process to exit.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Keep new sessions `Starting` until the monitor observes them reachable.
    #[serde(default)]
    pub await_ready: bool,
}

fn default_stop_grace_seconds() -> u64 {
    10
}

/// How sessions are addressed and probed over HTTP.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProxyConfig {
    /// URL scheme of agent endpoints.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Host agents listen on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Path requested by the reachability probe.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Reachability probe timeout.
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
}

fn default_scheme() -> String {
    "http".into()
}

fn default_host() -> String {
    "localhost".into()
}

fn default_health_path() -> String {
    "/health".into()
}

fn default_probe_timeout_seconds() -> u64 {
    5
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            health_path: default_health_path(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

/// Scheduled fleet reconciliation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Whether the daemon runs the reconciliation loop.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between fleet passes.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Deadline for reconciling a single session within a pass.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_session_timeout_seconds() -> u64 {
    15
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_interval_seconds(),
            session_timeout_seconds: default_session_timeout_seconds(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("agent-proxy.db")
}

fn default_max_sessions_per_user() -> u32 {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Ceiling on a user's concurrent `Starting` + `Active` sessions.
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: u32,
    /// Port allocation range.
    #[serde(default)]
    pub ports: PortConfig,
    /// Agent process settings.
    pub agent: AgentSettings,
    /// Reachability probe settings.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Reconciliation loop settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Database path as a string for the connection options.
    #[must_use]
    pub fn db_path(&self) -> String {
        self.db_path.to_string_lossy().into_owned()
    }

    /// Graceful stop window.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.agent.stop_grace_seconds)
    }

    /// Reachability probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.probe_timeout_seconds)
    }

    /// Interval between fleet passes.
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_seconds)
    }

    /// Per-session deadline within a fleet pass.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.session_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.max_sessions_per_user == 0 {
            return Err(AppError::Config(
                "max_sessions_per_user must be greater than zero".into(),
            ));
        }

        if self.ports.range_low == 0 || self.ports.range_low > self.ports.range_high {
            return Err(AppError::Config(format!(
                "invalid port range {}-{}",
                self.ports.range_low, self.ports.range_high
            )));
        }

        if self.agent.host_cli.trim().is_empty() {
            return Err(AppError::Config("agent.host_cli must not be empty".into()));
        }

        if self.proxy.probe_timeout_seconds == 0 {
            return Err(AppError::Config(
                "proxy.probe_timeout_seconds must be greater than zero".into(),
            ));
        }

        if !self.proxy.health_path.starts_with('/') {
            return Err(AppError::Config(
                "proxy.health_path must start with '/'".into(),
            ));
        }

        if self.monitor.interval_seconds == 0 {
            return Err(AppError::Config(
                "monitor.interval_seconds must be greater than zero".into(),
            ));
        }

        if self.monitor.session_timeout_seconds == 0 {
            return Err(AppError::Config(
                "monitor.session_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
