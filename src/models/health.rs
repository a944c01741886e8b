//! Transient health observations produced by the monitor.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backing process status as reported by the agent service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Process alive and scheduled.
    Running,
    /// Process exited or is suspended.
    Stopped,
    /// No process with the recorded identifier exists.
    NotFound,
    /// Process exited but was never reaped.
    Zombie,
}

impl ProcessStatus {
    /// Lower-case representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::NotFound => "not_found",
            Self::Zombie => "zombie",
        }
    }
}

impl Display for ProcessStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health observation of a session; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckResult {
    /// Process status, when the session has a process handle.
    pub process_status: Option<ProcessStatus>,
    /// Whether the session answered on its port.
    pub reachable: bool,
    /// Round-trip time of the reachability probe, when one ran.
    pub latency: Option<Duration>,
    /// Error raised while performing the check.
    pub error: Option<String>,
    /// Observation time.
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Empty observation stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            process_status: None,
            reachable: false,
            latency: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// Whether the process runs and answers on its port.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.process_status == Some(ProcessStatus::Running) && self.reachable
    }
}

impl Default for HealthCheckResult {
    fn default() -> Self {
        Self::new()
    }
}
