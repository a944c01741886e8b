//! Local child-process implementation of [`AgentService`].
//!
//! Spawns the configured agent binary with:
//! - `env_clear()` plus a safe allowlist, so proxy secrets never leak into
//!   the agent's environment.
//! - `AGENT_SESSION_ID`, `AGENT_USER_ID`, `AGENT_PORT` and `PORT` injected
//!   after the caller's environment, so they cannot be overridden.
//! - A detached reaper task that waits on the child, so exited agents do
//!   not linger as zombies of the proxy.
//!
//! Processes are addressed by pid only, which lets a separate process (the
//! admin CLI, or a restarted daemon) stop agents it did not spawn.

use std::collections::HashMap;
use std::future::Future;
use std::net::TcpListener;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::{AgentConfig, AgentService};
use crate::config::GlobalConfig;
use crate::models::health::ProcessStatus;
use crate::models::session::ProcessInfo;
use crate::{AppError, Result};

/// Environment variables inherited by spawned agent processes.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    "TMPDIR",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How long a handed-out port stays reserved for the session it was leased to.
const PORT_LEASE: Duration = Duration::from_secs(60);

/// Interval between exit checks while waiting out the stop grace period.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Host the port bind probe runs against.
const PROBE_HOST: &str = "127.0.0.1";

/// Launch settings for local agent processes.
#[derive(Debug, Clone)]
pub struct LocalSpawnConfig {
    /// Agent binary.
    pub host_cli: String,
    /// Arguments passed to the agent binary.
    pub host_cli_args: Vec<String>,
    /// Working directory; inherits the proxy's when `None`.
    pub working_dir: Option<PathBuf>,
    /// How long a graceful stop waits before reporting failure.
    pub stop_grace: Duration,
}

impl LocalSpawnConfig {
    /// Derive launch settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            host_cli: config.agent.host_cli.clone(),
            host_cli_args: config.agent.host_cli_args.clone(),
            working_dir: config.agent.working_dir.clone(),
            stop_grace: config.stop_grace(),
        }
    }
}

/// Runs each session's agent as a local child process.
pub struct LocalAgentService {
    config: LocalSpawnConfig,
    leases: Mutex<HashMap<u16, Instant>>,
}

impl LocalAgentService {
    /// Create a service with the given launch settings.
    #[must_use]
    pub fn new(config: LocalSpawnConfig) -> Self {
        Self {
            config,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn build_command(&self, agent: &AgentConfig) -> Command {
        let mut cmd = Command::new(&self.config.host_cli);
        cmd.args(&self.config.host_cli_args);

        // Strip inherited environment, then inject only the safe allowlist.
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        cmd.envs(&agent.environment);

        if let Some(repository) = &agent.repository {
            cmd.env("AGENT_REPOSITORY_URL", &repository.url);
            if let Some(branch) = &repository.branch {
                cmd.env("AGENT_REPOSITORY_BRANCH", branch);
            }
            if let Some(commit) = &repository.commit {
                cmd.env("AGENT_REPOSITORY_COMMIT", commit);
            }
        }

        let port = agent.port.to_string();
        cmd.env("AGENT_SESSION_ID", &agent.session_id)
            .env("AGENT_USER_ID", &agent.user_id)
            .env("AGENT_PORT", &port)
            .env("PORT", &port);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        cmd
    }

    fn spawn(&self, agent: &AgentConfig) -> Result<ProcessInfo> {
        let child = self.build_command(agent).spawn().map_err(|err| {
            AppError::Agent(format!("failed to spawn {}: {err}", self.config.host_cli))
        })?;

        let pid = child.id().ok_or_else(|| {
            AppError::Agent("agent process exited before reporting a pid".into())
        })?;

        tokio::spawn(
            reap(child, agent.session_id.clone())
                .instrument(info_span!("agent_reaper", pid)),
        );

        info!(
            session_id = agent.session_id,
            pid,
            port = agent.port,
            host_cli = self.config.host_cli,
            "agent process spawned"
        );

        Ok(ProcessInfo::new(pid, self.config.host_cli.clone()))
    }

    async fn stop(&self, pid: u32) -> Result<()> {
        match send_signal(pid, Signal::Terminate) {
            Ok(()) => {}
            Err(SignalError::NoSuchProcess) => {
                debug!(pid, "process already gone before stop");
                return Ok(());
            }
            Err(SignalError::Other(err)) => {
                return Err(AppError::Agent(format!(
                    "failed to signal process {pid}: {err}"
                )));
            }
        }

        let deadline = Instant::now() + self.config.stop_grace;
        loop {
            match probe_status(pid)? {
                ProcessStatus::NotFound | ProcessStatus::Zombie => {
                    info!(pid, "agent process exited after stop request");
                    return Ok(());
                }
                ProcessStatus::Running | ProcessStatus::Stopped => {}
            }
            if Instant::now() >= deadline {
                return Err(AppError::Agent(format!(
                    "process {pid} did not exit within {}s",
                    self.config.stop_grace.as_secs()
                )));
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    async fn lease_port(&self, low: u16, high: u16) -> Result<u16> {
        if low == 0 || low > high {
            return Err(AppError::Validation(format!("invalid port range {low}-{high}")));
        }

        let mut leases = self.leases.lock().await;
        leases.retain(|_, leased_at| leased_at.elapsed() < PORT_LEASE);

        for port in low..=high {
            if leases.contains_key(&port) || !port_is_free(port) {
                continue;
            }
            leases.insert(port, Instant::now());
            debug!(port, "port leased");
            return Ok(port);
        }

        Err(AppError::Exhausted(format!(
            "no free port in range {low}-{high}"
        )))
    }

    async fn port_available(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        let mut leases = self.leases.lock().await;
        leases.retain(|_, leased_at| leased_at.elapsed() < PORT_LEASE);
        if leases.contains_key(&port) || !port_is_free(port) {
            return false;
        }
        // An approved port is reserved exactly like an allocated one.
        leases.insert(port, Instant::now());
        debug!(port, "explicit port leased");
        true
    }
}

impl AgentService for LocalAgentService {
    fn start_agent(
        &self,
        config: &AgentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessInfo>> + Send + '_>> {
        let config = config.clone();
        Box::pin(async move { self.spawn(&config) })
    }

    fn stop_agent(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let pid = process.pid;
        Box::pin(async move { self.stop(pid).await })
    }

    fn kill_process(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let pid = process.pid;
        Box::pin(async move { kill(pid) })
    }

    fn get_agent_status(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessStatus>> + Send + '_>> {
        let pid = process.pid;
        Box::pin(async move { probe_status(pid) })
    }

    fn get_available_port(
        &self,
        low: u16,
        high: u16,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>> {
        Box::pin(async move { self.lease_port(low, high).await })
    }

    fn is_port_available(&self, port: u16) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.port_available(port).await })
    }
}

/// Wait for the child to exit so it is reaped as soon as it dies.
async fn reap(mut child: Child, session_id: String) {
    match child.wait().await {
        Ok(status) => info!(session_id, %status, "agent process exited"),
        Err(err) => warn!(session_id, %err, "failed to wait on agent process"),
    }
}

fn kill(pid: u32) -> Result<()> {
    match send_signal(pid, Signal::Kill) {
        Ok(()) => {
            warn!(pid, "agent process force-killed");
            Ok(())
        }
        Err(SignalError::NoSuchProcess) => Ok(()),
        Err(SignalError::Other(err)) => Err(AppError::Agent(format!(
            "failed to kill process {pid}: {err}"
        ))),
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind((PROBE_HOST, port)).is_ok()
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[derive(Debug)]
enum SignalError {
    NoSuchProcess,
    Other(String),
}

#[cfg(unix)]
fn unix_pid(pid: u32) -> std::result::Result<nix::unistd::Pid, SignalError> {
    // Pid 0 and negative pids address process groups, never a single agent.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(nix::unistd::Pid::from_raw(raw)),
        _ => Err(SignalError::Other(format!("invalid pid {pid}"))),
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> std::result::Result<(), SignalError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal as NixSignal};

    let target = unix_pid(pid)?;
    let sig = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    match kill(target, sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(SignalError::NoSuchProcess),
        Err(err) => Err(SignalError::Other(err.to_string())),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: Signal) -> std::result::Result<(), SignalError> {
    Err(SignalError::Other(format!(
        "signalling process {pid} is only supported on unix"
    )))
}

/// Classify a process by pid: signal 0 for existence, `/proc` for state.
#[cfg(unix)]
fn probe_status(pid: u32) -> Result<ProcessStatus> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let target = unix_pid(pid).map_err(|_| AppError::Agent(format!("invalid pid {pid}")))?;
    match kill(target, None) {
        // EPERM: the process exists but belongs to someone else.
        Ok(()) | Err(Errno::EPERM) => {}
        Err(Errno::ESRCH) => return Ok(ProcessStatus::NotFound),
        Err(err) => {
            return Err(AppError::Agent(format!(
                "failed to probe process {pid}: {err}"
            )));
        }
    }

    Ok(read_proc_state(pid).unwrap_or(ProcessStatus::Running))
}

#[cfg(not(unix))]
fn probe_status(pid: u32) -> Result<ProcessStatus> {
    Err(AppError::Agent(format!(
        "probing process {pid} is only supported on unix"
    )))
}

/// State letter from `/proc/<pid>/stat`; `None` where `/proc` is unavailable.
#[cfg(unix)]
fn read_proc_state(pid: u32) -> Option<ProcessStatus> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name is parenthesised and may itself contain ')'.
    let state = stat.rsplit_once(')')?.1.trim_start().chars().next()?;
    Some(classify_proc_state(state))
}

/// Map a `/proc` state letter onto a [`ProcessStatus`].
///
/// Suspended (`T`) and traced (`t`) processes are still alive and hold
/// their port, so they count as `Running`.
#[must_use]
pub fn classify_proc_state(state: char) -> ProcessStatus {
    match state {
        'Z' => ProcessStatus::Zombie,
        'X' | 'x' => ProcessStatus::NotFound,
        _ => ProcessStatus::Running,
    }
}
