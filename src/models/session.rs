//! Session aggregate and its lifecycle state machine.
//!
//! A session moves `Starting → Active → {Stopped, Failed}`, with
//! `Starting → Failed` and `Starting → Stopped` also permitted. The
//! process handle lives inside [`SessionState`] so that an `Active`
//! session without a handle, or a session that is both stopped and
//! failed, cannot be constructed.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Flat lifecycle status used for filtering, persistence, and reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Record persisted, backing process not yet confirmed.
    Starting,
    /// Backing process running with an attached handle.
    Active,
    /// Backing process terminated cleanly or observed gone.
    Stopped,
    /// Start, stop, or health reconciliation failed.
    Failed,
}

impl SessionStatus {
    /// Statuses the reconciliation driver re-probes.
    pub const NON_TERMINAL: [Self; 2] = [Self::Active, Self::Starting];

    /// Whether no further lifecycle transition is permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Lower-case storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for unknown status strings.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "starting" => Ok(Self::Starting),
            "active" => Ok(Self::Active),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Validation(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to the backing process of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Operating-system process identifier.
    pub pid: u32,
    /// Command that was launched.
    pub command: String,
    /// When the process was started.
    pub started_at: DateTime<Utc>,
}

impl ProcessInfo {
    /// Build a handle stamped with the current time.
    #[must_use]
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            command: command.into(),
            started_at: Utc::now(),
        }
    }

    /// Check that the handle identifies a real process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the pid is zero.
    pub fn validate(&self) -> Result<()> {
        if self.pid == 0 {
            return Err(AppError::Validation(
                "process handle has no process id".into(),
            ));
        }
        Ok(())
    }
}

/// Source-control repository associated with a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Clone URL (`https://`, `http://`, `ssh://`, `git@` or `file://`).
    pub url: String,
    /// Branch to check out.
    #[serde(default)]
    pub branch: Option<String>,
    /// Commit to pin, as a 7 to 64 character hex id.
    #[serde(default)]
    pub commit: Option<String>,
}

const REPOSITORY_SCHEMES: &[&str] = &["https://", "http://", "ssh://", "git@", "file://"];

impl RepositoryInfo {
    /// Reference a repository by URL only.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: None,
            commit: None,
        }
    }

    /// Attach a branch name.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Attach a commit id.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Validate URL scheme, branch name, and commit id shape.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(AppError::Validation("repository url must not be empty".into()));
        }
        if url.chars().any(char::is_whitespace) {
            return Err(AppError::Validation(
                "repository url must not contain whitespace".into(),
            ));
        }
        if !REPOSITORY_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(AppError::Validation(format!(
                "unsupported repository url: {url}"
            )));
        }

        if let Some(branch) = &self.branch {
            if branch.is_empty()
                || branch.starts_with('-')
                || branch.contains("..")
                || branch.chars().any(|c| c.is_whitespace() || c.is_control())
            {
                return Err(AppError::Validation(format!(
                    "invalid repository branch: {branch:?}"
                )));
            }
        }

        if let Some(commit) = &self.commit {
            let valid_len = (7..=64).contains(&commit.len());
            if !valid_len || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AppError::Validation(format!(
                    "invalid repository commit: {commit:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Lifecycle state with the data each state carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    /// Persisted before the backing process is confirmed. A handle is
    /// present only when the process was launched but not yet promoted.
    Starting {
        /// Launched-but-unconfirmed process, if any.
        process: Option<ProcessInfo>,
    },
    /// Backing process running.
    Active {
        /// Handle of the running process.
        process: ProcessInfo,
    },
    /// Terminal: process gone. The last handle is retained for audit.
    Stopped {
        /// Last known process handle.
        process: Option<ProcessInfo>,
    },
    /// Terminal: something went wrong.
    Failed {
        /// Human-readable failure reason; never empty.
        reason: String,
        /// Last known process handle.
        process: Option<ProcessInfo>,
    },
}

impl SessionState {
    /// Flat status of this state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Starting { .. } => SessionStatus::Starting,
            Self::Active { .. } => SessionStatus::Active,
            Self::Stopped { .. } => SessionStatus::Stopped,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }

    /// Process handle carried by this state.
    #[must_use]
    pub fn process(&self) -> Option<&ProcessInfo> {
        match self {
            Self::Active { process } => Some(process),
            Self::Starting { process } | Self::Stopped { process } | Self::Failed { process, .. } => {
                process.as_ref()
            }
        }
    }

    fn into_process(self) -> Option<ProcessInfo> {
        match self {
            Self::Active { process } => Some(process),
            Self::Starting { process } | Self::Stopped { process } | Self::Failed { process, .. } => {
                process
            }
        }
    }
}

/// Fallback reason recorded when a failure is reported without one.
const UNKNOWN_FAILURE: &str = "unknown failure";

/// Tracked lifecycle record for one agent compute unit.
///
/// Serialize-only: stored records come back through [`Session::restore`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Session {
    /// Unique record identifier; immutable.
    pub id: String,
    /// Owning user; immutable.
    pub user_id: String,
    /// Allocated port; immutable.
    pub port: u16,
    /// Environment passed through to the backing process.
    pub environment: BTreeMap<String, String>,
    /// Filterable metadata, including repository-derived tags.
    pub tags: BTreeMap<String, String>,
    /// Associated source repository.
    pub repository: Option<RepositoryInfo>,
    /// Current lifecycle state.
    #[serde(flatten)]
    state: SessionState,
    /// When an explicit stop was requested, if ever.
    pub termination_requested_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by every persisted update.
    pub version: i64,
}

impl Session {
    /// Construct a validated `Starting` session with a generated identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the owner, port, or repository is invalid.
    pub fn new(
        user_id: impl Into<String>,
        port: u16,
        environment: BTreeMap<String, String>,
        tags: BTreeMap<String, String>,
        repository: Option<RepositoryInfo>,
    ) -> Result<Self> {
        let now = Utc::now();
        let session = Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            port,
            environment,
            tags,
            repository,
            state: SessionState::Starting { process: None },
            termination_requested_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        session.validate()?;
        Ok(session)
    }

    /// Reassemble a session from stored parts and re-check its invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the stored record breaks an invariant.
    #[allow(clippy::too_many_arguments)] // Mirrors the persisted columns one to one.
    pub fn restore(
        id: String,
        user_id: String,
        port: u16,
        environment: BTreeMap<String, String>,
        tags: BTreeMap<String, String>,
        repository: Option<RepositoryInfo>,
        state: SessionState,
        termination_requested_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: i64,
    ) -> Result<Self> {
        let session = Self {
            id,
            user_id,
            port,
            environment,
            tags,
            repository,
            state,
            termination_requested_at,
            created_at,
            updated_at,
            version,
        };
        session.validate()?;
        Ok(session)
    }

    /// Check entity invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("session id must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("user id must not be empty".into()));
        }
        if self.port == 0 {
            return Err(AppError::Validation(
                "port must be between 1 and 65535".into(),
            ));
        }
        if let Some(repository) = &self.repository {
            repository.validate()?;
        }
        match &self.state {
            SessionState::Active { process } => process.validate()?,
            SessionState::Failed { reason, .. } if reason.trim().is_empty() => {
                return Err(AppError::Validation(
                    "failed session must record a reason".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current flat status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Attached process handle, if any.
    #[must_use]
    pub fn process(&self) -> Option<&ProcessInfo> {
        self.state.process()
    }

    /// Failure reason when the session has failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            SessionState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Whether the session is `Starting`.
    #[must_use]
    pub fn is_starting(&self) -> bool {
        matches!(self.state, SessionState::Starting { .. })
    }

    /// Whether the session is `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Whether the session is `Stopped`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, SessionState::Stopped { .. })
    }

    /// Whether the session is `Failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, SessionState::Failed { .. })
    }

    /// Whether the session has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Only `Starting` and `Active` sessions may be explicitly stopped.
    #[must_use]
    pub fn can_be_terminated(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether an explicit stop has been requested and not yet resolved.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.termination_requested_at.is_some() && !self.is_terminal()
    }

    /// Record a launched process while staying in `Starting`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the session is `Starting`
    /// without a handle, or `AppError::Validation` for an invalid handle.
    pub fn attach_process(&mut self, process: ProcessInfo) -> Result<()> {
        process.validate()?;
        match &mut self.state {
            SessionState::Starting { process: slot @ None } => {
                *slot = Some(process);
                self.touch();
                Ok(())
            }
            SessionState::Starting { process: Some(_) } => Err(AppError::InvalidState(
                "session already has a process attached".into(),
            )),
            _ => Err(self.invalid("attach a process to")),
        }
    }

    /// Transition `Starting → Active`, attaching the given process handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the session is `Starting`,
    /// or `AppError::Validation` for an invalid handle.
    pub fn activate(&mut self, process: ProcessInfo) -> Result<()> {
        if !self.is_starting() {
            return Err(self.invalid("activate"));
        }
        process.validate()?;
        self.state = SessionState::Active { process };
        self.touch();
        Ok(())
    }

    /// Transition `Starting → Active` using the already-attached handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session is not `Starting` or
    /// has no attached process.
    pub fn promote(&mut self) -> Result<()> {
        match &self.state {
            SessionState::Starting {
                process: Some(process),
            } => {
                let process = process.clone();
                self.activate(process)
            }
            SessionState::Starting { process: None } => Err(AppError::InvalidState(
                "cannot promote a starting session without a process handle".into(),
            )),
            _ => Err(self.invalid("promote")),
        }
    }

    /// Record the intent to stop before the backing process is asked to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session cannot be terminated.
    pub fn request_termination(&mut self) -> Result<()> {
        if !self.can_be_terminated() {
            return Err(self.invalid("terminate"));
        }
        if self.termination_requested_at.is_none() {
            self.termination_requested_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Transition to `Stopped`, retaining the last process handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session is already terminal.
    pub fn mark_stopped(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(self.invalid("stop"));
        }
        let process = self.take_process();
        self.state = SessionState::Stopped { process };
        self.touch();
        Ok(())
    }

    /// Transition to `Failed` with a reason, retaining the last process handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session is already terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(self.invalid("fail"));
        }
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            UNKNOWN_FAILURE.clone_into(&mut reason);
        }
        let process = self.take_process();
        self.state = SessionState::Failed { reason, process };
        self.touch();
        Ok(())
    }

    fn take_process(&mut self) -> Option<ProcessInfo> {
        std::mem::replace(&mut self.state, SessionState::Starting { process: None }).into_process()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, action: &str) -> AppError {
        AppError::InvalidState(format!(
            "cannot {action} session {} from status {}",
            self.id,
            self.status()
        ))
    }
}
