//! Create-and-start workflow.
//!
//! The session record is persisted in `Starting` before the backing
//! process is launched, so a crash mid-start leaves an observable record
//! for the reconciler rather than an untracked process.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::{AgentConfig, AgentService};
use crate::config::GlobalConfig;
use crate::models::session::{ProcessInfo, RepositoryInfo, Session};
use crate::orchestrator::access::{
    load_active_user, require_id, touch_last_used, validate_environment, validate_port,
};
use crate::persistence::{SessionRepository, UserRepository};
use crate::proxy::{fallback_url, ProxyService};
use crate::{AppError, Result};

/// Concurrent `Starting` + `Active` sessions allowed per user by default.
pub const DEFAULT_MAX_SESSIONS_PER_USER: u32 = 10;

/// Tag recording the repository URL of a session.
pub const REPOSITORY_TAG: &str = "repository";
/// Tag recording the repository branch of a session.
pub const REPOSITORY_BRANCH_TAG: &str = "repository_branch";
/// Tag recording the repository commit of a session.
pub const REPOSITORY_COMMIT_TAG: &str = "repository_commit";

/// Input to [`CreateSessionUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Owning user.
    pub user_id: String,
    /// Environment for the backing process.
    pub environment: BTreeMap<String, String>,
    /// Caller tags.
    pub tags: BTreeMap<String, String>,
    /// Repository to work in.
    pub repository: Option<RepositoryInfo>,
    /// Explicit port; allocated from the configured range when `None`.
    pub port: Option<u16>,
}

/// Result of a successful create.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    /// The persisted session.
    pub session: Session,
    /// Client-facing URL of the session's agent.
    pub url: String,
}

/// Tunables of the create workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSessionOptions {
    /// Per-user quota ceiling.
    pub max_sessions_per_user: u32,
    /// Lowest port handed out by the allocator.
    pub port_range_low: u16,
    /// Highest port handed out by the allocator.
    pub port_range_high: u16,
    /// Leave new sessions `Starting` with the handle attached; the monitor promotes them.
    pub await_ready: bool,
}

impl Default for CreateSessionOptions {
    fn default() -> Self {
        Self {
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
            port_range_low: 9000,
            port_range_high: 9999,
            await_ready: false,
        }
    }
}

impl CreateSessionOptions {
    /// Derive options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_sessions_per_user: config.max_sessions_per_user,
            port_range_low: config.ports.range_low,
            port_range_high: config.ports.range_high,
            await_ready: config.agent.await_ready,
        }
    }
}

/// Creates sessions and launches their backing processes.
pub struct CreateSessionUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    agent: Arc<dyn AgentService>,
    proxy: Arc<dyn ProxyService>,
    options: CreateSessionOptions,
}

impl CreateSessionUseCase {
    /// Wire the workflow to its collaborators.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        agent: Arc<dyn AgentService>,
        proxy: Arc<dyn ProxyService>,
        options: CreateSessionOptions,
    ) -> Self {
        Self {
            sessions,
            users,
            agent,
            proxy,
            options,
        }
    }

    /// Create a session, start its backing process, and return its URL.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for a malformed request.
    /// - `AppError::NotFound` / `AppError::Unauthorized` for an unknown or inactive user.
    /// - `AppError::QuotaExceeded` when the user is at the session ceiling.
    /// - `AppError::Exhausted` when no port can be resolved.
    /// - `AppError::Agent` when the process cannot be started (the session
    ///   is persisted as `Failed`).
    /// - `AppError::Db` / `AppError::Conflict` when persisting fails.
    pub async fn execute(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let span = info_span!("create_session", user_id = %request.user_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        validate_request(&request)?;

        let user = load_active_user(self.users.as_ref(), &request.user_id).await?;
        self.enforce_quota(&request.user_id).await?;

        let port = self.resolve_port(request.port).await?;
        let tags = merge_tags(request.repository.as_ref(), request.tags);
        let session = Session::new(
            request.user_id,
            port,
            request.environment,
            tags,
            request.repository,
        )?;
        let mut session = self.sessions.save(&session).await?;
        info!(session_id = %session.id, port, "session record created");

        let agent_config = AgentConfig {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            port,
            environment: session.environment.clone(),
            repository: session.repository.clone(),
        };

        let process = match self.agent.start_agent(&agent_config).await {
            Ok(process) => process,
            Err(err) => {
                warn!(session_id = %session.id, %err, "backing process failed to start");
                self.record_failure(session, err.to_string()).await;
                return Err(err);
            }
        };

        let transition = if self.options.await_ready {
            session.attach_process(process.clone())
        } else {
            session.activate(process.clone())
        };
        if let Err(err) = transition {
            self.stop_best_effort(&session.id, &process).await;
            self.record_failure(session, format!("failed to activate session: {err}"))
                .await;
            return Err(err);
        }

        let session = match self.sessions.update(&session).await {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    session_id = %session.id,
                    %err,
                    "failed to persist started session; stopping process"
                );
                self.stop_best_effort(&session.id, &process).await;
                return Err(err);
            }
        };

        info!(
            session_id = %session.id,
            pid = process.pid,
            status = %session.status(),
            "session started"
        );

        touch_last_used(self.users.as_ref(), user).await;

        let url = match self.proxy.get_session_url(&session.id, session.port).await {
            Ok(url) => url,
            Err(err) => {
                warn!(session_id = %session.id, %err, "session url unavailable, using fallback");
                fallback_url(session.port)
            }
        };

        Ok(CreateSessionResponse { session, url })
    }

    async fn enforce_quota(&self, user_id: &str) -> Result<()> {
        let live = self
            .sessions
            .find_by_user_id(user_id)
            .await?
            .iter()
            .filter(|session| !session.is_terminal())
            .count();

        let ceiling = usize::try_from(self.options.max_sessions_per_user).unwrap_or(usize::MAX);
        if live >= ceiling {
            return Err(AppError::QuotaExceeded(format!(
                "user {user_id} already has {live} of {ceiling} concurrent sessions"
            )));
        }
        Ok(())
    }

    async fn resolve_port(&self, requested: Option<u16>) -> Result<u16> {
        match requested {
            Some(port) => {
                if self.agent.is_port_available(port).await {
                    Ok(port)
                } else {
                    Err(AppError::Exhausted(format!("port {port} is not available")))
                }
            }
            None => {
                self.agent
                    .get_available_port(self.options.port_range_low, self.options.port_range_high)
                    .await
            }
        }
    }

    /// Mark the session failed and persist it. Never masks the caller's error.
    async fn record_failure(&self, mut session: Session, reason: String) {
        if let Err(err) = session.mark_failed(reason) {
            warn!(session_id = %session.id, %err, "could not mark session failed");
            return;
        }
        if let Err(err) = self.sessions.update(&session).await {
            warn!(session_id = %session.id, %err, "failed to persist session failure");
        }
    }

    async fn stop_best_effort(&self, session_id: &str, process: &ProcessInfo) {
        if let Err(err) = self.agent.stop_agent(process).await {
            warn!(session_id, pid = process.pid, %err, "best-effort stop failed");
        }
    }
}

fn validate_request(request: &CreateSessionRequest) -> Result<()> {
    require_id("user_id", &request.user_id)?;
    if let Some(port) = request.port {
        validate_port(port)?;
    }
    if let Some(repository) = &request.repository {
        repository.validate()?;
    }
    validate_environment(&request.environment)
}

/// Repository-derived tags overlaid by the caller's own tags.
#[must_use]
pub fn merge_tags(
    repository: Option<&RepositoryInfo>,
    caller: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    if let Some(repository) = repository {
        tags.insert(REPOSITORY_TAG.to_owned(), repository.url.clone());
        if let Some(branch) = &repository.branch {
            tags.insert(REPOSITORY_BRANCH_TAG.to_owned(), branch.clone());
        }
        if let Some(commit) = &repository.commit {
            tags.insert(REPOSITORY_COMMIT_TAG.to_owned(), commit.clone());
        }
    }
    tags.extend(caller);
    tags
}
