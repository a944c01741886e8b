//! Self-service termination and admin force-delete.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::AgentService;
use crate::models::session::{ProcessInfo, SessionStatus};
use crate::orchestrator::access::{
    authorize_session_access, require_admin, require_id, touch_last_used,
};
use crate::persistence::{SessionRepository, UserRepository};
use crate::{AppError, Result};

/// Input to [`DeleteSessionUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSessionRequest {
    /// Session to terminate.
    pub session_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Fall back to a kill when the graceful stop fails.
    pub force: bool,
}

/// Outcome of a termination attempt.
///
/// A session that is already terminal yields `success == false` rather
/// than an error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteSessionResponse {
    /// Session the request targeted.
    pub session_id: String,
    /// Whether the session is now stopped.
    pub success: bool,
    /// Status before the request.
    pub previous_status: SessionStatus,
    /// Status after the request.
    pub status: SessionStatus,
    /// Human-readable outcome.
    pub message: String,
}

/// Terminates a session on behalf of its owner or an admin.
pub struct DeleteSessionUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    agent: Arc<dyn AgentService>,
}

impl DeleteSessionUseCase {
    /// Wire the workflow to its collaborators.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        agent: Arc<dyn AgentService>,
    ) -> Self {
        Self {
            sessions,
            users,
            agent,
        }
    }

    /// Stop the session's backing process and record the outcome.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for empty ids.
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Unauthorized` if the user may not access it.
    /// - `AppError::Agent` if the process could not be stopped (the session
    ///   is persisted as `Failed`).
    /// - `AppError::Db` / `AppError::Conflict` when persisting fails.
    pub async fn execute(&self, request: DeleteSessionRequest) -> Result<DeleteSessionResponse> {
        let span = info_span!("delete_session", session_id = %request.session_id, force = request.force);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: DeleteSessionRequest) -> Result<DeleteSessionResponse> {
        require_id("session_id", &request.session_id)?;
        require_id("user_id", &request.user_id)?;

        let mut session = self
            .sessions
            .find_by_id(&request.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {} not found", request.session_id)))?;
        let user =
            authorize_session_access(self.users.as_ref(), &request.user_id, &session).await?;

        let previous_status = session.status();
        if !session.can_be_terminated() {
            info!(status = %previous_status, "session already terminal");
            return Ok(DeleteSessionResponse {
                session_id: session.id,
                success: false,
                previous_status,
                status: previous_status,
                message: format!("cannot terminate session from status {previous_status}"),
            });
        }

        let outcome = match session.process().cloned() {
            Some(process) => {
                session.request_termination()?;
                session = self.sessions.update(&session).await?;
                self.terminate_process(&process, request.force).await
            }
            None => Ok(()),
        };

        match &outcome {
            Ok(()) => session.mark_stopped()?,
            Err(err) => session.mark_failed(err.to_string())?,
        }
        let session = self.sessions.update(&session).await?;

        match outcome {
            Ok(()) => {
                info!("session stopped");
                touch_last_used(self.users.as_ref(), user).await;
                let status = session.status();
                Ok(DeleteSessionResponse {
                    session_id: session.id,
                    success: true,
                    previous_status,
                    status,
                    message: "session stopped".into(),
                })
            }
            Err(err) => {
                warn!(%err, "session termination failed");
                Err(err)
            }
        }
    }

    async fn terminate_process(&self, process: &ProcessInfo, force: bool) -> Result<()> {
        let Err(stop_err) = self.agent.stop_agent(process).await else {
            return Ok(());
        };

        if !force {
            return Err(AppError::Agent(format!("graceful stop failed: {stop_err}")));
        }

        warn!(pid = process.pid, %stop_err, "graceful stop failed, killing process");
        match self.agent.kill_process(process).await {
            Ok(()) => Ok(()),
            Err(kill_err) => Err(AppError::Agent(format!(
                "graceful stop failed: {stop_err}; forced kill failed: {kill_err}"
            ))),
        }
    }
}

/// Input to [`ForceDeleteSessionUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceDeleteSessionRequest {
    /// Session to remove.
    pub session_id: String,
    /// Administrator performing the removal.
    pub admin_user_id: String,
}

/// Outcome of a force-delete.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ForceDeleteSessionResponse {
    /// Removed session.
    pub session_id: String,
    /// Status the session had when removed.
    pub previous_status: SessionStatus,
    /// Whether a kill was delivered to a backing process.
    pub process_killed: bool,
}

/// Kills a session's process and deletes its record. Admin only.
pub struct ForceDeleteSessionUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    agent: Arc<dyn AgentService>,
}

impl ForceDeleteSessionUseCase {
    /// Wire the workflow to its collaborators.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        agent: Arc<dyn AgentService>,
    ) -> Self {
        Self {
            sessions,
            users,
            agent,
        }
    }

    /// Kill the backing process of a `Starting` or `Active` session,
    /// ignoring failures, then remove the record. Terminal sessions are
    /// removed without signalling anything.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for empty ids.
    /// - `AppError::Unauthorized` unless the caller is an active admin.
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Db` if the record cannot be deleted.
    pub async fn execute(
        &self,
        request: ForceDeleteSessionRequest,
    ) -> Result<ForceDeleteSessionResponse> {
        let span = info_span!("force_delete_session", session_id = %request.session_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: ForceDeleteSessionRequest) -> Result<ForceDeleteSessionResponse> {
        require_id("session_id", &request.session_id)?;
        require_id("admin_user_id", &request.admin_user_id)?;

        let admin = require_admin(self.users.as_ref(), &request.admin_user_id).await?;
        let session = self
            .sessions
            .find_by_id(&request.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {} not found", request.session_id)))?;

        // Terminal sessions keep their last handle for audit only; that pid
        // may since have been reused by an unrelated process.
        let live_process = session.process().filter(|_| !session.is_terminal());
        let process_killed = match live_process {
            Some(process) => match self.agent.kill_process(process).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(pid = process.pid, %err, "kill failed during force delete");
                    false
                }
            },
            None => false,
        };

        self.sessions.delete(&session.id).await?;
        info!(admin = %admin.id, "session force-deleted");
        touch_last_used(self.users.as_ref(), admin).await;

        let previous_status = session.status();
        Ok(ForceDeleteSessionResponse {
            session_id: session.id,
            previous_status,
            process_killed,
        })
    }
}
