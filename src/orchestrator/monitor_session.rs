//! Health check and reconciliation of a single session.
//!
//! [`plan_reconciliation`] is the pure policy: given a session and a
//! fresh [`HealthCheckResult`] it picks at most one transition, checking
//! rules in a fixed priority order. [`MonitorSessionUseCase::reconcile`]
//! gathers the health signals, applies the plan, and persists it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::agent::AgentService;
use crate::models::health::{HealthCheckResult, ProcessStatus};
use crate::models::session::{Session, SessionStatus};
use crate::orchestrator::access::{authorize_session_access, require_id};
use crate::persistence::{SessionRepository, UserRepository};
use crate::proxy::ProxyService;
use crate::{AppError, Result};

/// Reason recorded when an active session stops answering probes.
pub const UNREACHABLE_REASON: &str = "session not reachable via HTTP";
/// Reason recorded when the backing process is a zombie.
pub const ZOMBIE_REASON: &str = "backing process is a zombie";

/// Transition chosen by the reconciliation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Mark the session `Failed` with this reason.
    Fail(String),
    /// Mark the session `Stopped`.
    Stop,
    /// Promote a `Starting` session to `Active`.
    Promote,
}

/// Choose the transition for `session` given `health`; first match wins.
///
/// 1. health-check error → `Fail` with the error text
/// 2. process `Stopped` / `NotFound` → `Stop`
/// 3. process `Zombie` → `Fail`
/// 4. `Active` and unreachable → `Fail`
/// 5. `Starting`, process `Running`, reachable → `Promote`
///
/// Terminal sessions never transition.
#[must_use]
pub fn plan_reconciliation(session: &Session, health: &HealthCheckResult) -> Option<Reconciliation> {
    if session.is_terminal() {
        return None;
    }

    if let Some(error) = &health.error {
        return Some(Reconciliation::Fail(error.clone()));
    }

    match health.process_status {
        Some(ProcessStatus::Stopped | ProcessStatus::NotFound) => {
            return Some(Reconciliation::Stop);
        }
        Some(ProcessStatus::Zombie) => return Some(Reconciliation::Fail(ZOMBIE_REASON.into())),
        Some(ProcessStatus::Running) | None => {}
    }

    if session.is_active() && !health.reachable {
        return Some(Reconciliation::Fail(UNREACHABLE_REASON.into()));
    }

    if session.is_starting()
        && health.process_status == Some(ProcessStatus::Running)
        && health.reachable
    {
        return Some(Reconciliation::Promote);
    }

    None
}

/// Input to [`MonitorSessionUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSessionRequest {
    /// Session to check.
    pub session_id: String,
    /// Requesting user.
    pub user_id: String,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSessionResponse {
    /// Session after reconciliation.
    pub session: Session,
    /// Status before reconciliation.
    pub previous_status: SessionStatus,
    /// Signals the decision was based on.
    pub health: HealthCheckResult,
    /// Whether a transition was persisted.
    pub updated: bool,
}

/// Checks a session's health and converges its recorded status.
pub struct MonitorSessionUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    agent: Arc<dyn AgentService>,
    proxy: Arc<dyn ProxyService>,
}

impl MonitorSessionUseCase {
    /// Wire the workflow to its collaborators.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        agent: Arc<dyn AgentService>,
        proxy: Arc<dyn ProxyService>,
    ) -> Self {
        Self {
            sessions,
            users,
            agent,
            proxy,
        }
    }

    /// Authorize the caller, then reconcile the session.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for empty ids.
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Unauthorized` if the user may not access it.
    /// - `AppError::Db` / `AppError::Conflict` when persisting a transition fails.
    pub async fn execute(&self, request: MonitorSessionRequest) -> Result<MonitorSessionResponse> {
        require_id("session_id", &request.session_id)?;
        require_id("user_id", &request.user_id)?;

        let session = self
            .sessions
            .find_by_id(&request.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {} not found", request.session_id)))?;
        authorize_session_access(self.users.as_ref(), &request.user_id, &session).await?;

        self.reconcile(session).await
    }

    /// Reconcile without authorization. Used by the fleet-wide driver.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` / `AppError::Conflict` when persisting a
    /// transition fails. Health-check failures are not errors; they are
    /// reported in the response and drive the policy.
    pub async fn reconcile(&self, session: Session) -> Result<MonitorSessionResponse> {
        let span = info_span!("monitor_session", session_id = %session.id);
        self.reconcile_inner(session).instrument(span).await
    }

    async fn reconcile_inner(&self, mut session: Session) -> Result<MonitorSessionResponse> {
        let previous_status = session.status();
        let health = self.check_health(&session).await;

        let Some(plan) = plan_reconciliation(&session, &health) else {
            return Ok(MonitorSessionResponse {
                session,
                previous_status,
                health,
                updated: false,
            });
        };

        match &plan {
            Reconciliation::Fail(reason) => session.mark_failed(reason.clone())?,
            Reconciliation::Stop => session.mark_stopped()?,
            Reconciliation::Promote => session.promote()?,
        }
        let session = self.sessions.update(&session).await?;

        info!(
            from = %previous_status,
            to = %session.status(),
            reason = session.failure_reason().unwrap_or_default(),
            "session reconciled"
        );

        Ok(MonitorSessionResponse {
            session,
            previous_status,
            health,
            updated: true,
        })
    }

    /// Gather process status and reachability for `session`.
    ///
    /// A non-running process short-circuits reachability to `false`
    /// without probing. Failures of either query land in `error`.
    pub async fn check_health(&self, session: &Session) -> HealthCheckResult {
        let mut health = HealthCheckResult::new();

        if let Some(process) = session.process() {
            match self.agent.get_agent_status(process).await {
                Ok(status) => health.process_status = Some(status),
                Err(err) => {
                    health.error = Some(format!("process status check failed: {err}"));
                    return health;
                }
            }
        }

        let running = health.process_status == Some(ProcessStatus::Running);
        if health.process_status.is_some() && !running {
            return health;
        }

        let should_probe = session.is_active() || (session.is_starting() && running);
        if should_probe {
            let started = Instant::now();
            match self
                .proxy
                .is_session_reachable(&session.id, session.port)
                .await
            {
                Ok(reachable) => {
                    health.reachable = reachable;
                    health.latency = Some(started.elapsed());
                }
                Err(err) => health.error = Some(format!("reachability probe failed: {err}")),
            }
        }

        health.checked_at = Utc::now();
        health
    }
}
