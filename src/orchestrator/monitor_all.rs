//! Fleet-wide reconciliation pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::models::filter::{SessionFilter, SortField, SortOrder};
use crate::models::session::{Session, SessionStatus};
use crate::orchestrator::monitor_session::{MonitorSessionResponse, MonitorSessionUseCase};
use crate::persistence::SessionRepository;
use crate::{AppError, Result};

/// Before/after record of one session within a pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionHealthReport {
    /// Session checked.
    pub session_id: String,
    /// Owner of the session.
    pub user_id: String,
    /// Status when the pass picked the session up.
    pub previous_status: SessionStatus,
    /// Status after reconciliation.
    pub current_status: SessionStatus,
    /// Whether a transition was persisted.
    pub updated: bool,
    /// Health-check or reconciliation error, if any.
    pub error: Option<String>,
}

/// Aggregate outcome of one pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FleetHealthReport {
    /// Sessions examined.
    pub total: usize,
    /// Sessions whose status changed.
    pub updated: usize,
    /// Sessions whose check or reconciliation failed.
    pub failed: usize,
    /// Per-session detail, in creation order.
    pub sessions: Vec<SessionHealthReport>,
    /// Pass start time.
    pub started_at: DateTime<Utc>,
    /// Pass end time.
    pub finished_at: DateTime<Utc>,
}

/// Reconciles every `Starting` and `Active` session, without authorization.
pub struct MonitorAllSessionsUseCase {
    sessions: Arc<dyn SessionRepository>,
    monitor: Arc<MonitorSessionUseCase>,
    session_timeout: Option<Duration>,
}

impl MonitorAllSessionsUseCase {
    /// Wire the pass to the repository and the single-session monitor.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionRepository>, monitor: Arc<MonitorSessionUseCase>) -> Self {
        Self {
            sessions,
            monitor,
            session_timeout: None,
        }
    }

    /// Bound the time spent reconciling any one session.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Run one pass over all non-terminal sessions.
    ///
    /// A session whose check fails or times out is recorded in the report
    /// and the pass continues.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only if the session listing itself fails.
    pub async fn execute(&self) -> Result<FleetHealthReport> {
        self.run().instrument(info_span!("monitor_all_sessions")).await
    }

    async fn run(&self) -> Result<FleetHealthReport> {
        let started_at = Utc::now();
        let filter = SessionFilter::non_terminal().sorted(SortField::CreatedAt, SortOrder::Asc);
        let (candidates, _) = self.sessions.find_with_filter(&filter).await?;

        let mut reports = Vec::with_capacity(candidates.len());
        let mut updated = 0;
        let mut failed = 0;

        for session in candidates {
            let session_id = session.id.clone();
            let user_id = session.user_id.clone();
            let previous_status = session.status();

            let report = match self.reconcile_one(session).await {
                Ok(outcome) => {
                    if outcome.updated {
                        updated += 1;
                    }
                    if outcome.health.error.is_some() {
                        failed += 1;
                    }
                    SessionHealthReport {
                        session_id,
                        user_id,
                        previous_status,
                        current_status: outcome.session.status(),
                        updated: outcome.updated,
                        error: outcome.health.error,
                    }
                }
                Err(err) => {
                    warn!(%session_id, %err, "session reconciliation failed");
                    failed += 1;
                    SessionHealthReport {
                        session_id,
                        user_id,
                        previous_status,
                        current_status: previous_status,
                        updated: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        let report = FleetHealthReport {
            total: reports.len(),
            updated,
            failed,
            sessions: reports,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            total = report.total,
            updated = report.updated,
            failed = report.failed,
            "fleet reconciliation pass complete"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, session: Session) -> Result<MonitorSessionResponse> {
        let Some(limit) = self.session_timeout else {
            return self.monitor.reconcile(session).await;
        };

        match tokio::time::timeout(limit, self.monitor.reconcile(session)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Agent(format!(
                "reconciliation timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }
}
