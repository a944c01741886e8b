//! Read-only session queries.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::models::filter::SessionFilter;
use crate::models::session::Session;
use crate::orchestrator::access::{authorize_session_access, require_id};
use crate::persistence::{SessionRepository, UserRepository};
use crate::proxy::{fallback_url, ProxyService};
use crate::{AppError, Result};

/// Input to [`GetSessionUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSessionRequest {
    /// Session to fetch.
    pub session_id: String,
    /// Requesting user.
    pub user_id: String,
}

/// A session together with the URL clients should use.
#[derive(Debug, Clone, Serialize)]
pub struct GetSessionResponse {
    /// The stored session.
    pub session: Session,
    /// Client-facing URL.
    pub url: String,
}

/// Fetches one session on behalf of its owner or an admin.
pub struct GetSessionUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    proxy: Arc<dyn ProxyService>,
}

impl GetSessionUseCase {
    /// Wire the query to its collaborators.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        proxy: Arc<dyn ProxyService>,
    ) -> Self {
        Self {
            sessions,
            users,
            proxy,
        }
    }

    /// Fetch an authorized session and resolve its URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for empty ids, `AppError::NotFound` for
    /// an unknown session, and `AppError::Unauthorized` when access is denied.
    pub async fn execute(&self, request: GetSessionRequest) -> Result<GetSessionResponse> {
        require_id("session_id", &request.session_id)?;
        require_id("user_id", &request.user_id)?;

        let session = self
            .sessions
            .find_by_id(&request.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {} not found", request.session_id)))?;
        authorize_session_access(self.users.as_ref(), &request.user_id, &session).await?;

        let url = match self.proxy.get_session_url(&session.id, session.port).await {
            Ok(url) => url,
            Err(err) => {
                warn!(session_id = %session.id, %err, "session url unavailable, using fallback");
                fallback_url(session.port)
            }
        };

        Ok(GetSessionResponse { session, url })
    }
}

/// Input to [`ListSessionsUseCase::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSessionsRequest {
    /// Requesting user.
    pub user_id: String,
    /// Criteria; the owner criterion is forced for non-admins.
    pub filter: SessionFilter,
}

/// One page of sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Matching sessions in the requested order.
    pub sessions: Vec<Session>,
    /// Matches across all pages.
    pub total: u64,
}

/// Lists sessions; non-admins only ever see their own.
pub struct ListSessionsUseCase {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
}

impl ListSessionsUseCase {
    /// Wire the query to its collaborators.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionRepository>, users: Arc<dyn UserRepository>) -> Self {
        Self { sessions, users }
    }

    /// List one page of sessions visible to the user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty user id and
    /// `AppError::Unauthorized` for an unknown or inactive user.
    pub async fn execute(&self, request: ListSessionsRequest) -> Result<ListSessionsResponse> {
        require_id("user_id", &request.user_id)?;

        let user = self
            .users
            .find_by_id(&request.user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| {
                AppError::Unauthorized(format!("user {} not recognized", request.user_id))
            })?;

        let mut filter = request.filter;
        if !user.is_admin() {
            filter.user_id = Some(user.id);
        }

        let (sessions, total) = self.sessions.find_with_filter(&filter).await?;
        Ok(ListSessionsResponse { sessions, total })
    }
}
