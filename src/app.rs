//! Shared wiring of repositories, collaborators, and workflows.

use std::sync::Arc;

use crate::agent::local::{LocalAgentService, LocalSpawnConfig};
use crate::agent::AgentService;
use crate::config::GlobalConfig;
use crate::orchestrator::create_session::{CreateSessionOptions, CreateSessionUseCase};
use crate::orchestrator::delete_session::{DeleteSessionUseCase, ForceDeleteSessionUseCase};
use crate::orchestrator::monitor_all::MonitorAllSessionsUseCase;
use crate::orchestrator::monitor_session::MonitorSessionUseCase;
use crate::orchestrator::query::{GetSessionUseCase, ListSessionsUseCase};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::user_repo::UserRepo;
use crate::persistence::{SessionRepository, UserRepository};
use crate::proxy::http::HttpProxyService;
use crate::proxy::ProxyService;
use crate::Result;

/// Everything a binary needs to run the session workflows.
#[derive(Clone)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Database pool.
    pub db: Arc<Database>,
    /// Session store.
    pub sessions: Arc<dyn SessionRepository>,
    /// User store, concrete so administrative tools can create accounts.
    pub users: Arc<UserRepo>,
    /// Backing-process provisioner.
    pub agent: Arc<dyn AgentService>,
    /// Reachability prober.
    pub proxy: Arc<dyn ProxyService>,
}

impl AppState {
    /// Wire the SQLite repositories, the local agent service, and the HTTP prober.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Proxy` if the HTTP client cannot be built.
    pub fn new(config: Arc<GlobalConfig>, db: Arc<Database>) -> Result<Self> {
        let proxy = HttpProxyService::new(&config.proxy, config.probe_timeout())?;
        let agent = LocalAgentService::new(LocalSpawnConfig::from_config(&config));

        Ok(Self {
            sessions: Arc::new(SessionRepo::new(Arc::clone(&db))),
            users: Arc::new(UserRepo::new(Arc::clone(&db))),
            agent: Arc::new(agent),
            proxy: Arc::new(proxy),
            config,
            db,
        })
    }

    fn user_repository(&self) -> Arc<dyn UserRepository> {
        Arc::clone(&self.users) as Arc<dyn UserRepository>
    }

    /// Create-and-start workflow.
    #[must_use]
    pub fn create_session(&self) -> CreateSessionUseCase {
        CreateSessionUseCase::new(
            Arc::clone(&self.sessions),
            self.user_repository(),
            Arc::clone(&self.agent),
            Arc::clone(&self.proxy),
            CreateSessionOptions::from_config(&self.config),
        )
    }

    /// Self-service termination workflow.
    #[must_use]
    pub fn delete_session(&self) -> DeleteSessionUseCase {
        DeleteSessionUseCase::new(
            Arc::clone(&self.sessions),
            self.user_repository(),
            Arc::clone(&self.agent),
        )
    }

    /// Admin force-delete workflow.
    #[must_use]
    pub fn force_delete_session(&self) -> ForceDeleteSessionUseCase {
        ForceDeleteSessionUseCase::new(
            Arc::clone(&self.sessions),
            self.user_repository(),
            Arc::clone(&self.agent),
        )
    }

    /// Single-session monitor.
    #[must_use]
    pub fn monitor_session(&self) -> MonitorSessionUseCase {
        MonitorSessionUseCase::new(
            Arc::clone(&self.sessions),
            self.user_repository(),
            Arc::clone(&self.agent),
            Arc::clone(&self.proxy),
        )
    }

    /// Fleet-wide pass with the configured per-session deadline.
    #[must_use]
    pub fn monitor_all(&self) -> MonitorAllSessionsUseCase {
        MonitorAllSessionsUseCase::new(Arc::clone(&self.sessions), Arc::new(self.monitor_session()))
            .with_session_timeout(self.config.session_timeout())
    }

    /// Authorized single-session lookup.
    #[must_use]
    pub fn get_session(&self) -> GetSessionUseCase {
        GetSessionUseCase::new(
            Arc::clone(&self.sessions),
            self.user_repository(),
            Arc::clone(&self.proxy),
        )
    }

    /// Scoped session listing.
    #[must_use]
    pub fn list_sessions(&self) -> ListSessionsUseCase {
        ListSessionsUseCase::new(Arc::clone(&self.sessions), self.user_repository())
    }
}
