//! Backing-process provisioning abstraction.
//!
//! The [`AgentService`] trait decouples the session workflows from how
//! agent processes are launched, signalled, and assigned ports. The
//! [`local::LocalAgentService`] implementation runs agents as local child
//! processes; a container or pod manager would implement the same trait.

pub mod local;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::models::health::ProcessStatus;
use crate::models::session::{ProcessInfo, RepositoryInfo};
use crate::Result;

/// Everything needed to launch the backing process of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Session the process serves.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Port the agent must listen on.
    pub port: u16,
    /// Caller-supplied environment.
    pub environment: BTreeMap<String, String>,
    /// Repository to work in, if any.
    pub repository: Option<RepositoryInfo>,
}

/// Contract for starting, stopping, inspecting, and placing agent processes.
pub trait AgentService: Send + Sync {
    /// Launch the backing process for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the process cannot be started.
    fn start_agent(
        &self,
        config: &AgentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessInfo>> + Send + '_>>;

    /// Ask the process to exit and wait for it to do so.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the request fails or the process outlives
    /// the grace period.
    fn stop_agent(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forcibly terminate the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the kill signal cannot be delivered.
    fn kill_process(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Report the current status of the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the status cannot be determined.
    fn get_agent_status(
        &self,
        process: &ProcessInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessStatus>> + Send + '_>>;

    /// Lease a free port within `low..=high`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty range, or
    /// `AppError::Exhausted` when no port in the range is free.
    fn get_available_port(
        &self,
        low: u16,
        high: u16,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>>;

    /// Whether `port` can be handed to a new session right now.
    ///
    /// A `true` answer reserves the port the same way
    /// [`AgentService::get_available_port`] does, so a later allocation
    /// cannot hand it to another session.
    fn is_port_available(&self, port: u16) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}
