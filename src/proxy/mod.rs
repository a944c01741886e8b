//! Network path to session agents.
//!
//! [`ProxyService`] answers two questions for the workflows: can a
//! session's agent be reached on its port, and what URL should clients use
//! to reach it.

pub mod http;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Reachability and addressing for session agents.
pub trait ProxyService: Send + Sync {
    /// Probe whether the agent answers on `port`.
    ///
    /// An agent that is simply not listening yet is `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Proxy` when the probe itself cannot be performed.
    fn is_session_reachable(
        &self,
        session_id: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Client-facing URL of the session's agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unusable port, or
    /// `AppError::Proxy` if no URL can be produced.
    fn get_session_url(
        &self,
        session_id: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// URL returned when the proxy cannot resolve one.
#[must_use]
pub fn fallback_url(port: u16) -> String {
    format!("http://localhost:{port}")
}
