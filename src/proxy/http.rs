//! HTTP implementation of [`ProxyService`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::config::ProxyConfig;
use crate::proxy::ProxyService;
use crate::{AppError, Result};

/// Header carrying the session id on probe requests.
pub const SESSION_HEADER: &str = "x-agent-session-id";

/// Probes agents with a `GET` on their health path.
///
/// Any HTTP response counts as reachable: the probe asks whether something
/// is serving on the port, not whether the agent considers itself healthy.
#[derive(Clone)]
pub struct HttpProxyService {
    client: reqwest::Client,
    scheme: String,
    host: String,
    health_path: String,
}

impl HttpProxyService {
    /// Build a prober whose requests give up after `probe_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Proxy` if the HTTP client cannot be constructed.
    pub fn new(config: &ProxyConfig, probe_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .connect_timeout(probe_timeout)
            .build()?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            host: config.host.clone(),
            health_path: config.health_path.clone(),
        })
    }

    fn base_url(&self, port: u16) -> String {
        format!("{}://{}:{port}", self.scheme, self.host)
    }

    async fn probe(&self, session_id: &str, port: u16) -> Result<bool> {
        if port == 0 {
            return Err(AppError::Validation("cannot probe port 0".into()));
        }

        let url = format!("{}{}", self.base_url(port), self.health_path);
        match self
            .client
            .get(&url)
            .header(SESSION_HEADER, session_id)
            .send()
            .await
        {
            Ok(response) => {
                debug!(session_id, port, status = %response.status(), "session answered probe");
                Ok(true)
            }
            Err(err) if err.is_builder() => Err(AppError::Proxy(format!(
                "cannot build probe request for {url}: {err}"
            ))),
            Err(err) => {
                debug!(session_id, port, %err, "session not reachable");
                Ok(false)
            }
        }
    }
}

impl ProxyService for HttpProxyService {
    fn is_session_reachable(
        &self,
        session_id: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let session_id = session_id.to_owned();
        Box::pin(async move { self.probe(&session_id, port).await })
    }

    fn get_session_url(
        &self,
        _session_id: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            if port == 0 {
                return Err(AppError::Validation(
                    "session has no usable port".into(),
                ));
            }
            Ok(self.base_url(port))
        })
    }
}
