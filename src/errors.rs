//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Malformed request: empty identifiers, out-of-range port, bad repository.
    Validation(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Per-user concurrent session ceiling reached.
    QuotaExceeded(String),
    /// A finite resource (such as a port) has no free capacity.
    Exhausted(String),
    /// Operation is not permitted from the entity's current lifecycle state.
    InvalidState(String),
    /// Concurrent modification detected on a versioned record.
    Conflict(String),
    /// Backing agent process failed to start, stop, or report status.
    Agent(String),
    /// Reachability probe or session URL resolution failure.
    Proxy(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error denies access rather than reporting a fault.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::QuotaExceeded(msg) => write!(f, "quota exceeded: {msg}"),
            Self::Exhausted(msg) => write!(f, "exhausted: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Proxy(msg) => write!(f, "proxy: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Proxy(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
