//! Persistence layer: repository contracts and their `SQLite` adapters.
//!
//! Workflows depend only on [`SessionRepository`] and [`UserRepository`];
//! [`session_repo::SessionRepo`] and [`user_repo::UserRepo`] are the
//! `SQLite` implementations wired up by the binaries.

pub mod db;
pub mod schema;
pub mod session_repo;
pub mod user_repo;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::models::filter::SessionFilter;
use crate::models::session::Session;
use crate::models::user::User;
use crate::{AppError, Result};

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Storage contract for session records.
///
/// `update` is the serialization point for read-modify-write cycles:
/// implementations must reject an update whose `version` no longer matches
/// the stored record with `AppError::Conflict`.
pub trait SessionRepository: Send + Sync {
    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    fn save(&self, session: &Session) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>>;

    /// Persist a mutated session and return it with its bumped version.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the record is gone,
    /// `AppError::Conflict` on a stale version, or `AppError::Db`.
    fn update(&self, session: &Session)
        -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>>;

    /// Physically remove a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no record has this id.
    fn delete(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Look up a session by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Session>>> + Send + '_>>;

    /// All sessions owned by a user, in any status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>>;

    /// A page of sessions matching `filter`, plus the total match count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn find_with_filter(
        &self,
        filter: &SessionFilter,
    ) -> Pin<Box<dyn Future<Output = Result<(Vec<Session>, u64)>> + Send + '_>>;
}

/// Read-mostly contract for user records.
pub trait UserRepository: Send + Sync {
    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn find_by_id(&self, id: &str)
        -> Pin<Box<dyn Future<Output = Result<Option<User>>> + Send + '_>>;

    /// Persist changes to an existing user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user does not exist, or `AppError::Db`.
    fn update(&self, user: &User) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Parse an RFC 3339 column into a UTC timestamp.
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Parse an optional RFC 3339 column.
pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(column, s)).transpose()
}
