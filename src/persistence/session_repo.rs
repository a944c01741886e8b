//! Session repository for `SQLite` persistence.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::{QueryBuilder, Sqlite};

use crate::models::filter::{SessionFilter, SortField, SortOrder};
use crate::models::session::{
    ProcessInfo, RepositoryInfo, Session, SessionState, SessionStatus,
};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp, SessionRepository};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    port: i64,
    environment: String,
    tags: String,
    repository: Option<String>,
    status: String,
    process_info: Option<String>,
    failure_reason: Option<String>,
    termination_requested_at: Option<String>,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<Session> {
        let status = SessionStatus::parse(&self.status)
            .map_err(|e| AppError::Db(format!("session {}: {e}", self.id)))?;
        let port = u16::try_from(self.port)
            .map_err(|_| AppError::Db(format!("invalid port: {}", self.port)))?;
        let environment: BTreeMap<String, String> = serde_json::from_str(&self.environment)
            .map_err(|e| AppError::Db(format!("invalid environment: {e}")))?;
        let tags: BTreeMap<String, String> = serde_json::from_str(&self.tags)
            .map_err(|e| AppError::Db(format!("invalid tags: {e}")))?;
        let repository: Option<RepositoryInfo> = self
            .repository
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid repository: {e}")))?;
        let process: Option<ProcessInfo> = self
            .process_info
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid process_info: {e}")))?;

        let state = match status {
            SessionStatus::Starting => SessionState::Starting { process },
            SessionStatus::Active => SessionState::Active {
                process: process.ok_or_else(|| {
                    AppError::Db(format!("active session {} has no process_info", self.id))
                })?,
            },
            SessionStatus::Stopped => SessionState::Stopped { process },
            SessionStatus::Failed => SessionState::Failed {
                reason: self.failure_reason.unwrap_or_default(),
                process,
            },
        };

        let termination_requested_at = parse_optional_timestamp(
            "termination_requested_at",
            self.termination_requested_at.as_deref(),
        )?;
        let created_at = parse_timestamp("created_at", &self.created_at)?;
        let updated_at = parse_timestamp("updated_at", &self.updated_at)?;

        let id = self.id;
        Session::restore(
            id.clone(),
            self.user_id,
            port,
            environment,
            tags,
            repository,
            state,
            termination_requested_at,
            created_at,
            updated_at,
            self.version,
        )
        .map_err(|e| AppError::Db(format!("corrupt session {id}: {e}")))
    }
}

/// Column values for the mutable part of a session.
struct EncodedSession {
    environment: String,
    tags: String,
    repository: Option<String>,
    status: &'static str,
    process_info: Option<String>,
    failure_reason: Option<String>,
    termination_requested_at: Option<String>,
    updated_at: String,
}

impl EncodedSession {
    fn from_session(session: &Session) -> Result<Self> {
        let environment = serde_json::to_string(&session.environment)
            .map_err(|e| AppError::Db(format!("serialize environment: {e}")))?;
        let tags = serde_json::to_string(&session.tags)
            .map_err(|e| AppError::Db(format!("serialize tags: {e}")))?;
        let repository = session
            .repository
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Db(format!("serialize repository: {e}")))?;
        let process_info = session
            .process()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Db(format!("serialize process_info: {e}")))?;

        Ok(Self {
            environment,
            tags,
            repository,
            status: session.status().as_str(),
            process_info,
            failure_reason: session.failure_reason().map(str::to_owned),
            termination_requested_at: session.termination_requested_at.map(|t| t.to_rfc3339()),
            updated_at: session.updated_at.to_rfc3339(),
        })
    }
}

/// Append `WHERE` clauses for every criterion in `filter`.
fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &SessionFilter) {
    query.push(" WHERE 1 = 1");

    if !filter.statuses.is_empty() {
        query.push(" AND status IN (");
        let mut statuses = query.separated(", ");
        for status in &filter.statuses {
            statuses.push_bind(status.as_str().to_owned());
        }
        statuses.push_unseparated(")");
    }

    if let Some(user_id) = &filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id.clone());
    }

    for (key, value) in &filter.tags {
        query
            .push(" AND EXISTS (SELECT 1 FROM json_each(session.tags) WHERE json_each.key = ")
            .push_bind(key.clone())
            .push(" AND json_each.value = ")
            .push_bind(value.clone())
            .push(")");
    }
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::CreatedAt => "created_at",
        SortField::UpdatedAt => "updated_at",
        SortField::Port => "port",
    }
}

fn sort_direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let encoded = EncodedSession::from_session(session)?;

        sqlx::query(
            "INSERT INTO session (id, user_id, port, environment, tags, repository, status,
             process_info, failure_reason, termination_requested_at, created_at, updated_at,
             version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(i64::from(session.port))
        .bind(&encoded.environment)
        .bind(&encoded.tags)
        .bind(&encoded.repository)
        .bind(encoded.status)
        .bind(&encoded.process_info)
        .bind(&encoded.failure_reason)
        .bind(&encoded.termination_requested_at)
        .bind(session.created_at.to_rfc3339())
        .bind(&encoded.updated_at)
        .bind(session.version)
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Write the mutable columns if the stored version still matches.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the record is gone, `AppError::Conflict`
    /// if another writer bumped the version first, or `AppError::Db`.
    pub async fn update_versioned(&self, session: &Session) -> Result<Session> {
        let encoded = EncodedSession::from_session(session)?;

        let result = sqlx::query(
            "UPDATE session SET environment = ?1, tags = ?2, repository = ?3, status = ?4,
             process_info = ?5, failure_reason = ?6, termination_requested_at = ?7,
             updated_at = ?8, version = version + 1
             WHERE id = ?9 AND version = ?10",
        )
        .bind(&encoded.environment)
        .bind(&encoded.tags)
        .bind(&encoded.repository)
        .bind(encoded.status)
        .bind(&encoded.process_info)
        .bind(&encoded.failure_reason)
        .bind(&encoded.termination_requested_at)
        .bind(&encoded.updated_at)
        .bind(&session.id)
        .bind(session.version)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(&session.id).await? {
                None => Err(AppError::NotFound(format!("session {} not found", session.id))),
                Some(stored) => Err(AppError::Conflict(format!(
                    "session {} was modified concurrently (expected version {}, found {})",
                    session.id, session.version, stored.version
                ))),
            };
        }

        let mut updated = session.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the row is corrupt.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// List every session owned by `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM session WHERE user_id = ?1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Run a filtered, paginated, sorted listing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if either query fails.
    pub async fn list_filtered(&self, filter: &SessionFilter) -> Result<(Vec<Session>, u64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM session");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.as_ref())
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM session");
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY ")
            .push(sort_column(filter.sort_by))
            .push(" ")
            .push(sort_direction(filter.order))
            .push(", id ASC");

        match filter.limit {
            Some(limit) => {
                query
                    .push(" LIMIT ")
                    .push_bind(i64::from(limit))
                    .push(" OFFSET ")
                    .push_bind(i64::from(filter.offset));
            }
            None if filter.offset > 0 => {
                query
                    .push(" LIMIT -1 OFFSET ")
                    .push_bind(i64::from(filter.offset));
            }
            None => {}
        }

        let rows: Vec<SessionRow> = query
            .build_query_as()
            .fetch_all(self.db.as_ref())
            .await?;
        let sessions = rows
            .into_iter()
            .map(SessionRow::into_session)
            .collect::<Result<Vec<_>>>()?;

        Ok((sessions, u64::try_from(total).unwrap_or_default()))
    }

    /// Physically delete a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if nothing was deleted.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        Ok(())
    }
}

impl SessionRepository for SessionRepo {
    fn save(&self, session: &Session) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>> {
        let session = session.clone();
        Box::pin(async move { self.create(&session).await })
    }

    fn update(
        &self,
        session: &Session,
    ) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>> {
        let session = session.clone();
        Box::pin(async move { self.update_versioned(&session).await })
    }

    fn delete(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move { self.remove(&id).await })
    }

    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Session>>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move { self.get_by_id(&id).await })
    }

    fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>> {
        let user_id = user_id.to_owned();
        Box::pin(async move { self.list_by_user(&user_id).await })
    }

    fn find_with_filter(
        &self,
        filter: &SessionFilter,
    ) -> Pin<Box<dyn Future<Output = Result<(Vec<Session>, u64)>> + Send + '_>> {
        let filter = filter.clone();
        Box::pin(async move { self.list_filtered(&filter).await })
    }
}
