//! User repository for `SQLite` persistence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::models::user::User;
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp, UserRepository};

/// Repository wrapper around `SQLite` for user accounts.
#[derive(Clone)]
pub struct UserRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    display_name: String,
    is_active: i64,
    is_admin: i64,
    created_at: String,
    last_used_at: Option<String>,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            display_name: self.display_name,
            is_active: self.is_active != 0,
            is_admin: self.is_admin != 0,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            last_used_at: parse_optional_timestamp("last_used_at", self.last_used_at.as_deref())?,
        })
    }
}

impl UserRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a user, or overwrite the existing record with the same id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn save(&self, user: &User) -> Result<User> {
        sqlx::query(
            "INSERT INTO user_account (id, display_name, is_active, is_admin, created_at,
             last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
             is_active = excluded.is_active, is_admin = excluded.is_admin,
             last_used_at = excluded.last_used_at",
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(i64::from(user.is_active))
        .bind(i64::from(user.is_admin))
        .bind(user.created_at.to_rfc3339())
        .bind(user.last_used_at.map(|t| t.to_rfc3339()))
        .execute(self.db.as_ref())
        .await?;

        Ok(user.clone())
    }

    /// Retrieve a user by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM user_account WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(UserRow::into_user).transpose()
    }

    /// Overwrite the mutable columns of an existing user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such user exists, or `AppError::Db`.
    pub async fn update_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_account SET display_name = ?1, is_active = ?2, is_admin = ?3,
             last_used_at = ?4 WHERE id = ?5",
        )
        .bind(&user.display_name)
        .bind(i64::from(user.is_active))
        .bind(i64::from(user.is_admin))
        .bind(user.last_used_at.map(|t| t.to_rfc3339()))
        .bind(&user.id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {} not found", user.id)));
        }
        Ok(())
    }

    /// List every user, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM user_account ORDER BY id")
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter().map(UserRow::into_user).collect()
    }
}

impl UserRepository for UserRepo {
    fn find_by_id(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<User>>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move { self.get_by_id(&id).await })
    }

    fn update(&self, user: &User) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let user = user.clone();
        Box::pin(async move { self.update_user(&user).await })
    }
}
