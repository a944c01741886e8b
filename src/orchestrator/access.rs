//! Request validation and authorization shared by the session workflows.
//!
//! Everything here runs before any side effect: a request that fails
//! these checks never touches the allocator, the agent service, or the
//! session record.

use std::collections::BTreeMap;

use tracing::warn;

use crate::models::session::Session;
use crate::models::user::User;
use crate::persistence::UserRepository;
use crate::{AppError, Result};

/// Reject empty or whitespace-only identifiers.
///
/// # Errors
///
/// Returns `AppError::Validation` naming the offending field.
pub fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reject port 0; every other `u16` is a valid port.
///
/// # Errors
///
/// Returns `AppError::Validation` for port 0.
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(AppError::Validation(
            "port must be between 1 and 65535".into(),
        ));
    }
    Ok(())
}

/// Reject environment names a process environment cannot carry.
///
/// # Errors
///
/// Returns `AppError::Validation` for empty names or names containing `=` or NUL.
pub fn validate_environment(environment: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in environment {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(AppError::Validation(format!(
                "invalid environment variable name: {key:?}"
            )));
        }
        if value.contains('\0') {
            return Err(AppError::Validation(format!(
                "environment variable {key} contains a NUL byte"
            )));
        }
    }
    Ok(())
}

/// Load a user who must exist and be active.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown user and
/// `AppError::Unauthorized` for an inactive one.
pub async fn load_active_user(users: &dyn UserRepository, user_id: &str) -> Result<User> {
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

    if !user.is_active {
        return Err(AppError::Unauthorized(format!("user {user_id} is inactive")));
    }
    Ok(user)
}

/// Authorize `user_id` against the owner of `session`, failing closed.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` if the user is unknown, inactive, or
/// may not access the session; `AppError::Db` if the lookup itself fails.
pub async fn authorize_session_access(
    users: &dyn UserRepository,
    user_id: &str,
    session: &Session,
) -> Result<User> {
    let Some(user) = users.find_by_id(user_id).await? else {
        return Err(AppError::Unauthorized(format!("user {user_id} not recognized")));
    };

    if !user.can_access_session(&session.user_id) {
        return Err(AppError::Unauthorized(format!(
            "user {user_id} may not access session {}",
            session.id
        )));
    }
    Ok(user)
}

/// Load a user who must be an active administrator.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` unless the user exists, is active, and is an admin.
pub async fn require_admin(users: &dyn UserRepository, user_id: &str) -> Result<User> {
    let Some(user) = users.find_by_id(user_id).await? else {
        return Err(AppError::Unauthorized(format!("user {user_id} not recognized")));
    };

    if !user.is_admin() {
        return Err(AppError::Unauthorized(format!(
            "user {user_id} is not an administrator"
        )));
    }
    Ok(user)
}

/// Stamp the user's last-used time; failures are logged and swallowed.
pub async fn touch_last_used(users: &dyn UserRepository, mut user: User) {
    user.touch_last_used();
    if let Err(err) = users.update(&user).await {
        warn!(user_id = %user.id, %err, "failed to update user last-used timestamp");
    }
}
