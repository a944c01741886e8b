//! User model consumed by authorization checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account that owns sessions or administers the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier.
    pub id: String,
    /// Display name for operators.
    pub display_name: String,
    /// Inactive users are denied every operation.
    pub is_active: bool,
    /// Administrators may access any session and force-delete records.
    pub is_admin: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last successful session operation, if any.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl User {
    /// Construct an active, non-admin user.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_active: true,
            is_admin: false,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Grant or revoke administrator rights.
    #[must_use]
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Activate or deactivate the account.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Whether the user holds administrator rights on an active account.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_active && self.is_admin
    }

    /// Whether this user may operate on a session owned by `owner_id`.
    #[must_use]
    pub fn can_access_session(&self, owner_id: &str) -> bool {
        self.is_active && (self.is_admin || self.id == owner_id)
    }

    /// Stamp the last-used timestamp.
    pub fn touch_last_used(&mut self) {
        self.last_used_at = Some(Utc::now());
    }
}
