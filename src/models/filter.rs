//! Session query filter with pagination and sorting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::session::SessionStatus;

/// Column a session listing is ordered by.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation time.
    #[default]
    CreatedAt,
    /// Last mutation time.
    UpdatedAt,
    /// Allocated port.
    Port,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

/// Criteria for [`SessionRepository::find_with_filter`](crate::persistence::SessionRepository::find_with_filter).
///
/// Empty criteria match every session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionFilter {
    /// Accepted statuses; empty accepts all.
    pub statuses: Vec<SessionStatus>,
    /// Restrict to one owner.
    pub user_id: Option<String>,
    /// Every tag must be present with an equal value.
    pub tags: BTreeMap<String, String>,
    /// Page size; `None` returns every match.
    pub limit: Option<u32>,
    /// Rows skipped before the page.
    pub offset: u32,
    /// Ordering column.
    pub sort_by: SortField,
    /// Ordering direction.
    pub order: SortOrder,
}

impl SessionFilter {
    /// Match `Active` and `Starting` sessions.
    #[must_use]
    pub fn non_terminal() -> Self {
        Self {
            statuses: SessionStatus::NON_TERMINAL.to_vec(),
            ..Self::default()
        }
    }

    /// Add an accepted status.
    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// Restrict to one owner.
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Require a tag value.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the page window.
    #[must_use]
    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Set the ordering.
    #[must_use]
    pub fn sorted(mut self, sort_by: SortField, order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.order = order;
        self
    }
}
