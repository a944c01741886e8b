//! Session workflows.
//!
//! Each workflow is a use-case struct wired to the repository, agent, and
//! proxy traits, so it runs unchanged against the `SQLite` adapters or
//! test doubles.

pub mod access;
pub mod create_session;
pub mod delete_session;
pub mod monitor_all;
pub mod monitor_session;
pub mod query;
pub mod reconciler;
