//! Domain model module declarations.

pub mod filter;
pub mod health;
pub mod session;
pub mod user;
