#![forbid(unsafe_code)]

pub mod agent;
pub mod app;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod proxy;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
