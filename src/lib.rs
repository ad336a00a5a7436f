pub mod app;
pub mod artifact;
pub mod auth;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logs;
pub mod middleware;
pub mod registry;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use app::{router, AppState};
