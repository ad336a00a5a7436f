//! Durable state behind the registry: module snapshots, the history trail
//! and the error log.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::logs::{ErrorLogEntry, ErrorQuery};
use crate::registry::{HistoryEntry, Module};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("snapshot encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_modules(&self) -> Result<Vec<Module>, StorageError>;

    /// Insert or replace the full snapshot of a module
    async fn save_module(&self, module: &Module) -> Result<(), StorageError>;

    async fn delete_module(&self, name: &str) -> Result<(), StorageError>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StorageError>;

    /// History per module name, each list in append order
    async fn load_history(&self) -> Result<HashMap<String, Vec<HistoryEntry>>, StorageError>;

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<(), StorageError>;

    /// Matching entries, newest first
    async fn query_errors(&self, query: &ErrorQuery) -> Result<Vec<ErrorLogEntry>, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
