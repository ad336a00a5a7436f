//! Error log: failed API requests, kept for operators to inspect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::database::{Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: Uuid,
    pub code: String,
    pub message: String,
    pub dev_message: Option<String>,
    pub url: Option<String>,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(
        code: String,
        message: String,
        dev_message: Option<String>,
        url: Option<String>,
        user: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            message,
            dev_message,
            url,
            user,
            created_at: Utc::now(),
        }
    }
}

/// Filters for `GET /api/logs/errors`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorQuery {
    pub code: Option<String>,
    pub user: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ErrorQuery {
    pub fn matches(&self, entry: &ErrorLogEntry) -> bool {
        self.code.as_ref().map_or(true, |c| &entry.code == c)
            && self.user.as_ref().map_or(true, |u| entry.user.as_ref() == Some(u))
            && self.since.map_or(true, |s| entry.created_at >= s)
            && self.until.map_or(true, |u| entry.created_at <= u)
    }
}

pub struct ErrorLog {
    storage: Arc<dyn Storage>,
    max_limit: u32,
}

impl ErrorLog {
    pub fn new(storage: Arc<dyn Storage>, max_limit: u32) -> Self {
        Self { storage, max_limit }
    }

    /// Best effort. A lost log line must never turn into a second failure.
    pub async fn record(&self, entry: ErrorLogEntry) {
        if let Err(e) = self.storage.record_error(&entry).await {
            warn!(code = %entry.code, error = %e, "Failed to record error log entry");
        }
    }

    pub async fn query(&self, mut query: ErrorQuery) -> Result<Vec<ErrorLogEntry>, StorageError> {
        let limit = query.limit.unwrap_or(self.max_limit).clamp(1, self.max_limit.max(1));
        query.limit = Some(limit);
        self.storage.query_errors(&query).await
    }
}
