use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::error;
use uuid::Uuid;

use crate::database::Storage;
use crate::types::{HistoryAction, Outcome};

/// One audited lifecycle action. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub module: String,
    pub action: HistoryAction,
    pub version: Option<String>,
    pub operator: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl HistoryEntry {
    /// A succeeded entry; the timestamp is assigned on append.
    pub fn new(module: &str, action: HistoryAction, version: Option<&str>, operator: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            module: module.to_string(),
            action,
            version: version.map(str::to_string),
            operator: operator.to_string(),
            timestamp: Utc::now(),
            outcome: Outcome::Succeeded,
            detail: None,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

type Trail = Arc<Mutex<Vec<HistoryEntry>>>;

/// Per-module audit trail. Entries outlive the module they describe.
/// Appends to one module never wait on another module's storage write.
pub struct HistoryLog {
    trails: RwLock<HashMap<String, Trail>>,
    storage: Arc<dyn Storage>,
}

impl HistoryLog {
    pub fn new(storage: Arc<dyn Storage>, loaded: HashMap<String, Vec<HistoryEntry>>) -> Self {
        let trails = loaded
            .into_iter()
            .map(|(module, entries)| (module, Arc::new(Mutex::new(entries))))
            .collect();
        Self {
            trails: RwLock::new(trails),
            storage,
        }
    }

    async fn trail(&self, module: &str) -> Trail {
        if let Some(trail) = self.trails.read().await.get(module) {
            return trail.clone();
        }
        self.trails.write().await.entry(module.to_string()).or_default().clone()
    }

    /// Stamp and append `entry`. Timestamps never go backwards within a
    /// module even if the wall clock does.
    pub async fn append(&self, mut entry: HistoryEntry) -> HistoryEntry {
        let trail = self.trail(&entry.module).await;
        let mut trail = trail.lock().await;

        let now = Utc::now();
        entry.timestamp = match trail.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        // The state change this entry describes is already committed; a
        // lost audit row is logged rather than failing the operation.
        if let Err(e) = self.storage.append_history(&entry).await {
            error!(
                module = %entry.module,
                action = %entry.action,
                error = %e,
                "Failed to persist history entry"
            );
        }

        trail.push(entry.clone());
        entry
    }

    pub async fn entries(&self, module: &str) -> Option<Vec<HistoryEntry>> {
        let trail = self.trails.read().await.get(module).cloned()?;
        let trail = trail.lock().await;
        (!trail.is_empty()).then(|| trail.clone())
    }
}
