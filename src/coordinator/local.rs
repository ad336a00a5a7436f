use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use super::{CoordinatorError, DeployCoordinator};

/// In-process coordinator used when no runner service is configured.
/// Tracks which version of each module is "running" without executing it.
#[derive(Default)]
pub struct LocalCoordinator {
    running: Mutex<HashMap<String, String>>,
}

impl LocalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self, module: &str) -> Option<String> {
        self.running.lock().ok()?.get(module).cloned()
    }
}

#[async_trait]
impl DeployCoordinator for LocalCoordinator {
    async fn start(&self, module: &str, version: &str) -> Result<String, CoordinatorError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| CoordinatorError::Rejected("coordinator state poisoned".to_string()))?;

        let log = match running.insert(module.to_string(), version.to_string()) {
            Some(previous) => format!("started {}@{} (replaced {})", module, version, previous),
            None => format!("started {}@{}", module, version),
        };
        info!("{}", log);
        Ok(log)
    }

    async fn stop(&self, module: &str) -> Result<String, CoordinatorError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| CoordinatorError::Rejected("coordinator state poisoned".to_string()))?;

        let log = match running.remove(module) {
            Some(version) => format!("stopped {}@{}", module, version),
            None => format!("{} was not running", module),
        };
        info!("{}", log);
        Ok(log)
    }
}
