use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{Storage, StorageError};
use crate::logs::{ErrorLogEntry, ErrorQuery};
use crate::registry::{HistoryEntry, Module};

/// Process-local storage for development and tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    modules: Mutex<HashMap<String, Module>>,
    history: Mutex<Vec<HistoryEntry>>,
    errors: Mutex<Vec<ErrorLogEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StorageError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, StorageError> {
        mutex
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_modules(&self) -> Result<Vec<Module>, StorageError> {
        let modules = Self::lock(&self.modules)?;
        let mut list: Vec<Module> = modules.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn save_module(&self, module: &Module) -> Result<(), StorageError> {
        self.check_writable()?;
        Self::lock(&self.modules)?.insert(module.name.clone(), module.clone());
        Ok(())
    }

    async fn delete_module(&self, name: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        Self::lock(&self.modules)?.remove(name);
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StorageError> {
        self.check_writable()?;
        Self::lock(&self.history)?.push(entry.clone());
        Ok(())
    }

    async fn load_history(&self) -> Result<HashMap<String, Vec<HistoryEntry>>, StorageError> {
        let history = Self::lock(&self.history)?;
        let mut by_module: HashMap<String, Vec<HistoryEntry>> = HashMap::new();
        for entry in history.iter() {
            by_module.entry(entry.module.clone()).or_default().push(entry.clone());
        }
        Ok(by_module)
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<(), StorageError> {
        self.check_writable()?;
        Self::lock(&self.errors)?.push(entry.clone());
        Ok(())
    }

    async fn query_errors(&self, query: &ErrorQuery) -> Result<Vec<ErrorLogEntry>, StorageError> {
        let errors = Self::lock(&self.errors)?;
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(errors
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
