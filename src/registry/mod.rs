//! Module version registry: owns modules, their versions and the rules for
//! moving between version states. Every successful mutation is committed to
//! storage first and then recorded in the history log.

mod deploy;
pub mod error;
pub mod history;
pub mod model;
pub mod source;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::config::RegistryConfig;
use crate::coordinator::DeployCoordinator;
use crate::database::Storage;
use crate::types::{HistoryAction, ModuleEnv};

pub use error::{ErrorKind, RegistryError, RegistryResult};
pub use history::{HistoryEntry, HistoryLog};
pub use model::{parse_tags, MetadataPatch, Module, ModuleFilter, Payload, Version, VersionMetadata};
pub use source::{validate_module_name, validate_version_label, ModuleSource, SourceInput, UploadedFile};

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Upper bound on a single coordinator call
    pub deploy_timeout: Duration,
    /// Label given to the first version when registration names none
    pub default_version_label: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            deploy_timeout: Duration::from_secs(120),
            default_version_label: "0.1.0".to_string(),
        }
    }
}

impl From<&RegistryConfig> for RegistrySettings {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            deploy_timeout: Duration::from_secs(config.deploy_timeout_secs),
            default_version_label: config.default_version_label.clone(),
        }
    }
}

/// A deploy or undeploy between its validation and its commit
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub id: Uuid,
    pub action: HistoryAction,
}

pub(crate) struct ModuleSlot {
    pub module: Module,
    pub in_flight: Option<InFlight>,
    /// Set when the module is deleted, or its registration failed, while
    /// someone still holds the slot
    pub removed: bool,
}

impl ModuleSlot {
    fn new(module: Module) -> Self {
        Self {
            module,
            in_flight: None,
            removed: false,
        }
    }

    fn ensure_idle(&self) -> RegistryResult<()> {
        match &self.in_flight {
            Some(op) => Err(RegistryError::InvalidTransition(format!(
                "a {} of module '{}' is in progress",
                op.action, self.module.name
            ))),
            None => Ok(()),
        }
    }
}

pub(crate) type SlotRef = Arc<Mutex<ModuleSlot>>;

/// Persist `next` and make it the slot's state. The slot keeps its old
/// state if persisting fails.
async fn commit_slot(storage: &dyn Storage, slot: &mut ModuleSlot, next: Module) -> RegistryResult<()> {
    next.check_invariants().map_err(RegistryError::InvalidTransition)?;
    storage.save_module(&next).await?;
    slot.module = next;
    Ok(())
}

/// Registration request for a new module and its first version
#[derive(Debug, Clone)]
pub struct RegisterModule {
    pub name: String,
    pub env: ModuleEnv,
    pub source: ModuleSource,
    pub version: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Code of a version, resolved for download
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadContent {
    Archive {
        filename: String,
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Git {
        uri: String,
    },
    Inline {
        code: String,
        input_schema: Value,
    },
}

/// Lock order: the module map, then a module slot, then a history trail.
/// Code holding a slot that is reachable from the map never waits on the
/// map, and the map lock is never held across storage or coordinator calls.
pub struct Registry {
    modules: RwLock<HashMap<String, SlotRef>>,
    storage: Arc<dyn Storage>,
    artifacts: Arc<dyn ArtifactStore>,
    coordinator: Arc<dyn DeployCoordinator>,
    history: Arc<HistoryLog>,
    settings: RegistrySettings,
}

impl Registry {
    /// Load persisted modules and history and build a registry over them
    pub async fn open(
        storage: Arc<dyn Storage>,
        artifacts: Arc<dyn ArtifactStore>,
        coordinator: Arc<dyn DeployCoordinator>,
        settings: RegistrySettings,
    ) -> RegistryResult<Self> {
        let modules = storage.load_modules().await?;
        let history = storage.load_history().await?;

        let mut slots = HashMap::with_capacity(modules.len());
        for module in modules {
            if let Err(problem) = module.check_invariants() {
                warn!(module = %module.name, "Loaded module violates invariants: {}", problem);
            }
            slots.insert(module.name.clone(), Arc::new(Mutex::new(ModuleSlot::new(module))));
        }
        info!(modules = slots.len(), "Module registry loaded");

        Ok(Self {
            modules: RwLock::new(slots),
            history: Arc::new(HistoryLog::new(storage.clone(), history)),
            storage,
            artifacts,
            coordinator,
            settings,
        })
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub async fn health_check(&self) -> RegistryResult<()> {
        self.storage.health_check().await?;
        Ok(())
    }

    async fn slot(&self, name: &str) -> RegistryResult<SlotRef> {
        let modules = self.modules.read().await;
        modules
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::module_not_found(name))
    }

    async fn commit(&self, slot: &mut ModuleSlot, next: Module) -> RegistryResult<()> {
        commit_slot(self.storage.as_ref(), slot, next).await
    }

    /// Drop `name` from the map if it still points at `slot`. Call without
    /// holding the slot.
    async fn forget_slot(&self, name: &str, slot: &SlotRef) {
        let mut modules = self.modules.write().await;
        if modules.get(name).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            modules.remove(name);
        }
    }

    async fn store_payload(&self, source: &ModuleSource) -> RegistryResult<Payload> {
        match self.artifacts.store(source).await? {
            Some(artifact) => Ok(Payload::Artifact { artifact }),
            None => match source {
                ModuleSource::InlineCode { code, input_schema } => Ok(Payload::Inline {
                    code: code.clone(),
                    input_schema: input_schema.clone(),
                }),
                other => Err(RegistryError::ExternalFailure(format!(
                    "artifact store kept no reference for {} source",
                    other.kind_name()
                ))),
            },
        }
    }

    /// Modules matching `filter`, sorted by name
    pub async fn list_modules(&self, filter: &ModuleFilter) -> Vec<Module> {
        let slots: Vec<SlotRef> = self.modules.read().await.values().cloned().collect();

        let mut modules = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            if !slot.removed && filter.matches(&slot.module) {
                modules.push(slot.module.clone());
            }
        }
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    pub async fn get_module(&self, name: &str) -> RegistryResult<Module> {
        let slot = self.slot(name).await?;
        let slot = slot.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }
        Ok(slot.module.clone())
    }

    /// Versions in upload order
    pub async fn list_versions(&self, name: &str) -> RegistryResult<Vec<Version>> {
        Ok(self.get_module(name).await?.versions)
    }

    /// Create a module together with its first, inactive version
    pub async fn register_module(&self, request: RegisterModule, operator: &str) -> RegistryResult<Module> {
        validate_module_name(&request.name)?;
        let label = request
            .version
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| self.settings.default_version_label.clone());
        validate_version_label(&label)?;
        request.source.ensure_compatible(request.env)?;

        // Fail fast before touching the artifact store; re-checked below
        if self.modules.read().await.contains_key(&request.name) {
            return Err(RegistryError::DuplicateName(request.name));
        }

        let payload = self.store_payload(&request.source).await?;
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let now = Utc::now();
        let mut module = Module::new(
            request.name.clone(),
            request.env,
            description,
            model::normalize_tags(&request.tags),
            now,
        );
        let version = module.new_version(label.clone(), payload, VersionMetadata::default(), now);
        module.push_version(version, now)?;
        module.check_invariants().map_err(RegistryError::InvalidTransition)?;

        // Reserve the name with a slot we already hold, then write without
        // the map lock. Others queue on the slot until the write settles.
        let slot: SlotRef = Arc::new(Mutex::new(ModuleSlot::new(module.clone())));
        let mut guard = slot.lock().await;
        {
            let mut modules = self.modules.write().await;
            let taken = match modules.get(&request.name) {
                // A slot left behind by a delete that is still unwinding
                Some(existing) => !existing.try_lock().map(|s| s.removed).unwrap_or(false),
                None => false,
            };
            if taken {
                return Err(RegistryError::DuplicateName(request.name));
            }
            modules.insert(module.name.clone(), slot.clone());
        }

        if let Err(e) = self.storage.save_module(&module).await {
            guard.removed = true;
            drop(guard);
            self.forget_slot(&module.name, &slot).await;
            return Err(e.into());
        }

        self.history
            .append(HistoryEntry::new(&module.name, HistoryAction::Upload, Some(&label), operator))
            .await;
        drop(guard);

        info!(module = %module.name, env = %module.env, version = %label, operator, "Module registered");
        Ok(module)
    }

    /// Append a new inactive version. The first upload of a label wins.
    pub async fn upload_version(
        &self,
        name: &str,
        label: &str,
        source: ModuleSource,
        metadata: VersionMetadata,
        operator: &str,
    ) -> RegistryResult<Module> {
        validate_version_label(label)?;
        let slot = self.slot(name).await?;

        {
            let slot = slot.lock().await;
            if slot.removed {
                return Err(RegistryError::module_not_found(name));
            }
            source.ensure_compatible(slot.module.env)?;
            if slot.module.version(label).is_some() {
                return Err(RegistryError::DuplicateVersion {
                    module: name.to_string(),
                    version: label.to_string(),
                });
            }
        }

        // Stored outside the lock; artifacts are content addressed, so a
        // losing concurrent upload leaves nothing dangling but a shared blob
        let payload = self.store_payload(&source).await?;

        let mut slot = slot.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }
        let now = Utc::now();
        let mut next = slot.module.clone();
        let version = next.new_version(label.to_string(), payload, metadata, now);
        next.push_version(version, now)?;
        self.commit(&mut slot, next).await?;

        self.history
            .append(HistoryEntry::new(name, HistoryAction::Upload, Some(label), operator))
            .await;
        info!(module = %name, version = %label, operator, "Version uploaded");
        Ok(slot.module.clone())
    }

    /// Make `label` the module's current version
    pub async fn activate(&self, name: &str, label: &str, operator: &str) -> RegistryResult<Module> {
        self.switch_active(name, label, HistoryAction::Activate, operator).await
    }

    /// Return to an earlier version. Same rules as `activate`, audited as a rollback.
    pub async fn rollback(&self, name: &str, label: &str, operator: &str) -> RegistryResult<Module> {
        self.switch_active(name, label, HistoryAction::Rollback, operator).await
    }

    async fn switch_active(
        &self,
        name: &str,
        label: &str,
        action: HistoryAction,
        operator: &str,
    ) -> RegistryResult<Module> {
        let slot = self.slot(name).await?;
        let mut slot = slot.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }
        slot.ensure_idle()?;

        let mut next = slot.module.clone();
        let changed = next.activate(label, Utc::now())?;

        let mut entry = HistoryEntry::new(name, action, Some(label), operator);
        if changed {
            self.commit(&mut slot, next).await?;
        } else {
            entry = entry.with_detail("already active");
        }
        self.history.append(entry).await;

        info!(module = %name, version = %label, action = %action, changed, operator, "Active version set");
        Ok(slot.module.clone())
    }

    pub async fn deactivate(&self, name: &str, label: &str, operator: &str) -> RegistryResult<Module> {
        let slot = self.slot(name).await?;
        let mut slot = slot.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }
        slot.ensure_idle()?;

        let mut next = slot.module.clone();
        next.deactivate(label, Utc::now())?;
        self.commit(&mut slot, next).await?;

        self.history
            .append(HistoryEntry::new(name, HistoryAction::Deactivate, Some(label), operator))
            .await;
        info!(module = %name, version = %label, operator, "Version deactivated");
        Ok(slot.module.clone())
    }

    /// Edit module-level description and tags. Versions and history are untouched.
    pub async fn update_metadata(&self, name: &str, patch: MetadataPatch) -> RegistryResult<Module> {
        if patch.is_empty() {
            return Err(RegistryError::InvalidInput("nothing to update".to_string()));
        }

        let slot = self.slot(name).await?;
        let mut slot = slot.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }

        let mut next = slot.module.clone();
        next.apply_metadata(patch, Utc::now());
        self.commit(&mut slot, next).await?;
        Ok(slot.module.clone())
    }

    /// Remove a module and all of its versions. Returns the final snapshot.
    pub async fn delete_module(&self, name: &str, operator: &str) -> RegistryResult<Module> {
        let slot_ref = self.slot(name).await?;
        let mut slot = slot_ref.lock().await;
        if slot.removed {
            return Err(RegistryError::module_not_found(name));
        }
        slot.ensure_idle()?;
        if slot.module.deployed {
            return Err(RegistryError::InvalidTransition(format!(
                "module '{}' is deployed; undeploy it first",
                name
            )));
        }

        self.storage.delete_module(name).await?;
        slot.removed = true;
        self.history
            .append(HistoryEntry::new(name, HistoryAction::Delete, None, operator))
            .await;
        let module = slot.module.clone();
        drop(slot);

        self.forget_slot(name, &slot_ref).await;
        info!(module = %name, versions = module.versions.len(), operator, "Module deleted");
        Ok(module)
    }

    /// Audit trail in append order. Available after the module is deleted.
    pub async fn history(&self, name: &str) -> RegistryResult<Vec<HistoryEntry>> {
        if let Some(entries) = self.history.entries(name).await {
            return Ok(entries);
        }
        self.get_module(name).await.map(|_| Vec::new())
    }

    /// Resolve the code of a version for download
    pub async fn fetch_payload(&self, name: &str, label: &str) -> RegistryResult<PayloadContent> {
        let module = self.get_module(name).await?;
        let version = module
            .version(label)
            .ok_or_else(|| RegistryError::version_not_found(name, label))?;

        match &version.payload {
            Payload::Inline { code, input_schema } => Ok(PayloadContent::Inline {
                code: code.clone(),
                input_schema: input_schema.clone(),
            }),
            Payload::Artifact { artifact } => match artifact.kind {
                ArtifactKind::Git => Ok(PayloadContent::Git {
                    uri: artifact.location.clone(),
                }),
                ArtifactKind::Zip => {
                    let bytes = self.artifacts.fetch(artifact).await?;
                    Ok(PayloadContent::Archive {
                        filename: artifact
                            .filename
                            .clone()
                            .unwrap_or_else(|| format!("{}-{}.zip", name, label)),
                        bytes,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests;
