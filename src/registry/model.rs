use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::error::{RegistryError, RegistryResult};
use crate::artifact::ArtifactRef;
use crate::types::{ModuleEnv, VersionStatus};

/// Where a version's code lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Artifact { artifact: ArtifactRef },
    Inline { code: String, input_schema: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub label: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

impl Version {
    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Active
    }
}

/// A registered module and its versions, in upload order.
///
/// `current_version` always names the single active version (or is `None`
/// when nothing is active). `deployed_version` names the version the
/// standing deployment was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub env: ModuleEnv,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_version: Option<String>,
    pub deployed: bool,
    pub deployed_version: Option<String>,
    pub versions: Vec<Version>,
}

/// Metadata supplied alongside an upload. Missing fields fall back to the
/// module's own description and tags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionMetadata {
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
}

/// Partial update of module-level fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataPatch {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tags.is_none()
    }
}

/// Narrows a module listing. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<ModuleEnv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ModuleFilter {
    pub fn matches(&self, module: &Module) -> bool {
        if self.env.is_some_and(|env| env != module.env) {
            return false;
        }
        match self.tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => module.tags.contains(tag),
            _ => true,
        }
    }
}

/// Split a comma separated tag list, dropping blanks and duplicates
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    normalize_tags(raw.split(','))
}

pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl Module {
    pub fn new(
        name: String,
        env: ModuleEnv,
        description: Option<String>,
        tags: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            env,
            description,
            tags,
            created_at: now,
            updated_at: now,
            current_version: None,
            deployed: false,
            deployed_version: None,
            versions: Vec::new(),
        }
    }

    pub fn version(&self, label: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.label == label)
    }

    pub fn active_version(&self) -> Option<&Version> {
        self.versions.iter().find(|v| v.is_active())
    }

    /// Build an inactive version whose metadata falls back to the module's.
    pub fn new_version(
        &self,
        label: String,
        payload: Payload,
        metadata: VersionMetadata,
        now: DateTime<Utc>,
    ) -> Version {
        Version {
            label,
            status: VersionStatus::Inactive,
            created_at: now,
            payload,
            description: metadata.description.or_else(|| self.description.clone()),
            tags: metadata.tags.unwrap_or_else(|| self.tags.clone()),
        }
    }

    pub fn push_version(&mut self, version: Version, now: DateTime<Utc>) -> RegistryResult<()> {
        if self.version(&version.label).is_some() {
            return Err(RegistryError::DuplicateVersion {
                module: self.name.clone(),
                version: version.label,
            });
        }
        self.versions.push(version);
        self.updated_at = now;
        Ok(())
    }

    /// Make `label` the single active version. Returns false when it was
    /// already active and nothing changed.
    pub fn activate(&mut self, label: &str, now: DateTime<Utc>) -> RegistryResult<bool> {
        let target = self
            .versions
            .iter()
            .position(|v| v.label == label)
            .ok_or_else(|| RegistryError::version_not_found(&self.name, label))?;

        if self.versions[target].is_active() {
            return Ok(false);
        }
        if self.deployed && self.deployed_version.as_deref() != Some(label) {
            return Err(RegistryError::InvalidTransition(format!(
                "module '{}' is deployed; undeploy before switching to '{}'",
                self.name, label
            )));
        }

        for (idx, version) in self.versions.iter_mut().enumerate() {
            version.status = if idx == target {
                VersionStatus::Active
            } else {
                VersionStatus::Inactive
            };
        }
        self.current_version = Some(label.to_string());
        self.updated_at = now;
        Ok(true)
    }

    pub fn deactivate(&mut self, label: &str, now: DateTime<Utc>) -> RegistryResult<()> {
        let version = self
            .versions
            .iter_mut()
            .find(|v| v.label == label)
            .ok_or_else(|| RegistryError::version_not_found(&self.name, label))?;

        if !version.is_active() {
            return Err(RegistryError::InvalidTransition(format!(
                "version '{}' of module '{}' is not active",
                label, self.name
            )));
        }
        if self.deployed {
            return Err(RegistryError::InvalidTransition(format!(
                "module '{}' is deployed; undeploy before deactivating '{}'",
                self.name, label
            )));
        }

        version.status = VersionStatus::Inactive;
        self.current_version = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_metadata(&mut self, patch: MetadataPatch, now: DateTime<Utc>) {
        if let Some(description) = patch.description {
            let description = description.trim().to_string();
            self.description = if description.is_empty() { None } else { Some(description) };
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        self.updated_at = now;
    }

    pub fn mark_deployed(&mut self, version: &str, now: DateTime<Utc>) {
        self.deployed = true;
        self.deployed_version = Some(version.to_string());
        self.updated_at = now;
    }

    pub fn mark_undeployed(&mut self, now: DateTime<Utc>) {
        self.deployed = false;
        self.deployed_version = None;
        self.updated_at = now;
    }

    /// Structural invariants every committed snapshot must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        let active: Vec<&str> = self
            .versions
            .iter()
            .filter(|v| v.is_active())
            .map(|v| v.label.as_str())
            .collect();

        if active.len() > 1 {
            return Err(format!("module '{}' has {} active versions: {:?}", self.name, active.len(), active));
        }
        if self.current_version.as_deref() != active.first().copied() {
            return Err(format!(
                "module '{}' current version {:?} does not match active version {:?}",
                self.name,
                self.current_version,
                active.first()
            ));
        }
        if self.deployed != self.deployed_version.is_some() {
            return Err(format!("module '{}' deployed flag disagrees with deployed version", self.name));
        }

        let mut seen = BTreeSet::new();
        for version in &self.versions {
            if !seen.insert(version.label.as_str()) {
                return Err(format!("module '{}' has duplicate version '{}'", self.name, version.label));
            }
        }
        Ok(())
    }
}
