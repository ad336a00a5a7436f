use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{digest, verify_digest, zip_location, ArtifactError, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::registry::ModuleSource;

/// In-process artifact store for development and tests
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, source: &ModuleSource) -> Result<Option<ArtifactRef>, ArtifactError> {
        match source {
            ModuleSource::File { filename, bytes } => {
                let digest = digest(bytes);
                let location = zip_location(&digest);
                self.blobs
                    .write()
                    .map_err(|_| ArtifactError::Unsupported("artifact map poisoned".to_string()))?
                    .insert(location.clone(), bytes.clone());

                Ok(Some(ArtifactRef {
                    kind: ArtifactKind::Zip,
                    location,
                    filename: Some(filename.clone()),
                    digest: Some(digest),
                    size: Some(bytes.len() as u64),
                }))
            }
            ModuleSource::GitUri(uri) => Ok(Some(ArtifactRef::git(uri))),
            ModuleSource::InlineCode { .. } => Ok(None),
        }
    }

    async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        if artifact.kind == ArtifactKind::Git {
            return Err(ArtifactError::Unsupported(format!(
                "{} is a git reference and is resolved by the execution backend",
                artifact.location
            )));
        }
        let bytes = self
            .blobs
            .read()
            .map_err(|_| ArtifactError::Unsupported("artifact map poisoned".to_string()))?
            .get(&artifact.location)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(artifact.location.clone()))?;
        verify_digest(artifact, &bytes)?;
        Ok(bytes)
    }
}
