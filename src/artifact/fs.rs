use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{digest, verify_digest, zip_location, ArtifactError, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::registry::ModuleSource;

/// Content-addressed artifact store rooted at a local directory
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, artifact: &ArtifactRef) -> Result<PathBuf, ArtifactError> {
        // Only locations this store produced are accepted
        let expected = artifact.digest.as_deref().map(zip_location);
        if expected.as_deref() != Some(artifact.location.as_str()) {
            return Err(ArtifactError::NotFound(artifact.location.clone()));
        }
        Ok(self.root.join(&artifact.location))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, source: &ModuleSource) -> Result<Option<ArtifactRef>, ArtifactError> {
        match source {
            ModuleSource::File { filename, bytes } => {
                let digest = digest(bytes);
                let location = zip_location(&digest);
                let path = self.root.join(&location);

                if tokio::fs::try_exists(&path).await? {
                    info!("Artifact {} already stored", digest);
                } else {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    // Write then rename so readers never see a partial file
                    let tmp = path.with_extension(format!("zip.{}.tmp", uuid::Uuid::new_v4().simple()));
                    tokio::fs::write(&tmp, bytes).await?;
                    tokio::fs::rename(&tmp, &path).await?;
                    info!("Stored artifact {} ({} bytes)", location, bytes.len());
                }

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

        let path = self.resolve(artifact)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(artifact.location.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        verify_digest(artifact, &bytes)?;
        Ok(bytes)
    }
}
