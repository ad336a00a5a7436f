//! Artifact store collaborator: keeps uploaded zip payloads and resolves
//! artifact references back to bytes. Git sources are recorded by URI only;
//! cloning them is the execution backend's job.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::registry::ModuleSource;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Zip,
    Git,
}

/// Pointer to a stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub location: String,
    pub filename: Option<String>,
    pub digest: Option<String>,
    pub size: Option<u64>,
}

impl ArtifactRef {
    pub fn git(uri: &str) -> Self {
        Self {
            kind: ArtifactKind::Git,
            location: uri.to_string(),
            filename: None,
            digest: None,
            size: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("unsupported artifact: {0}")]
    Unsupported(String),

    #[error("artifact {location} is corrupt: expected digest {expected}, got {actual}")]
    Corrupt {
        location: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the payload of `source`. Inline sources carry their code in
    /// the version record and produce no artifact.
    async fn store(&self, source: &ModuleSource) -> Result<Option<ArtifactRef>, ArtifactError>;

    async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;
}

/// Hex SHA-256 of a payload, used as its content address
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn zip_location(digest: &str) -> String {
    format!("zip/{}.zip", digest)
}

pub(crate) fn verify_digest(artifact: &ArtifactRef, bytes: &[u8]) -> Result<(), ArtifactError> {
    if let Some(expected) = &artifact.digest {
        let actual = digest(bytes);
        if &actual != expected {
            return Err(ArtifactError::Corrupt {
                location: artifact.location.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}
