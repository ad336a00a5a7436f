use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::coordinator::CoordinatorError;
use crate::database::StorageError;

/// Machine-readable classification of a registry failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    DuplicateName,
    DuplicateVersion,
    InvalidSource,
    InvalidInput,
    InvalidTransition,
    UnsupportedEnv,
    ExternalFailure,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::DuplicateName => "DuplicateName",
            ErrorKind::DuplicateVersion => "DuplicateVersion",
            ErrorKind::InvalidSource => "InvalidSource",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::UnsupportedEnv => "UnsupportedEnv",
            ErrorKind::ExternalFailure => "ExternalFailure",
            ErrorKind::Storage => "Storage",
        }
    }
}

/// Registry errors with structured error types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("module '{0}' already exists")]
    DuplicateName(String),

    #[error("version '{version}' already exists for module '{module}'")]
    DuplicateVersion { module: String, version: String },

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("module '{module}' uses env '{env}', which does not support {operation}")]
    UnsupportedEnv {
        module: String,
        env: crate::types::ModuleEnv,
        operation: &'static str,
    },

    #[error("external failure: {0}")]
    ExternalFailure(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::DuplicateName(_) => ErrorKind::DuplicateName,
            RegistryError::DuplicateVersion { .. } => ErrorKind::DuplicateVersion,
            RegistryError::InvalidSource(_) => ErrorKind::InvalidSource,
            RegistryError::InvalidInput(_) => ErrorKind::InvalidInput,
            RegistryError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            RegistryError::UnsupportedEnv { .. } => ErrorKind::UnsupportedEnv,
            RegistryError::ExternalFailure(_) => ErrorKind::ExternalFailure,
            RegistryError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn module_not_found(name: &str) -> Self {
        RegistryError::NotFound(format!("module '{}'", name))
    }

    pub(crate) fn version_not_found(name: &str, version: &str) -> Self {
        RegistryError::NotFound(format!("version '{}' of module '{}'", version, name))
    }
}

impl From<ArtifactError> for RegistryError {
    fn from(err: ArtifactError) -> Self {
        RegistryError::ExternalFailure(format!("artifact store: {}", err))
    }
}

impl From<CoordinatorError> for RegistryError {
    fn from(err: CoordinatorError) -> Self {
        RegistryError::ExternalFailure(format!("deploy coordinator: {}", err))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
