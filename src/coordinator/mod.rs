//! Deploy coordinator collaborator: starts and stops the standing execution
//! of a module version. The registry only ever talks to the trait.

pub mod http;
pub mod local;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpCoordinator;
pub use local::LocalCoordinator;

#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    #[error("runner rejected request: {0}")]
    Rejected(String),

    #[error("runner unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait DeployCoordinator: Send + Sync {
    /// Start (or replace) the standing deployment of `module` at `version`.
    /// Returns the runner's log output.
    async fn start(&self, module: &str, version: &str) -> Result<String, CoordinatorError>;

    /// Stop the standing deployment of `module`.
    async fn stop(&self, module: &str) -> Result<String, CoordinatorError>;
}
