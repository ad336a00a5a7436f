//! Test wiring: a registry over in-memory collaborators and a coordinator
//! whose behaviour tests can script.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::artifact::MemoryArtifactStore;
use crate::coordinator::{CoordinatorError, DeployCoordinator, LocalCoordinator};
use crate::database::MemoryStorage;
use crate::registry::{ModuleSource, RegisterModule, Registry, RegistrySettings};
use crate::types::ModuleEnv;

/// What the next coordinator calls do
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(String),
    Delay(Duration),
    Hang,
}

pub struct ScriptedCoordinator {
    start_script: Mutex<Script>,
    stop_script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    entered: Notify,
    inner: LocalCoordinator,
}

impl Default for ScriptedCoordinator {
    fn default() -> Self {
        Self {
            start_script: Mutex::new(Script::Succeed),
            stop_script: Mutex::new(Script::Succeed),
            calls: Mutex::new(Vec::new()),
            entered: Notify::new(),
            inner: LocalCoordinator::new(),
        }
    }
}

impl ScriptedCoordinator {
    pub fn script_start(&self, script: Script) {
        *self.start_script.lock().unwrap() = script;
    }

    pub fn script_stop(&self, script: Script) {
        *self.stop_script.lock().unwrap() = script;
    }

    /// Calls seen so far, e.g. `start m1@1.0.0`, `stop m1`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn running(&self, module: &str) -> Option<String> {
        self.inner.running(module)
    }

    /// Resolves once a coordinator call has been entered
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    async fn play(&self, script: Script) -> Result<(), CoordinatorError> {
        self.entered.notify_one();
        match script {
            Script::Succeed => Ok(()),
            Script::Fail(reason) => Err(CoordinatorError::Rejected(reason)),
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl DeployCoordinator for ScriptedCoordinator {
    async fn start(&self, module: &str, version: &str) -> Result<String, CoordinatorError> {
        self.calls.lock().unwrap().push(format!("start {}@{}", module, version));
        let script = self.start_script.lock().unwrap().clone();
        self.play(script).await?;
        self.inner.start(module, version).await
    }

    async fn stop(&self, module: &str) -> Result<String, CoordinatorError> {
        self.calls.lock().unwrap().push(format!("stop {}", module));
        let script = self.stop_script.lock().unwrap().clone();
        self.play(script).await?;
        self.inner.stop(module).await
    }
}

pub struct TestContext {
    pub registry: Arc<Registry>,
    pub storage: Arc<MemoryStorage>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub coordinator: Arc<ScriptedCoordinator>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_timeout(deploy_timeout: Duration) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let coordinator = Arc::new(ScriptedCoordinator::default());
        let settings = RegistrySettings {
            deploy_timeout,
            ..RegistrySettings::default()
        };

        let registry = Registry::open(storage.clone(), artifacts.clone(), coordinator.clone(), settings)
            .await
            .expect("open registry over memory storage");

        Self {
            registry: Arc::new(registry),
            storage,
            artifacts,
            coordinator,
        }
    }

    /// A fresh registry over the same storage, as after a restart
    pub async fn reopen(&self) -> Registry {
        Registry::open(
            self.storage.clone(),
            self.artifacts.clone(),
            self.coordinator.clone(),
            self.registry.settings().clone(),
        )
        .await
        .expect("reopen registry")
    }

    pub async fn register(&self, name: &str, env: ModuleEnv, version: &str) {
        self.registry
            .register_module(
                RegisterModule {
                    name: name.to_string(),
                    env,
                    source: source_for(env),
                    version: Some(version.to_string()),
                    description: Some(format!("{} test module", name)),
                    tags: vec!["test".to_string()],
                },
                "admin",
            )
            .await
            .expect("register module");
    }
}

pub fn zip_source(seed: &str) -> ModuleSource {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(seed.as_bytes());
    ModuleSource::File {
        filename: format!("{}.zip", seed),
        bytes,
    }
}

pub fn inline_source() -> ModuleSource {
    ModuleSource::InlineCode {
        code: "def main(a, b):\n    return a + b\n".to_string(),
        input_schema: json!({ "a": "int", "b": "int" }),
    }
}

/// A source kind the given env accepts
pub fn source_for(env: ModuleEnv) -> ModuleSource {
    match env {
        ModuleEnv::Inline => inline_source(),
        ModuleEnv::Git => ModuleSource::GitUri("https://github.com/acme/adder.git".to_string()),
        _ => zip_source("adder"),
    }
}
