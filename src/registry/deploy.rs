//! Deploy and undeploy. The coordinator call runs outside the module lock:
//! lock, validate and mark in flight; unlock; call; relock, clear the mark
//! and commit. Everything after validation runs on its own task, so a
//! caller that goes away can stop the call but never a commit that follows
//! a finished call. A commit that fails is undone by restoring whatever was
//! running before.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{commit_slot, HistoryEntry, HistoryLog, InFlight, Module, Registry, RegistryError, RegistryResult, SlotRef};
use crate::coordinator::{CoordinatorError, DeployCoordinator};
use crate::database::Storage;
use crate::types::{HistoryAction, Outcome};

enum CallOutcome {
    Done(Result<String, CoordinatorError>),
    TimedOut,
    Cancelled(&'static str),
}

/// Clears the in-flight mark and records the attempt as cancelled if the
/// attempt task stops before it reaches its commit.
struct PendingAttempt {
    slot: SlotRef,
    history: Arc<HistoryLog>,
    id: Uuid,
    entry: Option<HistoryEntry>,
}

impl PendingAttempt {
    fn new(slot: SlotRef, history: Arc<HistoryLog>, id: Uuid, entry: HistoryEntry) -> Self {
        Self {
            slot,
            history,
            id,
            entry: Some(entry),
        }
    }

    fn disarm(&mut self) {
        self.entry = None;
    }
}

impl Drop for PendingAttempt {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(module = %entry.module, "Deploy attempt dropped outside a runtime; in-flight mark left set");
            return;
        };

        let slot = self.slot.clone();
        let history = self.history.clone();
        let id = self.id;
        runtime.spawn(async move {
            let mut slot = slot.lock().await;
            if slot.in_flight.as_ref().map(|f| f.id) == Some(id) {
                slot.in_flight = None;
            }
            warn!(module = %entry.module, action = %entry.action, "Deploy attempt stopped before commit");
            history
                .append(entry.with_outcome(Outcome::Cancelled).with_detail("attempt aborted"))
                .await;
        });
    }
}

/// A validated deploy or undeploy, owning everything it needs to finish
/// without the caller.
struct Attempt {
    slot: SlotRef,
    storage: Arc<dyn Storage>,
    coordinator: Arc<dyn DeployCoordinator>,
    history: Arc<HistoryLog>,
    timeout: Duration,
    id: Uuid,
    name: String,
    /// Version being started, or the running version being stopped
    version: String,
    /// What ran before the attempt; restored if the commit fails
    previous: Option<String>,
    entry: HistoryEntry,
}

impl Attempt {
    fn operation(&self) -> &'static str {
        match self.entry.action {
            HistoryAction::Undeploy => "undeploy",
            _ => "deploy",
        }
    }

    async fn run(self, cancel: CancellationToken, abandoned: CancellationToken) -> RegistryResult<Module> {
        let mut pending = PendingAttempt::new(self.slot.clone(), self.history.clone(), self.id, self.entry.clone());

        let call = match self.entry.action {
            HistoryAction::Undeploy => self.coordinator.stop(&self.name),
            _ => self.coordinator.start(&self.name, &self.version),
        };
        // A finished call wins over a cancellation that lands in the same poll
        let outcome = tokio::select! {
            biased;
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(result) => CallOutcome::Done(result),
                Err(_) => CallOutcome::TimedOut,
            },
            _ = cancel.cancelled() => CallOutcome::Cancelled("cancelled by caller"),
            _ = abandoned.cancelled() => CallOutcome::Cancelled("request dropped"),
        };

        let mut guard = self.slot.lock().await;
        pending.disarm();
        if guard.in_flight.as_ref().map(|f| f.id) == Some(self.id) {
            guard.in_flight = None;
        }

        let log = self.settle(outcome).await?;

        let mut next = guard.module.clone();
        match self.entry.action {
            HistoryAction::Undeploy => next.mark_undeployed(Utc::now()),
            _ => next.mark_deployed(&self.version, Utc::now()),
        }

        if let Err(e) = commit_slot(self.storage.as_ref(), &mut guard, next).await {
            self.history
                .append(
                    self.entry
                        .clone()
                        .with_outcome(Outcome::Failed)
                        .with_detail(format!("commit failed after {}: {}", self.operation(), e)),
                )
                .await;
            drop(guard);
            self.compensate().await;
            return Err(e);
        }

        self.history.append(self.entry.clone()).await;
        info!(
            module = %self.name,
            version = %self.version,
            operator = %self.entry.operator,
            runner_log = %log,
            "Module {}ed",
            self.operation()
        );
        Ok(guard.module.clone())
    }

    /// Turn a finished coordinator call into the runner log, or record the
    /// failed attempt and return its error. Called with the slot locked.
    async fn settle(&self, outcome: CallOutcome) -> RegistryResult<String> {
        let operation = self.operation();
        let (outcome, detail, err) = match outcome {
            CallOutcome::Done(Ok(log)) => return Ok(log),
            CallOutcome::Done(Err(e)) => (Outcome::Failed, e.to_string(), RegistryError::from(e)),
            CallOutcome::TimedOut => {
                let detail = format!("timed out after {:?}", self.timeout);
                let err = RegistryError::ExternalFailure(format!(
                    "{} of module '{}' {}",
                    operation, self.name, detail
                ));
                (Outcome::Failed, detail, err)
            }
            CallOutcome::Cancelled(detail) => (
                Outcome::Cancelled,
                detail.to_string(),
                RegistryError::ExternalFailure(format!("{} of module '{}' cancelled", operation, self.name)),
            ),
        };

        warn!(module = %self.name, operation, outcome = %outcome, "{}", detail);
        self.history
            .append(self.entry.clone().with_outcome(outcome).with_detail(detail))
            .await;
        Err(err)
    }

    /// Best-effort return to the deployment that stood before the attempt
    async fn compensate(&self) {
        let undo = match &self.previous {
            Some(previous) => self.coordinator.start(&self.name, previous),
            None => self.coordinator.stop(&self.name),
        };
        match tokio::time::timeout(self.timeout, undo).await {
            Ok(Ok(_)) => info!(module = %self.name, previous = ?self.previous, "Compensating coordinator call succeeded"),
            Ok(Err(e)) => error!(module = %self.name, error = %e, "Compensating coordinator call failed"),
            Err(_) => error!(module = %self.name, "Compensating coordinator call timed out"),
        }
    }
}

impl Registry {
    /// Start the module's current version and mark it deployed
    pub async fn deploy(&self, name: &str, operator: &str) -> RegistryResult<Module> {
        self.deploy_with_cancel(name, operator, CancellationToken::new()).await
    }

    pub async fn undeploy(&self, name: &str, operator: &str) -> RegistryResult<Module> {
        self.undeploy_with_cancel(name, operator, CancellationToken::new()).await
    }

    pub async fn deploy_with_cancel(
        &self,
        name: &str,
        operator: &str,
        cancel: CancellationToken,
    ) -> RegistryResult<Module> {
        let slot = self.slot(name).await?;

        let (id, version, previous) = {
            let mut slot = slot.lock().await;
            if slot.removed {
                return Err(RegistryError::module_not_found(name));
            }
            let module = &slot.module;
            if !module.env.supports_deploy() {
                return Err(RegistryError::UnsupportedEnv {
                    module: name.to_string(),
                    env: module.env,
                    operation: "deploy",
                });
            }
            if let Some(op) = &slot.in_flight {
                return Err(RegistryError::InvalidTransition(format!(
                    "a {} of module '{}' is already in progress",
                    op.action, name
                )));
            }
            let version = module.current_version.clone().ok_or_else(|| {
                RegistryError::InvalidTransition(format!("module '{}' has no current version to deploy", name))
            })?;
            if module.deployed_version.as_deref() == Some(version.as_str()) {
                return Err(RegistryError::InvalidTransition(format!(
                    "version '{}' of module '{}' is already deployed",
                    version, name
                )));
            }
            let previous = module.deployed_version.clone().filter(|_| module.deployed);

            let id = Uuid::new_v4();
            slot.in_flight = Some(InFlight {
                id,
                action: HistoryAction::Deploy,
            });
            (id, version, previous)
        };

        info!(module = %name, version = %version, previous = ?previous, operator, "Starting deployment");
        let entry = HistoryEntry::new(name, HistoryAction::Deploy, Some(&version), operator);
        self.run_attempt(slot, id, version, previous, entry, cancel).await
    }

    pub async fn undeploy_with_cancel(
        &self,
        name: &str,
        operator: &str,
        cancel: CancellationToken,
    ) -> RegistryResult<Module> {
        let slot = self.slot(name).await?;

        let (id, version) = {
            let mut slot = slot.lock().await;
            if slot.removed {
                return Err(RegistryError::module_not_found(name));
            }
            let module = &slot.module;
            if !module.env.supports_deploy() {
                return Err(RegistryError::UnsupportedEnv {
                    module: name.to_string(),
                    env: module.env,
                    operation: "undeploy",
                });
            }
            if let Some(op) = &slot.in_flight {
                return Err(RegistryError::InvalidTransition(format!(
                    "a {} of module '{}' is already in progress",
                    op.action, name
                )));
            }
            let version = match &module.deployed_version {
                Some(version) if module.deployed => version.clone(),
                _ => {
                    return Err(RegistryError::InvalidTransition(format!(
                        "module '{}' is not deployed",
                        name
                    )))
                }
            };

            let id = Uuid::new_v4();
            slot.in_flight = Some(InFlight {
                id,
                action: HistoryAction::Undeploy,
            });
            (id, version)
        };

        info!(module = %name, version = %version, operator, "Stopping deployment");
        let entry = HistoryEntry::new(name, HistoryAction::Undeploy, Some(&version), operator);
        self.run_attempt(slot, id, version.clone(), Some(version), entry, cancel)
            .await
    }

    /// Hand a validated attempt to its own task and wait for it. Dropping
    /// the returned future cancels a call still in progress; a call that
    /// already returned is committed or compensated regardless.
    async fn run_attempt(
        &self,
        slot: SlotRef,
        id: Uuid,
        version: String,
        previous: Option<String>,
        entry: HistoryEntry,
        cancel: CancellationToken,
    ) -> RegistryResult<Module> {
        let attempt = Attempt {
            slot,
            storage: self.storage.clone(),
            coordinator: self.coordinator.clone(),
            history: self.history.clone(),
            timeout: self.settings.deploy_timeout,
            id,
            name: entry.module.clone(),
            version,
            previous,
            entry,
        };
        let name = attempt.name.clone();

        let abandoned = CancellationToken::new();
        let _abandon_on_drop = abandoned.clone().drop_guard();
        match tokio::spawn(attempt.run(cancel, abandoned)).await {
            Ok(result) => result,
            Err(e) => {
                error!(module = %name, error = %e, "Deploy task failed");
                Err(RegistryError::ExternalFailure(format!(
                    "deploy task for module '{}' failed: {}",
                    name, e
                )))
            }
        }
    }
}
