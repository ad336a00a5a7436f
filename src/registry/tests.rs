use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::database::Storage;
use crate::testing::{source_for, zip_source, Script, TestContext};
use crate::types::{Outcome, VersionStatus};

fn status_of(module: &Module, label: &str) -> VersionStatus {
    module.version(label).expect("version exists").status
}

fn active_count(module: &Module) -> usize {
    module.versions.iter().filter(|v| v.is_active()).count()
}

#[tokio::test]
async fn register_creates_single_inactive_version() {
    let ctx = TestContext::new().await;
    let module = ctx
        .registry
        .register_module(
            RegisterModule {
                name: "adder".into(),
                env: ModuleEnv::Venv,
                source: zip_source("adder"),
                version: None,
                description: Some("adds".into()),
                tags: vec!["math".into(), " math ".into()],
            },
            "admin",
        )
        .await
        .unwrap();

    assert_eq!(module.versions.len(), 1);
    assert_eq!(module.versions[0].label, "0.1.0");
    assert_eq!(module.versions[0].status, VersionStatus::Inactive);
    assert_eq!(module.current_version, None);
    assert_eq!(module.tags.len(), 1);
    assert_eq!(ctx.artifacts.len(), 1);

    let history = ctx.registry.history("adder").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Upload);
    assert_eq!(history[0].version.as_deref(), Some("0.1.0"));
}

#[tokio::test]
async fn register_rejects_source_unsuited_to_env() {
    let ctx = TestContext::new().await;
    let err = ctx
        .registry
        .register_module(
            RegisterModule {
                name: "calc".into(),
                env: ModuleEnv::Inline,
                source: zip_source("calc"),
                version: None,
                description: None,
                tags: Vec::new(),
            },
            "admin",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);
    assert!(ctx.registry.list_modules(&ModuleFilter::default()).await.is_empty());
    assert!(ctx.artifacts.is_empty());
}

#[tokio::test]
async fn register_rejects_bad_name() {
    let ctx = TestContext::new().await;
    let err = ctx
        .registry
        .register_module(
            RegisterModule {
                name: "bad name!".into(),
                env: ModuleEnv::Venv,
                source: zip_source("x"),
                version: None,
                description: None,
                tags: Vec::new(),
            },
            "admin",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn register_storage_failure_frees_the_name() {
    let ctx = TestContext::new().await;
    ctx.storage.set_fail_writes(true);

    let err = ctx
        .registry
        .register_module(
            RegisterModule {
                name: "m1".into(),
                env: ModuleEnv::Venv,
                source: zip_source("m1"),
                version: None,
                description: None,
                tags: Vec::new(),
            },
            "admin",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(ctx.registry.get_module("m1").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(ctx.registry.list_modules(&ModuleFilter::default()).await.is_empty());

    ctx.storage.set_fail_writes(false);
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    assert_eq!(ctx.registry.history("m1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_filters_by_env_and_tag() {
    let ctx = TestContext::new().await;
    ctx.register("a", ModuleEnv::Venv, "1.0.0").await;
    ctx.register("b", ModuleEnv::Docker, "1.0.0").await;
    ctx.register("c", ModuleEnv::Inline, "1.0.0").await;
    ctx.registry
        .update_metadata(
            "b",
            MetadataPatch {
                description: None,
                tags: Some(vec!["ml".into()]),
            },
        )
        .await
        .unwrap();

    let names = |modules: Vec<Module>| modules.into_iter().map(|m| m.name).collect::<Vec<_>>();

    let all = ctx.registry.list_modules(&ModuleFilter::default()).await;
    assert_eq!(names(all), vec!["a", "b", "c"]);

    let docker = ModuleFilter {
        env: Some(ModuleEnv::Docker),
        tag: None,
    };
    assert_eq!(names(ctx.registry.list_modules(&docker).await), vec!["b"]);

    let tagged = ModuleFilter {
        env: None,
        tag: Some("test".into()),
    };
    assert_eq!(names(ctx.registry.list_modules(&tagged).await), vec!["a", "c"]);

    let none = ModuleFilter {
        env: Some(ModuleEnv::Venv),
        tag: Some("ml".into()),
    };
    assert!(ctx.registry.list_modules(&none).await.is_empty());
}

#[tokio::test]
async fn upload_activate_switches_current_version() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    ctx.registry
        .upload_version("m1", "1.1.0", zip_source("m1-1.1.0"), VersionMetadata::default(), "admin")
        .await
        .unwrap();
    let module = ctx.registry.activate("m1", "1.1.0", "admin").await.unwrap();

    assert_eq!(module.current_version.as_deref(), Some("1.1.0"));
    assert_eq!(status_of(&module, "1.0.0"), VersionStatus::Inactive);
    assert_eq!(status_of(&module, "1.1.0"), VersionStatus::Active);
}

#[tokio::test]
async fn deactivating_inactive_version_is_invalid() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let err = ctx.registry.deactivate("m1", "1.0.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn registering_same_name_twice_fails() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let err = ctx
        .registry
        .register_module(
            RegisterModule {
                name: "m1".into(),
                env: ModuleEnv::Docker,
                source: zip_source("other"),
                version: None,
                description: None,
                tags: Vec::new(),
            },
            "admin",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
}

#[tokio::test]
async fn inline_modules_cannot_deploy() {
    let ctx = TestContext::new().await;
    ctx.register("calc", ModuleEnv::Inline, "1.0.0").await;
    ctx.registry.activate("calc", "1.0.0", "admin").await.unwrap();

    let err = ctx.registry.deploy("calc", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEnv);
    let err = ctx.registry.undeploy("calc", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEnv);
    assert!(ctx.coordinator.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_leave_one_active() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "a").await;
    ctx.registry
        .upload_version("m1", "b", zip_source("b"), VersionMetadata::default(), "admin")
        .await
        .unwrap();

    for _ in 0..20 {
        let r1 = ctx.registry.clone();
        let r2 = ctx.registry.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { r1.activate("m1", "a", "alice").await }),
            tokio::spawn(async move { r2.activate("m1", "b", "bob").await }),
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert_eq!(active_count(&a), 1);
        assert_eq!(active_count(&b), 1);

        let module = ctx.registry.get_module("m1").await.unwrap();
        assert_eq!(active_count(&module), 1);
        module.check_invariants().unwrap();
    }
}

#[tokio::test]
async fn activate_twice_is_noop_but_logged() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let once = ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    let twice = ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    assert_eq!(once, twice);

    let history = ctx.registry.history("m1").await.unwrap();
    let activations: Vec<_> = history.iter().filter(|e| e.action == HistoryAction::Activate).collect();
    assert_eq!(activations.len(), 2);
    assert_eq!(activations[1].detail.as_deref(), Some("already active"));
}

#[tokio::test]
async fn rollback_restores_prior_version() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();

    ctx.registry
        .upload_version("m1", "1.1.0", zip_source("1.1.0"), VersionMetadata::default(), "admin")
        .await
        .unwrap();
    ctx.registry.activate("m1", "1.1.0", "admin").await.unwrap();
    let module = ctx.registry.rollback("m1", "1.0.0", "admin").await.unwrap();

    assert_eq!(status_of(&module, "1.0.0"), VersionStatus::Active);
    assert_eq!(status_of(&module, "1.1.0"), VersionStatus::Inactive);
    assert_eq!(module.current_version.as_deref(), Some("1.0.0"));

    let last = ctx.registry.history("m1").await.unwrap().pop().unwrap();
    assert_eq!(last.action, HistoryAction::Rollback);
}

#[tokio::test]
async fn activate_unknown_version_is_not_found() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let err = ctx.registry.activate("m1", "9.9.9", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = ctx.registry.rollback("nope", "1.0.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn history_timestamps_are_non_decreasing() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    for label in ["1.1.0", "1.2.0", "1.3.0"] {
        ctx.registry
            .upload_version("m1", label, zip_source(label), VersionMetadata::default(), "admin")
            .await
            .unwrap();
        ctx.registry.activate("m1", label, "admin").await.unwrap();
    }
    ctx.registry.deploy("m1", "admin").await.unwrap();
    ctx.registry.undeploy("m1", "admin").await.unwrap();

    let history = ctx.registry.history("m1").await.unwrap();
    assert_eq!(history.len(), 9);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn duplicate_upload_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let err = ctx
        .registry
        .upload_version("m1", "1.0.0", zip_source("again"), VersionMetadata::default(), "admin")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateVersion);
    assert_eq!(ctx.registry.list_versions("m1").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_of_one_label_first_wins() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = ctx.registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .upload_version("m1", "2.0.0", zip_source(&format!("racer-{}", i)), VersionMetadata::default(), "admin")
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::DuplicateVersion),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(ctx.registry.list_versions("m1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn upload_metadata_overrides_module_defaults() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let module = ctx
        .registry
        .upload_version(
            "m1",
            "1.1.0",
            zip_source("1.1.0"),
            VersionMetadata {
                description: Some("faster".into()),
                tags: None,
            },
            "admin",
        )
        .await
        .unwrap();
    let version = module.version("1.1.0").unwrap();
    assert_eq!(version.description.as_deref(), Some("faster"));
    assert!(version.tags.contains("test"));
}

#[tokio::test]
async fn deactivate_clears_current_and_refuses_while_deployed() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Docker, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();

    let err = ctx.registry.deactivate("m1", "1.0.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    ctx.registry.undeploy("m1", "admin").await.unwrap();
    let module = ctx.registry.deactivate("m1", "1.0.0", "admin").await.unwrap();
    assert_eq!(module.current_version, None);
    assert_eq!(active_count(&module), 0);
}

#[tokio::test]
async fn deploy_and_undeploy_flip_the_flag() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Git, "1.0.0").await;

    let err = ctx.registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    let module = ctx.registry.deploy("m1", "admin").await.unwrap();
    assert!(module.deployed);
    assert_eq!(module.deployed_version.as_deref(), Some("1.0.0"));
    assert_eq!(ctx.coordinator.running("m1").as_deref(), Some("1.0.0"));

    let err = ctx.registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let module = ctx.registry.undeploy("m1", "admin").await.unwrap();
    assert!(!module.deployed);
    assert_eq!(module.deployed_version, None);
    assert_eq!(ctx.coordinator.running("m1"), None);

    let err = ctx.registry.undeploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn switching_version_refused_while_deployed() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();
    ctx.registry
        .upload_version("m1", "1.1.0", zip_source("1.1.0"), VersionMetadata::default(), "admin")
        .await
        .unwrap();

    let err = ctx.registry.activate("m1", "1.1.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = ctx.registry.rollback("m1", "1.1.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let module = ctx.registry.get_module("m1").await.unwrap();
    assert_eq!(module.current_version.as_deref(), Some("1.0.0"));
    assert_eq!(module.deployed_version, module.current_version);

    // Undeploy, switch, deploy again
    ctx.registry.undeploy("m1", "admin").await.unwrap();
    ctx.registry.activate("m1", "1.1.0", "admin").await.unwrap();
    let module = ctx.registry.deploy("m1", "admin").await.unwrap();
    assert_eq!(module.deployed_version.as_deref(), Some("1.1.0"));
    assert_eq!(ctx.coordinator.running("m1").as_deref(), Some("1.1.0"));
}

#[tokio::test]
async fn failed_deploy_leaves_flag_and_logs_failure() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Fail("image pull failed".into()));

    let err = ctx.registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    assert!(err.to_string().contains("image pull failed"));

    let module = ctx.registry.get_module("m1").await.unwrap();
    assert!(!module.deployed);

    let last = ctx.registry.history("m1").await.unwrap().pop().unwrap();
    assert_eq!(last.action, HistoryAction::Deploy);
    assert_eq!(last.outcome, Outcome::Failed);

    // The failure released the module
    ctx.coordinator.script_start(Script::Succeed);
    assert!(ctx.registry.deploy("m1", "admin").await.unwrap().deployed);
}

#[tokio::test]
async fn failed_undeploy_keeps_module_deployed() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();
    ctx.coordinator.script_stop(Script::Fail("runner busy".into()));

    let err = ctx.registry.undeploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    assert!(ctx.registry.get_module("m1").await.unwrap().deployed);
}

#[tokio::test]
async fn slow_coordinator_times_out() {
    let ctx = TestContext::with_timeout(Duration::from_millis(50)).await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Hang);

    let err = ctx.registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    assert!(err.to_string().contains("timed out"));

    let last = ctx.registry.history("m1").await.unwrap().pop().unwrap();
    assert_eq!(last.outcome, Outcome::Failed);
    assert!(!ctx.registry.get_module("m1").await.unwrap().deployed);
}

#[tokio::test]
async fn cancelled_deploy_leaves_flag_and_logs_cancellation() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Hang);

    let cancel = CancellationToken::new();
    let registry = ctx.registry.clone();
    let token = cancel.clone();
    let attempt = tokio::spawn(async move { registry.deploy_with_cancel("m1", "admin", token).await });

    ctx.coordinator.entered().await;
    cancel.cancel();
    let err = attempt.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);

    assert!(!ctx.registry.get_module("m1").await.unwrap().deployed);
    let last = ctx.registry.history("m1").await.unwrap().pop().unwrap();
    assert_eq!(last.action, HistoryAction::Deploy);
    assert_eq!(last.outcome, Outcome::Cancelled);

    ctx.coordinator.script_start(Script::Succeed);
    assert!(ctx.registry.deploy("m1", "admin").await.unwrap().deployed);
}

#[tokio::test]
async fn dropped_deploy_clears_in_flight_mark() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Hang);

    let abandoned = tokio::time::timeout(Duration::from_millis(50), ctx.registry.deploy("m1", "admin")).await;
    assert!(abandoned.is_err());

    // Cleanup runs on a spawned task
    let mut cancelled = false;
    for _ in 0..50 {
        let history = ctx.registry.history("m1").await.unwrap();
        if history.last().map(|e| e.outcome) == Some(Outcome::Cancelled) {
            assert_eq!(history.last().unwrap().detail.as_deref(), Some("request dropped"));
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cancelled);
    assert!(!ctx.registry.get_module("m1").await.unwrap().deployed);

    ctx.coordinator.script_start(Script::Succeed);
    assert!(ctx.registry.deploy("m1", "admin").await.unwrap().deployed);
}

#[tokio::test]
async fn in_flight_deploy_blocks_conflicting_operations() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Delay(Duration::from_millis(200)));

    let registry = ctx.registry.clone();
    let attempt = tokio::spawn(async move { registry.deploy("m1", "alice").await });
    ctx.coordinator.entered().await;

    let err = ctx.registry.deploy("m1", "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = ctx.registry.delete_module("m1", "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = ctx.registry.deactivate("m1", "1.0.0", "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = ctx.registry.activate("m1", "1.0.0", "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    // Reads are not blocked by the external call
    assert!(!ctx.registry.get_module("m1").await.unwrap().deployed);

    assert!(attempt.await.unwrap().unwrap().deployed);
}

#[tokio::test]
async fn commit_failure_after_start_is_compensated() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.storage.set_fail_writes(true);

    let err = ctx.registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!(ctx.coordinator.calls(), vec!["start m1@1.0.0", "stop m1"]);
    assert_eq!(ctx.coordinator.running("m1"), None);
    assert!(!ctx.registry.get_module("m1").await.unwrap().deployed);

    let last = ctx.registry.history("m1").await.unwrap().pop().unwrap();
    assert_eq!(last.outcome, Outcome::Failed);
}

#[tokio::test]
async fn commit_failure_on_redeploy_restarts_previous_version() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();
    ctx.registry
        .upload_version("m1", "1.1.0", zip_source("1.1.0"), VersionMetadata::default(), "admin")
        .await
        .unwrap();

    // A stored row whose current version moved on while 1.0.0 kept running
    let mut stale = ctx.registry.get_module("m1").await.unwrap();
    for version in stale.versions.iter_mut() {
        version.status = if version.label == "1.1.0" {
            VersionStatus::Active
        } else {
            VersionStatus::Inactive
        };
    }
    stale.current_version = Some("1.1.0".into());
    stale.check_invariants().unwrap();
    ctx.storage.save_module(&stale).await.unwrap();
    let registry = ctx.reopen().await;

    ctx.storage.set_fail_writes(true);
    let err = registry.deploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let calls = ctx.coordinator.calls();
    assert_eq!(calls[calls.len() - 2..], ["start m1@1.1.0", "start m1@1.0.0"]);
    assert_eq!(ctx.coordinator.running("m1").as_deref(), Some("1.0.0"));

    let module = registry.get_module("m1").await.unwrap();
    assert_eq!(module.deployed_version.as_deref(), Some("1.0.0"));
    assert_eq!(module.deployed, ctx.coordinator.running("m1").is_some());
}

#[tokio::test]
async fn commit_failure_after_stop_restarts_version() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();
    ctx.storage.set_fail_writes(true);

    let err = ctx.registry.undeploy("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!(ctx.coordinator.calls(), vec!["start m1@1.0.0", "stop m1", "start m1@1.0.0"]);
    let module = ctx.registry.get_module("m1").await.unwrap();
    assert!(module.deployed);
    assert_eq!(module.deployed, ctx.coordinator.running("m1").is_some());
}

async fn wait_for_deploy_entry(ctx: &TestContext) -> HistoryEntry {
    for _ in 0..100 {
        let history = ctx.registry.history("m1").await.unwrap();
        if let Some(last) = history.last().filter(|e| e.action == HistoryAction::Deploy) {
            return last.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deploy never settled");
}

#[tokio::test]
async fn dropping_deploy_after_start_returned_still_commits() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Delay(Duration::from_millis(50)));

    let registry = ctx.registry.clone();
    let attempt = tokio::spawn(async move { registry.deploy("m1", "admin").await });
    ctx.coordinator.entered().await;

    // Hold the module so the finished start cannot commit yet
    let slot = ctx.registry.slot("m1").await.unwrap();
    let held = slot.lock().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    attempt.abort();
    assert!(attempt.await.unwrap_err().is_cancelled());
    drop(held);

    let last = wait_for_deploy_entry(&ctx).await;
    assert_eq!(last.outcome, Outcome::Succeeded);

    let module = ctx.registry.get_module("m1").await.unwrap();
    assert!(module.deployed);
    assert_eq!(module.deployed, ctx.coordinator.running("m1").is_some());
}

#[tokio::test]
async fn cancelling_after_start_returned_still_commits() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.coordinator.script_start(Script::Delay(Duration::from_millis(50)));

    let cancel = CancellationToken::new();
    let registry = ctx.registry.clone();
    let token = cancel.clone();
    let attempt = tokio::spawn(async move { registry.deploy_with_cancel("m1", "admin", token).await });
    ctx.coordinator.entered().await;

    let slot = ctx.registry.slot("m1").await.unwrap();
    let held = slot.lock().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    drop(held);

    let module = attempt.await.unwrap().unwrap();
    assert!(module.deployed);
    assert_eq!(ctx.coordinator.running("m1").as_deref(), Some("1.0.0"));
    assert_eq!(wait_for_deploy_entry(&ctx).await.outcome, Outcome::Succeeded);
}

#[tokio::test]
async fn storage_failure_leaves_state_unchanged() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.storage.set_fail_writes(true);

    let err = ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let module = ctx.registry.get_module("m1").await.unwrap();
    assert_eq!(module.current_version, None);
    // Only the registration upload was recorded
    assert_eq!(ctx.registry.history("m1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_metadata_writes_no_history() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let module = ctx
        .registry
        .update_metadata(
            "m1",
            MetadataPatch {
                description: Some("renamed".into()),
                tags: Some(vec!["a".into(), "b".into()]),
            },
        )
        .await
        .unwrap();
    assert_eq!(module.description.as_deref(), Some("renamed"));
    assert_eq!(module.tags.len(), 2);
    assert_eq!(module.versions[0].description.as_deref(), Some("m1 test module"));
    assert_eq!(ctx.registry.history("m1").await.unwrap().len(), 1);

    let err = ctx.registry.update_metadata("m1", MetadataPatch::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn delete_removes_module_but_keeps_history() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;

    let deleted = ctx.registry.delete_module("m1", "admin").await.unwrap();
    assert_eq!(deleted.name, "m1");

    let err = ctx.registry.get_module("m1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = ctx.registry.delete_module("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let history = ctx.registry.history("m1").await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, HistoryAction::Delete);
    assert_eq!(last.version, None);

    // The name is free again
    ctx.register("m1", ModuleEnv::Conda, "2.0.0").await;
    assert_eq!(ctx.registry.get_module("m1").await.unwrap().env, ModuleEnv::Conda);
}

#[tokio::test]
async fn delete_refused_while_deployed() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();

    let err = ctx.registry.delete_module("m1", "admin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn history_of_unknown_module_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx.registry.history("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn reopen_restores_modules_and_history() {
    let ctx = TestContext::new().await;
    ctx.register("m1", ModuleEnv::Venv, "1.0.0").await;
    ctx.registry.activate("m1", "1.0.0", "admin").await.unwrap();
    ctx.registry.deploy("m1", "admin").await.unwrap();

    let reopened = ctx.reopen().await;
    let module = reopened.get_module("m1").await.unwrap();
    assert_eq!(module, ctx.registry.get_module("m1").await.unwrap());
    assert_eq!(reopened.history("m1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn fetch_payload_resolves_each_kind() {
    let ctx = TestContext::new().await;
    ctx.register("zipped", ModuleEnv::Venv, "1.0.0").await;
    ctx.register("calc", ModuleEnv::Inline, "1.0.0").await;
    ctx.register("cloned", ModuleEnv::Git, "1.0.0").await;

    match ctx.registry.fetch_payload("zipped", "1.0.0").await.unwrap() {
        PayloadContent::Archive { filename, bytes } => {
            assert_eq!(filename, "adder.zip");
            assert!(bytes.starts_with(b"PK\x03\x04"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(matches!(
        ctx.registry.fetch_payload("calc", "1.0.0").await.unwrap(),
        PayloadContent::Inline { .. }
    ));
    assert!(matches!(
        ctx.registry.fetch_payload("cloned", "1.0.0").await.unwrap(),
        PayloadContent::Git { .. }
    ));

    let err = ctx.registry.fetch_payload("zipped", "2.0.0").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[derive(Debug, Clone)]
enum Op {
    Upload(usize),
    Activate(usize),
    Deactivate(usize),
    Rollback(usize),
    Deploy,
    Undeploy,
    FailingDeploy,
    FailingCommit,
}

const LABELS: [&str; 4] = ["1.0.0", "1.1.0", "2.0.0", "2.1.0"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..LABELS.len()).prop_map(Op::Upload),
        (0..LABELS.len()).prop_map(Op::Activate),
        (0..LABELS.len()).prop_map(Op::Deactivate),
        (0..LABELS.len()).prop_map(Op::Rollback),
        Just(Op::Deploy),
        Just(Op::Undeploy),
        Just(Op::FailingDeploy),
        Just(Op::FailingCommit),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_operations_keep_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let ctx = TestContext::new().await;
            ctx.register("m1", ModuleEnv::Venv, LABELS[0]).await;
            let registry = &ctx.registry;

            for op in ops {
                let _ = match op {
                    Op::Upload(i) => registry
                        .upload_version("m1", LABELS[i], source_for(ModuleEnv::Venv), VersionMetadata::default(), "p")
                        .await,
                    Op::Activate(i) => registry.activate("m1", LABELS[i], "p").await,
                    Op::Deactivate(i) => registry.deactivate("m1", LABELS[i], "p").await,
                    Op::Rollback(i) => registry.rollback("m1", LABELS[i], "p").await,
                    Op::Deploy => registry.deploy("m1", "p").await,
                    Op::Undeploy => registry.undeploy("m1", "p").await,
                    Op::FailingDeploy => {
                        ctx.coordinator.script_start(Script::Fail("scripted".into()));
                        let result = registry.deploy("m1", "p").await;
                        ctx.coordinator.script_start(Script::Succeed);
                        result
                    }
                    Op::FailingCommit => {
                        ctx.storage.set_fail_writes(true);
                        let result = registry.deploy("m1", "p").await;
                        ctx.storage.set_fail_writes(false);
                        result
                    }
                };

                let module = registry.get_module("m1").await.unwrap();
                assert!(active_count(&module) <= 1);
                module.check_invariants().unwrap();
                assert_eq!(module.deployed, ctx.coordinator.running("m1").is_some());
            }

            let history = registry.history("m1").await.unwrap();
            assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        });
    }
}
