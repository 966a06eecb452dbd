//! Reconciliation controller integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{Harness, eventually};
use tokio_util::sync::CancellationToken;
use treadle_config::ControllerConfig;
use treadle_engine::{
    Controller, EngineError, EventKind, Informer, RateSettings, ReconcileAction, Reconciler,
    WorkQueue,
};
use treadle_store::{MemoryStore, ResourceStore, WatchStream};
use treadle_types::{ObjectKey, TaskCommand, TypesError, Workflow};

fn nightly(name: &str, schedule: &str) -> Workflow {
    Workflow::new("default", name)
        .with_schedule(schedule)
        .with_task("t", TaskCommand::script("true"))
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        sync_timeout_secs: 5,
        ..ControllerConfig::default()
    }
}

async fn edit(store: &MemoryStore, key: &ObjectKey, schedule: &str) {
    let mut wf = store.get(key).await.unwrap();
    wf.spec.schedule = schedule.to_string();
    store.put(wf).await.unwrap();
}

#[tokio::test]
async fn test_schedule_follows_workflow_lifecycle() -> Result<()> {
    let h = Harness::new();
    let existing = h.seed(nightly("existing", "0 2 * * *")).await;

    let shutdown = CancellationToken::new();
    let controller = Controller::new(h.store.clone(), h.launcher.clone(), fast_config());
    let running = tokio::spawn(controller.run(shutdown.clone()));

    // Present before start: picked up by the initial list.
    let launcher = Arc::clone(&h.launcher);
    eventually("initial schedule", || launcher.schedule_for(&existing).is_some()).await;
    let schedule = h.launcher.schedule_for(&existing).unwrap();
    assert_eq!(schedule.name, "wf-cron-existing");
    assert_eq!(schedule.schedule, "0 2 * * *");
    assert_eq!(schedule.args, vec!["run", "-w", "existing", "-n", "default"]);

    // Created while running.
    let fresh = h.seed(nightly("fresh", "*/5 * * * *")).await;
    eventually("new schedule", || launcher.schedule_for(&fresh).is_some()).await;

    edit(&h.store, &fresh, "@hourly").await;
    eventually("updated schedule", || {
        launcher
            .schedule_for(&fresh)
            .is_some_and(|s| s.schedule == "@hourly")
    })
    .await;

    edit(&h.store, &fresh, "").await;
    eventually("cleared schedule", || launcher.schedule_for(&fresh).is_none()).await;

    h.store.delete(&existing).await?;
    eventually("deleted schedule", || launcher.schedule_for(&existing).is_none()).await;
    assert_eq!(h.launcher.schedule_count(), 0);

    shutdown.cancel();
    running.await??;
    Ok(())
}

#[tokio::test]
async fn test_run_history_does_not_touch_schedule() -> Result<()> {
    let h = Harness::new();
    let key = h.seed(nightly("busy", "0 * * * *")).await;

    let shutdown = CancellationToken::new();
    let controller = Controller::new(h.store.clone(), h.launcher.clone(), fast_config());
    let running = tokio::spawn(controller.run(shutdown.clone()));

    let launcher = Arc::clone(&h.launcher);
    eventually("schedule", || launcher.schedule_for(&key).is_some()).await;

    let mut wf = h.store.get(&key).await?;
    wf.begin_run(chrono::Utc::now());
    h.store.put(wf).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.launcher.schedule_writes(), 1);

    shutdown.cancel();
    running.await??;
    Ok(())
}

#[tokio::test]
async fn test_failed_reconcile_is_retried_when_enabled() -> Result<()> {
    let h = Harness::new();
    h.launcher.fail_schedule_creates(2);
    let key = h.seed(nightly("flaky", "0 4 * * *")).await;

    let config = ControllerConfig {
        max_retries: 3,
        base_delay_ms: 5,
        max_delay_ms: 50,
        ..fast_config()
    };
    let shutdown = CancellationToken::new();
    let controller = Controller::new(h.store.clone(), h.launcher.clone(), config);
    let running = tokio::spawn(controller.run(shutdown.clone()));

    let launcher = Arc::clone(&h.launcher);
    eventually("schedule after retries", || launcher.schedule_for(&key).is_some()).await;
    assert_eq!(h.launcher.create_attempts(), 3);
    assert_eq!(h.launcher.schedule_count(), 1);

    shutdown.cancel();
    running.await??;
    Ok(())
}

#[tokio::test]
async fn test_failed_reconcile_is_dropped_by_default() -> Result<()> {
    let h = Harness::new();
    h.launcher.fail_schedule_creates(1);
    let key = h.seed(nightly("once", "0 4 * * *")).await;

    let shutdown = CancellationToken::new();
    let controller = Controller::new(h.store.clone(), h.launcher.clone(), fast_config());
    let running = tokio::spawn(controller.run(shutdown.clone()));

    let launcher = Arc::clone(&h.launcher);
    eventually("first attempt", || launcher.create_attempts() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.launcher.create_attempts(), 1);
    assert!(h.launcher.schedule_for(&key).is_none());

    shutdown.cancel();
    running.await??;
    Ok(())
}

#[tokio::test]
async fn test_reconcile_is_idempotent() -> Result<()> {
    let h = Harness::new();
    let key = h.seed(nightly("twice", "0 3 * * *")).await;
    let unscheduled = h.seed(nightly("manual", "")).await;

    let informer = Arc::new(Informer::new(h.store.clone()));
    let queue = Arc::new(WorkQueue::new(RateSettings::default()));
    let mut synced = informer.subscribe_synced();
    let shutdown = CancellationToken::new();
    let feed = {
        let informer = Arc::clone(&informer);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { informer.run(queue, shutdown).await })
    };
    synced.wait_for(|s| *s).await?;

    let reconciler = Reconciler::new(h.launcher.clone(), informer.cache());
    assert_eq!(
        reconciler.reconcile(&key, EventKind::Created).await?,
        ReconcileAction::Created
    );
    assert_eq!(
        reconciler.reconcile(&key, EventKind::Created).await?,
        ReconcileAction::Unchanged
    );
    assert_eq!(h.launcher.schedule_count(), 1);

    assert_eq!(
        reconciler.reconcile(&unscheduled, EventKind::Created).await?,
        ReconcileAction::Unchanged
    );
    assert_eq!(
        reconciler
            .reconcile(&ObjectKey::new("default", "gone"), EventKind::Updated)
            .await?,
        ReconcileAction::Skipped
    );

    assert_eq!(
        reconciler.reconcile(&key, EventKind::Deleted).await?,
        ReconcileAction::Deleted
    );
    assert_eq!(
        reconciler.reconcile(&key, EventKind::Deleted).await?,
        ReconcileAction::Unchanged
    );
    assert_eq!(h.launcher.schedule_count(), 0);

    shutdown.cancel();
    feed.await??;
    Ok(())
}

#[tokio::test]
async fn test_bad_cron_is_reported() -> Result<()> {
    let h = Harness::new();
    let key = h.seed(nightly("broken", "every tuesday")).await;

    let informer = Arc::new(Informer::new(h.store.clone()));
    let queue = Arc::new(WorkQueue::new(RateSettings::default()));
    let mut synced = informer.subscribe_synced();
    let shutdown = CancellationToken::new();
    let feed = {
        let informer = Arc::clone(&informer);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { informer.run(queue, shutdown).await })
    };
    synced.wait_for(|s| *s).await?;

    let reconciler = Reconciler::new(h.launcher.clone(), informer.cache());
    let err = reconciler
        .reconcile(&key, EventKind::Created)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Model(TypesError::InvalidSchedule { .. })));
    assert_eq!(h.launcher.schedule_count(), 0);

    shutdown.cancel();
    feed.await??;
    Ok(())
}

/// A store whose initial list never returns.
struct StalledStore(MemoryStore);

#[async_trait]
impl ResourceStore for StalledStore {
    async fn get(&self, key: &ObjectKey) -> treadle_store::Result<Workflow> {
        self.0.get(key).await
    }

    async fn list(&self, _namespace: Option<&str>) -> treadle_store::Result<Vec<Workflow>> {
        futures::future::pending().await
    }

    async fn put(&self, workflow: Workflow) -> treadle_store::Result<Workflow> {
        self.0.put(workflow).await
    }

    async fn delete(&self, key: &ObjectKey) -> treadle_store::Result<()> {
        self.0.delete(key).await
    }

    fn watch(&self) -> treadle_store::Result<WatchStream> {
        self.0.watch()
    }
}

#[tokio::test]
async fn test_sync_timeout_aborts_controller() {
    let h = Harness::new();
    let store = Arc::new(StalledStore(MemoryStore::new()));
    let config = ControllerConfig {
        sync_timeout_secs: 1,
        ..ControllerConfig::default()
    };

    let err = Controller::new(store, h.launcher.clone(), config)
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SyncTimeout(d) if d == Duration::from_secs(1)));
    assert_eq!(h.launcher.schedule_count(), 0);
}
