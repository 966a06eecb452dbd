//! Reconciliation controller: one recurring schedule per scheduled workflow.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use treadle_config::ControllerConfig;
use treadle_launcher::{ScheduleSpec, SharedLauncher};
use treadle_store::SharedStore;
use treadle_types::{CronSchedule, ObjectKey};

use crate::informer::{Informer, WorkflowCache};
use crate::workqueue::{EventKind, RateSettings, WorkQueue};
use crate::{EngineError, Result};

/// What a reconcile did to the schedule resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
    Deleted,
    /// The schedule already matched.
    Unchanged,
    /// The workflow is gone from the cache; a deletion event follows.
    Skipped,
}

/// Converges the schedule resource of one workflow key.
pub struct Reconciler {
    launcher: SharedLauncher,
    cache: WorkflowCache,
}

impl Reconciler {
    pub fn new(launcher: SharedLauncher, cache: WorkflowCache) -> Self {
        Self { launcher, cache }
    }

    pub async fn reconcile(&self, key: &ObjectKey, kind: EventKind) -> Result<ReconcileAction> {
        match kind {
            EventKind::Created | EventKind::Updated => self.converge(key).await,
            EventKind::Deleted => self.remove(key).await,
        }
    }

    /// Make the schedule match the cached workflow.
    ///
    /// A present, matching schedule is left alone, so repeated creation
    /// events leave exactly one schedule. A cleared expression removes it.
    async fn converge(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        let Some(workflow) = self.cache.get(key) else {
            debug!(workflow = %key, "Workflow no longer cached, skipping");
            return Ok(ReconcileAction::Skipped);
        };

        let schedule_key = ScheduleSpec::key_for(key);
        let existing = self.launcher.get_schedule(&schedule_key).await?;

        if workflow.spec.schedule.trim().is_empty() {
            return match existing {
                Some(_) => {
                    self.launcher.delete_schedule(&schedule_key).await?;
                    Ok(ReconcileAction::Deleted)
                }
                None => Ok(ReconcileAction::Unchanged),
            };
        }

        CronSchedule::parse(&workflow.spec.schedule)?;
        let desired = ScheduleSpec::for_workflow(&workflow);

        match existing {
            None => match self.launcher.create_schedule(&desired).await {
                Ok(()) => Ok(ReconcileAction::Created),
                Err(e) if e.is_already_exists() => Ok(ReconcileAction::Unchanged),
                Err(e) => Err(e.into()),
            },
            Some(current) if current == desired => Ok(ReconcileAction::Unchanged),
            Some(_) => {
                self.launcher.update_schedule(&desired).await?;
                Ok(ReconcileAction::Updated)
            }
        }
    }

    async fn remove(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        match self.launcher.delete_schedule(&ScheduleSpec::key_for(key)).await {
            Ok(()) => Ok(ReconcileAction::Deleted),
            Err(e) if e.is_not_found() => Ok(ReconcileAction::Unchanged),
            Err(e) => Err(e.into()),
        }
    }
}

/// Watches workflows and keeps their schedules in step.
pub struct Controller {
    store: SharedStore,
    launcher: SharedLauncher,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(store: SharedStore, launcher: SharedLauncher, config: ControllerConfig) -> Self {
        Self {
            store,
            launcher,
            config,
        }
    }

    /// Run until `shutdown` fires.
    ///
    /// Workers start only after the cache has synced; failing to sync within
    /// the configured timeout aborts with [`EngineError::SyncTimeout`].
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let queue = Arc::new(WorkQueue::new(RateSettings {
            base_delay: self.config.base_delay(),
            max_delay: self.config.max_delay(),
            qps: self.config.qps,
            burst: self.config.burst,
        }));
        let informer = Arc::new(Informer::new(self.store.clone()));
        let mut synced = informer.subscribe_synced();
        let stop = shutdown.child_token();

        let mut informer_task = {
            let informer = Arc::clone(&informer);
            let queue = Arc::clone(&queue);
            let stop = stop.clone();
            tokio::spawn(async move { informer.run(queue, stop).await })
        };

        let timeout = self.config.sync_timeout();
        tokio::select! {
            waited = tokio::time::timeout(timeout, synced.wait_for(|s| *s)) => {
                if waited.is_err() {
                    error!(timeout = ?timeout, "Timed out waiting for workflow cache to sync");
                    stop.cancel();
                    informer_task.abort();
                    return Err(EngineError::SyncTimeout(timeout));
                }
            }
            finished = &mut informer_task => {
                // The informer only returns early on error or shutdown.
                return finished?;
            }
        }

        let reconciler = Arc::new(Reconciler::new(self.launcher.clone(), informer.cache()));
        let workers = (0..self.config.workers)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let reconciler = Arc::clone(&reconciler);
                let max_retries = self.config.max_retries;
                tokio::spawn(worker(id, queue, reconciler, max_retries))
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), "Controller started");

        let outcome = tokio::select! {
            _ = stop.cancelled() => Ok(()),
            finished = &mut informer_task => finished?,
        };

        info!("Controller shutting down");
        stop.cancel();
        queue.shutdown();
        for handle in workers {
            handle.await?;
        }
        if !informer_task.is_finished() {
            informer_task.await??;
        }
        outcome
    }
}

async fn worker(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<Reconciler>,
    max_retries: u32,
) {
    while let Some((key, kind)) = queue.get().await {
        match reconciler.reconcile(&key, kind).await {
            Ok(action) => {
                debug!(worker = id, workflow = %key, event = %kind, action = ?action, "Reconciled");
                queue.forget(&key);
            }
            Err(e) if queue.num_requeues(&key) < max_retries => {
                warn!(
                    worker = id,
                    workflow = %key,
                    event = %kind,
                    error = %e,
                    "Reconcile failed, requeueing"
                );
                queue.add_rate_limited(key.clone(), kind);
            }
            Err(e) => {
                error!(worker = id, workflow = %key, event = %kind, error = %e, "Reconcile failed");
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "Worker stopped");
}
