//! Local cache of workflows fed by the store's change feed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use treadle_store::SharedStore;
use treadle_types::{ObjectKey, WatchEvent, Workflow};

use crate::workqueue::{EventKind, WorkQueue};
use crate::{EngineError, Result};

const RELIST_RETRY: Duration = Duration::from_secs(1);

/// Read-only view of the informer's cache.
#[derive(Clone, Default)]
pub struct WorkflowCache {
    objects: Arc<RwLock<HashMap<ObjectKey, Workflow>>>,
}

impl WorkflowCache {
    pub fn get(&self, key: &ObjectKey) -> Option<Workflow> {
        self.objects.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn insert(&self, workflow: Workflow) -> Option<Workflow> {
        self.objects.write().insert(workflow.key(), workflow)
    }

    fn remove(&self, key: &ObjectKey) -> Option<Workflow> {
        self.objects.write().remove(key)
    }

    fn keys(&self) -> Vec<ObjectKey> {
        self.objects.read().keys().cloned().collect()
    }
}

/// Lists every workflow once, then follows the change feed, keeping
/// [`WorkflowCache`] current and turning changes into queue events.
pub struct Informer {
    store: SharedStore,
    cache: WorkflowCache,
    synced: watch::Sender<bool>,
}

impl Informer {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            cache: WorkflowCache::default(),
            synced: watch::Sender::new(false),
        }
    }

    pub fn cache(&self) -> WorkflowCache {
        self.cache.clone()
    }

    /// Flips to `true` once the initial list has been loaded.
    pub fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Fill the cache and follow changes until `shutdown` fires.
    ///
    /// The feed is opened before listing so nothing written in between is
    /// missed; replays of listed objects are absorbed by the cache. When the
    /// feed reports dropped changes the store is listed again and the cache
    /// diffed against it.
    pub async fn run(
        &self,
        queue: Arc<WorkQueue<ObjectKey>>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut feed = self.store.watch()?;

        let initial = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            listed = self.store.list(None) => listed?,
        };
        self.replace_all(initial, &queue);
        self.synced.send_replace(true);
        info!(workflows = self.cache.len(), "Workflow cache synced");

        let mut relist_at: Option<tokio::time::Instant> = None;
        loop {
            let relist_due = async move {
                match relist_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = relist_due => relist_at = self.relist(&queue).await,
                event = feed.next() => match event {
                    Some(WatchEvent::Resync) => {
                        warn!("Workflow change feed dropped events, relisting");
                        relist_at = self.relist(&queue).await;
                    }
                    Some(event) => self.handle(event, &queue),
                    None => {
                        warn!("Workflow change feed closed");
                        return Err(EngineError::FeedClosed);
                    }
                },
            }
        }
    }

    /// List the store and reconcile the cache with it. Returns when to try
    /// again if the list failed.
    async fn relist(&self, queue: &WorkQueue<ObjectKey>) -> Option<tokio::time::Instant> {
        match self.store.list(None).await {
            Ok(workflows) => {
                self.replace_all(workflows, queue);
                info!(workflows = self.cache.len(), "Workflow cache resynced");
                None
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?RELIST_RETRY, "Relisting workflows failed");
                Some(tokio::time::Instant::now() + RELIST_RETRY)
            }
        }
    }

    /// Make the cache hold exactly `workflows`, queueing what changed.
    fn replace_all(&self, workflows: Vec<Workflow>, queue: &WorkQueue<ObjectKey>) {
        let listed: HashSet<ObjectKey> = workflows.iter().map(Workflow::key).collect();
        for workflow in workflows {
            self.observe(workflow, queue);
        }
        for key in self.cache.keys() {
            if !listed.contains(&key) {
                self.cache.remove(&key);
                queue.add(key, EventKind::Deleted);
            }
        }
    }

    fn observe(&self, workflow: Workflow, queue: &WorkQueue<ObjectKey>) {
        let key = workflow.key();
        let spec = workflow.spec.clone();
        match self.cache.insert(workflow) {
            None => queue.add(key, EventKind::Created),
            Some(previous) if previous.spec != spec => queue.add(key, EventKind::Updated),
            // Status-only writes from runs leave the schedule alone.
            Some(_) => debug!(workflow = %key, "Ignoring status-only change"),
        }
    }

    fn handle(&self, event: WatchEvent<Workflow>, queue: &WorkQueue<ObjectKey>) {
        match event {
            WatchEvent::Added(workflow) | WatchEvent::Modified(workflow) => {
                self.observe(workflow, queue)
            }
            WatchEvent::Deleted(workflow) => {
                let key = workflow.key();
                self.cache.remove(&key);
                queue.add(key, EventKind::Deleted);
            }
            WatchEvent::Resync => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use treadle_store::{MemoryStore, ResourceStore, WatchStream};
    use treadle_types::TaskCommand;

    use crate::workqueue::RateSettings;

    fn workflow(name: &str) -> Workflow {
        Workflow::new("default", name).with_task("t", TaskCommand::script("true"))
    }

    async fn next(queue: &WorkQueue<ObjectKey>) -> (ObjectKey, EventKind) {
        let item = tokio::time::timeout(Duration::from_secs(5), queue.get())
            .await
            .unwrap()
            .unwrap();
        queue.done(&item.0);
        item
    }

    #[tokio::test]
    async fn test_initial_list_then_changes() {
        let store = Arc::new(MemoryStore::new());
        let existing = store.put(workflow("existing")).await.unwrap();

        let informer = Arc::new(Informer::new(store.clone()));
        let queue = Arc::new(WorkQueue::new(RateSettings::default()));
        let shutdown = CancellationToken::new();
        let mut synced = informer.subscribe_synced();

        let task = {
            let informer = Arc::clone(&informer);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { informer.run(queue, shutdown).await })
        };
        synced.wait_for(|s| *s).await.unwrap();

        assert_eq!(next(&queue).await, (existing.key(), EventKind::Created));
        assert!(informer.cache().get(&existing.key()).is_some());

        // Status-only change: cached but not queued.
        let mut ran = store.get(&existing.key()).await.unwrap();
        ran.begin_run(Utc::now());
        store.put(ran).await.unwrap();

        // Spec change: queued as an update.
        let mut edited = store.get(&existing.key()).await.unwrap();
        edited.spec.schedule = "@daily".into();
        store.put(edited).await.unwrap();
        assert_eq!(next(&queue).await, (existing.key(), EventKind::Updated));
        assert_eq!(
            informer.cache().get(&existing.key()).unwrap().spec.schedule,
            "@daily"
        );

        store.delete(&existing.key()).await.unwrap();
        assert_eq!(next(&queue).await, (existing.key(), EventKind::Deleted));
        assert!(informer.cache().is_empty());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    /// A memory store whose change feed is driven by hand.
    struct ManualFeed {
        inner: MemoryStore,
        feed: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<WatchEvent<Workflow>>>>,
    }

    impl ManualFeed {
        fn new() -> (Self, mpsc::UnboundedSender<WatchEvent<Workflow>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let store = Self {
                inner: MemoryStore::new(),
                feed: parking_lot::Mutex::new(Some(rx)),
            };
            (store, tx)
        }
    }

    #[async_trait]
    impl ResourceStore for ManualFeed {
        async fn get(&self, key: &ObjectKey) -> treadle_store::Result<Workflow> {
            self.inner.get(key).await
        }

        async fn list(&self, namespace: Option<&str>) -> treadle_store::Result<Vec<Workflow>> {
            self.inner.list(namespace).await
        }

        async fn put(&self, workflow: Workflow) -> treadle_store::Result<Workflow> {
            self.inner.put(workflow).await
        }

        async fn delete(&self, key: &ObjectKey) -> treadle_store::Result<()> {
            self.inner.delete(key).await
        }

        fn watch(&self) -> treadle_store::Result<WatchStream> {
            let rx = self
                .feed
                .lock()
                .take()
                .ok_or_else(|| treadle_store::StoreError::Watch("already watched".into()))?;
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })))
        }
    }

    #[tokio::test]
    async fn test_resync_recovers_dropped_changes() {
        let (store, feed) = ManualFeed::new();
        let store = Arc::new(store);
        let kept = store.put(workflow("kept")).await.unwrap();
        let doomed = store.put(workflow("doomed")).await.unwrap();

        let informer = Arc::new(Informer::new(store.clone()));
        let queue = Arc::new(WorkQueue::new(RateSettings::default()));
        let shutdown = CancellationToken::new();
        let mut synced = informer.subscribe_synced();
        let task = {
            let informer = Arc::clone(&informer);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { informer.run(queue, shutdown).await })
        };
        synced.wait_for(|s| *s).await.unwrap();
        let mut initial = vec![next(&queue).await, next(&queue).await];
        initial.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            initial,
            vec![
                (doomed.key(), EventKind::Created),
                (kept.key(), EventKind::Created)
            ]
        );

        // Changes the feed never reports.
        let born = store.put(workflow("born")).await.unwrap();
        store.delete(&doomed.key()).await.unwrap();
        let mut edited = store.get(&kept.key()).await.unwrap();
        edited.spec.schedule = "@daily".into();
        store.put(edited).await.unwrap();
        assert!(informer.cache().get(&born.key()).is_none());

        feed.send(WatchEvent::Resync).unwrap();
        let mut caught_up = vec![next(&queue).await, next(&queue).await, next(&queue).await];
        caught_up.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            caught_up,
            vec![
                (born.key(), EventKind::Created),
                (doomed.key(), EventKind::Deleted),
                (kept.key(), EventKind::Updated),
            ]
        );
        let cache = informer.cache();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&doomed.key()).is_none());
        assert_eq!(cache.get(&kept.key()).unwrap().spec.schedule, "@daily");

        // A feed that goes away still ends the informer.
        drop(feed);
        assert!(matches!(task.await.unwrap(), Err(EngineError::FeedClosed)));
        shutdown.cancel();
    }
}
