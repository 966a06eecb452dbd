//! In-process store with a broadcast change feed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;
use treadle_types::{ObjectKey, WatchEvent, Workflow};

use crate::{ResourceStore, Result, StoreError, WatchStream, check_stamp};

const FEED_CAPACITY: usize = 256;

struct Inner {
    objects: BTreeMap<ObjectKey, Workflow>,
    next_version: u64,
}

/// Workflow store held entirely in memory.
///
/// Versions are drawn from one counter shared by all objects, so every write
/// yields a fresh `resourceVersion`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<WatchEvent<Workflow>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(FEED_CAPACITY)
    }

    /// A store whose watchers buffer at most `capacity` unread events.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            inner: RwLock::new(Inner {
                objects: BTreeMap::new(),
                next_version: 1,
            }),
            events,
        }
    }

    /// Number of stored workflows.
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    fn emit(&self, event: WatchEvent<Workflow>) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Workflow> {
        self.inner
            .read()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Workflow>> {
        Ok(self
            .inner
            .read()
            .objects
            .values()
            .filter(|wf| namespace.is_none_or(|ns| wf.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn put(&self, mut workflow: Workflow) -> Result<Workflow> {
        check_stamp(&workflow)?;
        let key = workflow.key();

        let event = {
            let mut inner = self.inner.write();
            let stored_version = inner
                .objects
                .get(&key)
                .and_then(|wf| wf.metadata.resource_version.clone());

            match (&workflow.metadata.resource_version, &stored_version) {
                (Some(_), None) if !inner.objects.contains_key(&key) => {
                    return Err(StoreError::NotFound(key));
                }
                (Some(expected), Some(actual)) if expected != actual => {
                    return Err(StoreError::Conflict {
                        key,
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                _ => {}
            }

            let version = inner.next_version;
            inner.next_version += 1;
            workflow.metadata.resource_version = Some(version.to_string());

            let existed = inner
                .objects
                .insert(key, workflow.clone())
                .is_some();
            if existed {
                WatchEvent::Modified(workflow.clone())
            } else {
                WatchEvent::Added(workflow.clone())
            }
        };

        self.emit(event);
        Ok(workflow)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let removed = self.inner.write().objects.remove(key);
        match removed {
            Some(wf) => {
                self.emit(WatchEvent::Deleted(wf));
                Ok(())
            }
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    fn watch(&self) -> Result<WatchStream> {
        Ok(broadcast_stream(self.events.subscribe()))
    }
}

/// Adapt a broadcast receiver into a watch stream. Lag surfaces as
/// [`WatchEvent::Resync`].
pub(crate) fn broadcast_stream(rx: broadcast::Receiver<WatchEvent<Workflow>>) -> WatchStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((event, rx)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Workflow watch lagged, events dropped");
                Some((WatchEvent::Resync, rx))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }))
}
