//! Workflow resource store.
//!
//! The store is the only source of truth for workflow spec and status. Every
//! mutation is a full-object replace; a put that carries the
//! `resourceVersion` it read is rejected with [`StoreError::Conflict`] when
//! another writer got there first. [`read_modify_write`] wraps the
//! get → mutate → put cycle with bounded conflict retries.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: in-process map with a broadcast change feed
//! - [`FsStore`]: one JSON document per workflow, change feed driven by a
//!   debounced filesystem watcher

mod error;
mod fs;
mod memory;
mod update;

pub use error::{Result, StoreError};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use update::{read_modify_write, update_if_changed};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use treadle_types::{ObjectKey, WatchEvent, Workflow};

/// A stream of workflow change notifications.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent<Workflow>> + Send>>;

/// Typed access to persisted workflows.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one workflow.
    async fn get(&self, key: &ObjectKey) -> Result<Workflow>;

    /// List workflows, optionally restricted to one namespace.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Workflow>>;

    /// Replace (or create) a workflow.
    ///
    /// The object must carry the workflow type stamp. When
    /// `metadata.resource_version` is set it must equal the stored version;
    /// a versioned put for a missing object fails with `NotFound`. Returns
    /// the stored object with its new version.
    async fn put(&self, workflow: Workflow) -> Result<Workflow>;

    /// Remove a workflow.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> Result<WatchStream>;
}

/// A store that can be shared across tasks.
pub type SharedStore = Arc<dyn ResourceStore>;

/// Reject objects missing the workflow type stamp.
pub(crate) fn check_stamp(workflow: &Workflow) -> Result<()> {
    if workflow.type_meta.is_workflow() {
        Ok(())
    } else {
        Err(StoreError::InvalidObject {
            key: workflow.key(),
            reason: format!(
                "expected {}/{}, got '{}'/'{}'",
                treadle_types::API_VERSION,
                treadle_types::KIND,
                workflow.type_meta.api_version,
                workflow.type_meta.kind
            ),
        })
    }
}
