//! Directory-backed store: `{root}/{namespace}/{name}.json`.
//!
//! Writes land in a dot-prefixed temp file and are renamed into place, so
//! readers never observe a partial document. Every version check and replace
//! holds an advisory lock on `{root}/.lock`, which serializes writers across
//! handles and across processes sharing the root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_mini::{
    DebounceEventResult, DebouncedEvent, DebouncedEventKind, new_debouncer,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use treadle_types::{ObjectKey, WatchEvent, Workflow};

use crate::{ResourceStore, Result, StoreError, WatchStream, check_stamp};

const DOC_EXT: &str = "json";
const LOCK_FILE: &str = ".lock";
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Workflow store persisted as JSON documents on disk.
pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (and create if missing) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, key: &ObjectKey) -> Result<PathBuf> {
        for part in [&key.namespace, &key.name] {
            if part.is_empty() || part.starts_with('.') || part.contains(['/', '\\']) {
                return Err(StoreError::InvalidObject {
                    key: key.clone(),
                    reason: format!("'{part}' is not usable as a path segment"),
                });
            }
        }
        Ok(self
            .root
            .join(&key.namespace)
            .join(format!("{}.{DOC_EXT}", key.name)))
    }

    /// Run `critical` on a blocking thread while holding the store lock.
    async fn locked<T, F>(&self, critical: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        // Keeps this handle's writers off the blocking pool while one waits.
        let _local = self.write_lock.lock().await;
        let lock_path = self.root.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            let mut lock = fd_lock::RwLock::new(file);
            let _held = lock.write()?;
            critical()
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn read_doc(&self, key: &ObjectKey) -> Result<Option<Workflow>> {
        let path = self.doc_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    async fn list_namespace(&self, namespace: &str, out: &mut Vec<Workflow>) -> Result<()> {
        let dir = self.root.join(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Workflow>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(wf) => out.push(wf),
                Err(error) => {
                    warn!(path = %path.display(), %error, "Skipping unreadable workflow document")
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for FsStore {
    async fn get(&self, key: &ObjectKey) -> Result<Workflow> {
        self.read_doc(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Workflow>> {
        let mut out = Vec::new();
        match namespace {
            Some(ns) => self.list_namespace(ns, &mut out).await?,
            None => {
                for ns in self.namespaces().await? {
                    self.list_namespace(&ns, &mut out).await?;
                }
            }
        }
        out.sort_by_key(|wf| wf.key());
        Ok(out)
    }

    async fn put(&self, workflow: Workflow) -> Result<Workflow> {
        check_stamp(&workflow)?;
        let path = self.doc_path(&workflow.key())?;
        self.locked(move || replace_document(&path, workflow)).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let path = self.doc_path(key)?;
        let key = key.clone();
        self.locked(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key)),
            Err(e) => Err(e.into()),
        })
        .await
    }

    fn watch(&self) -> Result<WatchStream> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

        let mut debouncer = new_debouncer(DEBOUNCE, notify_tx)
            .map_err(|e| StoreError::Watch(format!("Failed to create file watcher: {e}")))?;
        debouncer
            .watcher()
            .watch(&self.root, notify::RecursiveMode::Recursive)
            .map_err(|e| {
                StoreError::Watch(format!("Failed to watch {}: {e}", self.root.display()))
            })?;

        // Seed with what exists now so later changes classify correctly.
        let root = self.root.clone();
        let mut known = scan_documents(&root);

        std::thread::spawn(move || {
            let _debouncer = debouncer;
            for batch in notify_rx {
                for change in translate(&root, &mut known, batch) {
                    if event_tx.blocking_send(change).is_err() {
                        // Subscriber went away.
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(futures::stream::unfold(event_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }
}

/// Check the caller's version against the stored one and swap in the new
/// document. The store lock must be held.
fn replace_document(path: &Path, mut workflow: Workflow) -> Result<Workflow> {
    let key = workflow.key();
    let stored = match std::fs::read(path) {
        Ok(bytes) => Some(serde_json::from_slice::<Workflow>(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    let stored_version = stored
        .as_ref()
        .and_then(|wf| wf.metadata.resource_version.clone());

    if let Some(expected) = &workflow.metadata.resource_version {
        match &stored_version {
            None if stored.is_none() => return Err(StoreError::NotFound(key)),
            Some(actual) if actual != expected => {
                return Err(StoreError::Conflict {
                    key,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            _ => {}
        }
    }

    let next = stored_version
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(1, |v| v + 1);
    workflow.metadata.resource_version = Some(next.to_string());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_file_name(format!(".{}.{DOC_EXT}.tmp", key.name));
    std::fs::write(&tmp, serde_json::to_vec_pretty(&workflow)?)?;
    std::fs::rename(&tmp, path)?;

    debug!(workflow = %key, version = next, "Stored workflow");
    Ok(workflow)
}

fn is_document(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == DOC_EXT)
}

fn read_document(path: &Path) -> Option<Workflow> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(wf) => Some(wf),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable workflow document");
            None
        }
    }
}

fn scan_documents(root: &Path) -> HashMap<PathBuf, Workflow> {
    let mut known = HashMap::new();
    let Ok(namespaces) = std::fs::read_dir(root) else {
        return known;
    };
    for ns in namespaces.flatten() {
        let Ok(docs) = std::fs::read_dir(ns.path()) else {
            continue;
        };
        for doc in docs.flatten() {
            let path = doc.path();
            if is_document(&path)
                && let Some(wf) = read_document(&path)
            {
                known.insert(path, wf);
            }
        }
    }
    known
}

/// Turn one debouncer batch into typed events.
///
/// A watcher error means changes may have been missed: the known set is
/// rebuilt from disk and subscribers are told to relist.
fn translate<E: std::fmt::Display>(
    root: &Path,
    known: &mut HashMap<PathBuf, Workflow>,
    batch: std::result::Result<Vec<DebouncedEvent>, E>,
) -> Vec<WatchEvent<Workflow>> {
    match batch {
        Ok(events) => events
            .into_iter()
            .filter(|event| event.kind == DebouncedEventKind::Any && is_document(&event.path))
            .filter_map(|event| classify(known, &event.path))
            .collect(),
        Err(e) => {
            warn!(root = %root.display(), error = %e, "File watcher error, resyncing");
            *known = scan_documents(root);
            vec![WatchEvent::Resync]
        }
    }
}

/// Turn a raw path change into a typed event, updating the cache.
fn classify(known: &mut HashMap<PathBuf, Workflow>, path: &Path) -> Option<WatchEvent<Workflow>> {
    if !path.exists() {
        return known.remove(path).map(WatchEvent::Deleted);
    }
    let current = read_document(path)?;
    match known.insert(path.to_path_buf(), current.clone()) {
        Some(previous) if previous == current => None,
        Some(_) => Some(WatchEvent::Modified(current)),
        None => Some(WatchEvent::Added(current)),
    }
}
