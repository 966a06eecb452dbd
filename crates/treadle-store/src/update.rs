//! Conditional read-modify-write with conflict retry.

use std::time::Duration;

use tracing::warn;
use treadle_types::{ObjectKey, Workflow};

use crate::{ResourceStore, Result};

const RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Fetch a workflow, apply `mutate`, stamp it and write it back.
///
/// The write carries the version that was read. On a version conflict the
/// whole cycle is repeated with a fresh read, at most `retries` more times.
/// Errors from `mutate` abort without writing.
pub async fn read_modify_write<T, F>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    retries: u32,
    mut mutate: F,
) -> Result<(Workflow, T)>
where
    F: FnMut(&mut Workflow) -> Result<T> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        let mut workflow = store.get(key).await?;
        let value = mutate(&mut workflow)?;
        if let Some(saved) = try_put(store, key, workflow, retries, &mut attempt).await? {
            return Ok((saved, value));
        }
    }
}

/// Like [`read_modify_write`], but `mutate` reports whether it changed
/// anything. When it did not, nothing is written and the workflow as read
/// comes back with `false`.
pub async fn update_if_changed<F>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    retries: u32,
    mut mutate: F,
) -> Result<(Workflow, bool)>
where
    F: FnMut(&mut Workflow) -> Result<bool> + Send,
{
    let mut attempt = 0;
    loop {
        let mut workflow = store.get(key).await?;
        if !mutate(&mut workflow)? {
            return Ok((workflow, false));
        }
        if let Some(saved) = try_put(store, key, workflow, retries, &mut attempt).await? {
            return Ok((saved, true));
        }
    }
}

/// Stamp and write. `None` means the write lost a version race and the
/// caller should re-read and try again.
async fn try_put(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    mut workflow: Workflow,
    retries: u32,
    attempt: &mut u32,
) -> Result<Option<Workflow>> {
    workflow.stamp();
    match store.put(workflow).await {
        Ok(saved) => Ok(Some(saved)),
        Err(e) if e.is_conflict() && *attempt < retries => {
            *attempt += 1;
            warn!(workflow = %key, attempt = *attempt, "Status write conflicted, retrying");
            tokio::time::sleep(RETRY_PAUSE * *attempt).await;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
