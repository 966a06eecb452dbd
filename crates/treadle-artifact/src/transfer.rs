//! Whole-directory transfers used by the task executor.

use std::path::Path;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::{ArtifactStore, Result, check_name};

/// Download every object in `bucket` into `dir`. Returns the object count.
pub async fn download_all(store: &dyn ArtifactStore, bucket: &str, dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dir).await?;
    let mut objects = store.list_objects(bucket).await?;
    let mut count = 0;
    while let Some(object) = objects.next().await {
        let object = object?;
        store.download(bucket, &object, &dir.join(&object)).await?;
        count += 1;
    }
    debug!(bucket, count, dir = %dir.display(), "Downloaded artifacts");
    Ok(count)
}

/// Upload the regular files directly inside `dir` into `bucket`.
///
/// A missing or empty directory uploads nothing and leaves the store
/// untouched. The bucket is created on first use.
pub async fn upload_dir(store: &dyn ArtifactStore, bucket: &str, dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if check_name(&name).is_ok() => files.push(name),
            Ok(name) => warn!(file = %name, "Skipping artifact with unusable name"),
            Err(name) => warn!(file = ?name, "Skipping artifact with non-UTF-8 name"),
        }
    }
    if files.is_empty() {
        return Ok(0);
    }

    store.create_bucket(bucket).await?;
    for name in &files {
        store.upload(bucket, name, &dir.join(name)).await?;
    }
    debug!(bucket, count = files.len(), "Uploaded artifacts");
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArtifactAccess, ArtifactCredentials, FsArtifactStore};
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> FsArtifactStore {
        let root = dir.path().join("instance");
        let creds = ArtifactCredentials::generate();
        FsArtifactStore::provision(&root, &creds).await.unwrap();
        FsArtifactStore::connect(&ArtifactAccess::new(root.display().to_string(), creds))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_outgoing_to_incoming() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let outgoing = dir.path().join("outgoing");
        std::fs::create_dir_all(outgoing.join("nested")).unwrap();
        std::fs::write(outgoing.join("a.txt"), "a").unwrap();
        std::fs::write(outgoing.join("b.txt"), "b").unwrap();
        std::fs::write(outgoing.join(".hidden"), "h").unwrap();

        assert_eq!(upload_dir(&store, "wf", &outgoing).await.unwrap(), 2);

        let incoming = dir.path().join("incoming");
        assert_eq!(download_all(&store, "wf", &incoming).await.unwrap(), 2);
        assert_eq!(std::fs::read_to_string(incoming.join("b.txt")).unwrap(), "b");
        assert!(!incoming.join(".hidden").exists());
    }

    #[tokio::test]
    async fn test_empty_outgoing_creates_no_bucket() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        assert_eq!(upload_dir(&store, "wf", &dir.path().join("missing")).await.unwrap(), 0);
        let empty = dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert_eq!(upload_dir(&store, "wf", &empty).await.unwrap(), 0);

        assert!(download_all(&store, "wf", &dir.path().join("in")).await.is_err());
    }
}
