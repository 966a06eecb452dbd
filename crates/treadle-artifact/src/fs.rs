use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::{
    ArtifactAccess, ArtifactCredentials, ArtifactError, ArtifactStore, ObjectStream, Result,
    check_name,
};

const CREDENTIALS_FILE: &str = ".credentials.json";

/// Filesystem-backed artifact instance.
///
/// The endpoint is a directory. Each bucket is a subdirectory and each object
/// a file inside it. The instance root holds the credentials it was
/// provisioned with; [`FsArtifactStore::connect`] refuses mismatched keys.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Lay out a fresh instance at `root` guarded by `credentials`.
    pub async fn provision(root: &Path, credentials: &ArtifactCredentials) -> Result<()> {
        fs::create_dir_all(root).await?;
        let body = serde_json::to_vec(credentials)?;
        fs::write(root.join(CREDENTIALS_FILE), body).await?;
        debug!(root = %root.display(), "Provisioned artifact instance");
        Ok(())
    }

    /// Remove an instance and everything in it. Missing instances are fine.
    pub async fn teardown(root: &Path) -> Result<()> {
        match fs::remove_dir_all(root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Open the instance at `access.endpoint`, verifying the credentials.
    pub async fn connect(access: &ArtifactAccess) -> Result<Self> {
        let root = PathBuf::from(&access.endpoint);
        let stored = match fs::read(root.join(CREDENTIALS_FILE)).await {
            Ok(bytes) => serde_json::from_slice::<ArtifactCredentials>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Unreachable(access.endpoint.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if stored != access.credentials {
            return Err(ArtifactError::Unauthorized(access.endpoint.clone()));
        }
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        check_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    async fn existing_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            Ok(dir)
        } else {
            Err(ArtifactError::BucketNotFound(bucket.to_string()))
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, local: &Path) -> Result<()> {
        check_name(object)?;
        let dir = self.existing_bucket(bucket).await?;
        fs::copy(local, dir.join(object)).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<ObjectStream> {
        let dir = self.existing_bucket(bucket).await?;
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && check_name(name).is_ok()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(Box::pin(futures::stream::iter(names.into_iter().map(Ok))))
    }

    async fn download(&self, bucket: &str, object: &str, local: &Path) -> Result<()> {
        check_name(object)?;
        let src = self.existing_bucket(bucket).await?.join(object);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::copy(&src, local).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn instance(dir: &TempDir) -> (ArtifactAccess, FsArtifactStore) {
        let root = dir.path().join("wf-artifact");
        let creds = ArtifactCredentials::generate();
        FsArtifactStore::provision(&root, &creds).await.unwrap();
        let access = ArtifactAccess::new(root.display().to_string(), creds);
        let store = FsArtifactStore::connect(&access).await.unwrap();
        (access, store)
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let dir = TempDir::new().unwrap();
        let (_, store) = instance(&dir).await;

        let src = dir.path().join("report.txt");
        std::fs::write(&src, "42").unwrap();

        store.create_bucket("wf").await.unwrap();
        store.create_bucket("wf").await.unwrap();
        store.upload("wf", "report.txt", &src).await.unwrap();

        let names: Vec<String> = store
            .list_objects("wf")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["report.txt".to_string()]);

        let dest = dir.path().join("incoming/report.txt");
        store.download("wf", "report.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "42");
    }

    #[tokio::test]
    async fn test_wrong_credentials_rejected() {
        let dir = TempDir::new().unwrap();
        let (access, _) = instance(&dir).await;
        let forged = ArtifactAccess::new(access.endpoint.clone(), ArtifactCredentials::generate());
        let err = FsArtifactStore::connect(&forged).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_missing_instance_unreachable() {
        let dir = TempDir::new().unwrap();
        let access = ArtifactAccess::new(
            dir.path().join("nope").display().to_string(),
            ArtifactCredentials::generate(),
        );
        let err = FsArtifactStore::connect(&access).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_missing_bucket_and_object() {
        let dir = TempDir::new().unwrap();
        let (_, store) = instance(&dir).await;
        assert!(matches!(
            store.list_objects("absent").await,
            Err(ArtifactError::BucketNotFound(_))
        ));

        store.create_bucket("wf").await.unwrap();
        let err = store
            .download("wf", "ghost", &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (access, _) = instance(&dir).await;
        let root = PathBuf::from(&access.endpoint);
        FsArtifactStore::teardown(&root).await.unwrap();
        assert!(!root.exists());
        FsArtifactStore::teardown(&root).await.unwrap();
    }
}
