//! Artifact storage for handing files from one task to the next.
//!
//! Tasks of a run share one bucket named after the workflow. A task drops
//! files into its local `outgoing` directory; after it finishes they are
//! uploaded, and the next task finds them in its `incoming` directory.
//!
//! The [`ArtifactStore`] trait is the backend seam. [`FsArtifactStore`]
//! keeps buckets as directories under an instance root guarded by a
//! credentials file.

mod credentials;
mod error;
mod fs;
mod transfer;

pub use credentials::{
    ACCESS_KEY_ENV, ArtifactAccess, ArtifactCredentials, ENDPOINT_ENV, SECRET_KEY_ENV,
};
pub use error::{ArtifactError, Result};
pub use fs::FsArtifactStore;
pub use transfer::{download_all, upload_dir};

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Stream of object names in a bucket.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Object transfer between a local filesystem and a bucketed store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create a bucket. Creating an existing bucket succeeds.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Copy a local file into the bucket under `object`.
    async fn upload(&self, bucket: &str, object: &str, local: &Path) -> Result<()>;

    /// Names of every object in the bucket.
    async fn list_objects(&self, bucket: &str) -> Result<ObjectStream>;

    /// Copy `object` out of the bucket to a local file.
    async fn download(&self, bucket: &str, object: &str, local: &Path) -> Result<()>;
}

/// Reject names that would escape their bucket or instance.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(['/', '\\'])
    {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(())
}
