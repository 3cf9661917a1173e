//! Blob backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cask_common::{BlobId, ContainerId, ETag, Error, LeaseId, Result, VersionId};

use crate::checksum::Checksum;
use crate::conditions::{BlobConditions, RequestConditions};
use crate::lease::{LeaseDuration, LeaseInfo, LeaseState};
use crate::options::{DownloadConfig, UploadConfig, UploadSource};

/// User-defined key/value metadata of a blob.
pub type Metadata = HashMap<String, String>;

/// Indexed key/value tags of a blob.
pub type Tags = HashMap<String, String>;

/// System properties of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    /// Content length in bytes.
    pub size: u64,
    /// Current ETag.
    pub etag: ETag,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Current version, when the backend keeps versions.
    pub version_id: Option<VersionId>,
    /// Checksum stored with the content.
    pub checksum: Option<Checksum>,
    /// Lease state at the time the properties were read.
    pub lease_state: LeaseState,
}

/// Downloaded content together with the properties it was read at.
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub data: Bytes,
    pub properties: BlobProperties,
}

/// One entry of a blob listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: BlobId,
    pub properties: BlobProperties,
}

/// Optional features a backend provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Lease operations are available.
    pub leases: bool,
    /// Writes create new blob versions and report their ids.
    pub versioning: bool,
    /// Tags can be stored and queried.
    pub tags: bool,
    /// Tags are kept when `set_metadata` writes a blob.
    ///
    /// Backends that cut a new version on metadata updates may leave the
    /// new version untagged, in which case callers must reapply tags.
    pub tags_survive_metadata_update: bool,
}

/// Storage backend contract.
///
/// All operations are async. Implementations own their network policy
/// (retries, pooling, authentication) and map provider failures onto the
/// shared error taxonomy:
/// - `NotFound` / `AlreadyExists` for missing or clashing resources
/// - `PreconditionFailed` when a conditional request is rejected
/// - `Unsupported` when a capability is absent
/// - `Unauthorized`, `Transient` (retryable) and `Provider` (opaque)
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Features this backend provides.
    fn capabilities(&self) -> Capabilities;

    /// The provider's native client, for callers that need features the
    /// contract does not cover. Callers downcast to the concrete type.
    fn native_client(&self) -> &(dyn Any + Send + Sync);

    /// Create a container. Succeeds if it already exists.
    async fn create_container_if_absent(&self, container: &ContainerId) -> Result<()>;

    /// Delete a container and everything in it.
    ///
    /// # Errors
    /// - Container not found
    async fn delete_container(&self, container: &ContainerId) -> Result<()>;

    /// Upload content to a blob.
    ///
    /// # Postconditions
    /// - Content, metadata and tags are all replaced by the values in
    ///   `config`. Nothing from a previous blob is merged in.
    /// - Returns the new version id when the backend keeps versions.
    ///
    /// # Errors
    /// - Container not found
    /// - `AlreadyExists` if the blob exists and `overwrite` is false
    /// - `PreconditionFailed` if `config.conditions` do not hold
    /// - `Integrity` if a precalculated checksum does not match
    async fn upload(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        source: UploadSource,
        overwrite: bool,
        config: &UploadConfig,
    ) -> Result<Option<VersionId>>;

    /// Download a blob's full content.
    ///
    /// # Errors
    /// - Blob not found
    /// - `PreconditionFailed` if `config.conditions` do not hold
    /// - `Integrity` if validation is on and the content is corrupt
    async fn download(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        config: &DownloadConfig,
    ) -> Result<BlobContent>;

    /// Download a blob into a local file.
    ///
    /// Content is always validated, whatever `config.checksum` says. The
    /// destination is only written once validation has passed.
    async fn download_to_path(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        destination: &Path,
        config: &DownloadConfig,
    ) -> Result<BlobProperties> {
        let content = self.download(container, blob, &config.validated()).await?;
        write_file_atomically(destination, &content.data).await?;
        Ok(content.properties)
    }

    /// Get a blob's system properties.
    async fn get_properties(&self, container: &ContainerId, blob: &BlobId)
        -> Result<BlobProperties>;

    /// Get a blob's metadata. Empty if none was set.
    async fn get_metadata(&self, container: &ContainerId, blob: &BlobId) -> Result<Metadata>;

    /// Replace a blob's metadata.
    ///
    /// Returns the new version id when the backend keeps versions. See
    /// [`Capabilities::tags_survive_metadata_update`] for what happens to
    /// tags.
    async fn set_metadata(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        metadata: Metadata,
        conditions: Option<&RequestConditions>,
    ) -> Result<Option<VersionId>>;

    /// Get a blob's tags. Empty if none were set.
    async fn get_tags(&self, container: &ContainerId, blob: &BlobId) -> Result<Tags>;

    /// Replace a blob's tag set.
    async fn set_tags(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        tags: Tags,
        conditions: Option<&RequestConditions>,
    ) -> Result<()>;

    /// Check whether a blob exists. A missing blob or container is `false`.
    async fn exists(&self, container: &ContainerId, blob: &BlobId) -> Result<bool>;

    /// List blobs whose id starts with `prefix`, sorted by id.
    async fn list_blobs(&self, container: &ContainerId, prefix: &str) -> Result<Vec<BlobItem>>;

    /// Delete every blob whose id starts with `prefix`, byte for byte.
    ///
    /// Returns the number of blobs removed.
    async fn delete_blobs(&self, container: &ContainerId, prefix: &str) -> Result<usize>;

    /// Delete one blob and all of its versions.
    ///
    /// # Errors
    /// - Blob not found
    /// - `PreconditionFailed` if leased and no matching lease id is given
    async fn delete_blob(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        conditions: Option<&RequestConditions>,
    ) -> Result<()>;

    /// Acquire a lease. `proposed` picks the lease id.
    async fn acquire_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        duration: LeaseDuration,
        proposed: Option<LeaseId>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let _ = (container, blob, duration, proposed, conditions);
        Err(self.lease_unsupported())
    }

    /// Renew a lease for its original duration.
    async fn renew_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let _ = (container, blob, lease_id, conditions);
        Err(self.lease_unsupported())
    }

    /// Release a lease.
    async fn release_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let _ = (container, blob, lease_id, conditions);
        Err(self.lease_unsupported())
    }

    /// Break a lease. The result reports the time left until it is broken.
    async fn break_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        break_period: Option<Duration>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let _ = (container, blob, break_period, conditions);
        Err(self.lease_unsupported())
    }

    #[doc(hidden)]
    fn lease_unsupported(&self) -> Error {
        Error::Unsupported(format!("Backend '{}' does not support leases", self.name()))
    }
}

/// Write `data` to `destination` through a temporary sibling file.
///
/// The destination either keeps its old content or receives all of `data`.
/// The temporary file is removed if anything fails before the rename.
pub async fn write_file_atomically(destination: &Path, data: &[u8]) -> Result<()> {
    if destination.file_name().is_none() {
        return Err(Error::InvalidInput(format!(
            "Destination has no file name: {}",
            destination.display()
        )));
    }
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let destination = destination.to_path_buf();
    let data = data.to_vec();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut partial = tempfile::Builder::new()
            .prefix(".cask-")
            .suffix(".partial")
            .tempfile_in(&directory)?;
        partial.write_all(&data)?;
        partial.as_file().sync_all()?;
        partial.persist(&destination).map_err(|e| Error::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Provider(format!("File write task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn test_properties_serialization() {
        let props = BlobProperties {
            size: 1024,
            etag: ETag::new("abc123"),
            last_modified: Utc::now(),
            version_id: Some(VersionId::new("v1")),
            checksum: Checksum::compute(ChecksumAlgorithm::Crc32, b"data"),
            lease_state: LeaseState::Available,
        };

        let json = serde_json::to_string(&props).unwrap();
        let deserialized: BlobProperties = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, props);
    }

    #[tokio::test]
    async fn test_write_file_atomically_replaces_content() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.bin");
        tokio::fs::write(&dest, b"old").await.unwrap();

        write_file_atomically(&dest, b"new content").await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"new content");
        let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_file_atomically_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("missing").join("out.bin");
        assert!(write_file_atomically(&dest, b"data").await.is_err());
    }

    #[tokio::test]
    async fn test_write_file_atomically_cleans_up_on_failure() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("occupied");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("child"), b"x").unwrap();

        assert!(write_file_atomically(&dest, b"data").await.is_err());

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("occupied")]);
    }
}
