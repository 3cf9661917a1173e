//! Storage operations on a bound handle.
//!
//! Every operation validates the handle state first, so an invalid handle
//! fails with `InvalidState` without touching the backend. A cancelled
//! token fails with `Cancelled`; a token cancelled mid-flight drops the
//! backend call and leaves the handle state as it was.

use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cask_common::{Error, LeaseId, Result, VersionId};
use cask_storage::{
    BlobConditions, BlobContent, BlobItem, BlobProperties, ByteStream, DownloadConfig,
    LeaseDuration, LeaseInfo, Metadata, RequestConditions, Tags, UploadConfig, UploadSource,
};

use crate::handle::StorageHandle;

/// Run a backend call unless or until `cancel` fires.
async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}

impl StorageHandle {
    /// Create the bound container if it does not exist yet.
    pub async fn create_container_if_absent(&self, cancel: &CancellationToken) -> Result<()> {
        let container = self.require_container()?;
        debug!(container = %container, "Creating container");
        cancellable(cancel, self.backend().create_container_if_absent(container)).await
    }

    /// Delete the bound container.
    ///
    /// # Postconditions
    /// - On success the handle is `ContainerDeleted` and every further
    ///   operation on it fails with `InvalidState`
    pub async fn delete_container(&mut self, cancel: &CancellationToken) -> Result<()> {
        let container = self.require_container()?.clone();
        debug!(container = %container, "Deleting container");

        cancellable(cancel, self.backend().delete_container(&container)).await?;

        self.state_mut().mark_container_deleted();
        info!(container = %container, "Container deleted");
        Ok(())
    }

    /// List blobs in the bound container whose id starts with `prefix`.
    pub async fn list_blobs(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlobItem>> {
        let container = self.require_container()?;
        debug!(container = %container, prefix = prefix, "Listing blobs");
        cancellable(cancel, self.backend().list_blobs(container, prefix)).await
    }

    /// Delete every blob in the bound container whose id starts with
    /// `prefix`. Returns the number removed.
    pub async fn delete_blobs(&self, prefix: &str, cancel: &CancellationToken) -> Result<usize> {
        let container = self.require_container()?;
        debug!(container = %container, prefix = prefix, "Deleting blobs by prefix");
        let count = cancellable(cancel, self.backend().delete_blobs(container, prefix)).await?;
        info!(container = %container, prefix = prefix, count = count, "Blobs deleted");
        Ok(count)
    }

    /// Upload content to the bound blob.
    ///
    /// With `overwrite` false an existing blob fails with `AlreadyExists`.
    /// With `overwrite` true content, metadata and tags are all replaced.
    pub async fn upload(
        &self,
        source: UploadSource,
        overwrite: bool,
        config: &UploadConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        let (container, blob) = self.require_blob()?;
        debug!(
            container = %container,
            blob = %blob,
            source = ?source,
            overwrite = overwrite,
            "Uploading blob"
        );
        cancellable(
            cancel,
            self.backend().upload(container, blob, source, overwrite, config),
        )
        .await
    }

    /// Upload the content of a local file.
    pub async fn upload_from_path(
        &self,
        path: impl AsRef<Path>,
        overwrite: bool,
        config: &UploadConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        let source = UploadSource::Path(path.as_ref().to_path_buf());
        self.upload(source, overwrite, config, cancel).await
    }

    /// Upload in-memory content.
    pub async fn upload_content(
        &self,
        content: impl Into<Bytes>,
        overwrite: bool,
        config: &UploadConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        let source = UploadSource::Bytes(content.into());
        self.upload(source, overwrite, config, cancel).await
    }

    /// Upload content produced by a stream.
    pub async fn upload_stream(
        &self,
        stream: ByteStream,
        overwrite: bool,
        config: &UploadConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        self.upload(UploadSource::Stream(stream), overwrite, config, cancel)
            .await
    }

    /// Download the bound blob into memory.
    pub async fn download(
        &self,
        config: &DownloadConfig,
        cancel: &CancellationToken,
    ) -> Result<BlobContent> {
        let (container, blob) = self.require_blob()?;
        debug!(container = %container, blob = %blob, "Downloading blob");
        cancellable(cancel, self.backend().download(container, blob, config)).await
    }

    /// Download the bound blob into a local file.
    ///
    /// Content is always checksum-validated before the file is written,
    /// regardless of `config.checksum.auto_validate`.
    pub async fn download_to_path(
        &self,
        destination: impl AsRef<Path>,
        config: &DownloadConfig,
        cancel: &CancellationToken,
    ) -> Result<BlobProperties> {
        let (container, blob) = self.require_blob()?;
        let destination = destination.as_ref();
        debug!(
            container = %container,
            blob = %blob,
            destination = %destination.display(),
            "Downloading blob to file"
        );
        let config = config.validated();
        cancellable(
            cancel,
            self.backend()
                .download_to_path(container, blob, destination, &config),
        )
        .await
    }

    /// Get the bound blob's system properties.
    pub async fn get_properties(&self, cancel: &CancellationToken) -> Result<BlobProperties> {
        let (container, blob) = self.require_blob()?;
        cancellable(cancel, self.backend().get_properties(container, blob)).await
    }

    /// Get the bound blob's metadata.
    pub async fn get_metadata(&self, cancel: &CancellationToken) -> Result<Metadata> {
        let (container, blob) = self.require_blob()?;
        cancellable(cancel, self.backend().get_metadata(container, blob)).await
    }

    /// Replace the bound blob's metadata.
    ///
    /// Check the backend's `tags_survive_metadata_update` capability: when
    /// it is false, tags must be set again afterwards.
    pub async fn set_metadata(
        &self,
        metadata: Metadata,
        conditions: Option<&RequestConditions>,
        cancel: &CancellationToken,
    ) -> Result<Option<VersionId>> {
        let (container, blob) = self.require_blob()?;
        debug!(container = %container, blob = %blob, keys = metadata.len(), "Setting metadata");
        cancellable(
            cancel,
            self.backend().set_metadata(container, blob, metadata, conditions),
        )
        .await
    }

    /// Get the bound blob's tags.
    pub async fn get_tags(&self, cancel: &CancellationToken) -> Result<Tags> {
        let (container, blob) = self.require_blob()?;
        cancellable(cancel, self.backend().get_tags(container, blob)).await
    }

    /// Replace the bound blob's tags.
    pub async fn set_tags(
        &self,
        tags: Tags,
        conditions: Option<&RequestConditions>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (container, blob) = self.require_blob()?;
        debug!(container = %container, blob = %blob, keys = tags.len(), "Setting tags");
        cancellable(
            cancel,
            self.backend().set_tags(container, blob, tags, conditions),
        )
        .await
    }

    /// Whether the bound blob exists. Absence is `false`, not an error.
    pub async fn exists(&self, cancel: &CancellationToken) -> Result<bool> {
        let (container, blob) = self.require_blob()?;
        cancellable(cancel, self.backend().exists(container, blob)).await
    }

    /// Delete the bound blob and its versions.
    ///
    /// # Postconditions
    /// - On success the handle is `BlobDeleted`; blob-scoped operations
    ///   fail with `InvalidState`, container-scoped ones still work
    pub async fn delete_blob(
        &mut self,
        conditions: Option<&RequestConditions>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (container, blob) = self.require_blob()?;
        let (container, blob) = (container.clone(), blob.clone());
        debug!(container = %container, blob = %blob, "Deleting blob");

        cancellable(
            cancel,
            self.backend().delete_blob(&container, &blob, conditions),
        )
        .await?;

        self.state_mut().mark_blob_deleted();
        info!(container = %container, blob = %blob, "Blob deleted");
        Ok(())
    }

    /// Acquire a lease on the bound blob.
    pub async fn acquire_lease(
        &self,
        duration: LeaseDuration,
        proposed: Option<LeaseId>,
        conditions: Option<&BlobConditions>,
        cancel: &CancellationToken,
    ) -> Result<LeaseInfo> {
        let (container, blob) = self.require_blob()?;
        let info = cancellable(
            cancel,
            self.backend()
                .acquire_lease(container, blob, duration, proposed, conditions),
        )
        .await?;
        info!(container = %container, blob = %blob, lease = %info.lease_id, "Lease acquired");
        Ok(info)
    }

    /// Renew a lease on the bound blob.
    pub async fn renew_lease(
        &self,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
        cancel: &CancellationToken,
    ) -> Result<LeaseInfo> {
        let (container, blob) = self.require_blob()?;
        cancellable(
            cancel,
            self.backend()
                .renew_lease(container, blob, lease_id, conditions),
        )
        .await
    }

    /// Release a lease on the bound blob.
    pub async fn release_lease(
        &self,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
        cancel: &CancellationToken,
    ) -> Result<LeaseInfo> {
        let (container, blob) = self.require_blob()?;
        let info = cancellable(
            cancel,
            self.backend()
                .release_lease(container, blob, lease_id, conditions),
        )
        .await?;
        info!(container = %container, blob = %blob, lease = %lease_id, "Lease released");
        Ok(info)
    }

    /// Break the lease on the bound blob.
    pub async fn break_lease(
        &self,
        break_period: Option<Duration>,
        conditions: Option<&BlobConditions>,
        cancel: &CancellationToken,
    ) -> Result<LeaseInfo> {
        let (container, blob) = self.require_blob()?;
        let info = cancellable(
            cancel,
            self.backend()
                .break_lease(container, blob, break_period, conditions),
        )
        .await?;
        info!(
            container = %container,
            blob = %blob,
            lease = %info.lease_id,
            remaining = ?info.remaining,
            "Lease broken"
        );
        Ok(info)
    }
}
