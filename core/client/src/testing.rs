//! Test support for handle tests.

use async_trait::async_trait;
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cask_common::{BlobId, ContainerId, LeaseId, Result, VersionId};
use cask_storage::{
    BlobBackend, BlobConditions, BlobContent, BlobItem, BlobProperties, Capabilities,
    DownloadConfig, LeaseDuration, LeaseInfo, MemoryBackend, Metadata, RequestConditions, Tags,
    UploadConfig, UploadSource,
};

/// Route test logs through the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Memory backend that counts calls reaching it.
pub struct CountingBackend {
    inner: MemoryBackend,
    calls: AtomicUsize,
    stall_deletes: bool,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            calls: AtomicUsize::new(0),
            stall_deletes: false,
        }
    }

    /// A backend whose blob deletes never complete.
    pub fn stalling_deletes() -> Self {
        Self {
            stall_deletes: true,
            ..Self::new()
        }
    }

    /// Number of backend calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn native_client(&self) -> &(dyn Any + Send + Sync) {
        self.inner.native_client()
    }

    async fn create_container_if_absent(&self, container: &ContainerId) -> Result<()> {
        self.hit();
        self.inner.create_container_if_absent(container).await
    }

    async fn delete_container(&self, container: &ContainerId) -> Result<()> {
        self.hit();
        self.inner.delete_container(container).await
    }

    async fn upload(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        source: UploadSource,
        overwrite: bool,
        config: &UploadConfig,
    ) -> Result<Option<VersionId>> {
        self.hit();
        self.inner
            .upload(container, blob, source, overwrite, config)
            .await
    }

    async fn download(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        config: &DownloadConfig,
    ) -> Result<BlobContent> {
        self.hit();
        self.inner.download(container, blob, config).await
    }

    async fn download_to_path(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        destination: &Path,
        config: &DownloadConfig,
    ) -> Result<BlobProperties> {
        self.hit();
        self.inner
            .download_to_path(container, blob, destination, config)
            .await
    }

    async fn get_properties(
        &self,
        container: &ContainerId,
        blob: &BlobId,
    ) -> Result<BlobProperties> {
        self.hit();
        self.inner.get_properties(container, blob).await
    }

    async fn get_metadata(&self, container: &ContainerId, blob: &BlobId) -> Result<Metadata> {
        self.hit();
        self.inner.get_metadata(container, blob).await
    }

    async fn set_metadata(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        metadata: Metadata,
        conditions: Option<&RequestConditions>,
    ) -> Result<Option<VersionId>> {
        self.hit();
        self.inner
            .set_metadata(container, blob, metadata, conditions)
            .await
    }

    async fn get_tags(&self, container: &ContainerId, blob: &BlobId) -> Result<Tags> {
        self.hit();
        self.inner.get_tags(container, blob).await
    }

    async fn set_tags(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        tags: Tags,
        conditions: Option<&RequestConditions>,
    ) -> Result<()> {
        self.hit();
        self.inner.set_tags(container, blob, tags, conditions).await
    }

    async fn exists(&self, container: &ContainerId, blob: &BlobId) -> Result<bool> {
        self.hit();
        self.inner.exists(container, blob).await
    }

    async fn list_blobs(&self, container: &ContainerId, prefix: &str) -> Result<Vec<BlobItem>> {
        self.hit();
        self.inner.list_blobs(container, prefix).await
    }

    async fn delete_blobs(&self, container: &ContainerId, prefix: &str) -> Result<usize> {
        self.hit();
        self.inner.delete_blobs(container, prefix).await
    }

    async fn delete_blob(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        conditions: Option<&RequestConditions>,
    ) -> Result<()> {
        self.hit();
        if self.stall_deletes {
            futures::future::pending::<()>().await;
        }
        self.inner.delete_blob(container, blob, conditions).await
    }

    async fn acquire_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        duration: LeaseDuration,
        proposed: Option<LeaseId>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        self.hit();
        self.inner
            .acquire_lease(container, blob, duration, proposed, conditions)
            .await
    }

    async fn renew_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        self.hit();
        self.inner
            .renew_lease(container, blob, lease_id, conditions)
            .await
    }

    async fn release_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        self.hit();
        self.inner
            .release_lease(container, blob, lease_id, conditions)
            .await
    }

    async fn break_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        break_period: Option<Duration>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        self.hit();
        self.inner
            .break_lease(container, blob, break_period, conditions)
            .await
    }
}
