//! In-memory blob backend.
//!
//! Implements the full contract, including leases, tags and optional
//! versioning. Useful for testing and development. All data is stored in
//! memory and lost on drop.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

use cask_common::{BlobId, ContainerId, ETag, Error, LeaseId, Result, VersionId};

use crate::checksum::Checksum;
use crate::conditions::{BlobConditions, ConditionTarget, RequestConditions};
use crate::lease::{LeaseDuration, LeaseInfo, LeaseRecord};
use crate::options::{DownloadConfig, UploadConfig, UploadSource};
use crate::provider::{
    BlobBackend, BlobContent, BlobItem, BlobProperties, Capabilities, Metadata, Tags,
};
use crate::transfer::{stage_chunks, ProgressReporter};

/// A superseded blob version kept by a versioning store.
#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub version_id: VersionId,
    pub data: Bytes,
    pub metadata: Metadata,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    metadata: Metadata,
    tags: Tags,
    etag: ETag,
    last_modified: DateTime<Utc>,
    version_id: Option<VersionId>,
    checksum: Option<Checksum>,
    lease: LeaseRecord,
    history: Vec<StoredVersion>,
}

impl StoredBlob {
    fn target(&self, now: DateTime<Utc>) -> ConditionTarget<'_> {
        ConditionTarget {
            etag: &self.etag,
            last_modified: self.last_modified,
            active_lease: self.lease.active_id(now),
            tags: &self.tags,
        }
    }

    fn properties(&self, now: DateTime<Utc>) -> BlobProperties {
        BlobProperties {
            size: self.data.len() as u64,
            etag: self.etag.clone(),
            last_modified: self.last_modified,
            version_id: self.version_id.clone(),
            checksum: self.checksum.clone(),
            lease_state: self.lease.state(now),
        }
    }

    fn lease_info(&self, lease_id: LeaseId, remaining: Option<Duration>) -> LeaseInfo {
        LeaseInfo {
            lease_id,
            remaining,
            last_modified: self.last_modified,
            etag: self.etag.clone(),
        }
    }

    /// Push the current state onto the history and cut a new version id.
    fn start_new_version(&mut self) -> VersionId {
        if let Some(previous) = self.version_id.take() {
            self.history.push(StoredVersion {
                version_id: previous,
                data: self.data.clone(),
                metadata: self.metadata.clone(),
                tags: self.tags.clone(),
            });
        }
        let id = VersionId::generate();
        self.version_id = Some(id.clone());
        id
    }
}

type Containers = HashMap<ContainerId, BTreeMap<BlobId, StoredBlob>>;

/// Shared state of a [`MemoryBackend`], exposed as its native client.
pub struct MemoryStore {
    containers: RwLock<Containers>,
    versioning: bool,
}

impl MemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, Containers> {
        self.containers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Containers> {
        self.containers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether new writes cut blob versions.
    pub fn versioning(&self) -> bool {
        self.versioning
    }

    /// Names of all containers.
    pub fn container_names(&self) -> Vec<ContainerId> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Superseded versions of a blob, oldest first.
    pub fn versions(&self, container: &ContainerId, blob: &BlobId) -> Vec<StoredVersion> {
        self.read()
            .get(container)
            .and_then(|blobs| blobs.get(blob))
            .map(|b| b.history.clone())
            .unwrap_or_default()
    }

    /// Replace a blob's bytes without touching its checksum or ETag.
    ///
    /// Simulates corruption at rest.
    pub fn overwrite_raw(&self, container: &ContainerId, blob: &BlobId, data: Bytes) -> Result<()> {
        let mut containers = self.write();
        let stored = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(blob))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}/{}", container, blob)))?;
        stored.data = data;
        Ok(())
    }
}

fn container_missing(container: &ContainerId) -> Error {
    Error::NotFound(format!("Container not found: {}", container))
}

fn blob_missing(container: &ContainerId, blob: &BlobId) -> Error {
    Error::NotFound(format!("Blob not found: {}/{}", container, blob))
}

/// In-memory blob backend.
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
}

impl MemoryBackend {
    /// Create a new empty backend without versioning.
    pub fn new() -> Self {
        Self::with_versioning(false)
    }

    /// Create a new empty backend, optionally keeping blob versions.
    ///
    /// With versioning on, `set_metadata` creates an untagged version.
    pub fn with_versioning(versioning: bool) -> Self {
        Self {
            store: Arc::new(MemoryStore {
                containers: RwLock::new(HashMap::new()),
                versioning,
            }),
        }
    }

    /// Direct access to the underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn with_blob<T>(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        f: impl FnOnce(&StoredBlob) -> Result<T>,
    ) -> Result<T> {
        let containers = self.store.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| container_missing(container))?;
        let stored = blobs.get(blob).ok_or_else(|| blob_missing(container, blob))?;
        f(stored)
    }

    fn with_blob_mut<T>(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        f: impl FnOnce(&mut StoredBlob) -> Result<T>,
    ) -> Result<T> {
        let mut containers = self.store.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_missing(container))?;
        let stored = blobs
            .get_mut(blob)
            .ok_or_else(|| blob_missing(container, blob))?;
        f(stored)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            leases: true,
            versioning: self.store.versioning,
            tags: true,
            tags_survive_metadata_update: !self.store.versioning,
        }
    }

    fn native_client(&self) -> &(dyn Any + Send + Sync) {
        self.store.as_ref()
    }

    async fn create_container_if_absent(&self, container: &ContainerId) -> Result<()> {
        let mut containers = self.store.write();
        if !containers.contains_key(container) {
            debug!(container = %container, "Creating container");
            containers.insert(container.clone(), BTreeMap::new());
        }
        Ok(())
    }

    async fn delete_container(&self, container: &ContainerId) -> Result<()> {
        let removed = self.store.write().remove(container);
        match removed {
            Some(blobs) => {
                debug!(container = %container, blobs = blobs.len(), "Container deleted");
                Ok(())
            }
            None => Err(container_missing(container)),
        }
    }

    async fn upload(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        source: UploadSource,
        overwrite: bool,
        config: &UploadConfig,
    ) -> Result<Option<VersionId>> {
        config.transfer.validate()?;

        // A refused upload reports no progress. Rechecked under the write lock.
        {
            let now = Utc::now();
            let containers = self.store.read();
            let blobs = containers
                .get(container)
                .ok_or_else(|| container_missing(container))?;
            let existing = blobs.get(blob);
            if !overwrite && existing.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "Blob already exists: {}/{}",
                    container, blob
                )));
            }
            let target = existing.map(|b| b.target(now));
            RequestConditions::check_write(config.conditions.as_ref(), target.as_ref())?;
        }

        let data = source.into_bytes().await?;
        config.checksum.validate_upload(&data)?;
        let checksum = config.checksum.checksum_for(&data);

        let reporter = ProgressReporter::new(config.progress.clone());
        let staged = stage_chunks(&config.transfer, data.len() as u64, &reporter, |range| {
            let chunk = data.slice(range.start as usize..range.end as usize);
            async move { Ok(chunk) }
        })
        .await?;

        let now = Utc::now();
        let mut containers = self.store.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_missing(container))?;

        let existing = blobs.get(blob);
        if existing.is_some() && !overwrite {
            return Err(Error::AlreadyExists(format!(
                "Blob already exists: {}/{}",
                container, blob
            )));
        }
        let target = existing.map(|b| b.target(now));
        RequestConditions::check_write(config.conditions.as_ref(), target.as_ref())?;

        let metadata = config.metadata.clone().unwrap_or_default();
        let tags = config.tags.clone().unwrap_or_default();

        let version = match blobs.get_mut(blob) {
            Some(stored) => {
                let version = if self.store.versioning {
                    Some(stored.start_new_version())
                } else {
                    None
                };
                stored.data = staged;
                stored.metadata = metadata;
                stored.tags = tags;
                stored.etag = ETag::generate();
                stored.last_modified = now;
                stored.checksum = checksum;
                version
            }
            None => {
                let version = self.store.versioning.then(VersionId::generate);
                blobs.insert(
                    blob.clone(),
                    StoredBlob {
                        data: staged,
                        metadata,
                        tags,
                        etag: ETag::generate(),
                        last_modified: now,
                        version_id: version.clone(),
                        checksum,
                        lease: LeaseRecord::new(),
                        history: Vec::new(),
                    },
                );
                version
            }
        };

        debug!(container = %container, blob = %blob, size = data.len(), "Blob uploaded");
        Ok(version)
    }

    async fn download(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        config: &DownloadConfig,
    ) -> Result<BlobContent> {
        let now = Utc::now();
        let (data, properties) = self.with_blob(container, blob, |stored| {
            if let Some(conditions) = &config.conditions {
                conditions.check(Some(&stored.target(now)))?;
            }
            Ok((stored.data.clone(), stored.properties(now)))
        })?;

        let reporter = ProgressReporter::new(config.progress.clone());
        let received = stage_chunks(&config.transfer, data.len() as u64, &reporter, |range| {
            let chunk = data.slice(range.start as usize..range.end as usize);
            async move { Ok(chunk) }
        })
        .await?;

        config
            .checksum
            .validate_download(properties.checksum.as_ref(), &received)?;

        debug!(container = %container, blob = %blob, size = received.len(), "Blob downloaded");
        Ok(BlobContent {
            data: received,
            properties,
        })
    }

    async fn get_properties(
        &self,
        container: &ContainerId,
        blob: &BlobId,
    ) -> Result<BlobProperties> {
        let now = Utc::now();
        self.with_blob(container, blob, |stored| Ok(stored.properties(now)))
    }

    async fn get_metadata(&self, container: &ContainerId, blob: &BlobId) -> Result<Metadata> {
        self.with_blob(container, blob, |stored| Ok(stored.metadata.clone()))
    }

    async fn set_metadata(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        metadata: Metadata,
        conditions: Option<&RequestConditions>,
    ) -> Result<Option<VersionId>> {
        let now = Utc::now();
        let versioning = self.store.versioning;
        self.with_blob_mut(container, blob, |stored| {
            RequestConditions::check_write(conditions, Some(&stored.target(now)))?;

            let version = if versioning {
                let id = stored.start_new_version();
                stored.tags.clear();
                Some(id)
            } else {
                None
            };
            stored.metadata = metadata;
            stored.etag = ETag::generate();
            stored.last_modified = now;
            Ok(version)
        })
    }

    async fn get_tags(&self, container: &ContainerId, blob: &BlobId) -> Result<Tags> {
        self.with_blob(container, blob, |stored| Ok(stored.tags.clone()))
    }

    async fn set_tags(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        tags: Tags,
        conditions: Option<&RequestConditions>,
    ) -> Result<()> {
        let now = Utc::now();
        self.with_blob_mut(container, blob, |stored| {
            RequestConditions::check_write(conditions, Some(&stored.target(now)))?;
            stored.tags = tags;
            Ok(())
        })
    }

    async fn exists(&self, container: &ContainerId, blob: &BlobId) -> Result<bool> {
        Ok(self
            .store
            .read()
            .get(container)
            .map(|blobs| blobs.contains_key(blob))
            .unwrap_or(false))
    }

    async fn list_blobs(&self, container: &ContainerId, prefix: &str) -> Result<Vec<BlobItem>> {
        let now = Utc::now();
        let containers = self.store.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| container_missing(container))?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| name.has_prefix(prefix))
            .map(|(name, stored)| BlobItem {
                name: name.clone(),
                properties: stored.properties(now),
            })
            .collect())
    }

    async fn delete_blobs(&self, container: &ContainerId, prefix: &str) -> Result<usize> {
        let now = Utc::now();
        let mut containers = self.store.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_missing(container))?;

        let doomed: Vec<BlobId> = blobs
            .keys()
            .filter(|name| name.has_prefix(prefix))
            .cloned()
            .collect();

        if let Some(leased) = doomed
            .iter()
            .find(|name| blobs[*name].lease.active_id(now).is_some())
        {
            return Err(Error::PreconditionFailed(format!(
                "Blob {} has an active lease",
                leased
            )));
        }

        for name in &doomed {
            blobs.remove(name);
        }
        debug!(container = %container, prefix = prefix, count = doomed.len(), "Blobs deleted");
        Ok(doomed.len())
    }

    async fn delete_blob(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        conditions: Option<&RequestConditions>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut containers = self.store.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_missing(container))?;
        let stored = blobs.get(blob).ok_or_else(|| blob_missing(container, blob))?;
        RequestConditions::check_write(conditions, Some(&stored.target(now)))?;
        blobs.remove(blob);
        debug!(container = %container, blob = %blob, "Blob deleted");
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        duration: LeaseDuration,
        proposed: Option<LeaseId>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let now = Utc::now();
        self.with_blob_mut(container, blob, |stored| {
            if let Some(conditions) = conditions {
                conditions.check(Some(&stored.target(now)))?;
            }
            let id = stored.lease.acquire(proposed, duration, now)?;
            Ok(stored.lease_info(id, None))
        })
    }

    async fn renew_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let now = Utc::now();
        self.with_blob_mut(container, blob, |stored| {
            if let Some(conditions) = conditions {
                conditions.check(Some(&stored.target(now)))?;
            }
            stored.lease.renew(lease_id, now)?;
            Ok(stored.lease_info(lease_id.clone(), None))
        })
    }

    async fn release_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        lease_id: &LeaseId,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let now = Utc::now();
        self.with_blob_mut(container, blob, |stored| {
            if let Some(conditions) = conditions {
                conditions.check(Some(&stored.target(now)))?;
            }
            stored.lease.release(lease_id)?;
            Ok(stored.lease_info(lease_id.clone(), None))
        })
    }

    async fn break_lease(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        break_period: Option<Duration>,
        conditions: Option<&BlobConditions>,
    ) -> Result<LeaseInfo> {
        let now = Utc::now();
        self.with_blob_mut(container, blob, |stored| {
            if let Some(conditions) = conditions {
                conditions.check(Some(&stored.target(now)))?;
            }
            let (id, remaining) = stored.lease.break_lease(break_period, now)?;
            Ok(stored.lease_info(id, Some(remaining)))
        })
    }
}
