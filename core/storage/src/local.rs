//! Local filesystem blob backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<container>/blobs/<encoded blob id>        content
//! <root>/<container>/meta/<encoded blob id>.json    properties, metadata, tags
//! ```
//!
//! Blob ids are percent-encoded into a single file name, so any id maps
//! to exactly one file and `a` can coexist with `a/1`. No leases, no
//! versioning.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use cask_common::{BlobId, ContainerId, ETag, Error, Result, VersionId};

use crate::checksum::Checksum;
use crate::conditions::{ConditionTarget, RequestConditions};
use crate::lease::LeaseState;
use crate::options::{DownloadConfig, UploadConfig, UploadSource};
use crate::provider::{
    write_file_atomically, BlobBackend, BlobContent, BlobItem, BlobProperties, Capabilities,
    Metadata, Tags,
};
use crate::transfer::{stage_chunks, ProgressReporter};

const BLOBS_DIR: &str = "blobs";
const META_DIR: &str = "meta";
const SIDECAR_SUFFIX: &str = ".json";
const MAX_FILE_NAME: usize = 255;

/// Bytes escaped in blob file names. `.` is escaped so no encoded name
/// is `.`, `..` or hidden, which leaves dot-names free for temp files.
const BLOB_NAME: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b'.')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|');

/// Sidecar record stored next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    etag: ETag,
    last_modified: DateTime<Utc>,
    size: u64,
    #[serde(default)]
    checksum: Option<Checksum>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    tags: Tags,
}

impl Sidecar {
    fn target(&self) -> ConditionTarget<'_> {
        ConditionTarget {
            etag: &self.etag,
            last_modified: self.last_modified,
            active_lease: None,
            tags: &self.tags,
        }
    }

    fn properties(&self) -> BlobProperties {
        BlobProperties {
            size: self.size,
            etag: self.etag.clone(),
            last_modified: self.last_modified,
            version_id: None,
            checksum: self.checksum.clone(),
            lease_state: LeaseState::Available,
        }
    }

    fn touch(&mut self) {
        self.etag = ETag::generate();
        self.last_modified = Utc::now();
    }
}

/// Local filesystem blob backend.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container ids are single normal path components, so this never
    /// leaves the root.
    fn container_path(&self, container: &ContainerId) -> PathBuf {
        self.root.join(container.as_str())
    }

    /// File name a blob id is stored under.
    ///
    /// # Errors
    /// - `InvalidInput` if the encoded id does not fit in a file name
    fn file_name(blob: &BlobId) -> Result<String> {
        let name = utf8_percent_encode(blob.as_str(), BLOB_NAME).to_string();
        if name.len() + SIDECAR_SUFFIX.len() > MAX_FILE_NAME {
            return Err(Error::InvalidInput(format!(
                "Blob id too long for the local filesystem: {}",
                blob
            )));
        }
        Ok(name)
    }

    /// Blob id stored under a file name, if the name is one of ours.
    fn decode_file_name(name: &str) -> Option<BlobId> {
        if name.starts_with('.') {
            return None;
        }
        let decoded = percent_decode_str(name).decode_utf8().ok()?;
        BlobId::new(decoded.into_owned()).ok()
    }

    fn blob_path(&self, container: &ContainerId, blob: &BlobId) -> Result<PathBuf> {
        Ok(self
            .container_path(container)
            .join(BLOBS_DIR)
            .join(Self::file_name(blob)?))
    }

    fn sidecar_path(&self, container: &ContainerId, blob: &BlobId) -> Result<PathBuf> {
        let name = format!("{}{}", Self::file_name(blob)?, SIDECAR_SUFFIX);
        Ok(self.container_path(container).join(META_DIR).join(name))
    }

    async fn ensure_container(&self, container: &ContainerId) -> Result<()> {
        if !fs::try_exists(self.container_path(container)).await? {
            return Err(Error::NotFound(format!("Container not found: {}", container)));
        }
        Ok(())
    }

    async fn read_sidecar(
        &self,
        container: &ContainerId,
        blob: &BlobId,
    ) -> Result<Option<Sidecar>> {
        let blob_path = self.blob_path(container, blob)?;
        if !fs::try_exists(&blob_path).await? || !fs::metadata(&blob_path).await?.is_file() {
            return Ok(None);
        }
        let sidecar_path = self.sidecar_path(container, blob)?;
        match fs::read(&sidecar_path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| Error::Serialization(e.to_string())),
            // Content written by something other than this backend.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let fs_meta = fs::metadata(&blob_path).await?;
                let modified: DateTime<Utc> = fs_meta
                    .modified()
                    .map(|t| t.into())
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(Sidecar {
                    etag: ETag::new(format!("{}-{}", modified.timestamp(), fs_meta.len())),
                    last_modified: modified,
                    size: fs_meta.len(),
                    checksum: None,
                    metadata: Metadata::new(),
                    tags: Tags::new(),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn require_sidecar(&self, container: &ContainerId, blob: &BlobId) -> Result<Sidecar> {
        self.ensure_container(container).await?;
        self.read_sidecar(container, blob)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}/{}", container, blob)))
    }

    async fn write_sidecar(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        sidecar: &Sidecar,
    ) -> Result<()> {
        let path = self.sidecar_path(container, blob)?;
        let raw =
            serde_json::to_vec_pretty(sidecar).map_err(|e| Error::Serialization(e.to_string()))?;
        write_file_atomically(&path, &raw).await
    }

    async fn remove_blob_files(&self, container: &ContainerId, blob: &BlobId) -> Result<()> {
        fs::remove_file(self.blob_path(container, blob)?).await?;
        match fs::remove_file(self.sidecar_path(container, blob)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All blob ids in a container, sorted.
    async fn walk_blobs(&self, container: &ContainerId) -> Result<Vec<BlobId>> {
        let base = self.container_path(container).join(BLOBS_DIR);
        let mut names = Vec::new();
        if !fs::try_exists(&base).await? {
            return Ok(names);
        }

        let mut entries = fs::read_dir(&base).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let decoded = entry
                .file_name()
                .to_str()
                .and_then(Self::decode_file_name);
            if let Some(id) = decoded {
                names.push(id);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            leases: false,
            versioning: false,
            tags: true,
            tags_survive_metadata_update: true,
        }
    }

    fn native_client(&self) -> &(dyn Any + Send + Sync) {
        &self.root
    }

    async fn create_container_if_absent(&self, container: &ContainerId) -> Result<()> {
        let path = self.container_path(container);
        fs::create_dir_all(path.join(BLOBS_DIR)).await?;
        fs::create_dir_all(path.join(META_DIR)).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &ContainerId) -> Result<()> {
        self.ensure_container(container).await?;
        fs::remove_dir_all(self.container_path(container)).await?;
        debug!(container = %container, "Container deleted");
        Ok(())
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
        self.ensure_container(container).await?;

        let existing = self.read_sidecar(container, blob).await?;
        if existing.is_some() && !overwrite {
            return Err(Error::AlreadyExists(format!(
                "Blob already exists: {}/{}",
                container, blob
            )));
        }
        RequestConditions::check_write(
            config.conditions.as_ref(),
            existing.as_ref().map(|s| s.target()).as_ref(),
        )?;

        let data = source.into_bytes().await?;
        config.checksum.validate_upload(&data)?;

        let reporter = ProgressReporter::new(config.progress.clone());
        let staged = stage_chunks(&config.transfer, data.len() as u64, &reporter, |range| {
            let chunk = data.slice(range.start as usize..range.end as usize);
            async move { Ok(chunk) }
        })
        .await?;

        let blob_path = self.blob_path(container, blob)?;
        write_file_atomically(&blob_path, &staged).await?;

        let sidecar = Sidecar {
            etag: ETag::generate(),
            last_modified: Utc::now(),
            size: staged.len() as u64,
            checksum: config.checksum.checksum_for(&staged),
            metadata: config.metadata.clone().unwrap_or_default(),
            tags: config.tags.clone().unwrap_or_default(),
        };
        self.write_sidecar(container, blob, &sidecar).await?;

        debug!(container = %container, blob = %blob, size = staged.len(), "Blob uploaded");
        Ok(None)
    }

    async fn download(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        config: &DownloadConfig,
    ) -> Result<BlobContent> {
        let sidecar = self.require_sidecar(container, blob).await?;
        if let Some(conditions) = &config.conditions {
            conditions.check(Some(&sidecar.target()))?;
        }

        let data = bytes::Bytes::from(fs::read(self.blob_path(container, blob)?).await?);
        let reporter = ProgressReporter::new(config.progress.clone());
        let received = stage_chunks(&config.transfer, data.len() as u64, &reporter, |range| {
            let chunk = data.slice(range.start as usize..range.end as usize);
            async move { Ok(chunk) }
        })
        .await?;

        config
            .checksum
            .validate_download(sidecar.checksum.as_ref(), &received)?;

        debug!(container = %container, blob = %blob, size = received.len(), "Blob downloaded");
        Ok(BlobContent {
            data: received,
            properties: sidecar.properties(),
        })
    }

    async fn get_properties(
        &self,
        container: &ContainerId,
        blob: &BlobId,
    ) -> Result<BlobProperties> {
        Ok(self.require_sidecar(container, blob).await?.properties())
    }

    async fn get_metadata(&self, container: &ContainerId, blob: &BlobId) -> Result<Metadata> {
        Ok(self.require_sidecar(container, blob).await?.metadata)
    }

    async fn set_metadata(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        metadata: Metadata,
        conditions: Option<&RequestConditions>,
    ) -> Result<Option<VersionId>> {
        let mut sidecar = self.require_sidecar(container, blob).await?;
        RequestConditions::check_write(conditions, Some(&sidecar.target()))?;
        sidecar.metadata = metadata;
        sidecar.touch();
        self.write_sidecar(container, blob, &sidecar).await?;
        Ok(None)
    }

    async fn get_tags(&self, container: &ContainerId, blob: &BlobId) -> Result<Tags> {
        Ok(self.require_sidecar(container, blob).await?.tags)
    }

    async fn set_tags(
        &self,
        container: &ContainerId,
        blob: &BlobId,
        tags: Tags,
        conditions: Option<&RequestConditions>,
    ) -> Result<()> {
        let mut sidecar = self.require_sidecar(container, blob).await?;
        RequestConditions::check_write(conditions, Some(&sidecar.target()))?;
        sidecar.tags = tags;
        self.write_sidecar(container, blob, &sidecar).await
    }

    async fn exists(&self, container: &ContainerId, blob: &BlobId) -> Result<bool> {
        let Ok(path) = self.blob_path(container, blob) else {
            return Ok(false);
        };
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_blobs(&self, container: &ContainerId, prefix: &str) -> Result<Vec<BlobItem>> {
        self.ensure_container(container).await?;
        let mut items = Vec::new();
        for name in self.walk_blobs(container).await? {
            if !name.has_prefix(prefix) {
                continue;
            }
            if let Some(sidecar) = self.read_sidecar(container, &name).await? {
                items.push(BlobItem {
                    name,
                    properties: sidecar.properties(),
                });
            }
        }
        Ok(items)
    }

    async fn delete_blobs(&self, container: &ContainerId, prefix: &str) -> Result<usize> {
        self.ensure_container(container).await?;
        let doomed: Vec<BlobId> = self
            .walk_blobs(container)
            .await?
            .into_iter()
            .filter(|name| name.has_prefix(prefix))
            .collect();
        for name in &doomed {
            self.remove_blob_files(container, name).await?;
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
        let sidecar = self.require_sidecar(container, blob).await?;
        RequestConditions::check_write(conditions, Some(&sidecar.target()))?;
        self.remove_blob_files(container, blob).await?;
        debug!(container = %container, blob = %blob, "Blob deleted");
        Ok(())
    }
}
