//! Per-call upload and download configuration.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use cask_common::{Error, Result};

use crate::checksum::ChecksumConfig;
use crate::conditions::RequestConditions;
use crate::provider::{Metadata, Tags};
use crate::transfer::{ProgressHandler, TransferConfig};

/// Byte stream type for upload operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Content of an upload.
pub enum UploadSource {
    /// Read the content from a local file.
    Path(PathBuf),
    /// In-memory content.
    Bytes(Bytes),
    /// Content produced by a stream.
    Stream(ByteStream),
}

impl UploadSource {
    /// Drain the source into memory.
    ///
    /// # Errors
    /// - `InvalidInput` if a source file does not exist
    /// - I/O errors from reading the file or stream
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            UploadSource::Bytes(data) => Ok(data),
            UploadSource::Path(path) => match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                    Error::InvalidInput(format!("Source file not found: {}", path.display())),
                ),
                Err(e) => Err(e.into()),
            },
            UploadSource::Stream(mut stream) => {
                let mut data = Vec::new();
                while let Some(chunk) = stream.next().await {
                    data.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(data))
            }
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            UploadSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            UploadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        UploadSource::Bytes(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(data))
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::Path(path)
    }
}

/// Options for an upload.
///
/// `metadata` and `tags` replace whatever the blob had before. Leaving them
/// unset uploads the blob with an empty set.
#[derive(Clone, Default)]
pub struct UploadConfig {
    pub metadata: Option<Metadata>,
    pub tags: Option<Tags>,
    pub conditions: Option<RequestConditions>,
    pub progress: Option<ProgressHandler>,
    pub transfer: TransferConfig,
    pub checksum: ChecksumConfig,
}

impl UploadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_conditions(mut self, conditions: RequestConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandler) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumConfig) -> Self {
        self.checksum = checksum;
        self
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("metadata", &self.metadata)
            .field("tags", &self.tags)
            .field("conditions", &self.conditions)
            .field("progress", &self.progress.as_ref().map(|_| ".."))
            .field("transfer", &self.transfer)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Options for a download.
#[derive(Clone, Default)]
pub struct DownloadConfig {
    pub conditions: Option<RequestConditions>,
    pub progress: Option<ProgressHandler>,
    pub transfer: TransferConfig,
    pub checksum: ChecksumConfig,
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conditions(mut self, conditions: RequestConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandler) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumConfig) -> Self {
        self.checksum = checksum;
        self
    }

    /// Copy of this config with checksum validation forced on.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();
        config.checksum = config.checksum.enforced();
        config
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("conditions", &self.conditions)
            .field("progress", &self.progress.as_ref().map(|_| ".."))
            .field("transfer", &self.transfer)
            .field("checksum", &self.checksum)
            .finish()
    }
}
