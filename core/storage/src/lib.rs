//! Blob storage backend abstraction for Cask.
//!
//! This module provides the trait-based contract every storage backend
//! implements (Azure, S3, local filesystem, etc.), the value objects passed
//! to it per call, and a registry for configuration-driven construction.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific types in the contract
//! - Async operations: all I/O operations are async
//! - Optional capabilities: leases and versioning are declared, not assumed
//! - Unified error semantics: consistent error types across backends

pub mod checksum;
pub mod conditions;
pub mod lease;
pub mod local;
pub mod memory;
pub mod options;
pub mod provider;
pub mod registry;
pub mod tag_query;
pub mod transfer;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumConfig};
pub use conditions::{BlobConditions, ConditionTarget, RequestConditions};
pub use lease::{LeaseDuration, LeaseInfo, LeaseRecord, LeaseState};
pub use local::LocalBackend;
pub use memory::{MemoryBackend, MemoryStore};
pub use options::{ByteStream, DownloadConfig, UploadConfig, UploadSource};
pub use provider::{
    BlobBackend, BlobContent, BlobItem, BlobProperties, Capabilities, Metadata, Tags,
};
pub use registry::{create_default_registry, BackendConfig, BackendFactory, BackendRegistry};
pub use tag_query::TagQuery;
pub use transfer::{ProgressHandler, ProgressReporter, TransferConfig};
