//! Handle-based blob storage client for Cask.
//!
//! This module provides:
//! - A storage handle bound to one container and, optionally, one blob
//! - Lifecycle tracking so deleted scopes reject further operations
//! - Cancellable operations delegating to any [`BlobBackend`]
//! - Access to the backend's native client for uncovered features
//!
//! # Architecture
//! The handle sits between callers and a shared backend. It validates its
//! own state before every call, so misuse fails locally with
//! `InvalidState` instead of reaching the provider.

pub mod handle;
pub mod native;
pub mod operations;
pub mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use cask_common::{BlobId, ContainerId, ETag, Error, LeaseId, Result, VersionId};
pub use cask_storage::BlobBackend;
pub use handle::StorageHandle;
pub use state::HandleState;
pub use tokio_util::sync::CancellationToken;

/// Bind a backend to a container.
///
/// Shorthand for [`StorageHandle::bind`].
pub fn bind(backend: Arc<dyn BlobBackend>, container: impl Into<String>) -> Result<StorageHandle> {
    StorageHandle::bind(backend, container)
}
