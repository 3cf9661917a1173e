//! Storage handle binding a backend to a container and optional blob.

use std::fmt;
use std::sync::Arc;

use cask_common::{BlobId, ContainerId, Error, Result};
use cask_storage::BlobBackend;

use crate::state::HandleState;

/// A bound scope of storage operations.
///
/// The handle shares the backend with other handles; backend lifetime is
/// the caller's concern. Destructive operations take `&mut self`, so a
/// delete can never race other operations on the same handle. Handles
/// are single-use per scope: once the container or blob is deleted, a new
/// handle must be bound to target anything else.
pub struct StorageHandle {
    backend: Arc<dyn BlobBackend>,
    state: HandleState,
}

impl StorageHandle {
    /// Bind a backend to a container.
    ///
    /// # Errors
    /// - `InvalidState` if the container id is empty
    /// - `InvalidInput` if the container id is otherwise malformed
    pub fn bind(backend: Arc<dyn BlobBackend>, container: impl Into<String>) -> Result<Self> {
        let container = container.into();
        if container.is_empty() {
            return Err(Error::InvalidState("Container id is empty".to_string()));
        }
        Ok(Self::for_container(backend, ContainerId::new(container)?))
    }

    /// Bind a backend to an already validated container id.
    pub fn for_container(backend: Arc<dyn BlobBackend>, container: ContainerId) -> Self {
        Self {
            backend,
            state: HandleState::new(container),
        }
    }

    /// Narrow this handle to a blob, consuming it.
    ///
    /// See [`narrow`](Self::narrow) for the rules.
    pub fn with_blob(mut self, blob: impl Into<String>) -> Result<Self> {
        self.narrow(blob)?;
        Ok(self)
    }

    /// Narrow this handle to a blob, in place.
    ///
    /// A handle can be narrowed once. The current binding survives a
    /// failed attempt.
    ///
    /// # Errors
    /// - `InvalidState` if the blob id is empty, or the scope was deleted
    /// - `Rebind` if a blob is already bound, even to the same id
    pub fn narrow(&mut self, blob: impl Into<String>) -> Result<()> {
        let blob = blob.into();
        if blob.is_empty() {
            return Err(Error::InvalidState("Blob id is empty".to_string()));
        }
        self.state.bind_blob(BlobId::new(blob)?)
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &HandleState {
        &self.state
    }

    /// Container id, while the container is live.
    pub fn container_id(&self) -> Option<&ContainerId> {
        self.state.container().ok()
    }

    /// Blob id, while the blob is live.
    pub fn blob_id(&self) -> Option<&BlobId> {
        self.state.bound_blob()
    }

    pub(crate) fn require_container(&self) -> Result<&ContainerId> {
        self.state.container()
    }

    pub(crate) fn require_blob(&self) -> Result<(&ContainerId, &BlobId)> {
        self.state.blob()
    }

    pub(crate) fn state_mut(&mut self) -> &mut HandleState {
        &mut self.state
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .finish()
    }
}
