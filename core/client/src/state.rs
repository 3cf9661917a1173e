//! Lifecycle state of a storage handle.

use cask_common::{BlobId, ContainerId, Error, Result};

/// Where a handle is in its lifecycle.
///
/// ```text
/// Live ──bind_blob──▶ LiveWithBlob ──blob deleted──▶ BlobDeleted
///   │                      │                              │
///   └──────────────────────┴──── container deleted ───────┴──▶ ContainerDeleted
/// ```
///
/// `BlobDeleted` and `ContainerDeleted` are terminal for their scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    /// Bound to a container, no blob yet.
    Live { container: ContainerId },
    /// Bound to a container and one blob.
    LiveWithBlob {
        container: ContainerId,
        blob: BlobId,
    },
    /// The bound blob was deleted. The container is still usable.
    BlobDeleted { container: ContainerId },
    /// The bound container was deleted.
    ContainerDeleted,
}

impl HandleState {
    /// Initial state for a container.
    pub fn new(container: ContainerId) -> Self {
        HandleState::Live { container }
    }

    /// Container id for a container-scoped operation.
    ///
    /// # Errors
    /// - `InvalidState` once the container has been deleted
    pub fn container(&self) -> Result<&ContainerId> {
        match self {
            HandleState::Live { container }
            | HandleState::LiveWithBlob { container, .. }
            | HandleState::BlobDeleted { container } => Ok(container),
            HandleState::ContainerDeleted => Err(Error::InvalidState(
                "Container has been deleted".to_string(),
            )),
        }
    }

    /// Container and blob ids for a blob-scoped operation.
    ///
    /// # Errors
    /// - `InvalidState` if no blob is bound, or the blob or its container
    ///   has been deleted
    pub fn blob(&self) -> Result<(&ContainerId, &BlobId)> {
        match self {
            HandleState::LiveWithBlob { container, blob } => Ok((container, blob)),
            HandleState::Live { .. } => Err(Error::InvalidState(
                "No blob id is bound to this handle".to_string(),
            )),
            HandleState::BlobDeleted { .. } => {
                Err(Error::InvalidState("Blob has been deleted".to_string()))
            }
            HandleState::ContainerDeleted => Err(Error::InvalidState(
                "Container has been deleted".to_string(),
            )),
        }
    }

    /// Bound blob id, if the handle is still live for a blob.
    pub fn bound_blob(&self) -> Option<&BlobId> {
        match self {
            HandleState::LiveWithBlob { blob, .. } => Some(blob),
            _ => None,
        }
    }

    /// Narrow a live handle to one blob.
    ///
    /// The state is left untouched on error.
    ///
    /// # Errors
    /// - `Rebind` if a blob is already bound, even to the same id
    /// - `InvalidState` if the blob or container was deleted
    pub fn bind_blob(&mut self, blob: BlobId) -> Result<()> {
        match self {
            HandleState::Live { container } => {
                *self = HandleState::LiveWithBlob {
                    container: container.clone(),
                    blob,
                };
                Ok(())
            }
            HandleState::LiveWithBlob { blob: bound, .. } => Err(Error::Rebind {
                bound: bound.to_string(),
                requested: blob.to_string(),
            }),
            HandleState::BlobDeleted { .. } => Err(Error::InvalidState(
                "Blob has been deleted; use a fresh handle for another blob".to_string(),
            )),
            HandleState::ContainerDeleted => Err(Error::InvalidState(
                "Container has been deleted".to_string(),
            )),
        }
    }

    /// Record a successful blob delete.
    pub fn mark_blob_deleted(&mut self) {
        if let HandleState::LiveWithBlob { container, .. } = self {
            *self = HandleState::BlobDeleted {
                container: container.clone(),
            };
        }
    }

    /// Record a successful container delete.
    pub fn mark_container_deleted(&mut self) {
        *self = HandleState::ContainerDeleted;
    }

    /// Whether container-scoped operations are allowed.
    pub fn is_container_live(&self) -> bool {
        !matches!(self, HandleState::ContainerDeleted)
    }

    /// Whether blob-scoped operations are allowed.
    pub fn is_blob_live(&self) -> bool {
        matches!(self, HandleState::LiveWithBlob { .. })
    }
}
