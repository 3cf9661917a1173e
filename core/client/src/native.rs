//! Access to a backend's native client.
//!
//! These calls bypass conditions, checksums and lease checks entirely.
//! They exist for provider features the backend contract does not cover.

use std::any::{type_name, Any};

use cask_common::{Error, Result};
use tracing::debug;

use crate::handle::StorageHandle;

impl StorageHandle {
    /// Run `f` against the backend's native client and return its value.
    ///
    /// # Errors
    /// - `InvalidState` once the container has been deleted
    /// - `Unsupported` if the native client is not a `C`
    pub fn with_native_client<C, T>(&self, f: impl FnOnce(&C) -> Result<T>) -> Result<T>
    where
        C: Any,
    {
        self.require_container()?;
        f(self.native::<C>()?)
    }

    /// Run `f` against the backend's native client for its side effects.
    pub fn run_native<C>(&self, f: impl FnOnce(&C) -> Result<()>) -> Result<()>
    where
        C: Any,
    {
        self.with_native_client(f)
    }

    fn native<C: Any>(&self) -> Result<&C> {
        let backend = self.backend();
        backend.native_client().downcast_ref::<C>().ok_or_else(|| {
            debug!(
                backend = backend.name(),
                requested = type_name::<C>(),
                "Native client type mismatch"
            );
            Error::Unsupported(format!(
                "Backend '{}' has no native client of type {}",
                backend.name(),
                type_name::<C>()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_common::ContainerId;
    use cask_storage::{LocalBackend, MemoryBackend, MemoryStore};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_memory_native_client_sees_containers() {
        let handle = StorageHandle::bind(Arc::new(MemoryBackend::new()), "docs").unwrap();
        handle
            .create_container_if_absent(&CancellationToken::new())
            .await
            .unwrap();

        let names = handle
            .with_native_client(|store: &MemoryStore| Ok(store.container_names()))
            .unwrap();
        assert_eq!(names, vec![ContainerId::new("docs").unwrap()]);
    }

    #[test]
    fn test_local_native_client_is_root_path() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        let handle = StorageHandle::bind(Arc::new(backend), "docs").unwrap();

        handle
            .run_native(|root: &PathBuf| {
                assert_eq!(root, temp.path());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_wrong_native_type_is_unsupported() {
        let handle = StorageHandle::bind(Arc::new(MemoryBackend::new()), "docs").unwrap();
        let mut called = false;
        let err = handle
            .run_native(|_: &PathBuf| {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(!called);
    }

    #[test]
    fn test_callback_error_propagates() {
        let handle = StorageHandle::bind(Arc::new(MemoryBackend::new()), "docs").unwrap();
        let err = handle
            .with_native_client(|_: &MemoryStore| -> Result<()> {
                Err(Error::Provider("native failure".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
