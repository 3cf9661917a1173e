//! Identifier types used throughout Cask.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a container (bucket, in some providers' terms).
///
/// A container name is always a single path component, so backends can
/// map it onto a directory without escaping their root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a new ContainerId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty
    /// - `id` must not contain path separators or NUL
    /// - `id` must not be `.` or `..`
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any precondition is violated
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ContainerId cannot be empty".to_string(),
            ));
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(crate::Error::InvalidInput(format!(
                "ContainerId cannot contain separators: {:?}",
                id
            )));
        }
        if id == "." || id == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "ContainerId cannot be a relative path component: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContainerId {
    type Error = crate::Error;

    fn try_from(id: String) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a blob within a container.
///
/// Blob names are opaque byte strings to the abstraction. A `/` is an
/// ordinary character, so `a/1` and `a/2` share the prefix `a/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(String);

impl BlobId {
    /// Create a new BlobId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "BlobId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id starts with `prefix`, byte for byte.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.as_bytes().starts_with(prefix.as_bytes())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! opaque_token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap a provider-issued value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh random value.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_token!(
    /// Entity tag identifying one revision of a blob's content and properties.
    ETag
);

impl ETag {
    /// The `*` wildcard, matching any existing blob.
    pub fn any() -> Self {
        Self("*".to_string())
    }

    /// Whether this is the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0 == "*"
    }
}

opaque_token!(
    /// Backend-assigned identifier of one blob version.
    VersionId
);

opaque_token!(
    /// Identifier of a lease held on a blob.
    LeaseId
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_container_id_creation() {
        let id = ContainerId::new("photos").unwrap();
        assert_eq!(id.as_str(), "photos");
    }

    #[test]
    fn test_container_id_rejects_empty_and_separators() {
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("a/b").is_err());
        assert!(ContainerId::new("a\\b").is_err());
        assert!(ContainerId::new("a\0b").is_err());
    }

    #[test]
    fn test_container_id_rejects_relative_components() {
        for name in [".", ".."] {
            let err = ContainerId::new(name).unwrap_err();
            assert!(matches!(err, crate::Error::InvalidInput(_)));
        }
        assert!(ContainerId::new("...").is_ok());
        assert!(ContainerId::new(".hidden").is_ok());
    }

    #[test]
    fn test_container_id_deserialize_validates() {
        let ok: ContainerId = serde_json::from_str("\"docs\"").unwrap();
        assert_eq!(ok.as_str(), "docs");
        assert!(serde_json::from_str::<ContainerId>("\"..\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"docs\"");
    }

    #[test]
    fn test_blob_id_allows_slashes() {
        let id = BlobId::new("a/1").unwrap();
        assert!(id.has_prefix("a/"));
        assert!(!id.has_prefix("b/"));
    }

    #[test]
    fn test_blob_id_empty_fails() {
        assert!(BlobId::new("").is_err());
    }

    #[test]
    fn test_etag_wildcard() {
        assert!(ETag::any().is_wildcard());
        assert!(!ETag::generate().is_wildcard());
    }

    proptest! {
        #[test]
        fn prop_empty_prefix_matches_everything(name in "[a-z0-9/._-]{1,24}") {
            let id = BlobId::new(name).unwrap();
            prop_assert!(id.has_prefix(""));
        }

        #[test]
        fn prop_own_name_is_prefix(name in "[a-z0-9/._-]{1,24}") {
            let id = BlobId::new(name.clone()).unwrap();
            prop_assert!(id.has_prefix(&name));
        }
    }
}
