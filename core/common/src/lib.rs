//! Common utilities and types shared across Cask crates.
//!
//! This module provides the error taxonomy every backend maps its failures
//! into, and the validated identifier types used at the API boundary.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BlobId, ContainerId, ETag, LeaseId, VersionId};
