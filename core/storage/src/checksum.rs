//! Content checksums and validation settings.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use cask_common::{Error, Result};

/// Checksum algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// Do not compute or store a checksum.
    None,
    /// Let the backend choose. Resolves to [`ChecksumAlgorithm::Crc32`].
    #[default]
    Auto,
    /// CRC-32 (IEEE).
    Crc32,
    /// BLAKE2b with a 256-bit digest.
    Blake2b,
}

impl ChecksumAlgorithm {
    /// Resolve `Auto` to a concrete algorithm. `None` resolves to `None`.
    pub fn resolve(self) -> Option<ChecksumAlgorithm> {
        match self {
            ChecksumAlgorithm::None => None,
            ChecksumAlgorithm::Auto => Some(ChecksumAlgorithm::Crc32),
            other => Some(other),
        }
    }
}

/// A computed digest, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

impl Checksum {
    /// Compute the checksum of `data`.
    ///
    /// Returns `None` when the algorithm resolves to no checksum.
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Option<Self> {
        let algorithm = algorithm.resolve()?;
        let digest = match algorithm {
            ChecksumAlgorithm::Crc32 => crc32fast::hash(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Blake2b => {
                use blake2::digest::consts::U32;
                use blake2::{Blake2b, Digest};

                let mut hasher = Blake2b::<U32>::new();
                hasher.update(data);
                hasher.finalize().to_vec()
            }
            ChecksumAlgorithm::None | ChecksumAlgorithm::Auto => return None,
        };
        Some(Self {
            algorithm,
            value: STANDARD.encode(digest),
        })
    }

    /// Verify that `data` hashes to this checksum.
    ///
    /// # Errors
    /// - `Integrity` if the recomputed digest differs
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(self.algorithm, data)
            .map(|c| c.value)
            .unwrap_or_default();
        if actual != self.value {
            warn!(
                algorithm = ?self.algorithm,
                expected = %self.value,
                actual = %actual,
                "Checksum mismatch"
            );
            return Err(Error::Integrity {
                expected: self.value.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn default_auto_validate() -> bool {
    true
}

/// Checksum behavior for a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumConfig {
    /// Algorithm used when storing a new checksum.
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
    /// Validate content before returning control to the caller.
    #[serde(default = "default_auto_validate")]
    pub auto_validate: bool,
    /// Digest the uploaded body is expected to have.
    #[serde(default)]
    pub precalculated: Option<Checksum>,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Auto,
            auto_validate: true,
            precalculated: None,
        }
    }
}

impl ChecksumConfig {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn with_auto_validate(mut self, auto_validate: bool) -> Self {
        self.auto_validate = auto_validate;
        self
    }

    pub fn with_precalculated(mut self, checksum: Checksum) -> Self {
        self.precalculated = Some(checksum);
        self
    }

    /// Force validation on, for operations that always validate.
    pub fn enforced(mut self) -> Self {
        self.auto_validate = true;
        self
    }

    /// Validate an upload body against the caller's precalculated digest.
    pub fn validate_upload(&self, data: &[u8]) -> Result<()> {
        match (&self.precalculated, self.auto_validate) {
            (Some(expected), true) => expected.verify(data),
            _ => Ok(()),
        }
    }

    /// Validate downloaded content against the checksum stored with it.
    pub fn validate_download(&self, stored: Option<&Checksum>, data: &[u8]) -> Result<()> {
        match (stored, self.auto_validate) {
            (Some(expected), true) => expected.verify(data),
            _ => Ok(()),
        }
    }

    /// Checksum to store alongside uploaded content.
    pub fn checksum_for(&self, data: &[u8]) -> Option<Checksum> {
        match &self.precalculated {
            Some(pre) if self.auto_validate => Some(pre.clone()),
            _ => Checksum::compute(self.algorithm, data),
        }
    }
}
