//! Configuration types for dirshift
//!
//! This module provides small validated value types used by the configuration
//! layer and the migration engine.

// Serde is imported conditionally through cfg_attr

/// Copy and verification quantum with validation
///
/// Cancellation is observed at every chunk boundary, so this value also bounds
/// cancellation latency during the Copy and Verifying steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkSize(usize);

impl ChunkSize {
    /// Minimum chunk size (4KB)
    pub const MIN: usize = 4 * 1024;
    /// Maximum chunk size (64MB)
    pub const MAX: usize = 64 * 1024 * 1024;
    /// Default chunk size (1MB)
    pub const DEFAULT: usize = 1024 * 1024;

    /// Create a new chunk size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err(format!("Chunk size {} is below minimum {}", size, Self::MIN))
        } else if size > Self::MAX {
            Err(format!("Chunk size {} exceeds maximum {}", size, Self::MAX))
        } else if !size.is_power_of_two() {
            Err(format!("Chunk size {} must be a power of two", size))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the chunk size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// How thoroughly the Verifying step compares target against source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VerifyMode {
    /// Compare entry counts and file sizes only
    Size,
    /// Compare entry counts, sizes and blake3 content digests
    #[default]
    Hash,
}

impl VerifyMode {
    /// Whether content digests must be computed
    pub fn hashes_content(self) -> bool {
        matches!(self, Self::Hash)
    }
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Hash => write!(f, "hash"),
        }
    }
}
