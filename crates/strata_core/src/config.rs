//! # Storage Configuration
//!
//! Compile-time layout constants plus the start-of-process [`EcsConfig`].
//!
//! **CRITICAL:** the constants below shape every chunk layout. The config
//! values are read once when a [`World`](crate::World) is built and are not
//! mutable afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// LAYOUT CONSTANTS
// =============================================================================

/// Default size of one chunk in bytes.
pub const PREFERRED_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// Alignment of every chunk's backing memory (one cache line).
pub const CHUNK_MEMORY_ALIGNMENT: usize = 64;

/// Minimum alignment of each component array inside a chunk.
pub const CHUNK_DATA_ALIGNMENT: usize = 16;

/// Maximum number of distinct component types; the capacity of an
/// [`ArchetypeSet`](crate::ArchetypeSet).
pub const MAX_COMPONENT_TYPES: usize = 1024;

/// Default arena reservation (2 GiB).
pub const DEFAULT_ARENA_SIZE_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// Smallest chunk size accepted by [`EcsConfig::validate`].
pub const MIN_CHUNK_SIZE_BYTES: usize = 1024;

/// Largest chunk size accepted by [`EcsConfig::validate`].
///
/// Slot indices are packed into 16 bits of an
/// [`EntityAddress`](crate::EntityAddress), so a chunk never holds more than
/// 65536 entities.
pub const MAX_CHUNK_SIZE_BYTES: usize = 64 * 1024;

// =============================================================================
// RUNTIME CONFIGURATION
// =============================================================================

/// Start-of-process storage configuration.
///
/// # Example
///
/// ```rust
/// use strata_core::EcsConfig;
///
/// let config = EcsConfig::from_toml_str(r#"
///     chunk_size_bytes = 16384
///     arena_size_bytes = 1048576
///     parallel_queries = false
/// "#).unwrap();
/// assert_eq!(config.chunk_size_bytes, 16384);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcsConfig {
    /// Size of every chunk carved from the arena.
    pub chunk_size_bytes: usize,
    /// Total bytes reserved up front for chunk memory.
    pub arena_size_bytes: usize,
    /// Visit chunks of one archetype on the rayon pool during `World::query`.
    pub parallel_queries: bool,
    /// Clear chunk memory when a chunk is handed out again from a free list.
    pub zero_reused_chunks: bool,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: PREFERRED_CHUNK_SIZE_BYTES,
            arena_size_bytes: DEFAULT_ARENA_SIZE_BYTES,
            parallel_queries: true,
            zero_reused_chunks: false,
        }
    }
}

impl EcsConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys, and
    /// any error from [`EcsConfig::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration describes a usable chunk layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is misaligned or out of range, or if
    /// the arena cannot hold a single chunk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.chunk_size_bytes;
        if !(MIN_CHUNK_SIZE_BYTES..=MAX_CHUNK_SIZE_BYTES).contains(&size) {
            return Err(ConfigError::ChunkSizeOutOfRange {
                size,
                min: MIN_CHUNK_SIZE_BYTES,
                max: MAX_CHUNK_SIZE_BYTES,
            });
        }
        if size % CHUNK_MEMORY_ALIGNMENT != 0 {
            return Err(ConfigError::MisalignedChunkSize {
                size,
                alignment: CHUNK_MEMORY_ALIGNMENT,
            });
        }
        if self.arena_size_bytes < size {
            return Err(ConfigError::ArenaTooSmall {
                arena: self.arena_size_bytes,
                chunk: size,
            });
        }
        Ok(())
    }

    /// Returns the config with a different arena size.
    #[must_use]
    pub const fn with_arena_size(mut self, bytes: usize) -> Self {
        self.arena_size_bytes = bytes;
        self
    }

    /// Returns the config with a different chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    /// Returns the config with parallel queries switched on or off.
    #[must_use]
    pub const fn with_parallel_queries(mut self, enabled: bool) -> Self {
        self.parallel_queries = enabled;
        self
    }

    /// Returns the config with reused-chunk zeroing switched on or off.
    #[must_use]
    pub const fn with_zero_reused_chunks(mut self, enabled: bool) -> Self {
        self.zero_reused_chunks = enabled;
        self
    }

    /// Number of chunks the arena can hold.
    #[inline]
    #[must_use]
    pub const fn max_chunks(&self) -> usize {
        self.arena_size_bytes / self.chunk_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EcsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size_bytes, 65536);
        assert!(config.parallel_queries);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = EcsConfig::from_toml_str("arena_size_bytes = 1048576").unwrap();
        assert_eq!(config.arena_size_bytes, 1_048_576);
        assert_eq!(config.chunk_size_bytes, PREFERRED_CHUNK_SIZE_BYTES);
        assert_eq!(config.max_chunks(), 16);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let err = EcsConfig::from_toml_str("chunk_bytes = 4096").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_misaligned_chunk_size() {
        let err = EcsConfig::default().with_chunk_size(4000).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MisalignedChunkSize { size: 4000, alignment: 64 }
        ));
    }

    #[test]
    fn test_chunk_size_out_of_range() {
        let err = EcsConfig::default().with_chunk_size(128 * 1024).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ChunkSizeOutOfRange { .. }));

        let err = EcsConfig::default().with_chunk_size(512).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ChunkSizeOutOfRange { .. }));
    }

    #[test]
    fn test_arena_too_small() {
        let err = EcsConfig::default().with_arena_size(1024).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ArenaTooSmall { arena: 1024, chunk: 65536 }));
    }
}
