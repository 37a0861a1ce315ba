//! # Error Types
//!
//! Recoverable failures are limited to start-up: parsing configuration and
//! reserving the chunk arena. Everything after that is either infallible or a
//! contract violation, which panics.

use thiserror::Error;

/// Errors produced while parsing or validating an [`EcsConfig`](crate::EcsConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Chunk size is not a multiple of the chunk memory alignment.
    #[error("chunk size {size} is not a multiple of {alignment} bytes")]
    MisalignedChunkSize {
        /// The configured chunk size.
        size: usize,
        /// The required alignment.
        alignment: usize,
    },

    /// Chunk size is outside the supported range.
    #[error("chunk size {size} outside supported range {min}..={max}")]
    ChunkSizeOutOfRange {
        /// The configured chunk size.
        size: usize,
        /// Smallest supported chunk size.
        min: usize,
        /// Largest supported chunk size.
        max: usize,
    },

    /// The arena cannot hold a single chunk.
    #[error("arena of {arena} bytes cannot hold a {chunk} byte chunk")]
    ArenaTooSmall {
        /// The configured arena size.
        arena: usize,
        /// The configured chunk size.
        chunk: usize,
    },
}

/// Errors produced by the chunk arena.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The system allocator refused the arena reservation.
    #[error("failed to reserve {bytes} byte arena")]
    ArenaAllocationFailed {
        /// Size of the refused reservation.
        bytes: usize,
    },

    /// Every byte of the arena has been handed out.
    #[error("arena exhausted: requested {requested} bytes, {used} of {capacity} in use")]
    ArenaExhausted {
        /// Bytes requested by the failing carve.
        requested: usize,
        /// High-water mark at the time of failure.
        used: usize,
        /// Total arena size.
        capacity: usize,
    },
}

/// Any error this crate can return.
#[derive(Error, Debug)]
pub enum EcsError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Arena reservation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for fallible start-up operations.
pub type EcsResult<T> = Result<T, EcsError>;
