//! # STRATA Core
//!
//! Archetype-based, chunked Entity Component System storage:
//! - Entities are grouped by their exact component set (archetype)
//! - Component data lives in fixed-size chunks carved from one arena
//! - Chunks are prewarmed and iterated in parallel with rayon
//!
//! ## Architecture Rules
//!
//! 1. **One reservation** - All chunk memory comes from a single arena
//! 2. **No holes** - Removal is swap-remove, used slots stay contiguous
//! 3. **Stable handles** - [`Entity`] survives every move; [`EntityAddress`]
//!    does not
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{EcsConfig, Entity, World};
//!
//! let mut world = World::new(EcsConfig::default().with_arena_size(1 << 20)).unwrap();
//! let entity = world.create_entity();
//! world.insert_component(entity, 42u64);
//!
//! let mut seen = Vec::new();
//! world.query_seq::<(Entity, &u64), _>(|(entity, value)| seen.push((entity, *value)));
//! assert_eq!(seen, vec![(entity, 42)]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod memory;

pub use config::{
    EcsConfig, CHUNK_DATA_ALIGNMENT, CHUNK_MEMORY_ALIGNMENT, DEFAULT_ARENA_SIZE_BYTES,
    MAX_CHUNK_SIZE_BYTES, MAX_COMPONENT_TYPES, MIN_CHUNK_SIZE_BYTES, PREFERRED_CHUNK_SIZE_BYTES,
};
pub use ecs::{
    Archetype, ArchetypeId, ArchetypeRegistry, ArchetypeSet, Chunk, ChunkLayout, ChunkStorage,
    Component, ComponentTypeId, Entity, EntityAddress, Query, QueryParam, TypeInfo, TypeRegistry,
    World,
};
pub use error::{ConfigError, EcsError, EcsResult, StorageError};
pub use memory::{Arena, ArenaBlock, ArenaRange, FreeLists};
