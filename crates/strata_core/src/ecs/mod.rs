//! # Entity Component System
//!
//! Archetype-based storage: entities with the same component set share
//! fixed-size chunks of parallel component arrays.
//!
//! ## Design Philosophy
//!
//! - Chunk memory is carved from one arena reserved at world creation
//! - Registries are owned values, never process-wide statics
//! - Entity handles are stable; chunk addresses are not
//! - Queries split chunks into disjoint columns, so no `unsafe` is needed
//!   to hand out several `&mut` slices at once

pub mod archetype;
mod chunk;
mod component;
mod entity;
mod query;
mod storage;
mod world;

pub use archetype::{Archetype, ArchetypeId, ArchetypeRegistry, ArchetypeSet, ArchetypeSetIter};
pub use chunk::{Chunk, ChunkColumns, ChunkLayout, ColumnLayout, ENTITY_ID_BYTES};
pub use component::{Component, ComponentKind, ComponentTypeId, TypeInfo, TypeRegistry};
pub use entity::{Entity, EntityAddress, EntityTable};
pub use query::{Query, QueryIter, QueryParam};
pub use storage::ChunkStorage;
pub use world::World;
