//! # ECS World
//!
//! The central container for all entities and components.
//!
//! The world owns every registry, the chunk storage and one chunk list per
//! archetype. An entity lives in exactly one slot of one chunk; changing its
//! component set moves its data to a chunk of the new archetype and
//! swap-removes the old slot, so used slots always stay at the front of
//! every chunk.

use std::any::type_name;

use rayon::prelude::*;

use super::archetype::{Archetype, ArchetypeId, ArchetypeRegistry, ArchetypeSet};
use super::chunk::Chunk;
use super::component::{Component, ComponentTypeId, TypeRegistry};
use super::entity::{Entity, EntityAddress, EntityTable};
use super::query::Query;
use super::storage::ChunkStorage;
use crate::config::EcsConfig;
use crate::error::EcsResult;

/// The ECS World, container for all entity state.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
/// use strata_core::{EcsConfig, World};
///
/// #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct Position([f32; 3]);
///
/// #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct Velocity([f32; 3]);
///
/// let mut world = World::new(EcsConfig::default().with_arena_size(1 << 20)).unwrap();
/// let entity = world.create_entity();
/// world.insert_component(entity, Position([0.0, 0.0, 0.0]));
/// world.insert_component(entity, Velocity([1.0, 2.0, 3.0]));
///
/// world.query::<(&mut Position, &Velocity), _>(|(position, velocity)| {
///     for axis in 0..3 {
///         position.0[axis] += velocity.0[axis];
///     }
/// });
/// assert_eq!(world.component::<Position>(entity), &Position([1.0, 2.0, 3.0]));
/// ```
pub struct World {
    config: EcsConfig,
    types: TypeRegistry,
    archetypes: ArchetypeRegistry,
    storage: ChunkStorage,
    /// Chunk lists indexed by archetype id.
    chunks: Vec<Vec<Chunk>>,
    /// Per archetype, indices of the chunks that have a free slot.
    partial: Vec<Vec<usize>>,
    entities: EntityTable,
}

impl World {
    /// Creates an empty world and reserves its arena.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the arena cannot be
    /// reserved.
    pub fn new(config: EcsConfig) -> EcsResult<Self> {
        let storage = ChunkStorage::new(&config)?;
        tracing::debug!(
            chunk_bytes = config.chunk_size_bytes,
            arena_bytes = config.arena_size_bytes,
            parallel = config.parallel_queries,
            "created world"
        );
        Ok(Self {
            config,
            types: TypeRegistry::new(),
            archetypes: ArchetypeRegistry::new(),
            storage,
            chunks: Vec::new(),
            partial: Vec::new(),
            entities: EntityTable::new(),
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns the configuration the world was built with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &EcsConfig {
        &self.config
    }

    /// Returns the component type registry.
    #[inline]
    #[must_use]
    pub const fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Returns the archetype registry.
    #[inline]
    #[must_use]
    pub const fn archetypes(&self) -> &ArchetypeRegistry {
        &self.archetypes
    }

    /// Returns the chunk storage.
    #[inline]
    #[must_use]
    pub const fn storage(&self) -> &ChunkStorage {
        &self.storage
    }

    /// Returns the chunks of `archetype`.
    #[must_use]
    pub fn chunks(&self, archetype: ArchetypeId) -> &[Chunk] {
        self.chunks.get(archetype.index()).map_or(&[][..], Vec::as_slice)
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Checks if `entity` is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns where the data of `entity` currently lives.
    ///
    /// The address is only valid until the next structural change.
    #[inline]
    #[must_use]
    pub fn address(&self, entity: Entity) -> Option<EntityAddress> {
        self.entities.address(entity)
    }

    /// Returns the archetype of `entity`.
    #[must_use]
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.address(entity).map(EntityAddress::archetype)
    }

    // =========================================================================
    // Types and archetypes
    // =========================================================================

    /// Registers `T` and returns its id.
    pub fn register<T: Component>(&mut self) -> ComponentTypeId {
        self.types.register::<T>()
    }

    /// Returns the archetype made of `ids`, registering it if needed.
    pub fn archetype_of_types(&mut self, ids: &[ComponentTypeId]) -> ArchetypeId {
        self.archetypes.archetype_of_types(&self.types, ids).id
    }

    /// Prewarms `count` chunks for `archetype` in parallel.
    ///
    /// # Panics
    ///
    /// Panics if the archetype is unknown or the arena is exhausted.
    pub fn reserve_chunks(&mut self, archetype: ArchetypeId, count: usize) {
        let archetype = *self.archetypes.get(archetype);
        self.storage.reserve(&self.types, &archetype, count);
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Creates an entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        self.spawn_in(ArchetypeId::EMPTY)
    }

    /// Creates an entity in `archetype` with every component defaulted.
    ///
    /// # Panics
    ///
    /// Panics if the archetype is unknown.
    pub fn spawn_in(&mut self, archetype: ArchetypeId) -> Entity {
        let address = self.allocate_slot(archetype);
        let entity = self.entities.allocate(address);

        let chunk = self.chunk_mut(address);
        chunk.entities_mut()[address.slot()] = entity;
        chunk.write_defaults(address.slot(), &ArchetypeSet::EMPTY);
        entity
    }

    /// Destroys `entity`. Returns `false` if it was not alive.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        match self.entities.free(entity) {
            Some(address) => {
                self.remove_slot(address);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Adds a defaulted `T` to `entity`. Does nothing if it already has one.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn add_component<T: Component>(&mut self, entity: Entity) {
        let id = self.types.register::<T>();
        let address = self.live_address(entity);
        if self.archetypes.get(address.archetype()).contains(id) {
            return;
        }
        let target = self
            .archetypes
            .archetype_with(&self.types, address.archetype(), id)
            .id;
        self.move_entity(entity, address, target);
    }

    /// Sets the `T` of `entity`, adding the component if missing.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn insert_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.add_component::<T>(entity);
        *self.component_mut::<T>(entity) = value;
    }

    /// Removes the `T` of `entity` and returns it.
    ///
    /// Returns `None` if the entity has no `T`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let address = self.live_address(entity);
        let id = self.types.id_of::<T>()?;
        if !self.archetypes.get(address.archetype()).contains(id) {
            return None;
        }

        let value = *self.component::<T>(entity);
        let target = self
            .archetypes
            .archetype_without(&self.types, address.archetype(), id)
            .id;
        self.move_entity(entity, address, target);
        Some(value)
    }

    /// Moves `entity` to `archetype`, keeping the components both share and
    /// defaulting the new ones.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive or the archetype is unknown.
    pub fn set_archetype(&mut self, entity: Entity, archetype: ArchetypeId) {
        assert!(
            archetype.index() < self.archetypes.len(),
            "Unknown {archetype}"
        );
        let address = self.live_address(entity);
        self.move_entity(entity, address, archetype);
    }

    /// Checks if `entity` is alive and has a `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match (self.types.id_of::<T>(), self.address(entity)) {
            (Some(id), Some(address)) => self.archetypes.get(address.archetype()).contains(id),
            _ => false,
        }
    }

    /// Returns the `T` of `entity`, if it is alive and has one.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.types.id_of::<T>()?;
        let address = self.address(entity)?;
        self.chunk(address)
            .components::<T>(id)?
            .get(address.slot())
    }

    /// Returns the `T` of `entity` mutably, if it is alive and has one.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.types.id_of::<T>()?;
        let address = self.address(entity)?;
        self.chunk_mut(address)
            .components_mut::<T>(id)?
            .get_mut(address.slot())
    }

    /// Returns the `T` of `entity`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive or has no `T`.
    #[must_use]
    pub fn component<T: Component>(&self, entity: Entity) -> &T {
        self.get::<T>(entity)
            .unwrap_or_else(|| panic!("{entity:?} has no {}", type_name::<T>()))
    }

    /// Returns the `T` of `entity` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive or has no `T`.
    pub fn component_mut<T: Component>(&mut self, entity: Entity) -> &mut T {
        self.get_mut::<T>(entity)
            .unwrap_or_else(|| panic!("{entity:?} has no {}", type_name::<T>()))
    }

    /// Copies every `T` in archetype, chunk and slot order.
    #[must_use]
    pub fn collect_components<T: Component>(&self) -> Vec<T> {
        let Some(id) = self.types.id_of::<T>() else {
            return Vec::new();
        };
        let mut required = ArchetypeSet::new();
        required.set(id);

        let mut out = Vec::new();
        for archetype in self.archetypes.archetypes_that_contain(&required) {
            for chunk in self.chunks(archetype) {
                if let Some(values) = chunk.components::<T>(id) {
                    out.extend_from_slice(values);
                }
            }
        }
        out
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Calls `f` once per entity matching `Q`.
    ///
    /// With `parallel_queries` set, chunks are visited on the rayon pool and
    /// the call order is unspecified. Each chunk is visited by one thread.
    ///
    /// # Panics
    ///
    /// Panics if `Q` names the same component twice.
    ///
    /// # Example
    ///
    /// ```rust
    /// use strata_core::{EcsConfig, Entity, World};
    ///
    /// let mut world = World::new(EcsConfig::default().with_arena_size(1 << 20)).unwrap();
    /// for i in 0..10u32 {
    ///     let entity = world.create_entity();
    ///     world.insert_component(entity, i);
    /// }
    ///
    /// world.query::<(&mut u32,), _>(|(value,)| *value *= 2);
    /// let mut values = world.collect_components::<u32>();
    /// values.sort_unstable();
    /// assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<u32>>());
    /// ```
    pub fn query<'w, Q, F>(&'w mut self, f: F)
    where
        Q: Query,
        F: Fn(Q::Item<'w>) + Send + Sync,
    {
        let parallel = self.config.parallel_queries;
        let Some((state, chunks)) = self.matching_chunks::<Q>() else {
            return;
        };

        if parallel {
            chunks
                .into_par_iter()
                .for_each(|chunk| Q::iter(chunk, &state).for_each(&f));
        } else {
            for chunk in chunks {
                Q::iter(chunk, &state).for_each(&f);
            }
        }
    }

    /// Calls `f` once per entity matching `Q`, on the calling thread, in
    /// archetype, chunk and slot order.
    ///
    /// # Panics
    ///
    /// Panics if `Q` names the same component twice.
    pub fn query_seq<'w, Q, F>(&'w mut self, mut f: F)
    where
        Q: Query,
        F: FnMut(Q::Item<'w>),
    {
        let Some((state, chunks)) = self.matching_chunks::<Q>() else {
            return;
        };
        for chunk in chunks {
            Q::iter(chunk, &state).for_each(&mut f);
        }
    }

    fn matching_chunks<Q: Query>(&mut self) -> Option<(Q::State, Vec<&mut Chunk>)> {
        let state = Q::init(&self.types)?;
        let matching = self
            .archetypes
            .archetypes_that_contain(&Q::required(&state));

        let chunks = self
            .chunks
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| {
                matching
                    .binary_search_by_key(index, |id| id.index())
                    .is_ok()
            })
            .flat_map(|(_, list)| list.iter_mut())
            .filter(|chunk| !chunk.is_empty())
            .collect();
        Some((state, chunks))
    }

    // =========================================================================
    // Slot management
    // =========================================================================

    fn live_address(&self, entity: Entity) -> EntityAddress {
        self.address(entity)
            .unwrap_or_else(|| panic!("{entity:?} is not alive"))
    }

    fn chunk(&self, address: EntityAddress) -> &Chunk {
        &self.chunks[address.archetype().index()][address.chunk_index()]
    }

    fn chunk_mut(&mut self, address: EntityAddress) -> &mut Chunk {
        &mut self.chunks[address.archetype().index()][address.chunk_index()]
    }

    /// Claims a slot in the most recently non-full chunk of `archetype`,
    /// growing its list if every chunk is full.
    fn allocate_slot(&mut self, archetype: ArchetypeId) -> EntityAddress {
        let info: Archetype = *self.archetypes.get(archetype);
        let index = archetype.index();
        if index >= self.chunks.len() {
            self.chunks.resize_with(index + 1, Vec::new);
            self.partial.resize_with(index + 1, Vec::new);
        }

        let list = &mut self.chunks[index];
        let partial = &mut self.partial[index];
        let chunk_index = if let Some(&chunk_index) = partial.last() {
            chunk_index
        } else {
            list.push(self.storage.allocate_chunk(&self.types, &info));
            partial.push(list.len() - 1);
            list.len() - 1
        };

        let chunk = &mut list[chunk_index];
        let slot = chunk.allocate();
        if chunk.is_full() {
            partial.pop();
        }
        EntityAddress::pack(archetype, chunk_index, slot)
    }

    /// Moves the data of `entity` from `from` into a new slot of `target`.
    fn move_entity(&mut self, entity: Entity, from: EntityAddress, target: ArchetypeId) {
        if from.archetype() == target {
            return;
        }

        let to = self.allocate_slot(target);
        let (src_list, dst_list) =
            split_pair(&mut self.chunks, from.archetype().index(), target.index());
        let src = &src_list[from.chunk_index()];
        let dst = &mut dst_list[to.chunk_index()];

        dst.copy_from(src, from.slot(), to.slot(), 1);
        dst.write_defaults(to.slot(), src.set());

        self.entities.set_address(entity, to);
        self.remove_slot(from);
    }

    /// Swap-removes the slot at `address` and re-addresses the entity that
    /// filled the hole.
    fn remove_slot(&mut self, address: EntityAddress) {
        let index = address.archetype().index();
        let chunk = &mut self.chunks[index][address.chunk_index()];
        if chunk.is_full() {
            self.partial[index].push(address.chunk_index());
        }
        let last = chunk.size() - 1;
        if address.slot() != last {
            chunk.swap(address.slot(), last);
            let moved = chunk.entities()[address.slot()];
            self.entities.set_address(moved, address);
        }
        chunk.free_last();
        self.release_if_empty(address.archetype(), address.chunk_index());
    }

    /// Returns an empty chunk to storage unless it is the archetype's last.
    fn release_if_empty(&mut self, archetype: ArchetypeId, chunk_index: usize) {
        let index = archetype.index();
        let list = &mut self.chunks[index];
        if list.len() <= 1 || !list[chunk_index].is_empty() {
            return;
        }

        let last = list.len() - 1;
        let chunk = list.swap_remove(chunk_index);
        let partial = &mut self.partial[index];
        partial.retain(|&i| i != chunk_index);
        if let Some(moved) = list.get(chunk_index) {
            if let Some(entry) = partial.iter_mut().find(|i| **i == last) {
                *entry = chunk_index;
            }
            for (slot, &entity) in moved.entities().iter().enumerate() {
                self.entities
                    .set_address(entity, EntityAddress::pack(archetype, chunk_index, slot));
            }
        }
        self.storage.free_chunk(archetype, chunk);
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.len())
            .field("types", &self.types.len())
            .field("archetypes", &self.archetypes.len())
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Borrows two distinct chunk lists, one shared and one mutable.
fn split_pair(lists: &mut [Vec<Chunk>], src: usize, dst: usize) -> (&[Chunk], &mut [Chunk]) {
    assert_ne!(src, dst, "Source and destination archetype are the same");
    if src < dst {
        let (low, high) = lists.split_at_mut(dst);
        (low[src].as_slice(), high[0].as_mut_slice())
    } else {
        let (low, high) = lists.split_at_mut(src);
        (high[0].as_slice(), low[dst].as_mut_slice())
    }
}
