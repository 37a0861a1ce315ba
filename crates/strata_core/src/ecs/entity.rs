//! # Entity Management
//!
//! Two identifiers describe an entity:
//! - [`Entity`]: a stable handle (index + generation) handed to callers
//! - [`EntityAddress`]: where its data lives right now (archetype, chunk,
//!   slot)
//!
//! Moves between archetypes and swap-removes change the address, never the
//! handle. The [`EntityTable`] maps handles to addresses; each chunk stores
//! the handle of every slot, which gives the reverse mapping.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::archetype::ArchetypeId;

/// Stable identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the entity table
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Null/invalid entity.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates a new entity from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The index into the entity table (0 to 2^32-2)
    /// * `generation` - The generation counter (0 to 2^32-1)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks if this entity is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns the raw 64-bit representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

/// Packed `(archetype, chunk, slot)` location of an entity's data.
///
/// Layout of the 64 bits:
/// - Upper 16 bits: archetype id
/// - Middle 32 bits: chunk index within the archetype's chunk list
/// - Lower 16 bits: slot within the chunk
///
/// Addresses are indices, not pointers, so they survive growth of the chunk
/// lists. They do go stale when the entity, or another entity of the same
/// chunk, is moved or removed; re-resolve them through
/// [`World::address`](crate::World::address) after any mutation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityAddress(u64);

impl EntityAddress {
    /// Packs an address.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` does not fit 32 bits or `slot` does not fit 16 bits.
    #[inline]
    #[must_use]
    pub fn pack(archetype: ArchetypeId, chunk: usize, slot: usize) -> Self {
        let chunk = u32::try_from(chunk)
            .unwrap_or_else(|_| panic!("Chunk index {chunk} exceeds 32 bits"));
        let slot =
            u16::try_from(slot).unwrap_or_else(|_| panic!("Slot index {slot} exceeds 16 bits"));
        Self(((archetype.index() as u64) << 48) | (u64::from(chunk) << 16) | u64::from(slot))
    }

    /// Returns the archetype id.
    #[inline]
    #[must_use]
    pub fn archetype(self) -> ArchetypeId {
        ArchetypeId::new((self.0 >> 48) as usize)
    }

    /// Returns the chunk index within the archetype.
    #[inline]
    #[must_use]
    pub const fn chunk_index(self) -> usize {
        ((self.0 >> 16) & 0xFFFF_FFFF) as usize
    }

    /// Returns the slot within the chunk.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    /// Returns the same address with a different slot.
    #[inline]
    #[must_use]
    pub fn with_slot(self, slot: usize) -> Self {
        Self::pack(self.archetype(), self.chunk_index(), slot)
    }

    /// Returns the same address with a different chunk index.
    #[inline]
    #[must_use]
    pub fn with_chunk(self, chunk: usize) -> Self {
        Self::pack(self.archetype(), chunk, self.slot())
    }
}

impl fmt::Debug for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAddress")
            .field("archetype", &self.archetype().index())
            .field("chunk", &self.chunk_index())
            .field("slot", &self.slot())
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
struct EntitySlot {
    generation: u32,
    address: Option<EntityAddress>,
}

/// Handle -> address mapping with generation-checked reuse of indices.
#[derive(Debug, Default)]
pub struct EntityTable {
    slots: Vec<EntitySlot>,
    /// Indices of destroyed entities, reused LIFO.
    free: Vec<u32>,
    alive: usize,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a handle for an entity stored at `address`.
    ///
    /// # Panics
    ///
    /// Panics if every index below `u32::MAX` is in use.
    pub fn allocate(&mut self, address: EntityAddress) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.address = Some(address);
            return Entity::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|&index| index != u32::MAX)
            .unwrap_or_else(|| panic!("Entity table is full"));
        self.slots.push(EntitySlot {
            generation: 0,
            address: Some(address),
        });
        Entity::new(index, 0)
    }

    /// Retires `entity` and returns its last address.
    ///
    /// An index whose generation reaches `u32::MAX` is never reused, so a
    /// stale handle cannot come back to life.
    ///
    /// Returns `None` if the handle is stale or null.
    pub fn free(&mut self, entity: Entity) -> Option<EntityAddress> {
        let slot = self
            .slots
            .get_mut(entity.index() as usize)
            .filter(|slot| slot.generation == entity.generation() && slot.address.is_some())?;
        let address = slot.address.take();
        self.alive -= 1;
        match slot.generation.checked_add(1) {
            Some(generation) => {
                slot.generation = generation;
                self.free.push(entity.index());
            }
            None => tracing::debug!(index = entity.index(), "retired entity index"),
        }
        address
    }

    /// Returns the current address of `entity`, or `None` if it is stale.
    #[inline]
    #[must_use]
    pub fn address(&self, entity: Entity) -> Option<EntityAddress> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.generation == entity.generation() {
            slot.address
        } else {
            None
        }
    }

    /// Records a new address for a live entity.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is stale.
    pub fn set_address(&mut self, entity: Entity, address: EntityAddress) {
        let slot = self
            .live_slot_mut(entity)
            .unwrap_or_else(|| panic!("{entity:?} is not alive"));
        slot.address = Some(address);
    }

    /// Checks if `entity` refers to a live entity.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.address(entity).is_some()
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.alive
    }

    /// Checks if no entity is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.alive == 0
    }

    fn live_slot_mut(&mut self, entity: Entity) -> Option<&mut EntitySlot> {
        self.slots
            .get_mut(entity.index() as usize)
            .filter(|slot| slot.generation == entity.generation() && slot.address.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_roundtrip() {
        let entity = Entity::new(12345, 67890);
        assert_eq!(entity.index(), 12345);
        assert_eq!(entity.generation(), 67890);
        assert!(!entity.is_null());
        assert!(Entity::default().is_null());
    }

    #[test]
    fn test_address_packing() {
        let archetype = ArchetypeId::new(513);
        let address = EntityAddress::pack(archetype, 70_000, 65_535);
        assert_eq!(address.archetype(), archetype);
        assert_eq!(address.chunk_index(), 70_000);
        assert_eq!(address.slot(), 65_535);

        let moved = address.with_slot(3).with_chunk(1);
        assert_eq!(moved.archetype(), archetype);
        assert_eq!(moved.chunk_index(), 1);
        assert_eq!(moved.slot(), 3);
    }

    #[test]
    #[should_panic(expected = "exceeds 16 bits")]
    fn test_address_slot_overflow_panics() {
        let _ = EntityAddress::pack(ArchetypeId::EMPTY, 0, 1 << 16);
    }

    #[test]
    fn test_table_reuses_indices_with_new_generation() {
        let mut table = EntityTable::new();
        let here = EntityAddress::pack(ArchetypeId::EMPTY, 0, 0);
        let there = EntityAddress::pack(ArchetypeId::new(2), 1, 4);

        let first = table.allocate(here);
        let second = table.allocate(there);
        assert_eq!(table.len(), 2);
        assert_eq!(table.address(second), Some(there));

        assert_eq!(table.free(first), Some(here));
        assert!(!table.is_alive(first));
        assert_eq!(table.free(first), None);

        let reused = table.allocate(there);
        assert_eq!(reused.index(), first.index());
        assert_eq!(reused.generation(), first.generation() + 1);
        assert_eq!(table.address(first), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_saturated_generation_retires_index() {
        let mut table = EntityTable::new();
        let here = EntityAddress::pack(ArchetypeId::EMPTY, 0, 0);
        let first = table.allocate(here);
        table.slots[0].generation = u32::MAX;
        let last = Entity::new(first.index(), u32::MAX);
        assert!(table.is_alive(last));

        assert_eq!(table.free(last), Some(here));
        assert!(table.is_empty());

        let next = table.allocate(here);
        assert_ne!(next.index(), first.index());
        assert!(!table.is_alive(last));
        assert!(!table.is_alive(first));
    }

    #[test]
    fn test_set_address() {
        let mut table = EntityTable::new();
        let entity = table.allocate(EntityAddress::pack(ArchetypeId::EMPTY, 0, 0));
        let moved = EntityAddress::pack(ArchetypeId::new(1), 0, 7);
        table.set_address(entity, moved);
        assert_eq!(table.address(entity), Some(moved));
        assert!(!table.is_alive(Entity::NULL));
    }

    #[test]
    #[should_panic(expected = "is not alive")]
    fn test_set_address_of_stale_entity_panics() {
        let mut table = EntityTable::new();
        let entity = table.allocate(EntityAddress::pack(ArchetypeId::EMPTY, 0, 0));
        table.free(entity);
        table.set_address(entity, EntityAddress::pack(ArchetypeId::EMPTY, 0, 0));
    }
}
