//! # Chunks
//!
//! A chunk is one arena block sliced into parallel component columns plus an
//! entity-id array:
//!
//! ```text
//! offset 0                                             block end
//! |[A A A A ...]pad[B B B B ...]pad ....... [E E E E ...]|
//!  ^ columns in ascending type id,           ^ entity ids, packed
//!    each start aligned to max(align, 16)      against the end
//! ```
//!
//! Used slots are always `0..size()`. Removal is swap-remove: the departing
//! slot is swapped with the last used one, then [`Chunk::free_last`] shrinks
//! the used count.

use std::fmt;
use std::mem::size_of;

use super::archetype::{Archetype, ArchetypeId, ArchetypeSet};
use super::component::{Component, ComponentTypeId, TypeInfo, TypeRegistry};
use super::entity::Entity;
use crate::config::CHUNK_DATA_ALIGNMENT;
use crate::memory::{ArenaBlock, ArenaRange};

/// Bytes one entity id occupies at the end of a chunk.
pub const ENTITY_ID_BYTES: usize = size_of::<Entity>();

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Placement of one component column inside a chunk.
#[derive(Clone, Copy, Debug)]
pub struct ColumnLayout {
    /// The component stored in the column.
    pub info: TypeInfo,
    /// Byte offset of the first element from the block start.
    pub offset: usize,
}

/// Capacity and byte offsets of every array in a chunk.
#[derive(Clone, Debug)]
pub struct ChunkLayout {
    /// Slots per chunk.
    pub capacity: usize,
    /// Columns in ascending component type id.
    pub columns: Vec<ColumnLayout>,
    /// Byte offset of the entity-id array.
    pub entities_offset: usize,
    /// Size of the block the layout was computed for.
    pub block_bytes: usize,
}

impl ChunkLayout {
    /// Computes the layout of `archetype` inside a block of `block_bytes`.
    ///
    /// The capacity is `block_bytes / per_entity` where `per_entity` sums
    /// `max(size, align)` over the components plus one entity id. When the
    /// column padding does not fit in the leftover bytes, the capacity is
    /// lowered one slot at a time until it does.
    ///
    /// # Panics
    ///
    /// Panics if not even one entity fits, or if the final layout crosses
    /// the block boundary.
    #[must_use]
    pub fn compute(types: &TypeRegistry, archetype: &Archetype, block_bytes: usize) -> Self {
        let infos: Vec<TypeInfo> = archetype.set.iter().map(|id| *types.info(id)).collect();
        let per_entity: usize =
            infos.iter().map(TypeInfo::footprint).sum::<usize>() + ENTITY_ID_BYTES;

        let mut capacity = block_bytes / per_entity;
        loop {
            assert!(
                capacity > 0,
                "{} needs {per_entity} bytes per entity and does not fit a {block_bytes} byte chunk",
                archetype.id
            );
            if let Some(layout) = Self::place(&infos, capacity, block_bytes) {
                assert!(
                    layout.data_end() <= layout.entities_offset
                        && layout.entities_offset + capacity * ENTITY_ID_BYTES <= block_bytes,
                    "Chunk layout overflows its block"
                );
                return layout;
            }
            capacity -= 1;
        }
    }

    fn place(infos: &[TypeInfo], capacity: usize, block_bytes: usize) -> Option<Self> {
        let mut offset = 0;
        let mut columns = Vec::with_capacity(infos.len());
        for info in infos {
            offset = align_up(offset, info.align.max(CHUNK_DATA_ALIGNMENT));
            columns.push(ColumnLayout {
                info: *info,
                offset,
            });
            offset += capacity * info.size;
        }

        let entities_offset = block_bytes.checked_sub(capacity * ENTITY_ID_BYTES)?;
        (offset <= entities_offset).then_some(Self {
            capacity,
            columns,
            entities_offset,
            block_bytes,
        })
    }

    /// Returns the column of `id`, if the layout has one.
    #[inline]
    #[must_use]
    pub fn column(&self, id: ComponentTypeId) -> Option<&ColumnLayout> {
        self.columns
            .binary_search_by_key(&id, |column| column.info.id)
            .ok()
            .map(|index| &self.columns[index])
    }

    /// One past the last byte any component column may use.
    #[must_use]
    pub fn data_end(&self) -> usize {
        self.columns
            .last()
            .map_or(0, |column| column.offset + self.capacity * column.info.size)
    }
}

/// Fixed-capacity storage for entities of one archetype.
pub struct Chunk {
    archetype: ArchetypeId,
    set: ArchetypeSet,
    layout: ChunkLayout,
    used: usize,
    block: ArenaBlock,
}

impl Chunk {
    /// Lays out `archetype` over `block`.
    ///
    /// # Arguments
    ///
    /// * `types` - Registry holding every component of the archetype
    /// * `archetype` - The archetype the chunk stores
    /// * `block` - Backing memory; its length is the chunk size
    #[must_use]
    pub fn new(types: &TypeRegistry, archetype: &Archetype, block: ArenaBlock) -> Self {
        let layout = ChunkLayout::compute(types, archetype, block.len());
        Self {
            archetype: archetype.id,
            set: archetype.set,
            layout,
            used: 0,
            block,
        }
    }

    /// Returns the number of used slots.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.used
    }

    /// Returns the number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Returns the number of free slots.
    #[inline]
    #[must_use]
    pub const fn available(&self) -> usize {
        self.layout.capacity - self.used
    }

    /// Checks if every slot is used.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.used == self.layout.capacity
    }

    /// Checks if no slot is used.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Returns the archetype stored in this chunk.
    #[inline]
    #[must_use]
    pub const fn archetype_id(&self) -> ArchetypeId {
        self.archetype
    }

    /// Returns the component set of the stored archetype.
    #[inline]
    #[must_use]
    pub const fn set(&self) -> &ArchetypeSet {
        &self.set
    }

    /// Returns the layout.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Returns the arena range backing the chunk.
    #[inline]
    #[must_use]
    pub const fn block_range(&self) -> ArenaRange {
        self.block.range()
    }

    /// Checks if the chunk stores component `id`.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.set.contains(id)
    }

    /// Claims the next free slot and returns its index.
    ///
    /// The slot's bytes are whatever the previous occupant left behind.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is full.
    pub fn allocate(&mut self) -> usize {
        assert!(!self.is_full(), "Cannot allocate from a full chunk");
        self.used += 1;
        self.used - 1
    }

    /// Drops the last used slot.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is empty.
    pub fn free_last(&mut self) {
        assert!(self.used > 0, "Cannot free a slot of an empty chunk");
        self.used -= 1;
    }

    /// Swaps every component and the entity id between slots `a` and `b`.
    ///
    /// # Panics
    ///
    /// Panics if either slot is not in use.
    pub fn swap(&mut self, a: usize, b: usize) {
        assert!(
            a < self.used && b < self.used,
            "Swap of slots {a} and {b} outside the {} used slots",
            self.used
        );
        if a == b {
            return;
        }

        let capacity = self.layout.capacity;
        let bytes = self.block.bytes_mut();
        for column in &self.layout.columns {
            let len = capacity * column.info.size;
            column
                .info
                .kind
                .swap(&mut bytes[column.offset..column.offset + len], a, b);
        }
        let entities = &mut bytes[self.layout.entities_offset..];
        bytemuck::cast_slice_mut::<u8, Entity>(entities).swap(a, b);
    }

    /// Copies `count` slots from `src[src_index..]` into `self[dst_index..]`.
    ///
    /// Only components stored by both chunks are copied, plus the entity ids.
    /// Components only `self` stores are left untouched.
    ///
    /// # Panics
    ///
    /// Panics if either range is outside the used slots.
    pub fn copy_from(&mut self, src: &Self, src_index: usize, dst_index: usize, count: usize) {
        assert!(
            src_index + count <= src.used,
            "Copy source range {src_index}..{} outside {} used slots",
            src_index + count,
            src.used
        );
        assert!(
            dst_index + count <= self.used,
            "Copy destination range {dst_index}..{} outside {} used slots",
            dst_index + count,
            self.used
        );

        let src_bytes = src.block.bytes();
        let dst_bytes = self.block.bytes_mut();
        for column in &self.layout.columns {
            let Some(src_column) = src.layout.column(column.info.id) else {
                continue;
            };
            let size = column.info.size;
            column.info.kind.copy(
                &src_bytes[src_column.offset..src_column.offset + src.layout.capacity * size],
                &mut dst_bytes[column.offset..column.offset + self.layout.capacity * size],
                src_index,
                dst_index,
                count,
            );
        }

        let src_entities =
            bytemuck::cast_slice::<u8, Entity>(&src_bytes[src.layout.entities_offset..]);
        let dst_entities =
            bytemuck::cast_slice_mut::<u8, Entity>(&mut dst_bytes[self.layout.entities_offset..]);
        dst_entities[dst_index..dst_index + count]
            .copy_from_slice(&src_entities[src_index..src_index + count]);
    }

    /// Writes default values into `slot` for every component not in `skip`.
    pub fn write_defaults(&mut self, slot: usize, skip: &ArchetypeSet) {
        assert!(slot < self.used, "Slot {slot} is not in use");
        let capacity = self.layout.capacity;
        let bytes = self.block.bytes_mut();
        for column in &self.layout.columns {
            if skip.contains(column.info.id) {
                continue;
            }
            let len = capacity * column.info.size;
            column
                .info
                .kind
                .write_default(&mut bytes[column.offset..column.offset + len], slot);
        }
    }

    /// Returns the raw bytes of the used part of a column.
    #[must_use]
    pub fn column(&self, id: ComponentTypeId) -> Option<&[u8]> {
        let column = self.layout.column(id)?;
        let len = self.used * column.info.size;
        Some(&self.block.bytes()[column.offset..column.offset + len])
    }

    /// Returns the raw bytes of the used part of a column mutably.
    pub fn column_mut(&mut self, id: ComponentTypeId) -> Option<&mut [u8]> {
        let column = *self.layout.column(id)?;
        let len = self.used * column.info.size;
        Some(&mut self.block.bytes_mut()[column.offset..column.offset + len])
    }

    /// Returns the used values of component `T` stored under `id`.
    ///
    /// Returns `None` if the chunk does not store `id`.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the size registered for `id`.
    #[must_use]
    pub fn components<T: Component>(&self, id: ComponentTypeId) -> Option<&[T]> {
        self.check_type::<T>(id);
        self.column(id).map(bytemuck::cast_slice)
    }

    /// Returns the used values of component `T` mutably.
    pub fn components_mut<T: Component>(&mut self, id: ComponentTypeId) -> Option<&mut [T]> {
        self.check_type::<T>(id);
        self.column_mut(id).map(bytemuck::cast_slice_mut)
    }

    /// Returns the entity ids of the used slots.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        let start = self.layout.entities_offset;
        let bytes = &self.block.bytes()[start..start + self.used * ENTITY_ID_BYTES];
        bytemuck::cast_slice(bytes)
    }

    /// Returns the entity ids of the used slots mutably.
    pub fn entities_mut(&mut self) -> &mut [Entity] {
        let start = self.layout.entities_offset;
        let end = start + self.used * ENTITY_ID_BYTES;
        bytemuck::cast_slice_mut(&mut self.block.bytes_mut()[start..end])
    }

    /// Splits the used part of the chunk into independently borrowable
    /// columns.
    pub fn columns(&mut self) -> ChunkColumns<'_> {
        let used = self.used;
        let mut rest: &mut [u8] = self.block.bytes_mut();
        let mut consumed = 0;
        let mut columns = Vec::with_capacity(self.layout.columns.len());

        for column in &self.layout.columns {
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(column.offset - consumed);
            let (data, tail) = tail.split_at_mut(self.layout.capacity * column.info.size);
            let (live, _) = data.split_at_mut(used * column.info.size);
            columns.push((column.info.id, Some(live)));
            consumed = column.offset + self.layout.capacity * column.info.size;
            rest = tail;
        }

        let (_, tail) = rest.split_at_mut(self.layout.entities_offset - consumed);
        let (entities, _) = tail.split_at_mut(used * ENTITY_ID_BYTES);

        ChunkColumns {
            len: used,
            columns,
            entities: Some(bytemuck::cast_slice_mut(entities)),
        }
    }

    /// Forgets every used slot.
    pub(crate) fn reset(&mut self) {
        self.used = 0;
    }

    /// Clears the backing memory.
    pub(crate) fn zero(&mut self) {
        self.block.zero();
    }

    fn check_type<T: Component>(&self, id: ComponentTypeId) {
        if let Some(column) = self.layout.column(id) {
            assert!(
                column.info.is::<T>(),
                "{} is not the component registered as {id} ({})",
                std::any::type_name::<T>(),
                column.info.type_name()
            );
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("archetype", &self.archetype)
            .field("used", &self.used)
            .field("capacity", &self.layout.capacity)
            .field("range", &self.block.range())
            .finish()
    }
}

/// Disjoint mutable views over the used slots of one chunk.
///
/// Each column can be taken once; queries use this to hand out several
/// `&mut` component slices of the same chunk at the same time.
pub struct ChunkColumns<'a> {
    len: usize,
    columns: Vec<(ComponentTypeId, Option<&'a mut [u8]>)>,
    entities: Option<&'a mut [Entity]>,
}

impl<'a> ChunkColumns<'a> {
    /// Returns the number of used slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if the chunk had no used slots.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Takes the column of `id` out of the view.
    ///
    /// # Panics
    ///
    /// Panics if the chunk does not store `id` or the column was already
    /// taken.
    pub fn take(&mut self, id: ComponentTypeId) -> &'a mut [u8] {
        let slot = self
            .columns
            .iter_mut()
            .find(|(column_id, _)| *column_id == id)
            .unwrap_or_else(|| panic!("Chunk does not store component {id}"));
        slot.1
            .take()
            .unwrap_or_else(|| panic!("Component {id} is borrowed twice by one query"))
    }

    /// Takes the entity ids out of the view.
    ///
    /// # Panics
    ///
    /// Panics if they were already taken.
    pub fn take_entities(&mut self) -> &'a mut [Entity] {
        self.entities
            .take()
            .unwrap_or_else(|| panic!("Entity ids are borrowed twice by one query"))
    }
}
