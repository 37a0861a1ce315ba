//! # Chunk Storage
//!
//! Owns the arena every chunk is carved from and recycles chunks per
//! archetype.
//!
//! - New chunks come from a lock-free bump of the arena's high-water mark
//! - Freed chunks go to a per-archetype free list and are handed out again
//!   before any new memory is carved
//! - [`ChunkStorage::reserve`] prewarms many chunks in parallel with rayon

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::archetype::{Archetype, ArchetypeId};
use super::chunk::Chunk;
use super::component::TypeRegistry;
use crate::config::{EcsConfig, CHUNK_MEMORY_ALIGNMENT};
use crate::error::{EcsResult, StorageError};
use crate::memory::{Arena, FreeLists};

/// Arena-backed pool of chunks.
///
/// # Thread Safety
///
/// All methods take `&self`. Carving is lock-free; free-list pushes and pops
/// are serialized by a mutex.
///
/// # Example
///
/// ```rust
/// use strata_core::{ArchetypeRegistry, ChunkStorage, EcsConfig, TypeRegistry};
///
/// let mut types = TypeRegistry::new();
/// let health = types.register::<u32>();
/// let mut archetypes = ArchetypeRegistry::new();
/// let archetype = *archetypes.archetype_of_types(&types, &[health]);
///
/// let storage = ChunkStorage::new(&EcsConfig::default().with_arena_size(1 << 20)).unwrap();
/// storage.reserve(&types, &archetype, 4);
/// assert_eq!(storage.free_chunks(archetype.id), 4);
///
/// let chunk = storage.allocate_chunk(&types, &archetype);
/// assert_eq!(storage.free_chunks(archetype.id), 3);
/// storage.free_chunk(archetype.id, chunk);
/// ```
pub struct ChunkStorage {
    arena: Arc<Arena>,
    chunk_bytes: usize,
    zero_reused: bool,
    free: FreeLists<Chunk>,
    /// Chunks ever carved from the arena.
    carved: AtomicUsize,
}

impl ChunkStorage {
    /// Validates `config` and reserves its arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the arena cannot
    /// be allocated.
    pub fn new(config: &EcsConfig) -> EcsResult<Self> {
        config.validate()?;
        let arena = Arena::new(config.arena_size_bytes)?;
        Ok(Self {
            arena: Arc::new(arena),
            chunk_bytes: config.chunk_size_bytes,
            zero_reused: config.zero_reused_chunks,
            free: FreeLists::new(),
            carved: AtomicUsize::new(0),
        })
    }

    /// Returns the size of every chunk in bytes.
    #[inline]
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Returns the backing arena.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Returns the number of chunks carved from the arena so far.
    #[inline]
    #[must_use]
    pub fn carved_chunks(&self) -> usize {
        self.carved.load(Ordering::Relaxed)
    }

    /// Returns the number of pooled chunks waiting for `archetype`.
    #[must_use]
    pub fn free_chunks(&self, archetype: ArchetypeId) -> usize {
        self.free.len_of(archetype.index())
    }

    /// Hands out an empty chunk for `archetype`.
    ///
    /// Pooled chunks are reused first; otherwise a new chunk is carved.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ArenaExhausted`] if a chunk has to be carved
    /// and the arena is full.
    pub fn try_allocate_chunk(
        &self,
        types: &TypeRegistry,
        archetype: &Archetype,
    ) -> Result<Chunk, StorageError> {
        if let Some(mut chunk) = self.free.pop(archetype.id.index()) {
            chunk.reset();
            if self.zero_reused {
                chunk.zero();
            }
            tracing::trace!(
                archetype = archetype.id.index(),
                offset = chunk.block_range().offset,
                "reused chunk"
            );
            return Ok(chunk);
        }
        self.carve(types, archetype)
    }

    /// Hands out an empty chunk for `archetype`.
    ///
    /// # Panics
    ///
    /// Panics if the arena is exhausted. The arena size is a startup
    /// decision; running out of it is not recoverable at this layer.
    pub fn allocate_chunk(&self, types: &TypeRegistry, archetype: &Archetype) -> Chunk {
        self.try_allocate_chunk(types, archetype)
            .unwrap_or_else(|err| Self::exhausted(&err))
    }

    /// Returns `chunk` to the pool of `archetype`.
    ///
    /// # Panics
    ///
    /// Panics if the chunk was laid out for another archetype.
    pub fn free_chunk(&self, archetype: ArchetypeId, mut chunk: Chunk) {
        assert_eq!(
            chunk.archetype_id(),
            archetype,
            "Chunk returned to the pool of another archetype"
        );
        tracing::trace!(
            archetype = archetype.index(),
            offset = chunk.block_range().offset,
            "freed chunk"
        );
        chunk.reset();
        self.free.push(archetype.index(), chunk);
    }

    /// Prewarms `count` chunks for `archetype`.
    ///
    /// Chunks are carved and laid out in parallel. Each construction only
    /// touches its own block, so the only shared state is the arena's
    /// high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ArenaExhausted`] if the arena runs out. The
    /// chunks carved before that are still pooled.
    pub fn try_reserve(
        &self,
        types: &TypeRegistry,
        archetype: &Archetype,
        count: usize,
    ) -> Result<(), StorageError> {
        let results: Vec<Result<Chunk, StorageError>> = (0..count)
            .into_par_iter()
            .map(|_| self.carve(types, archetype))
            .collect();

        let mut first_error = None;
        let chunks: Vec<Chunk> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(chunk) => Some(chunk),
                Err(err) => {
                    first_error.get_or_insert(err);
                    None
                }
            })
            .collect();

        let reserved = chunks.len();
        self.free.push_many(archetype.id.index(), chunks);
        tracing::debug!(
            archetype = archetype.id.index(),
            requested = count,
            reserved,
            "prewarmed chunks"
        );

        first_error.map_or(Ok(()), Err)
    }

    /// Prewarms `count` chunks for `archetype`.
    ///
    /// # Panics
    ///
    /// Panics if the arena is exhausted.
    pub fn reserve(&self, types: &TypeRegistry, archetype: &Archetype, count: usize) {
        if let Err(err) = self.try_reserve(types, archetype, count) {
            Self::exhausted(&err);
        }
    }

    fn carve(&self, types: &TypeRegistry, archetype: &Archetype) -> Result<Chunk, StorageError> {
        let block = Arena::carve(&self.arena, self.chunk_bytes, CHUNK_MEMORY_ALIGNMENT).ok_or(
            StorageError::ArenaExhausted {
                requested: self.chunk_bytes,
                used: self.arena.used(),
                capacity: self.arena.capacity(),
            },
        )?;
        self.carved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            archetype = archetype.id.index(),
            offset = block.range().offset,
            "carved chunk"
        );
        Ok(Chunk::new(types, archetype, block))
    }

    fn exhausted(err: &StorageError) -> ! {
        tracing::error!(error = %err, "chunk arena exhausted");
        panic!("{err}");
    }
}

impl std::fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStorage")
            .field("arena", &self.arena)
            .field("chunk_bytes", &self.chunk_bytes)
            .field("carved", &self.carved_chunks())
            .field("pooled", &self.free.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::ArchetypeRegistry;
    use crate::memory::ArenaRange;

    const CHUNK: usize = 16 * 1024;

    fn setup(arena_bytes: usize) -> (TypeRegistry, Archetype, ChunkStorage) {
        let mut types = TypeRegistry::new();
        let a = types.register::<[f32; 4]>();
        let b = types.register::<u32>();
        let mut archetypes = ArchetypeRegistry::new();
        let archetype = *archetypes.archetype_of_types(&types, &[a, b]);
        let config = EcsConfig::default()
            .with_chunk_size(CHUNK)
            .with_arena_size(arena_bytes);
        (types, archetype, ChunkStorage::new(&config).unwrap())
    }

    #[test]
    fn test_freed_chunk_is_reused() {
        let (types, archetype, storage) = setup(4 * CHUNK);

        let mut chunk = storage.allocate_chunk(&types, &archetype);
        let range = chunk.block_range();
        chunk.allocate();
        storage.free_chunk(archetype.id, chunk);
        assert_eq!(storage.free_chunks(archetype.id), 1);

        let again = storage.allocate_chunk(&types, &archetype);
        assert_eq!(again.block_range(), range);
        assert!(again.is_empty());
        assert_eq!(storage.carved_chunks(), 1);
        assert_eq!(storage.arena().used(), CHUNK);
    }

    #[test]
    fn test_pools_are_per_archetype() {
        let mut types = TypeRegistry::new();
        let a = types.register::<u32>();
        let b = types.register::<u8>();
        let mut archetypes = ArchetypeRegistry::new();
        let first = *archetypes.archetype_of_types(&types, &[a]);
        let second = *archetypes.archetype_of_types(&types, &[b]);
        let config = EcsConfig::default()
            .with_chunk_size(CHUNK)
            .with_arena_size(4 * CHUNK);
        let storage = ChunkStorage::new(&config).unwrap();

        let chunk = storage.allocate_chunk(&types, &first);
        storage.free_chunk(first.id, chunk);

        let fresh = storage.allocate_chunk(&types, &second);
        assert_eq!(fresh.archetype_id(), second.id);
        assert_eq!(fresh.block_range().offset, CHUNK);
        assert_eq!(storage.carved_chunks(), 2);
        assert_eq!(storage.free_chunks(first.id), 1);
    }

    #[test]
    fn test_zeroing_reused_chunks() {
        let mut types = TypeRegistry::new();
        let a = types.register::<u64>();
        let mut archetypes = ArchetypeRegistry::new();
        let archetype = *archetypes.archetype_of_types(&types, &[a]);
        let config = EcsConfig::default()
            .with_chunk_size(CHUNK)
            .with_arena_size(CHUNK)
            .with_zero_reused_chunks(true);
        let storage = ChunkStorage::new(&config).unwrap();

        let mut chunk = storage.allocate_chunk(&types, &archetype);
        chunk.allocate();
        chunk.components_mut::<u64>(a).unwrap()[0] = 77;
        storage.free_chunk(archetype.id, chunk);

        let mut chunk = storage.allocate_chunk(&types, &archetype);
        chunk.allocate();
        assert_eq!(chunk.components::<u64>(a).unwrap(), &[0]);
    }

    #[test]
    fn test_concurrent_reserve_is_disjoint() {
        for count in [1, 7, 32, 61] {
            let (types, archetype, storage) = setup(64 * CHUNK);
            storage.reserve(&types, &archetype, count);
            assert_eq!(storage.carved_chunks(), count);
            assert_eq!(storage.free_chunks(archetype.id), count);

            let mut ranges: Vec<ArenaRange> = (0..count)
                .map(|_| storage.allocate_chunk(&types, &archetype).block_range())
                .collect();
            assert_eq!(storage.carved_chunks(), count);

            ranges.sort_by_key(|range| range.offset);
            for (i, a) in ranges.iter().enumerate() {
                assert_eq!(a.len, CHUNK);
                assert_eq!(a.offset % CHUNK_MEMORY_ALIGNMENT, 0);
                for b in &ranges[i + 1..] {
                    assert!(!a.overlaps(*b), "{a:?} overlaps {b:?}");
                }
            }
        }
    }

    #[test]
    fn test_try_reserve_reports_exhaustion() {
        let (types, archetype, storage) = setup(3 * CHUNK);
        let err = storage.try_reserve(&types, &archetype, 5).unwrap_err();
        assert!(matches!(err, StorageError::ArenaExhausted { requested: CHUNK, .. }));
        // What fit is still pooled.
        assert_eq!(storage.free_chunks(archetype.id), 3);
        assert!(storage.try_allocate_chunk(&types, &archetype).is_ok());
    }

    #[test]
    #[should_panic(expected = "arena exhausted")]
    fn test_allocate_panics_when_exhausted() {
        let (types, archetype, storage) = setup(CHUNK);
        let _first = storage.allocate_chunk(&types, &archetype);
        let _second = storage.allocate_chunk(&types, &archetype);
    }
}
