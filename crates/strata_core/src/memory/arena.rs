//! # Chunk Arena
//!
//! One large, cache-line aligned reservation from which every chunk is carved.
//!
//! Carving is a lock-free bump of a shared high-water mark. Many threads may
//! carve at once; each successful carve returns an [`ArenaBlock`] that is the
//! only owner of its byte range. Memory is never handed back to the arena
//! while it lives: recycled blocks travel through free lists instead.

// SAFETY: The arena owns a raw allocation and hands out disjoint sub-slices.
// Every unsafe block below is justified by the bump invariant: no two
// `ArenaBlock`s ever cover the same byte.
#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::CHUNK_MEMORY_ALIGNMENT;
use crate::error::StorageError;

/// A byte range inside an [`Arena`], expressed as an offset from its base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaRange {
    /// Offset of the first byte.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl ArenaRange {
    /// One past the last byte of the range.
    #[inline]
    #[must_use]
    pub const fn end(self) -> usize {
        self.offset + self.len
    }

    /// Checks whether two ranges share at least one byte.
    #[inline]
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// A thread-safe bump allocator over one zeroed reservation.
///
/// # Thread Safety
///
/// [`Arena::carve`] may be called from any number of threads concurrently.
/// The high-water mark is advanced with a compare-and-swap retry loop, never
/// a lock.
pub struct Arena {
    /// Base of the reservation, aligned to [`CHUNK_MEMORY_ALIGNMENT`].
    base: NonNull<u8>,
    /// Layout used for the reservation (needed to free it).
    layout: Layout,
    /// Bytes handed out so far, including alignment padding.
    high_water: AtomicUsize,
}

// SAFETY: The arena never dereferences `base` itself. Access to the memory
// happens only through `ArenaBlock`s, which cover disjoint ranges.
unsafe impl Send for Arena {}
// SAFETY: See above; shared access only touches the atomic high-water mark.
unsafe impl Sync for Arena {}

impl Arena {
    /// Reserves `capacity` zeroed bytes.
    ///
    /// The operating system usually backs large zeroed reservations lazily,
    /// so a multi-gigabyte arena costs address space, not resident memory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ArenaAllocationFailed`] if the allocator
    /// refuses the reservation.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        assert!(capacity > 0, "Arena capacity must be greater than zero");

        let layout = Layout::from_size_align(capacity, CHUNK_MEMORY_ALIGNMENT)
            .map_err(|_| StorageError::ArenaAllocationFailed { bytes: capacity })?;

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base =
            NonNull::new(ptr).ok_or(StorageError::ArenaAllocationFailed { bytes: capacity })?;

        tracing::debug!(bytes = capacity, "reserved chunk arena");

        Ok(Self {
            base,
            layout,
            high_water: AtomicUsize::new(0),
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Returns the high-water mark in bytes.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.high_water.load(Ordering::Acquire)
    }

    /// Returns the bytes not yet handed out.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Carves `bytes` bytes aligned to `align` out of the arena.
    ///
    /// Returns `None` once the arena is exhausted. The returned block is the
    /// sole owner of its range for as long as it lives.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or exceeds
    /// [`CHUNK_MEMORY_ALIGNMENT`].
    pub fn carve(arena: &Arc<Self>, bytes: usize, align: usize) -> Option<ArenaBlock> {
        let range = arena.bump(bytes, align)?;
        Some(ArenaBlock {
            arena: Arc::clone(arena),
            range,
        })
    }

    /// Advances the high-water mark, retrying on contention.
    fn bump(&self, bytes: usize, align: usize) -> Option<ArenaRange> {
        assert!(align.is_power_of_two(), "Alignment must be a power of two");
        assert!(
            align <= CHUNK_MEMORY_ALIGNMENT,
            "Alignment {align} exceeds arena base alignment"
        );

        let capacity = self.capacity();
        let mut current = self.high_water.load(Ordering::Relaxed);
        loop {
            let offset = (current + align - 1) & !(align - 1);
            let next = offset.checked_add(bytes)?;
            if next > capacity {
                return None;
            }
            match self.high_water.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(ArenaRange { offset, len: bytes }),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with exactly this layout, and every
        // `ArenaBlock` holds an `Arc` to us, so none outlive this call.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish_non_exhaustive()
    }
}

/// Exclusive ownership of one carved range of an [`Arena`].
///
/// Blocks are not `Clone`. The only way to obtain one is
/// [`Arena::carve`], which never returns overlapping ranges.
pub struct ArenaBlock {
    arena: Arc<Arena>,
    range: ArenaRange,
}

impl ArenaBlock {
    /// Returns the range this block covers.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> ArenaRange {
        self.range
    }

    /// Returns the length of the block in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.range.len
    }

    /// Checks if the block is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.range.len == 0
    }

    /// Returns the block's bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: The range lies inside the arena (checked by `bump`), the
        // arena is kept alive by `self.arena`, and no other block covers it.
        unsafe {
            std::slice::from_raw_parts(self.arena.base.as_ptr().add(self.range.offset), self.range.len)
        }
    }

    /// Returns the block's bytes mutably.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: As in `bytes`; `&mut self` guarantees exclusive access to
        // the only handle that can reach this range.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.arena.base.as_ptr().add(self.range.offset),
                self.range.len,
            )
        }
    }

    /// Clears every byte of the block.
    pub fn zero(&mut self) {
        self.bytes_mut().fill(0);
    }
}

impl fmt::Debug for ArenaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaBlock").field("range", &self.range).finish()
    }
}
