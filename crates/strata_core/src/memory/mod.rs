//! # Memory Management
//!
//! The chunk arena and the free lists that recycle chunks.
//!
//! ## Design Philosophy
//!
//! All chunk memory is reserved once at startup. After that:
//! - Chunks are carved by bumping an atomic high-water mark
//! - Freed chunks are recycled per archetype, never returned to the OS
//! - Predictable, flat latency

mod arena;
mod pool;

pub use arena::{Arena, ArenaBlock, ArenaRange};
pub use pool::FreeLists;
