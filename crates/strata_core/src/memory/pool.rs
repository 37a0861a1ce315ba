//! # Keyed Free Lists
//!
//! Per-key stacks of recycled objects, guarded by a single mutex.

use parking_lot::Mutex;

/// Stacks of reusable objects, one per small integer key.
///
/// Chunk storage keeps one stack per archetype id. Pushing and popping are
/// O(1) and serialized by a [`parking_lot::Mutex`]; nothing is ever released
/// back to the allocator that produced the objects.
///
/// # Example
///
/// ```rust,ignore
/// let lists: FreeLists<Chunk> = FreeLists::new();
/// lists.push(3, chunk);
/// let again = lists.pop(3);
/// ```
pub struct FreeLists<T> {
    /// One stack per key, grown on demand.
    stacks: Mutex<Vec<Vec<T>>>,
}

impl<T> FreeLists<T> {
    /// Creates empty free lists.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stacks: Mutex::new(Vec::new()),
        }
    }

    /// Pushes an object onto the stack for `key`.
    pub fn push(&self, key: usize, value: T) {
        let mut stacks = self.stacks.lock();
        Self::stack_mut(&mut stacks, key).push(value);
    }

    /// Pushes many objects onto the stack for `key` under one lock.
    pub fn push_many<I>(&self, key: usize, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut stacks = self.stacks.lock();
        Self::stack_mut(&mut stacks, key).extend(values);
    }

    /// Pops the most recently pushed object for `key`.
    pub fn pop(&self, key: usize) -> Option<T> {
        self.stacks.lock().get_mut(key)?.pop()
    }

    /// Returns the number of objects waiting under `key`.
    #[must_use]
    pub fn len_of(&self, key: usize) -> usize {
        self.stacks.lock().get(key).map_or(0, Vec::len)
    }

    /// Returns the number of objects waiting under all keys.
    #[must_use]
    pub fn total(&self) -> usize {
        self.stacks.lock().iter().map(Vec::len).sum()
    }

    fn stack_mut(stacks: &mut Vec<Vec<T>>, key: usize) -> &mut Vec<T> {
        if key >= stacks.len() {
            stacks.resize_with(key + 1, Vec::new);
        }
        &mut stacks[key]
    }
}

impl<T> Default for FreeLists<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_lifo() {
        let lists: FreeLists<u32> = FreeLists::new();
        lists.push(2, 10);
        lists.push(2, 11);

        assert_eq!(lists.len_of(2), 2);
        assert_eq!(lists.pop(2), Some(11));
        assert_eq!(lists.pop(2), Some(10));
        assert_eq!(lists.pop(2), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let lists: FreeLists<u32> = FreeLists::new();
        lists.push_many(0, [1, 2, 3]);
        lists.push(5, 42);

        assert_eq!(lists.pop(1), None);
        assert_eq!(lists.pop(9), None);
        assert_eq!(lists.len_of(0), 3);
        assert_eq!(lists.total(), 4);
        assert_eq!(lists.pop(5), Some(42));
    }
}
