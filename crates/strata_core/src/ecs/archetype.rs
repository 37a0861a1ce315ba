//! # Archetypes
//!
//! An archetype is the exact set of component types an entity carries.
//! Entities of one archetype are stored together, chunk by chunk:
//!
//! ```text
//! Archetype {Position, Velocity}:
//! chunk 0: [P0 P1 P2 ...][V0 V1 V2 ...]........[E0 E1 E2 ...]
//! chunk 1: [P0 P1 P2 ...][V0 V1 V2 ...]........[E0 E1 E2 ...]
//! ```
//!
//! The registry memoizes the set -> id mapping. Ids are handed out in
//! first-seen order and never retired.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};

use super::component::{ComponentTypeId, TypeRegistry};
use crate::config::MAX_COMPONENT_TYPES;

const SET_WORDS: usize = MAX_COMPONENT_TYPES / 64;

// ============================================================================
// ARCHETYPE SET - fixed capacity bit vector
// ============================================================================

/// Fixed-capacity bit vector of component type ids.
///
/// Bit `i` is set when the archetype carries component type `i`. Equality is
/// bitwise, so the order in which types were added never matters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeSet {
    /// 64 component types per word.
    bits: [u64; SET_WORDS],
}

impl ArchetypeSet {
    /// The set with no components.
    pub const EMPTY: Self = Self {
        bits: [0; SET_WORDS],
    };

    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Builds a set from a list of ids. Duplicates are ignored.
    #[must_use]
    pub fn from_ids(ids: &[ComponentTypeId]) -> Self {
        ids.iter().copied().collect()
    }

    /// Sets the bit for `id`.
    #[inline]
    pub fn set(&mut self, id: ComponentTypeId) {
        let index = id.index();
        self.bits[index / 64] |= 1u64 << (index % 64);
    }

    /// Clears the bit for `id`.
    #[inline]
    pub fn clear(&mut self, id: ComponentTypeId) {
        let index = id.index();
        self.bits[index / 64] &= !(1u64 << (index % 64));
    }

    /// Checks the bit for `id`.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        let index = id.index();
        (self.bits[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Returns a copy with `id` added.
    #[inline]
    #[must_use]
    pub fn with(mut self, id: ComponentTypeId) -> Self {
        self.set(id);
        self
    }

    /// Returns a copy with `id` removed.
    #[inline]
    #[must_use]
    pub fn without(mut self, id: ComponentTypeId) -> Self {
        self.clear(id);
        self
    }

    /// Checks if every bit of `required` is also set here.
    #[inline]
    #[must_use]
    pub fn is_superset_of(&self, required: &Self) -> bool {
        self.bits
            .iter()
            .zip(required.bits.iter())
            .all(|(have, need)| have & need == *need)
    }

    /// Returns the number of component types in the set.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Checks if no bit is set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }

    /// Iterates over the contained ids in ascending order.
    ///
    /// Uses `trailing_zeros` so empty words are skipped in one step.
    #[must_use]
    pub fn iter(&self) -> ArchetypeSetIter<'_> {
        ArchetypeSetIter {
            bits: &self.bits,
            word_idx: 0,
            current_word: self.bits[0],
        }
    }
}

impl Default for ArchetypeSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FromIterator<ComponentTypeId> for ArchetypeSet {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.set(id);
        }
        set
    }
}

impl BitOr for ArchetypeSet {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        for (word, other) in self.bits.iter_mut().zip(rhs.bits) {
            *word |= other;
        }
        self
    }
}

impl BitAnd for ArchetypeSet {
    type Output = Self;

    fn bitand(mut self, rhs: Self) -> Self {
        for (word, other) in self.bits.iter_mut().zip(rhs.bits) {
            *word &= other;
        }
        self
    }
}

impl fmt::Debug for ArchetypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(ComponentTypeId::index)).finish()
    }
}

/// Iterator over the ids of an [`ArchetypeSet`].
pub struct ArchetypeSetIter<'a> {
    bits: &'a [u64; SET_WORDS],
    word_idx: usize,
    current_word: u64,
}

impl Iterator for ArchetypeSetIter<'_> {
    type Item = ComponentTypeId;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                // Clear lowest set bit
                self.current_word &= self.current_word - 1;
                return Some(ComponentTypeId::new(self.word_idx * 64 + bit));
            }

            self.word_idx += 1;
            if self.word_idx >= SET_WORDS {
                return None;
            }
            self.current_word = self.bits[self.word_idx];
        }
    }
}

// ============================================================================
// ARCHETYPE
// ============================================================================

/// Identifier of a registered archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArchetypeId(u16);

impl ArchetypeId {
    /// The archetype with no components. Every registry reserves it.
    pub const EMPTY: Self = Self(0);

    /// Creates an id from a raw index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit the 16 bits an
    /// [`EntityAddress`](crate::EntityAddress) reserves for archetypes.
    #[inline]
    #[must_use]
    pub fn new(index: usize) -> Self {
        let raw = u16::try_from(index)
            .unwrap_or_else(|_| panic!("Archetype index {index} exceeds 16 bits"));
        Self(raw)
    }

    /// Returns the id as an index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archetype {}", self.0)
    }
}

/// A registered component combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Archetype {
    /// Registry id.
    pub id: ArchetypeId,
    /// Component types carried by entities of this archetype.
    pub set: ArchetypeSet,
    /// Sum of the component sizes; the bytes one entity's data occupies.
    pub total_component_bytes: usize,
    /// Number of component types.
    pub component_count: usize,
}

impl Archetype {
    /// Checks if the archetype carries `id`.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.set.contains(id)
    }
}

/// Memoized mapping between component sets and archetype ids.
///
/// # Example
///
/// ```rust
/// use strata_core::{ArchetypeId, ArchetypeRegistry, TypeRegistry};
///
/// let mut types = TypeRegistry::new();
/// let a = types.register::<u32>();
/// let b = types.register::<f64>();
///
/// let mut archetypes = ArchetypeRegistry::new();
/// let ab = archetypes.archetype_of_types(&types, &[a, b]).id;
/// let ba = archetypes.archetype_of_types(&types, &[b, a]).id;
/// assert_eq!(ab, ba);
/// assert_eq!(archetypes.archetype_of_types(&types, &[]).id, ArchetypeId::EMPTY);
/// ```
pub struct ArchetypeRegistry {
    /// Archetypes indexed by id.
    archetypes: Vec<Archetype>,
    /// Reverse lookup by bit pattern.
    lookup: HashMap<ArchetypeSet, ArchetypeId>,
}

impl ArchetypeRegistry {
    /// Creates a registry holding only the empty archetype.
    #[must_use]
    pub fn new() -> Self {
        let empty = Archetype {
            id: ArchetypeId::EMPTY,
            set: ArchetypeSet::EMPTY,
            total_component_bytes: 0,
            component_count: 0,
        };
        let mut lookup = HashMap::new();
        lookup.insert(ArchetypeSet::EMPTY, ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            lookup,
        }
    }

    /// Returns the archetype for `set`, registering it on first sight.
    ///
    /// # Panics
    ///
    /// Panics if `set` names an unregistered component type.
    pub fn archetype_of_set(&mut self, types: &TypeRegistry, set: &ArchetypeSet) -> &Archetype {
        let id = match self.lookup.get(set) {
            Some(&id) => id,
            None => self.insert(types, *set),
        };
        &self.archetypes[id.index()]
    }

    /// Returns the archetype for a list of component ids in any order.
    pub fn archetype_of_types(
        &mut self,
        types: &TypeRegistry,
        ids: &[ComponentTypeId],
    ) -> &Archetype {
        let set = ArchetypeSet::from_ids(ids);
        self.archetype_of_set(types, &set)
    }

    /// Returns the archetype of `id` extended by one component type.
    pub fn archetype_with(
        &mut self,
        types: &TypeRegistry,
        id: ArchetypeId,
        extra: ComponentTypeId,
    ) -> &Archetype {
        let set = self.get(id).set.with(extra);
        self.archetype_of_set(types, &set)
    }

    /// Returns the archetype of `id` with one component type removed.
    pub fn archetype_without(
        &mut self,
        types: &TypeRegistry,
        id: ArchetypeId,
        removed: ComponentTypeId,
    ) -> &Archetype {
        let set = self.get(id).set.without(removed);
        self.archetype_of_set(types, &set)
    }

    /// Returns a registered archetype.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        self.archetypes
            .get(id.index())
            .unwrap_or_else(|| panic!("Unknown {id}"))
    }

    /// Returns every archetype whose set is a superset of `required`, in
    /// ascending id order.
    #[must_use]
    pub fn archetypes_that_contain(&self, required: &ArchetypeSet) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|archetype| archetype.set.is_superset_of(required))
            .map(|archetype| archetype.id)
            .collect()
    }

    /// Returns the component ids of an archetype in ascending order.
    #[must_use]
    pub fn type_ids(&self, id: ArchetypeId) -> Vec<ComponentTypeId> {
        self.get(id).set.iter().collect()
    }

    /// Returns the number of registered archetypes, the empty one included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Always false: the empty archetype is registered at construction.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Iterates over all archetypes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    fn insert(&mut self, types: &TypeRegistry, set: ArchetypeSet) -> ArchetypeId {
        let id = ArchetypeId::new(self.archetypes.len());
        let total_component_bytes = set.iter().map(|ty| types.info(ty).size).sum();
        let component_count = set.count();

        self.archetypes.push(Archetype {
            id,
            set,
            total_component_bytes,
            component_count,
        });
        self.lookup.insert(set, id);

        tracing::debug!(
            archetype = id.index(),
            components = component_count,
            bytes = total_component_bytes,
            "registered archetype"
        );
        id
    }
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        types: TypeRegistry,
        a: ComponentTypeId,
        b: ComponentTypeId,
        c: ComponentTypeId,
        d: ComponentTypeId,
    }

    fn fixture() -> Fixture {
        let mut types = TypeRegistry::new();
        let a = types.register::<u64>();
        let b = types.register::<u32>();
        let c = types.register::<[u64; 2]>();
        let d = types.register::<u8>();
        Fixture { types, a, b, c, d }
    }

    #[test]
    fn test_set_bits() {
        let mut set = ArchetypeSet::new();
        let id = ComponentTypeId::new(700);
        assert!(set.is_empty());

        set.set(id);
        assert!(set.contains(id));
        assert_eq!(set.count(), 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![id]);

        set.clear(id);
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_iter_is_ascending() {
        let ids = [900, 3, 64, 63, 128].map(ComponentTypeId::new);
        let set = ArchetypeSet::from_ids(&ids);
        let collected: Vec<usize> = set.iter().map(ComponentTypeId::index).collect();
        assert_eq!(collected, vec![3, 63, 64, 128, 900]);
    }

    #[test]
    fn test_set_superset_and_ops() {
        let [a, b, c] = [1, 2, 70].map(ComponentTypeId::new);
        let ab = ArchetypeSet::from_ids(&[a, b]);
        let bc = ArchetypeSet::from_ids(&[b, c]);

        assert!((ab | bc).is_superset_of(&ab));
        assert!(!ab.is_superset_of(&bc));
        assert_eq!(ab & bc, ArchetypeSet::from_ids(&[b]));
        assert!(ab.is_superset_of(&ArchetypeSet::EMPTY));
    }

    #[test]
    fn test_order_independent_identity() {
        let Fixture { types, a, b, c, d } = fixture();
        let mut archetypes = ArchetypeRegistry::new();

        let abc = *archetypes.archetype_of_types(&types, &[a, b, c]);
        assert!(abc.contains(a) && abc.contains(b) && abc.contains(c));
        assert!(!abc.contains(d));

        let bca = archetypes.archetype_of_types(&types, &[b, c, a]).id;
        assert_eq!(abc.id, bca);

        let from_set = archetypes
            .archetype_of_set(&types, &ArchetypeSet::from_ids(&[c, a, b]))
            .id;
        assert_eq!(abc.id, from_set);
    }

    #[test]
    fn test_memoization_and_extension() {
        let Fixture { types, a, b, c, .. } = fixture();
        let mut archetypes = ArchetypeRegistry::new();

        let abc = archetypes.archetype_of_types(&types, &[a, b, c]).id;
        let ac = archetypes.archetype_of_types(&types, &[a, c]).id;
        assert_ne!(abc, ac);
        assert_eq!(archetypes.archetype_of_types(&types, &[a, c]).id, ac);

        assert_eq!(archetypes.archetype_with(&types, ac, b).id, abc);
        assert_eq!(archetypes.archetype_without(&types, abc, b).id, ac);
        assert_eq!(archetypes.type_ids(abc), vec![a, b, c]);
        assert_eq!(archetypes.len(), 3);
    }

    #[test]
    fn test_empty_set_is_reserved() {
        let Fixture { types, a, .. } = fixture();
        let mut archetypes = ArchetypeRegistry::new();

        assert_eq!(archetypes.archetype_of_types(&types, &[]).id, ArchetypeId::EMPTY);
        let with_a = archetypes.archetype_with(&types, ArchetypeId::EMPTY, a).id;
        assert_eq!(with_a.index(), 1);
        assert_eq!(
            archetypes.archetype_without(&types, with_a, a).id,
            ArchetypeId::EMPTY
        );
        assert_eq!(archetypes.len(), 2);
    }

    #[test]
    fn test_footprint_bookkeeping() {
        let Fixture { types, a, b, c, .. } = fixture();
        let mut archetypes = ArchetypeRegistry::new();

        let abc = *archetypes.archetype_of_types(&types, &[a, b, c]);
        assert_eq!(abc.total_component_bytes, 28);
        assert_eq!(abc.component_count, 3);

        let ac = *archetypes.archetype_of_types(&types, &[a, c]);
        assert_eq!(ac.total_component_bytes, 24);
        assert_eq!(ac.component_count, 2);

        let b_only = *archetypes.archetype_of_types(&types, &[b]);
        assert_eq!(b_only.total_component_bytes, 4);
        assert_eq!(b_only.component_count, 1);
    }

    #[test]
    fn test_superset_query_order() {
        let Fixture { types, a, b, c, d } = fixture();
        let mut archetypes = ArchetypeRegistry::new();

        let bc = archetypes.archetype_of_types(&types, &[b, c]).id;
        let dc = archetypes.archetype_of_types(&types, &[d, c]).id;
        let bcd = archetypes.archetype_of_types(&types, &[b, c, d]).id;
        let ad = archetypes.archetype_of_types(&types, &[a, d]).id;
        let b_only = archetypes.archetype_of_types(&types, &[b]).id;

        let found = archetypes.archetypes_that_contain(&ArchetypeSet::from_ids(&[b]));
        assert_eq!(found, vec![bc, bcd, b_only]);
        assert!(!found.contains(&dc));
        assert!(!found.contains(&ad));

        // The empty requirement matches everything, the empty archetype first.
        let all = archetypes.archetypes_that_contain(&ArchetypeSet::EMPTY);
        assert_eq!(all.first(), Some(&ArchetypeId::EMPTY));
        assert_eq!(all.len(), 6);
    }

    #[test]
    #[should_panic(expected = "Unknown archetype 9")]
    fn test_unknown_archetype_panics() {
        let archetypes = ArchetypeRegistry::new();
        let _ = archetypes.get(ArchetypeId::new(9));
    }
}
