//! # Queries
//!
//! A query is a tuple of parameters, each borrowing one column of a chunk:
//!
//! | Parameter | Item          | Requires component |
//! |-----------|---------------|--------------------|
//! | `&T`      | `&T`          | yes                |
//! | `&mut T`  | `&mut T`      | yes                |
//! | `Entity`  | `Entity`      | no                 |
//!
//! The required [`ArchetypeSet`] is the union of the parameters'
//! components. Every chunk of every superset archetype is then split with
//! [`Chunk::columns`] and zipped slot by slot.

use super::archetype::ArchetypeSet;
use super::chunk::{Chunk, ChunkColumns};
use super::component::{Component, ComponentTypeId, TypeRegistry};
use super::entity::Entity;

/// One element of a query tuple.
pub trait QueryParam {
    /// Value handed to the query callback per slot.
    type Item<'a>;
    /// Iterator over one chunk's column.
    type Column<'a>: Iterator<Item = Self::Item<'a>>;
    /// Resolved per-query data, usually a component id.
    type State: Copy + Send + Sync;

    /// Resolves the parameter, or returns `None` if it cannot match
    /// anything (its component was never registered).
    fn init(types: &TypeRegistry) -> Option<Self::State>;

    /// Adds the parameter's component, if any, to `set`.
    fn require(state: &Self::State, set: &mut ArchetypeSet);

    /// Borrows the parameter's column out of a chunk.
    fn column<'a>(columns: &mut ChunkColumns<'a>, state: &Self::State) -> Self::Column<'a>;
}

impl<T: Component> QueryParam for &T {
    type Item<'a> = &'a T;
    type Column<'a> = std::slice::Iter<'a, T>;
    type State = ComponentTypeId;

    fn init(types: &TypeRegistry) -> Option<Self::State> {
        types.id_of::<T>()
    }

    fn require(state: &Self::State, set: &mut ArchetypeSet) {
        set.set(*state);
    }

    fn column<'a>(columns: &mut ChunkColumns<'a>, state: &Self::State) -> Self::Column<'a> {
        let values: &'a [T] = bytemuck::cast_slice(columns.take(*state));
        values.iter()
    }
}

impl<T: Component> QueryParam for &mut T {
    type Item<'a> = &'a mut T;
    type Column<'a> = std::slice::IterMut<'a, T>;
    type State = ComponentTypeId;

    fn init(types: &TypeRegistry) -> Option<Self::State> {
        types.id_of::<T>()
    }

    fn require(state: &Self::State, set: &mut ArchetypeSet) {
        set.set(*state);
    }

    fn column<'a>(columns: &mut ChunkColumns<'a>, state: &Self::State) -> Self::Column<'a> {
        bytemuck::cast_slice_mut::<u8, T>(columns.take(*state)).iter_mut()
    }
}

impl QueryParam for Entity {
    type Item<'a> = Entity;
    type Column<'a> = std::iter::Copied<std::slice::Iter<'a, Entity>>;
    type State = ();

    fn init(_types: &TypeRegistry) -> Option<Self::State> {
        Some(())
    }

    fn require(_state: &Self::State, _set: &mut ArchetypeSet) {}

    fn column<'a>(columns: &mut ChunkColumns<'a>, _state: &Self::State) -> Self::Column<'a> {
        let entities: &'a [Entity] = columns.take_entities();
        entities.iter().copied()
    }
}

/// A tuple of [`QueryParam`]s.
///
/// Implemented for tuples of one to eight parameters.
///
/// # Panics
///
/// Iterating a chunk panics if the tuple names the same component twice.
pub trait Query {
    /// Tuple of parameter items.
    type Item<'a>;
    /// Iterator over one chunk.
    type Iter<'a>: Iterator<Item = Self::Item<'a>>;
    /// Tuple of parameter states.
    type State: Copy + Send + Sync;

    /// Resolves every parameter; `None` if any cannot match.
    fn init(types: &TypeRegistry) -> Option<Self::State>;

    /// Components an archetype must carry to match.
    fn required(state: &Self::State) -> ArchetypeSet;

    /// Iterates the used slots of `chunk`.
    fn iter<'a>(chunk: &'a mut Chunk, state: &Self::State) -> Self::Iter<'a>;
}

/// Lock-step iterator over the columns of one chunk.
pub struct QueryIter<T>(T);

macro_rules! impl_query {
    ($($name:ident),+) => {
        impl<$($name: QueryParam),+> Query for ($($name,)+) {
            type Item<'a> = ($($name::Item<'a>,)+);
            type Iter<'a> = QueryIter<($($name::Column<'a>,)+)>;
            type State = ($($name::State,)+);

            fn init(types: &TypeRegistry) -> Option<Self::State> {
                Some(($($name::init(types)?,)+))
            }

            #[allow(non_snake_case)]
            fn required(state: &Self::State) -> ArchetypeSet {
                let ($($name,)+) = state;
                let mut set = ArchetypeSet::new();
                $($name::require($name, &mut set);)+
                set
            }

            #[allow(non_snake_case)]
            fn iter<'a>(chunk: &'a mut Chunk, state: &Self::State) -> Self::Iter<'a> {
                let ($($name,)+) = state;
                let mut columns = chunk.columns();
                QueryIter(($($name::column(&mut columns, $name),)+))
            }
        }

        impl<$($name: Iterator),+> Iterator for QueryIter<($($name,)+)> {
            type Item = ($($name::Item,)+);

            #[inline]
            #[allow(non_snake_case)]
            fn next(&mut self) -> Option<Self::Item> {
                let ($($name,)+) = &mut self.0;
                Some(($($name.next()?,)+))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);
impl_query!(A, B, C, D, E, F);
impl_query!(A, B, C, D, E, F, G);
impl_query!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::ArchetypeRegistry;
    use crate::memory::Arena;
    use std::sync::Arc;

    #[test]
    fn test_required_set_is_union_of_components() {
        let mut types = TypeRegistry::new();
        let a = types.register::<u32>();
        let b = types.register::<f32>();

        let state = <(&u32, Entity, &mut f32)>::init(&types).unwrap();
        let required = <(&u32, Entity, &mut f32)>::required(&state);
        assert_eq!(required, ArchetypeSet::from_ids(&[a, b]));

        let entities_only = <(Entity,)>::init(&types).unwrap();
        assert!(<(Entity,)>::required(&entities_only).is_empty());
    }

    #[test]
    fn test_unregistered_component_matches_nothing() {
        let mut types = TypeRegistry::new();
        types.register::<u32>();
        assert!(<(&u32, &u64)>::init(&types).is_none());
    }

    #[test]
    fn test_iterates_chunk_in_lock_step() {
        let mut types = TypeRegistry::new();
        let a = types.register::<u32>();
        let b = types.register::<i64>();
        let mut archetypes = ArchetypeRegistry::new();
        let archetype = *archetypes.archetype_of_types(&types, &[a, b]);
        let arena = Arc::new(Arena::new(4096).unwrap());
        let mut chunk = Chunk::new(&types, &archetype, Arena::carve(&arena, 4096, 64).unwrap());

        for i in 0..3u32 {
            let slot = chunk.allocate();
            chunk.components_mut::<u32>(a).unwrap()[slot] = i;
            chunk.entities_mut()[slot] = Entity::new(i, 0);
        }

        let state = <(Entity, &u32, &mut i64)>::init(&types).unwrap();
        for (entity, value, out) in <(Entity, &u32, &mut i64)>::iter(&mut chunk, &state) {
            assert_eq!(entity.index(), *value);
            *out = -i64::from(*value);
        }
        assert_eq!(chunk.components::<i64>(b).unwrap(), &[0, -1, -2]);
    }

    #[test]
    #[should_panic(expected = "borrowed twice")]
    fn test_duplicate_component_panics() {
        let mut types = TypeRegistry::new();
        let a = types.register::<u32>();
        let mut archetypes = ArchetypeRegistry::new();
        let archetype = *archetypes.archetype_of_types(&types, &[a]);
        let arena = Arc::new(Arena::new(4096).unwrap());
        let mut chunk = Chunk::new(&types, &archetype, Arena::carve(&arena, 4096, 64).unwrap());
        chunk.allocate();

        let state = <(&u32, &mut u32)>::init(&types).unwrap();
        let _ = <(&u32, &mut u32)>::iter(&mut chunk, &state).count();
    }
}
