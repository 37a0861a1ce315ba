//! # Component Types
//!
//! Components are plain data. Every component type gets a small, stable
//! [`ComponentTypeId`] from an explicitly owned [`TypeRegistry`], which also
//! records its size, alignment and a [`ComponentKind`] that performs typed
//! operations on the type-erased bytes of a chunk column.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::config::{CHUNK_MEMORY_ALIGNMENT, MAX_COMPONENT_TYPES};

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Pod`: Plain old data, safe to reinterpret from raw chunk bytes
/// - `Default`: Newly attached components start from their default value
/// - `Send + Sync`: Chunks are visited from worker threads
///
/// The trait is implemented for every type meeting those bounds.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
///
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Position {
///     x: f32,
///     y: f32,
///     z: f32,
/// }
///
/// fn assert_component<T: strata_core::Component>() {}
/// assert_component::<Position>();
/// ```
pub trait Component: Pod + Default + Send + Sync + 'static {}

impl<T: Pod + Default + Send + Sync + 'static> Component for T {}

/// Stable small-integer identifier of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentTypeId(u16);

impl ComponentTypeId {
    /// Creates an id from a raw index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`MAX_COMPONENT_TYPES`].
    #[inline]
    #[must_use]
    pub fn new(index: usize) -> Self {
        assert!(
            index < MAX_COMPONENT_TYPES,
            "Component type index {index} exceeds MAX_COMPONENT_TYPES"
        );
        #[allow(clippy::cast_possible_truncation)]
        Self(index as u16)
    }

    /// Returns the id as an index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed operations over a type-erased component column.
///
/// Columns are byte slices whose length is a multiple of the component size
/// and whose start is aligned for the component.
pub trait ComponentKind: Send + Sync + 'static {
    /// Returns the Rust type name of the component.
    fn type_name(&self) -> &'static str;

    /// Swaps the values at slots `a` and `b`.
    fn swap(&self, column: &mut [u8], a: usize, b: usize);

    /// Copies `count` values from `src[src_index..]` into `dst[dst_index..]`.
    fn copy(&self, src: &[u8], dst: &mut [u8], src_index: usize, dst_index: usize, count: usize);

    /// Writes the component's default value into `slot`.
    fn write_default(&self, column: &mut [u8], slot: usize);
}

impl<C: Component> ComponentKind for PhantomData<C> {
    fn type_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn swap(&self, column: &mut [u8], a: usize, b: usize) {
        bytemuck::cast_slice_mut::<u8, C>(column).swap(a, b);
    }

    fn copy(&self, src: &[u8], dst: &mut [u8], src_index: usize, dst_index: usize, count: usize) {
        let src = bytemuck::cast_slice::<u8, C>(src);
        let dst = bytemuck::cast_slice_mut::<u8, C>(dst);
        dst[dst_index..dst_index + count].copy_from_slice(&src[src_index..src_index + count]);
    }

    fn write_default(&self, column: &mut [u8], slot: usize) {
        bytemuck::cast_slice_mut::<u8, C>(column)[slot] = C::default();
    }
}

/// Everything the storage layer needs to know about a component type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    /// The registered id.
    pub id: ComponentTypeId,
    /// The Rust type behind the id.
    pub type_id: TypeId,
    /// `size_of::<T>()`.
    pub size: usize,
    /// `align_of::<T>()`.
    pub align: usize,
    /// Typed column operations.
    pub kind: &'static dyn ComponentKind,
}

impl TypeInfo {
    /// Builds the info for `C` under the given id.
    #[must_use]
    pub fn of<C: Component>(id: ComponentTypeId) -> Self {
        Self {
            id,
            type_id: TypeId::of::<C>(),
            size: std::mem::size_of::<C>(),
            align: std::mem::align_of::<C>(),
            kind: &PhantomData::<C>,
        }
    }

    /// Bytes one entity needs for this component inside a chunk.
    #[inline]
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.size.max(self.align)
    }

    /// Returns the Rust type name of the component.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Checks if this info describes `C`.
    #[inline]
    #[must_use]
    pub fn is<C: Component>(&self) -> bool {
        self.type_id == TypeId::of::<C>()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("type_name", &self.type_name())
            .field("id", &self.id)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// Append-only table of registered component types.
///
/// # Example
///
/// ```rust
/// use strata_core::TypeRegistry;
///
/// let mut types = TypeRegistry::new();
/// let a = types.register::<u64>();
/// let b = types.register::<u32>();
/// assert_ne!(a, b);
/// assert_eq!(types.register::<u64>(), a);
/// assert_eq!(types.info(b).size, 4);
/// ```
#[derive(Default)]
pub struct TypeRegistry {
    /// Info per id, indexed by `ComponentTypeId::index`.
    infos: Vec<TypeInfo>,
    /// Reverse lookup from the Rust type.
    ids: HashMap<TypeId, ComponentTypeId>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `C`, registering it on first use.
    ///
    /// # Panics
    ///
    /// Panics if `C` is zero-sized, if its alignment exceeds
    /// [`CHUNK_MEMORY_ALIGNMENT`], or if [`MAX_COMPONENT_TYPES`] types are
    /// already registered.
    pub fn register<C: Component>(&mut self) -> ComponentTypeId {
        if let Some(&id) = self.ids.get(&TypeId::of::<C>()) {
            return id;
        }

        assert!(
            std::mem::size_of::<C>() > 0,
            "Zero-sized component {} cannot be stored in chunks",
            type_name::<C>()
        );
        assert!(
            std::mem::align_of::<C>() <= CHUNK_MEMORY_ALIGNMENT,
            "Component {} is over-aligned",
            type_name::<C>()
        );
        assert!(
            self.infos.len() < MAX_COMPONENT_TYPES,
            "Cannot register more than {MAX_COMPONENT_TYPES} component types"
        );

        let id = ComponentTypeId::new(self.infos.len());
        self.infos.push(TypeInfo::of::<C>(id));
        self.ids.insert(TypeId::of::<C>(), id);
        id
    }

    /// Returns the id of `C` if it has been registered.
    #[inline]
    #[must_use]
    pub fn id_of<C: Component>(&self) -> Option<ComponentTypeId> {
        self.ids.get(&TypeId::of::<C>()).copied()
    }

    /// Returns the info of a registered id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never registered.
    #[inline]
    #[must_use]
    pub fn info(&self, id: ComponentTypeId) -> &TypeInfo {
        self.infos
            .get(id.index())
            .unwrap_or_else(|| panic!("Component type {id} was never registered"))
    }

    /// Returns the number of registered types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Checks if no type has been registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.infos.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_and_stable() {
        let mut types = TypeRegistry::new();
        assert_eq!(types.register::<i32>().index(), 0);
        assert_eq!(types.register::<u16>().index(), 1);
        assert_eq!(types.register::<[i32; 2]>().index(), 2);
        assert_eq!(types.register::<i32>().index(), 0);
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn test_registries_are_independent() {
        let mut first = TypeRegistry::new();
        let mut second = TypeRegistry::new();
        first.register::<u16>();
        assert_eq!(second.register::<[i32; 2]>().index(), 0);
        assert_eq!(second.id_of::<u16>(), None);
    }

    #[test]
    fn test_info_records_layout() {
        let mut types = TypeRegistry::new();
        let id = types.register::<[u32; 3]>();
        let info = types.info(id);
        assert_eq!(info.size, 12);
        assert_eq!(info.align, 4);
        assert_eq!(info.footprint(), 12);
        assert!(info.type_name().contains("u32"));
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_unregistered_info_panics() {
        let types = TypeRegistry::new();
        let _ = types.info(ComponentTypeId::new(3));
    }

    #[test]
    fn test_kind_swap_copy_default() {
        let mut types = TypeRegistry::new();
        let id = types.register::<u32>();
        let kind = types.info(id).kind;

        let src = [1u32, 2, 3, 4];
        let mut column = src;
        kind.swap(bytemuck::cast_slice_mut(&mut column[..]), 0, 3);
        assert_eq!(column, [4, 2, 3, 1]);

        let mut dst = [0u32; 4];
        kind.copy(
            bytemuck::cast_slice(&src[..]),
            bytemuck::cast_slice_mut(&mut dst[..]),
            1,
            2,
            2,
        );
        assert_eq!(dst, [0, 0, 2, 3]);

        kind.write_default(bytemuck::cast_slice_mut(&mut dst[..]), 2);
        assert_eq!(dst, [0, 0, 0, 3]);
    }
}
