// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component traits, component types and component sets
//!
//! Plain components are `Copy` values stored inline in chunk columns. Shared
//! components are deduplicated per chunk, managed components are reference
//! counted objects kept beside the chunk.

use std::hash::Hash;

use smallvec::{smallvec, SmallVec};

use crate::error::{EcsError, Result};
use crate::type_registry::{ComponentCategory, TypeIndex, TypeRegistry};

/// Maximum number of components supported by ComponentSet implementations
pub const MAX_SET_COMPONENTS: usize = 8;

/// Marker trait for plain components
///
/// Plain components are copied by bytes between chunks, so they must be `Copy`.
/// New columns are filled with `Default::default()`.
pub trait Component: Copy + Default + Send + Sync + 'static {}

/// Automatically implement Component for all valid types
impl<T: Copy + Default + Send + Sync + 'static> Component for T {}

/// Value shared by every entity of a chunk.
///
/// `Default::default()` is the implicit value of entities that never set one.
pub trait SharedComponent: Clone + PartialEq + Hash + Default + Send + Sync + 'static {}

/// Object-typed component kept outside chunk memory as an `Arc`.
pub trait ManagedComponent: Send + Sync + 'static {}

/// How a query accesses a component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
    /// Entities must NOT have the type
    Subtractive,
}

/// A registered type plus the access a caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentType {
    pub type_index: TypeIndex,
    pub access: AccessMode,
}

impl ComponentType {
    pub fn from_index(type_index: TypeIndex) -> Self {
        Self {
            type_index,
            access: AccessMode::ReadWrite,
        }
    }

    /// Read-write plain or tag component
    pub fn of<T: Component>() -> Result<Self> {
        Ok(Self::from_index(TypeRegistry::global().component_index::<T>()?))
    }

    /// Read-only plain or tag component
    pub fn read_only<T: Component>() -> Result<Self> {
        Ok(Self::of::<T>()?.with_access(AccessMode::ReadOnly))
    }

    pub fn shared<T: SharedComponent>() -> Result<Self> {
        Ok(Self::from_index(TypeRegistry::global().shared_index::<T>()?))
    }

    pub fn managed<T: ManagedComponent>() -> Result<Self> {
        Ok(Self::from_index(TypeRegistry::global().managed_index::<T>()?))
    }

    pub fn with_access(self, access: AccessMode) -> Self {
        Self { access, ..self }
    }

    /// Turn this into an exclusion filter
    pub fn exclude(self) -> Self {
        self.with_access(AccessMode::Subtractive)
    }

    pub fn category(&self) -> ComponentCategory {
        TypeRegistry::global().category(self.type_index)
    }
}

/// Sort, and reject duplicates and the Entity column.
pub(crate) fn canonical_type_list(
    types: impl IntoIterator<Item = TypeIndex>,
) -> Result<SmallVec<[TypeIndex; 8]>> {
    let mut list: SmallVec<[TypeIndex; 8]> = smallvec![TypeIndex::ENTITY];
    for ty in types {
        if ty == TypeIndex::ENTITY {
            continue;
        }
        list.push(ty);
    }
    list.sort_unstable();
    for pair in list.windows(2) {
        if pair[0] == pair[1] {
            return Err(EcsError::DuplicateComponent {
                component: TypeRegistry::global().name(pair[0]),
            });
        }
    }
    Ok(list)
}

/// Tuple of plain components created together
///
/// Allows spawning entities with multiple components at once.
pub trait ComponentSet: Send + Sync + 'static {
    /// Type indices in tuple order
    fn type_indices() -> Result<SmallVec<[TypeIndex; MAX_SET_COMPONENTS]>>
    where
        Self: Sized;

    /// Write components to raw pointers
    ///
    /// # Safety
    /// Caller must ensure pointers are valid, properly aligned and in tuple order
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

// Macro for tuple ComponentSet implementations
macro_rules! impl_component_set {
    ($($T:ident),*) => {
        impl<$($T: Component),*> ComponentSet for ($($T,)*) {
            fn type_indices() -> Result<SmallVec<[TypeIndex; MAX_SET_COMPONENTS]>> {
                let registry = TypeRegistry::global();
                Ok(smallvec![$(registry.component_index::<$T>()?),*])
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

// Implement for tuples of 1-8 components
impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    struct Position {
        _x: f32,
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Velocity {
        _x: f32,
    }

    #[test]
    fn test_set_type_indices_in_tuple_order() {
        let ids = <(Velocity, Position)>::type_indices().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ComponentType::of::<Velocity>().unwrap().type_index);
        assert_eq!(ids[1], ComponentType::of::<Position>().unwrap().type_index);
    }

    #[test]
    fn test_canonical_list_sorts_and_prepends_entity() {
        let p = ComponentType::of::<Position>().unwrap().type_index;
        let v = ComponentType::of::<Velocity>().unwrap().type_index;
        let a = canonical_type_list([v, p]).unwrap();
        let b = canonical_type_list([p, v]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], TypeIndex::ENTITY);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_canonical_list_rejects_duplicates() {
        let p = ComponentType::of::<Position>().unwrap().type_index;
        assert!(matches!(
            canonical_type_list([p, p]),
            Err(EcsError::DuplicateComponent { .. })
        ));
    }

    #[test]
    fn test_exclude_sets_subtractive() {
        let t = ComponentType::of::<Position>().unwrap().exclude();
        assert_eq!(t.access, AccessMode::Subtractive);
    }
}
