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

//! Process-wide component type registry
//!
//! Every component type gets a small, stable [`TypeIndex`] the first time it is
//! seen. Lookups scan the published slots without locking; only the creation of
//! a new entry takes the registry lock. Each thread also keeps a `TypeId` cache
//! so the hot path is a single hash probe.

use std::any::TypeId;
use std::cell::RefCell;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::chunk::CHUNK_ALIGN;
use crate::component::{Component, ManagedComponent, SharedComponent};
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// Maximum number of distinct component types per process
pub const MAX_COMPONENT_TYPES: usize = 4096;

/// Small integer id of a registered component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIndex(pub(crate) u32);

impl TypeIndex {
    /// The implicit Entity id column
    pub const ENTITY: TypeIndex = TypeIndex(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a component type is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentCategory {
    /// The Entity id column
    Entity,
    /// Inline value copied by bytes
    Plain,
    /// Zero-sized marker, no column bytes
    Tag,
    /// Deduplicated value, one index per chunk
    Shared,
    /// Reference-counted object in a per-chunk side table
    Managed,
}

impl ComponentCategory {
    /// Whether access to this category is tracked by the fence manager
    pub fn requires_fence(self) -> bool {
        matches!(self, ComponentCategory::Plain | ComponentCategory::Entity)
    }
}

/// Default-initializer for one element of a component column
pub type InitFn = unsafe fn(*mut u8);

/// Registration request for a component type.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub type_id: TypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub category: ComponentCategory,
    pub needs_drop: bool,
    /// Writes a valid default value. `None` means all-zero bytes are valid.
    pub init: Option<InitFn>,
}

unsafe fn write_default<T: Default>(ptr: *mut u8) {
    ptr.cast::<T>().write(T::default());
}

impl ComponentDescriptor {
    pub fn of_component<T: Component>() -> Self {
        let size = mem::size_of::<T>();
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size,
            align: mem::align_of::<T>(),
            category: if size == 0 {
                ComponentCategory::Tag
            } else {
                ComponentCategory::Plain
            },
            needs_drop: mem::needs_drop::<T>(),
            init: Some(write_default::<T>),
        }
    }

    pub fn of_shared<T: SharedComponent>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            category: ComponentCategory::Shared,
            needs_drop: mem::needs_drop::<T>(),
            init: None,
        }
    }

    pub fn of_managed<T: ManagedComponent>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            category: ComponentCategory::Managed,
            needs_drop: mem::needs_drop::<T>(),
            init: None,
        }
    }

    fn validate(mut self) -> Result<Self> {
        match self.category {
            ComponentCategory::Entity => {
                return Err(EcsError::InvalidComponentType(format!(
                    "{} cannot be registered as the Entity column",
                    self.name
                )));
            }
            ComponentCategory::Plain | ComponentCategory::Tag => {
                if self.needs_drop {
                    return Err(EcsError::InvalidComponentType(format!(
                        "{} has drop glue and cannot be relocated by byte copy",
                        self.name
                    )));
                }
                if !self.align.is_power_of_two() || self.align > CHUNK_ALIGN {
                    return Err(EcsError::InvalidComponentType(format!(
                        "{} has alignment {}, chunk columns support at most {CHUNK_ALIGN}",
                        self.name, self.align
                    )));
                }
                if self.size % self.align != 0 {
                    return Err(EcsError::InvalidComponentType(format!(
                        "{} size {} is not a multiple of its alignment",
                        self.name, self.size
                    )));
                }
                if self.size == 0 {
                    self.category = ComponentCategory::Tag;
                }
            }
            ComponentCategory::Shared | ComponentCategory::Managed => {}
        }
        Ok(self)
    }
}

/// Published registry entry
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub type_id: TypeId,
    pub name: &'static str,
    pub category: ComponentCategory,
    /// Bytes per entity inside a chunk column
    pub size_in_chunk: usize,
    pub align: usize,
    pub(crate) init: Option<InitFn>,
}

impl From<ComponentDescriptor> for ComponentInfo {
    fn from(desc: ComponentDescriptor) -> Self {
        let size_in_chunk = match desc.category {
            ComponentCategory::Plain | ComponentCategory::Entity => desc.size,
            _ => 0,
        };
        Self {
            type_id: desc.type_id,
            name: desc.name,
            category: desc.category,
            size_in_chunk,
            align: desc.align.max(1),
            init: desc.init,
        }
    }
}

thread_local! {
    static LOOKUP_CACHE: RefCell<FxHashMap<TypeId, TypeIndex>> = RefCell::new(FxHashMap::default());
}

static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

/// Type id → [`TypeIndex`] table shared by every world in the process
pub struct TypeRegistry {
    slots: Box<[OnceLock<ComponentInfo>]>,
    count: AtomicUsize,
    creation_lock: Mutex<()>,
}

impl TypeRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static TypeRegistry {
        REGISTRY.get_or_init(TypeRegistry::new)
    }

    fn new() -> Self {
        let slots: Box<[OnceLock<ComponentInfo>]> =
            (0..MAX_COMPONENT_TYPES).map(|_| OnceLock::new()).collect();
        let _ = slots[0].set(ComponentInfo {
            type_id: TypeId::of::<Entity>(),
            name: "Entity",
            category: ComponentCategory::Entity,
            size_in_chunk: mem::size_of::<Entity>(),
            align: mem::align_of::<Entity>(),
            init: None,
        });
        Self {
            slots,
            count: AtomicUsize::new(1),
            creation_lock: Mutex::new(()),
        }
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registry entry for an index handed out by this registry.
    pub fn info(&self, index: TypeIndex) -> &ComponentInfo {
        match self.slots.get(index.index()).and_then(OnceLock::get) {
            Some(info) => info,
            None => unreachable!("type index {} was never registered", index.0),
        }
    }

    pub fn category(&self, index: TypeIndex) -> ComponentCategory {
        self.info(index).category
    }

    pub fn byte_size(&self, index: TypeIndex) -> usize {
        self.info(index).size_in_chunk
    }

    pub fn name(&self, index: TypeIndex) -> &'static str {
        self.info(index).name
    }

    /// Lock-free scan of the published entries.
    pub fn find(&self, type_id: TypeId) -> Option<TypeIndex> {
        let count = self.len();
        self.slots[..count]
            .iter()
            .position(|slot| slot.get().is_some_and(|info| info.type_id == type_id))
            .map(|i| TypeIndex(i as u32))
    }

    /// Register a type, or return its existing index.
    pub fn register(&self, desc: ComponentDescriptor) -> Result<TypeIndex> {
        if let Some(index) = self.find(desc.type_id) {
            return self.check_category(index, desc.name, desc.category);
        }

        let desc = desc.validate()?;
        let _guard = self.creation_lock.lock();
        if let Some(index) = self.find(desc.type_id) {
            return self.check_category(index, desc.name, desc.category);
        }

        let next = self.count.load(Ordering::Relaxed);
        if next >= MAX_COMPONENT_TYPES {
            return Err(EcsError::TooManyComponentTypes {
                max: MAX_COMPONENT_TYPES,
            });
        }

        tracing::trace!(component = desc.name, index = next, "registered component type");
        let _ = self.slots[next].set(ComponentInfo::from(desc));
        self.count.store(next + 1, Ordering::Release);
        Ok(TypeIndex(next as u32))
    }

    fn check_category(
        &self,
        index: TypeIndex,
        name: &'static str,
        requested: ComponentCategory,
    ) -> Result<TypeIndex> {
        let registered = self.category(index);
        if registered == requested {
            Ok(index)
        } else {
            Err(EcsError::ComponentCategoryMismatch {
                component: name,
                registered,
                requested,
            })
        }
    }

    fn cached(&self, type_id: TypeId, describe: fn() -> ComponentDescriptor) -> Result<TypeIndex> {
        if let Some(index) = LOOKUP_CACHE.with(|cache| cache.borrow().get(&type_id).copied()) {
            let desc = describe();
            return self.check_category(index, desc.name, desc.category);
        }
        let index = self.register(describe())?;
        LOOKUP_CACHE.with(|cache| cache.borrow_mut().insert(type_id, index));
        Ok(index)
    }

    /// Index of a plain or tag component
    pub fn component_index<T: Component>(&self) -> Result<TypeIndex> {
        self.cached(TypeId::of::<T>(), ComponentDescriptor::of_component::<T>)
    }

    /// Index of a shared component
    pub fn shared_index<T: SharedComponent>(&self) -> Result<TypeIndex> {
        self.cached(TypeId::of::<T>(), ComponentDescriptor::of_shared::<T>)
    }

    /// Index of a managed component
    pub fn managed_index<T: ManagedComponent>(&self) -> Result<TypeIndex> {
        self.cached(TypeId::of::<T>(), ComponentDescriptor::of_managed::<T>)
    }
}
