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

//! World: the public face of one storage session
//!
//! Structural operations drain every fence first. Component reads and writes
//! only wait on the fences of the type they touch.

use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;
#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentSet, ComponentType, ManagedComponent, SharedComponent};
use crate::config::WorldConfig;
use crate::entity::{Entity, EntityLocation};
use crate::error::{EcsError, Result};
use crate::fence::ComponentFences;
use crate::group::{GroupData, GroupId, SharedFilter};
use crate::job::JobHandle;
use crate::managed::ManagedObjectListener;
use crate::query::{
    group_chunks, required_column, ComponentArray, ComponentArrayMut, EntityArray, GroupChunk,
    GroupCursor, SharedIndexArray,
};
use crate::shared::SharedIndex;
use crate::storage::Storage;
use crate::transaction::EntityTransaction;
use crate::type_registry::{TypeIndex, TypeRegistry};

/// Archetype/chunk storage session
pub struct World {
    storage: Storage,
    fences: ComponentFences,
    external: AHashMap<Entity, u64>,
    config: WorldConfig,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            storage: Storage::new(&config),
            fences: ComponentFences::new(),
            external: AHashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Read-only access to the raw tables
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn fences(&self) -> &ComponentFences {
        &self.fences
    }

    /// Close an open transaction, joining its handle
    fn sync_transaction(&self) -> Result<()> {
        self.fences.end_transaction()
    }

    /// Fence barrier in front of any operation that moves chunk memory
    fn before_structural_change(&self) -> Result<()> {
        self.fences.end_transaction()?;
        self.fences.complete_all_and_invalidate()
    }

    fn registry() -> &'static TypeRegistry {
        TypeRegistry::global()
    }

    // ---- archetypes ----

    /// Archetype for a set of component types, in any order
    pub fn create_archetype(&mut self, types: &[ComponentType]) -> Result<ArchetypeId> {
        let types: SmallVec<[TypeIndex; 8]> = types.iter().map(|t| t.type_index).collect();
        self.archetype_for(&types)
    }

    /// Archetype of a component tuple
    pub fn archetype_of<S: ComponentSet>(&mut self) -> Result<ArchetypeId> {
        self.archetype_for(&S::type_indices()?)
    }

    /// Lookups only sync the transaction; creating an archetype links it into
    /// group match lists, so outstanding jobs are joined first.
    fn archetype_for(&mut self, types: &[TypeIndex]) -> Result<ArchetypeId> {
        self.sync_transaction()?;
        match self.storage.find_archetype(types.iter().copied()) {
            Err(EcsError::ArchetypeNotFound) => {
                self.before_structural_change()?;
                self.storage.get_or_create_archetype(types.iter().copied())
            }
            found => found,
        }
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.storage.archetypes().get(id)
    }

    pub fn archetype_count(&self) -> usize {
        self.storage.archetypes().len()
    }

    // ---- entities ----

    pub fn create_entity(&mut self, archetype: ArchetypeId) -> Result<Entity> {
        let mut entities = self.create_entities(archetype, 1)?;
        entities.pop().ok_or(EcsError::EntityNotFound)
    }

    /// Create `count` entities with default component values
    pub fn create_entities(&mut self, archetype: ArchetypeId, count: usize) -> Result<Vec<Entity>> {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.create_entities", archetype = archetype.index(), count);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.before_structural_change()?;
        let mut out = Vec::with_capacity(count);
        self.storage.create_entities(archetype, count, &mut out)?;
        Ok(out)
    }

    /// Create one entity from a component tuple
    pub fn spawn<S: ComponentSet>(&mut self, components: S) -> Result<Entity> {
        let types = S::type_indices()?;
        let archetype = self.archetype_of::<S>()?;
        let entity = self.create_entity(archetype)?;
        let mut ptrs: SmallVec<[*mut u8; 8]> = SmallVec::new();
        for &type_index in &types {
            ptrs.push(self.storage.component_ptr(entity, type_index)?);
        }
        // SAFETY: one pointer per tuple element, each into its own column.
        unsafe { components.write_components(&ptrs) };
        Ok(entity)
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.destroy_entities(&[entity])
    }

    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.destroy_entities", count = entities.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.before_structural_change()?;
        self.storage.destroy_entities(entities)?;
        if !self.external.is_empty() {
            for entity in entities {
                self.external.remove(entity);
            }
        }
        Ok(())
    }

    /// Generation check; valid at any time, even inside a transaction
    pub fn exists(&self, entity: Entity) -> bool {
        self.storage.exists(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.storage.entities().len()
    }

    pub fn location(&self, entity: Entity) -> Result<EntityLocation> {
        self.storage.location(entity)
    }

    /// Copy of `src` with every component
    pub fn instantiate(&mut self, src: Entity) -> Result<Entity> {
        let mut entities = self.instantiate_many(src, 1)?;
        entities.pop().ok_or(EcsError::EntityNotFound)
    }

    pub fn instantiate_many(&mut self, src: Entity, count: usize) -> Result<Vec<Entity>> {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.instantiate", count);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.before_structural_change()?;
        let mut out = Vec::with_capacity(count);
        self.storage.instantiate(src, count, &mut out)?;
        Ok(out)
    }

    pub fn entity_capacity(&self) -> usize {
        self.storage.entities().capacity()
    }

    /// Grow the address table. Smaller values are ignored.
    pub fn set_entity_capacity(&mut self, capacity: usize) -> Result<()> {
        self.before_structural_change()?;
        self.storage.entities.reserve_capacity(capacity);
        Ok(())
    }

    // ---- plain components ----

    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool> {
        self.sync_transaction()?;
        let type_index = Self::registry().component_index::<T>()?;
        self.storage.has_component(entity, type_index)
    }

    /// Whether an entity has a component of any category
    pub fn has_component_type(&self, entity: Entity, component: ComponentType) -> Result<bool> {
        self.sync_transaction()?;
        self.storage.has_component(entity, component.type_index)
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let type_index = Self::registry().component_index::<T>()?;
        self.add_component_type(entity, ComponentType::from_index(type_index))?;
        self.storage.set_component(entity, value)
    }

    /// Add a component of any category with its default value
    pub fn add_component_type(&mut self, entity: Entity, component: ComponentType) -> Result<()> {
        self.before_structural_change()?;
        self.storage.add_component(entity, component.type_index, None)
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let type_index = Self::registry().component_index::<T>()?;
        self.remove_component_type(entity, ComponentType::from_index(type_index))
    }

    pub fn remove_component_type(&mut self, entity: Entity, component: ComponentType) -> Result<()> {
        self.before_structural_change()?;
        self.storage.remove_component(entity, component.type_index)
    }

    /// Value of a plain component, after its last writer finished
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<T> {
        self.sync_transaction()?;
        let type_index = Self::registry().component_index::<T>()?;
        self.fences.complete_write_dependency(type_index)?;
        self.storage.get_component(entity)
    }

    /// Overwrite a plain component, after its readers and writer finished
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.sync_transaction()?;
        let type_index = Self::registry().component_index::<T>()?;
        self.fences.complete_read_and_write_dependency(type_index)?;
        self.storage.set_component(entity, value)
    }

    /// # Safety
    /// See [`Storage::set_component_raw`].
    pub(crate) unsafe fn add_component_raw(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        src: *const u8,
        len: usize,
    ) -> Result<()> {
        if type_index.index() >= Self::registry().len() {
            return Err(EcsError::CommandError(format!(
                "unknown type index {}",
                type_index.index()
            )));
        }
        self.add_component_type(entity, ComponentType::from_index(type_index))?;
        self.storage.set_component_raw(entity, type_index, src, len)
    }

    /// # Safety
    /// See [`Storage::set_component_raw`].
    pub(crate) unsafe fn set_component_raw(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        src: *const u8,
        len: usize,
    ) -> Result<()> {
        self.sync_transaction()?;
        self.fences.complete_read_and_write_dependency(type_index)?;
        self.storage.set_component_raw(entity, type_index, src, len)
    }

    pub(crate) fn remove_component_index(&mut self, entity: Entity, type_index: TypeIndex) -> Result<()> {
        if type_index.index() >= Self::registry().len() {
            return Err(EcsError::CommandError(format!(
                "unknown type index {}",
                type_index.index()
            )));
        }
        self.remove_component_type(entity, ComponentType::from_index(type_index))
    }

    /// Bumped whenever an archetype containing `T` gains or loses entities
    pub fn component_order_version<T: Component>(&self) -> Result<u32> {
        let type_index = Self::registry().component_index::<T>()?;
        Ok(self.storage.archetypes().type_version(type_index))
    }

    pub fn component_order_version_of(&self, component: ComponentType) -> u32 {
        self.storage.archetypes().type_version(component.type_index)
    }

    // ---- shared components ----

    /// Add a shared component; the entity moves to a chunk carrying `value`
    pub fn add_shared_component<T: SharedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        let type_index = Self::registry().shared_index::<T>()?;
        self.before_structural_change()?;
        let index = self.storage.shared.insert(type_index, value);
        let result = self.storage.add_component(entity, type_index, Some(index));
        self.storage.shared.release(index);
        result
    }

    /// Move the entity to the chunk carrying `value`
    pub fn set_shared_component<T: SharedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        let type_index = Self::registry().shared_index::<T>()?;
        self.before_structural_change()?;
        let index = self.storage.shared.insert(type_index, value);
        let result = self.storage.set_shared_index(entity, type_index, index);
        self.storage.shared.release(index);
        result
    }

    pub fn remove_shared_component<T: SharedComponent>(&mut self, entity: Entity) -> Result<()> {
        let type_index = Self::registry().shared_index::<T>()?;
        self.remove_component_type(entity, ComponentType::from_index(type_index))
    }

    pub fn get_shared_component<T: SharedComponent>(&self, entity: Entity) -> Result<T> {
        self.sync_transaction()?;
        let type_index = Self::registry().shared_index::<T>()?;
        let index = self.storage.shared_index(entity, type_index)?;
        self.storage
            .shared
            .get::<T>(index)
            .ok_or(EcsError::ComponentNotFound {
                component: std::any::type_name::<T>(),
            })
    }

    /// Live values of `T`, the default included
    pub fn shared_component_count<T: SharedComponent>(&self) -> Result<usize> {
        Ok(self.all_unique_shared_values::<T>()?.len())
    }

    /// Default value first, then every live value in insertion order
    pub fn all_unique_shared_values<T: SharedComponent>(&self) -> Result<Vec<T>> {
        let type_index = Self::registry().shared_index::<T>()?;
        Ok(self.storage.shared.unique_values::<T>(type_index))
    }

    /// Bumped whenever a chunk carrying `value` is created or emptied. Zero for
    /// values never interned.
    pub fn shared_component_order_version<T: SharedComponent>(&self, value: &T) -> Result<u32> {
        let type_index = Self::registry().shared_index::<T>()?;
        Ok(self
            .storage
            .shared
            .index_of(type_index, value)
            .map_or(0, |index| self.storage.shared.version(index)))
    }

    // ---- managed components ----

    pub fn add_managed_component<T: ManagedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        let type_index = Self::registry().managed_index::<T>()?;
        self.before_structural_change()?;
        self.storage.add_component(entity, type_index, None)?;
        self.storage
            .set_managed_object(entity, type_index, Some(Arc::new(value)))
    }

    /// Replace the object; listeners of the entity's archetype are notified
    pub fn set_managed_component<T: ManagedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.sync_transaction()?;
        let type_index = Self::registry().managed_index::<T>()?;
        self.storage
            .set_managed_object(entity, type_index, Some(Arc::new(value)))
    }

    pub fn get_managed_component<T: ManagedComponent>(&self, entity: Entity) -> Result<Option<Arc<T>>> {
        self.sync_transaction()?;
        let type_index = Self::registry().managed_index::<T>()?;
        Ok(self
            .storage
            .managed_object(entity, type_index)?
            .and_then(|object| object.downcast::<T>().ok()))
    }

    pub fn remove_managed_component<T: ManagedComponent>(&mut self, entity: Entity) -> Result<()> {
        let type_index = Self::registry().managed_index::<T>()?;
        self.remove_component_type(entity, ComponentType::from_index(type_index))
    }

    /// Watch writes of `T` on one archetype
    pub fn add_managed_listener<T: ManagedComponent>(
        &mut self,
        archetype: ArchetypeId,
        listener: Arc<dyn ManagedObjectListener>,
    ) -> Result<()> {
        let type_index = Self::registry().managed_index::<T>()?;
        self.storage
            .archetypes
            .add_managed_listener(archetype, type_index, listener);
        Ok(())
    }

    pub fn remove_managed_listener<T: ManagedComponent>(
        &mut self,
        archetype: ArchetypeId,
        listener: &Arc<dyn ManagedObjectListener>,
    ) -> Result<()> {
        let type_index = Self::registry().managed_index::<T>()?;
        self.storage
            .archetypes
            .remove_managed_listener(archetype, type_index, listener);
        Ok(())
    }

    // ---- external bindings ----

    /// Link an external object id to a live entity
    pub fn bind_external(&mut self, entity: Entity, handle: u64) -> Result<()> {
        if !self.storage.exists(entity) {
            return Err(EcsError::EntityNotFound);
        }
        self.external.insert(entity, handle);
        Ok(())
    }

    pub fn unbind_external(&mut self, entity: Entity) -> Option<u64> {
        self.external.remove(&entity)
    }

    pub fn external_binding(&self, entity: Entity) -> Option<u64> {
        self.external.get(&entity).copied()
    }

    // ---- groups ----

    pub fn create_group(&mut self, types: &[ComponentType]) -> Result<GroupId> {
        self.sync_transaction()?;
        let Storage {
            archetypes,
            shared,
            groups,
            ..
        } = &mut self.storage;
        groups.get_or_create(types, None, archetypes, shared)
    }

    /// Group limited to chunks whose `T` equals `value`
    pub fn create_group_with_filter<T: SharedComponent>(
        &mut self,
        types: &[ComponentType],
        value: T,
    ) -> Result<GroupId> {
        self.sync_transaction()?;
        let type_index = Self::registry().shared_index::<T>()?;
        let Storage {
            archetypes,
            shared,
            groups,
            ..
        } = &mut self.storage;
        let index = shared.insert(type_index, value);
        let filter = SharedFilter {
            type_index,
            value: index,
        };
        let result = groups.get_or_create(types, Some(filter), archetypes, shared);
        shared.release(index);
        result
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupData> {
        self.storage.groups().get(id)
    }

    fn group_data(&self, id: GroupId) -> Result<&GroupData> {
        self.storage
            .groups()
            .get(id)
            .ok_or(EcsError::GroupNotFound)
    }

    pub fn group_length(&self, id: GroupId) -> Result<usize> {
        self.sync_transaction()?;
        Ok(self.group_data(id)?.len(self.storage.archetypes()))
    }

    /// Read-only view of `T`; waits for the last writer of `T`
    pub fn component_array<T: Component>(&self, id: GroupId) -> Result<ComponentArray<'_, T>> {
        self.sync_transaction()?;
        let group = self.group_data(id)?;
        let (type_index, position) = required_column::<T>(group)?;
        self.fences.complete_write_dependency(type_index)?;
        Ok(ComponentArray::new(
            GroupCursor::new(self.storage.archetypes(), group),
            position,
        ))
    }

    /// Read-write view of `T`; waits for every reader and writer of `T`
    pub fn component_array_mut<T: Component>(&mut self, id: GroupId) -> Result<ComponentArrayMut<'_, T>> {
        self.sync_transaction()?;
        let group = self.group_data(id)?;
        let (type_index, position) = required_column::<T>(group)?;
        self.fences.complete_read_and_write_dependency(type_index)?;
        Ok(ComponentArrayMut::new(
            GroupCursor::new(self.storage.archetypes(), group),
            position,
        ))
    }

    /// Read-write view of `T` without waiting on any fence.
    ///
    /// # Safety
    /// The caller must hold a handle registered through
    /// [`add_group_dependency`](Self::add_group_dependency) that orders this
    /// access against every other reader and writer of `T`, and no structural
    /// change may happen while the view is alive.
    pub unsafe fn component_array_unchecked<T: Component>(
        &self,
        id: GroupId,
    ) -> Result<ComponentArrayMut<'_, T>> {
        let group = self.group_data(id)?;
        let (_, position) = required_column::<T>(group)?;
        Ok(ComponentArrayMut::new(
            GroupCursor::new(self.storage.archetypes(), group),
            position,
        ))
    }

    pub fn entity_array(&self, id: GroupId) -> Result<EntityArray<'_>> {
        self.sync_transaction()?;
        let group = self.group_data(id)?;
        Ok(EntityArray::entities(GroupCursor::new(
            self.storage.archetypes(),
            group,
        )))
    }

    /// Shared-value index of `T` for each entity of the group
    pub fn shared_index_array<T: SharedComponent>(&self, id: GroupId) -> Result<SharedIndexArray<'_>> {
        self.sync_transaction()?;
        let group = self.group_data(id)?;
        let type_index = Self::registry().shared_index::<T>()?;
        let position = group
            .required_position(type_index)
            .ok_or(EcsError::ComponentNotFound {
                component: std::any::type_name::<T>(),
            })?;
        Ok(SharedIndexArray::new(
            GroupCursor::new(self.storage.archetypes(), group),
            position,
        ))
    }

    /// Value behind a shared index
    pub fn shared_value<T: SharedComponent>(&self, index: SharedIndex) -> Option<T> {
        self.storage.shared.get::<T>(index)
    }

    /// Every chunk the group sees. Fences are not consulted.
    pub fn group_chunks(&self, id: GroupId) -> Result<Vec<GroupChunk<'_>>> {
        self.sync_transaction()?;
        let group = self.group_data(id)?;
        Ok(group_chunks(&GroupCursor::new(
            self.storage.archetypes(),
            group,
        )))
    }

    /// Handle a task accessing the group's types has to wait for
    pub fn group_dependency(&self, id: GroupId) -> Result<JobHandle> {
        let group = self.group_data(id)?;
        Ok(self
            .fences
            .get_dependency(group.reader_types(), group.writer_types()))
    }

    /// Record a task accessing the group's types
    pub fn add_group_dependency(&self, id: GroupId, handle: &JobHandle) -> Result<()> {
        let group = self.group_data(id)?;
        self.fences
            .add_dependency(group.reader_types(), group.writer_types(), handle);
        Ok(())
    }

    // ---- transactions ----

    /// Open the exclusive transaction. Re-opening while one is open keeps the
    /// existing handle.
    pub fn begin_transaction(&mut self) -> EntityTransaction<'_> {
        self.fences.begin_transaction();
        EntityTransaction::new(&mut self.storage, &self.fences)
    }

    /// Join the transaction's task and restore per-type fences
    pub fn end_transaction(&mut self) -> Result<()> {
        self.fences.end_transaction()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.fences.is_in_transaction()
    }

    // ---- maintenance ----

    /// Pack the entities of one archetype into as few chunks as possible
    pub fn defragment(&mut self, archetype: ArchetypeId) -> Result<usize> {
        self.before_structural_change()?;
        self.storage.defragment(archetype)
    }

    /// Move every entity of `other` into this world under fresh handles.
    /// External bindings move along.
    pub fn move_entities_from(&mut self, other: &mut World) -> Result<AHashMap<Entity, Entity>> {
        self.before_structural_change()?;
        other.before_structural_change()?;
        let remap = self.storage.move_entities_from(&mut other.storage)?;
        for (old, handle) in other.external.drain() {
            if let Some(&new) = remap.get(&old) {
                self.external.insert(new, handle);
            }
        }
        Ok(remap)
    }

    /// Cross-check every table. Returns the live entity count.
    pub fn check_internal_consistency(&self) -> Result<usize> {
        self.storage.check_internal_consistency()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if let Err(err) = self.fences.end_transaction() {
            tracing::error!(%err, "transaction handle was never completed");
        }
        if let Err(err) = self.fences.complete_all_and_invalidate() {
            tracing::error!(%err, "dependency handle was never completed");
        }
        let Storage { groups, shared, .. } = &mut self.storage;
        groups.release_filters(shared);
        if let Err(err) = self.storage.check_shared_references() {
            tracing::error!(%err, "shared values leaked at teardown");
        }
    }
}
