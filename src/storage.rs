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

//! Structural primitives over the entity, archetype and shared-value tables
//!
//! Every function here assumes the caller already drained the fences of the
//! types it touches. [`World`](crate::world::World) and
//! [`EntityTransaction`](crate::transaction::EntityTransaction) are the two
//! front ends.

use std::ptr;

use ahash::AHashMap;
use smallvec::{smallvec, SmallVec};

use crate::archetype::{ArchetypeId, ArchetypeTable};
use crate::chunk::ChunkId;
use crate::component::{canonical_type_list, Component};
use crate::config::WorldConfig;
use crate::entity::{Entity, EntityLocation, EntityTable};
use crate::error::{ecs_check, EcsError, Result};
use crate::group::GroupRegistry;
use crate::managed::ManagedObject;
use crate::shared::{SharedIndex, SharedValueTable};
use crate::type_registry::{ComponentCategory, TypeIndex, TypeRegistry};
use crate::utils::sorted_insert;

pub(crate) type SharedCombination = SmallVec<[SharedIndex; 4]>;

fn not_found(type_index: TypeIndex) -> EcsError {
    EcsError::ComponentNotFound {
        component: TypeRegistry::global().name(type_index),
    }
}

/// The tables of one world
pub struct Storage {
    pub(crate) entities: EntityTable,
    pub(crate) archetypes: ArchetypeTable,
    pub(crate) shared: SharedValueTable,
    pub(crate) groups: GroupRegistry,
}

impl Storage {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            entities: EntityTable::with_capacity(config.initial_entity_capacity),
            archetypes: ArchetypeTable::with_capacity(config.initial_archetype_capacity),
            shared: SharedValueTable::new(),
            groups: GroupRegistry::new(),
        }
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn archetypes(&self) -> &ArchetypeTable {
        &self.archetypes
    }

    pub fn shared_values(&self) -> &SharedValueTable {
        &self.shared
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Archetype for any order of types, created on first use
    pub fn get_or_create_archetype(
        &mut self,
        types: impl IntoIterator<Item = TypeIndex>,
    ) -> Result<ArchetypeId> {
        let list = canonical_type_list(types)?;
        self.archetype_for_list(&list)
    }

    /// Existing archetype for any order of types
    pub fn find_archetype(&self, types: impl IntoIterator<Item = TypeIndex>) -> Result<ArchetypeId> {
        let list = canonical_type_list(types)?;
        self.archetypes.find(&list).ok_or(EcsError::ArchetypeNotFound)
    }

    fn archetype_for_list(&mut self, list: &[TypeIndex]) -> Result<ArchetypeId> {
        if let Some(id) = self.archetypes.find(list) {
            return Ok(id);
        }
        let id = self.archetypes.create(list)?;
        self.groups.on_archetype_created(self.archetypes.archetype(id));
        Ok(id)
    }

    fn default_shared(&self, archetype: ArchetypeId) -> SharedCombination {
        smallvec![SharedIndex::DEFAULT; self.archetypes.archetype(archetype).num_shared()]
    }

    /// Create `count` default-initialized entities, appending handles to `out`
    pub fn create_entities(
        &mut self,
        archetype: ArchetypeId,
        count: usize,
        out: &mut Vec<Entity>,
    ) -> Result<()> {
        if self.archetypes.get(archetype).is_none() {
            return Err(EcsError::ArchetypeNotFound);
        }
        let shared = self.default_shared(archetype);
        self.create_entities_with_shared(archetype, &shared, count, out)
    }

    pub(crate) fn create_entities_with_shared(
        &mut self,
        archetype: ArchetypeId,
        shared: &[SharedIndex],
        count: usize,
        out: &mut Vec<Entity>,
    ) -> Result<()> {
        self.entities.ensure_room(count)?;
        let mut remaining = count;
        while remaining > 0 {
            let chunk = self
                .archetypes
                .get_chunk_with_room(archetype, shared, &mut self.shared);
            let (base, allocated) =
                self.archetypes
                    .allocate_into_chunk(chunk, remaining, &mut self.shared);
            let start = out.len();
            self.entities
                .allocate(archetype, chunk, base, allocated, out)?;
            self.archetypes.write_entities(chunk, base, &out[start..]);
            self.archetypes.initialize_rows(chunk, base, allocated);
            remaining -= allocated;
        }
        Ok(())
    }

    /// Destroy a batch. Entities sitting at consecutive rows of one chunk are
    /// removed as one run.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<()> {
        for &entity in entities {
            ecs_check!(self.entities.exists(entity), EcsError::EntityNotFound);
        }
        let mut rest = entities;
        while !rest.is_empty() {
            let (location, run) = self.entities.deallocate_run(rest)?;
            self.compact(location.chunk, location.index_in_chunk, run);
            rest = &rest[run..];
        }
        Ok(())
    }

    /// Close the hole `[start, start + len)` by moving rows from the end of
    /// the chunk into it.
    fn compact(&mut self, chunk: ChunkId, start: usize, len: usize) {
        let (archetype, count) = {
            let c = self.archetypes.live_chunk(chunk);
            (c.archetype(), c.count())
        };
        let moved = len.min(count - start - len);
        if moved > 0 {
            self.archetypes
                .copy_rows(chunk, count - moved, chunk, start, moved);
            for index_in_chunk in start..start + moved {
                let entity = self.archetypes.entity_at(chunk, index_in_chunk);
                self.entities.set_location(
                    entity,
                    EntityLocation {
                        archetype,
                        chunk,
                        index_in_chunk,
                    },
                );
            }
        }
        self.archetypes.clear_managed_rows(chunk, count - len, len);
        self.archetypes
            .set_chunk_count(chunk, count - len, &mut self.shared);
    }

    pub fn exists(&self, entity: Entity) -> bool {
        self.entities.exists(entity)
    }

    pub fn location(&self, entity: Entity) -> Result<EntityLocation> {
        self.entities.location(entity)
    }

    pub fn has_component(&self, entity: Entity, type_index: TypeIndex) -> Result<bool> {
        let location = self.entities.location(entity)?;
        Ok(self.archetypes.archetype(location.archetype).has(type_index))
    }

    pub(crate) fn component_ptr(&self, entity: Entity, type_index: TypeIndex) -> Result<*mut u8> {
        let location = self.entities.location(entity)?;
        let position = self
            .archetypes
            .archetype(location.archetype)
            .position_of(type_index)
            .ok_or_else(|| not_found(type_index))?;
        Ok(self
            .archetypes
            .component_ptr(location.chunk, position, location.index_in_chunk))
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<T> {
        let type_index = TypeRegistry::global().component_index::<T>()?;
        let ptr = self.component_ptr(entity, type_index)?;
        // SAFETY: the column at this type index stores initialized `T`s.
        Ok(unsafe { ptr::read(ptr.cast::<T>()) })
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let type_index = TypeRegistry::global().component_index::<T>()?;
        let ptr = self.component_ptr(entity, type_index)?;
        // SAFETY: as above; `&mut self` excludes other views.
        unsafe { ptr::write(ptr.cast::<T>(), value) };
        Ok(())
    }

    /// Overwrite a plain component from raw memory.
    ///
    /// # Safety
    /// `src` must point to `len` readable bytes holding a valid value of the
    /// type registered at `type_index`.
    pub(crate) unsafe fn set_component_raw(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        src: *const u8,
        len: usize,
    ) -> Result<()> {
        let registry = TypeRegistry::global();
        if type_index.index() >= registry.len()
            || !matches!(
                registry.category(type_index),
                ComponentCategory::Plain | ComponentCategory::Tag
            )
        {
            return Err(EcsError::CommandError(format!(
                "type index {} is not a plain component",
                type_index.index()
            )));
        }
        if len != registry.byte_size(type_index) {
            return Err(EcsError::CommandError(format!(
                "{} expects {} bytes, got {len}",
                registry.name(type_index),
                registry.byte_size(type_index)
            )));
        }
        let dst = self.component_ptr(entity, type_index)?;
        ptr::copy_nonoverlapping(src, dst, len);
        Ok(())
    }

    /// Shared combination of the chunk an entity would land in after moving to
    /// `dst`. Types kept from the source keep their value, new ones start at
    /// the default unless overridden.
    fn shared_after_move(
        &self,
        location: EntityLocation,
        dst: ArchetypeId,
        replace: Option<(TypeIndex, SharedIndex)>,
    ) -> SharedCombination {
        let src_arch = self.archetypes.archetype(location.archetype);
        let chunk = self.archetypes.live_chunk(location.chunk);
        self.archetypes
            .archetype(dst)
            .columns()
            .iter()
            .filter(|column| column.shared_slot.is_some())
            .map(|column| match replace {
                Some((type_index, index)) if type_index == column.type_index => index,
                _ => src_arch
                    .position_of(column.type_index)
                    .and_then(|p| src_arch.column(p).shared_slot)
                    .map_or(SharedIndex::DEFAULT, |slot| chunk.shared_index(slot)),
            })
            .collect()
    }

    /// Move one entity to another archetype or shared combination, then close
    /// its old row by swapping in the chunk's last entity.
    pub(crate) fn move_entity(
        &mut self,
        entity: Entity,
        dst: ArchetypeId,
        shared: &[SharedIndex],
    ) -> Result<()> {
        let location = self.entities.location(entity)?;
        if location.archetype == dst
            && self
                .archetypes
                .live_chunk(location.chunk)
                .matches_shared(shared)
        {
            return Ok(());
        }
        let dst_chunk = self
            .archetypes
            .get_chunk_with_room(dst, shared, &mut self.shared);
        let (dst_index, _) = self
            .archetypes
            .allocate_into_chunk(dst_chunk, 1, &mut self.shared);
        self.archetypes.copy_rows(
            location.chunk,
            location.index_in_chunk,
            dst_chunk,
            dst_index,
            1,
        );
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: dst,
                chunk: dst_chunk,
                index_in_chunk: dst_index,
            },
        );
        self.compact(location.chunk, location.index_in_chunk, 1);
        Ok(())
    }

    /// Add a type; a shared type may start at a given value
    pub(crate) fn add_component(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        shared_value: Option<SharedIndex>,
    ) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = tracing::info_span!("storage.add_component", type_index = type_index.index());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let location = self.entities.location(entity)?;
        let archetype = self.archetypes.archetype(location.archetype);
        if archetype.has(type_index) {
            ecs_check!(
                false,
                EcsError::DuplicateComponent {
                    component: TypeRegistry::global().name(type_index),
                }
            );
            return Ok(());
        }
        let mut types: SmallVec<[TypeIndex; 8]> = SmallVec::from_slice(archetype.types());
        sorted_insert(&mut types, type_index);
        let dst = self.archetype_for_list(&types)?;
        let shared = self.shared_after_move(
            location,
            dst,
            shared_value.map(|value| (type_index, value)),
        );
        self.move_entity(entity, dst, &shared)
    }

    pub(crate) fn remove_component(&mut self, entity: Entity, type_index: TypeIndex) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = tracing::info_span!("storage.remove_component", type_index = type_index.index());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        if type_index == TypeIndex::ENTITY {
            return Err(EcsError::EntityColumnRemoval);
        }
        let location = self.entities.location(entity)?;
        let archetype = self.archetypes.archetype(location.archetype);
        let Some(position) = archetype.position_of(type_index) else {
            ecs_check!(false, not_found(type_index));
            return Ok(());
        };
        let mut types: SmallVec<[TypeIndex; 8]> = SmallVec::from_slice(archetype.types());
        types.remove(position);
        let dst = self.archetype_for_list(&types)?;
        let shared = self.shared_after_move(location, dst, None);
        self.move_entity(entity, dst, &shared)
    }

    /// Shared index an entity's chunk holds for `type_index`
    pub fn shared_index(&self, entity: Entity, type_index: TypeIndex) -> Result<SharedIndex> {
        let location = self.entities.location(entity)?;
        let slot = self.shared_slot(location, type_index)?;
        Ok(self.archetypes.live_chunk(location.chunk).shared_index(slot))
    }

    fn shared_slot(&self, location: EntityLocation, type_index: TypeIndex) -> Result<usize> {
        let archetype = self.archetypes.archetype(location.archetype);
        archetype
            .position_of(type_index)
            .and_then(|p| archetype.column(p).shared_slot)
            .ok_or_else(|| not_found(type_index))
    }

    /// Move an entity to the chunk carrying `index` for a shared type it has
    pub(crate) fn set_shared_index(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        index: SharedIndex,
    ) -> Result<()> {
        let location = self.entities.location(entity)?;
        self.shared_slot(location, type_index)?;
        let shared = self.shared_after_move(location, location.archetype, Some((type_index, index)));
        self.move_entity(entity, location.archetype, &shared)
    }

    fn managed_slot(&self, location: EntityLocation, type_index: TypeIndex) -> Result<usize> {
        let archetype = self.archetypes.archetype(location.archetype);
        archetype
            .position_of(type_index)
            .and_then(|p| archetype.column(p).managed_slot)
            .ok_or_else(|| not_found(type_index))
    }

    pub(crate) fn managed_object(
        &self,
        entity: Entity,
        type_index: TypeIndex,
    ) -> Result<Option<ManagedObject>> {
        let location = self.entities.location(entity)?;
        let slot = self.managed_slot(location, type_index)?;
        Ok(self
            .archetypes
            .managed_object(location.chunk, slot, location.index_in_chunk)
            .cloned())
    }

    pub(crate) fn set_managed_object(
        &mut self,
        entity: Entity,
        type_index: TypeIndex,
        object: Option<ManagedObject>,
    ) -> Result<()> {
        let location = self.entities.location(entity)?;
        let slot = self.managed_slot(location, type_index)?;
        self.archetypes
            .set_managed_object(location.chunk, slot, location.index_in_chunk, object);
        Ok(())
    }

    /// Create `count` copies of `src`: every column, shared value and managed
    /// reference.
    pub fn instantiate(&mut self, src: Entity, count: usize, out: &mut Vec<Entity>) -> Result<()> {
        let location = self.entities.location(src)?;
        let shared = self
            .archetypes
            .live_chunk(location.chunk)
            .shared_indices();
        self.entities.ensure_room(count)?;
        let mut remaining = count;
        while remaining > 0 {
            let chunk = self
                .archetypes
                .get_chunk_with_room(location.archetype, &shared, &mut self.shared);
            let (base, allocated) =
                self.archetypes
                    .allocate_into_chunk(chunk, remaining, &mut self.shared);
            let start = out.len();
            self.entities
                .allocate(location.archetype, chunk, base, allocated, out)?;
            self.archetypes.write_entities(chunk, base, &out[start..]);
            self.archetypes.replicate_row(
                location.chunk,
                location.index_in_chunk,
                chunk,
                base,
                allocated,
            );
            remaining -= allocated;
        }
        Ok(())
    }

    /// Move `count` rows from the end of `src` to the end of `dst`
    fn move_tail(&mut self, src: ChunkId, dst: ChunkId, count: usize) {
        let src_count = self.archetypes.live_chunk(src).count();
        let archetype = self.archetypes.live_chunk(dst).archetype();
        let (base, allocated) = self
            .archetypes
            .allocate_into_chunk(dst, count, &mut self.shared);
        debug_assert_eq!(allocated, count);
        self.archetypes
            .copy_rows(src, src_count - allocated, dst, base, allocated);
        for index_in_chunk in base..base + allocated {
            let entity = self.archetypes.entity_at(dst, index_in_chunk);
            self.entities.set_location(
                entity,
                EntityLocation {
                    archetype,
                    chunk: dst,
                    index_in_chunk,
                },
            );
        }
        self.archetypes
            .clear_managed_rows(src, src_count - allocated, allocated);
        self.archetypes
            .set_chunk_count(src, src_count - allocated, &mut self.shared);
    }

    /// Pack the entities of `archetype` into its earliest chunks. Returns how
    /// many entities moved.
    pub fn defragment(&mut self, archetype: ArchetypeId) -> Result<usize> {
        let chunks: Vec<ChunkId> = self
            .archetypes
            .get(archetype)
            .ok_or(EcsError::ArchetypeNotFound)?
            .chunks()
            .to_vec();
        let mut moved = 0;
        for back in (1..chunks.len()).rev() {
            let src = chunks[back];
            for &dst in &chunks[..back] {
                let Some(src_chunk) = self.archetypes.chunk(src) else {
                    break;
                };
                let Some(dst_chunk) = self.archetypes.chunk(dst) else {
                    continue;
                };
                if !dst_chunk.has_room() || dst_chunk.shared_indices() != src_chunk.shared_indices() {
                    continue;
                }
                let count = src_chunk
                    .count()
                    .min(dst_chunk.capacity() - dst_chunk.count());
                self.move_tail(src, dst, count);
                moved += count;
            }
        }
        Ok(moved)
    }

    /// Move every entity of `other` into this storage under fresh handles.
    /// Returns the old → new handle map.
    pub fn move_entities_from(&mut self, other: &mut Storage) -> Result<AHashMap<Entity, Entity>> {
        if other
            .archetypes
            .iter()
            .any(|a| a.num_managed() > 0 && a.entity_count() > 0)
        {
            return Err(EcsError::ManagedDataNotMovable);
        }
        self.entities.ensure_room(other.entities.len())?;

        let sources: Vec<ArchetypeId> = other
            .archetypes
            .iter()
            .filter(|a| a.entity_count() > 0)
            .map(|a| a.id())
            .collect();
        let mut remap = AHashMap::with_capacity(other.entities.len());
        let mut old_handles = Vec::with_capacity(other.entities.len());
        let mut new_handles = Vec::with_capacity(other.entities.len());

        for src_arch in sources {
            let types: SmallVec<[TypeIndex; 8]> =
                SmallVec::from_slice(other.archetypes.archetype(src_arch).types());
            let dst_arch = self.archetype_for_list(&types)?;
            let chunks = other.archetypes.archetype(src_arch).chunks().to_vec();
            for src_chunk in chunks {
                let (count, src_shared) = {
                    let chunk = other.archetypes.live_chunk(src_chunk);
                    (chunk.count(), chunk.shared_indices())
                };
                let shared: SharedCombination = src_shared
                    .iter()
                    .map(|&index| other.shared.transfer(index, &mut self.shared))
                    .collect();

                let mut copied = 0;
                while copied < count {
                    let dst_chunk =
                        self.archetypes
                            .get_chunk_with_room(dst_arch, &shared, &mut self.shared);
                    let (base, allocated) = self.archetypes.allocate_into_chunk(
                        dst_chunk,
                        count - copied,
                        &mut self.shared,
                    );
                    self.archetypes.copy_rows_from(
                        dst_chunk,
                        base,
                        &other.archetypes,
                        src_chunk,
                        copied,
                        allocated,
                    );
                    let start = new_handles.len();
                    self.entities
                        .allocate(dst_arch, dst_chunk, base, allocated, &mut new_handles)?;
                    self.archetypes
                        .write_entities(dst_chunk, base, &new_handles[start..]);
                    for i in 0..allocated {
                        let old = other.archetypes.entity_at(src_chunk, copied + i);
                        old_handles.push(old);
                        remap.insert(old, new_handles[start + i]);
                    }
                    copied += allocated;
                }
                for index in shared {
                    self.shared.release(index);
                }
            }
        }

        other.destroy_entities(&old_handles)?;
        Ok(remap)
    }

    /// References the tables should hold on shared values: one per chunk slot
    /// with a non-default value, one per filtered group.
    fn expected_shared_references(&self) -> usize {
        let chunk_refs: usize = self
            .archetypes
            .iter()
            .flat_map(|a| a.chunks().iter())
            .filter_map(|&id| self.archetypes.chunk(id))
            .map(|chunk| {
                chunk
                    .shared_indices()
                    .iter()
                    .filter(|&&index| index != SharedIndex::DEFAULT)
                    .count()
            })
            .sum();
        let group_refs = self
            .groups
            .iter()
            .filter(|g| matches!(g.filter(), Some(f) if f.value != SharedIndex::DEFAULT))
            .count();
        chunk_refs + group_refs
    }

    /// Cross-check all tables. Returns the live entity count.
    pub fn check_internal_consistency(&self) -> Result<usize> {
        let stored = self.archetypes.check_internal_consistency()?;
        let live = self.entities.check_internal_consistency(&self.archetypes)?;
        if stored != live {
            return Err(EcsError::InconsistentStorage(format!(
                "chunks hold {stored} entities, address table {live}"
            )));
        }
        self.check_shared_references()?;
        Ok(live)
    }

    /// Fails when shared-value references are held by nothing in the tables
    pub(crate) fn check_shared_references(&self) -> Result<()> {
        let expected = self.expected_shared_references();
        let outstanding = self.shared.outstanding_references();
        if expected != outstanding {
            return Err(EcsError::InconsistentStorage(format!(
                "{outstanding} shared-value references outstanding, {expected} held by chunks and groups"
            )));
        }
        Ok(())
    }
}
