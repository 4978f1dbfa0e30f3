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

//! Archetypes and the archetype table
//!
//! An archetype is the canonical description of one exact, sorted set of
//! component types. The table owns every archetype and every chunk; archetypes
//! are append-only and never freed.

use std::ptr;
use std::sync::Arc;

use ahash::AHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::chunk::{Chunk, ChunkBuffer, ChunkId, CHUNK_SIZE, SHARED_INDEX_BYTES};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::managed::{ManagedObject, ManagedObjectListener, ManagedTable, ManagedTableKey};
use crate::shared::{SharedIndex, SharedValueTable};
use crate::type_registry::{ComponentCategory, InitFn, TypeIndex, TypeRegistry};
use crate::utils::hash_type_list;

/// Index of an archetype in its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Layout of one component type inside this archetype's chunks
#[derive(Debug, Clone)]
pub struct Column {
    pub type_index: TypeIndex,
    pub category: ComponentCategory,
    /// Byte offset of the column inside the chunk
    pub offset: usize,
    /// Bytes per entity, 0 for tags, shared and managed types
    pub size: usize,
    pub align: usize,
    /// Footer slot for shared types
    pub shared_slot: Option<usize>,
    /// Side-table slot for managed types
    pub managed_slot: Option<usize>,
    pub(crate) init: Option<InitFn>,
}

impl Column {
    /// Default-initialize `count` rows starting at `index`.
    ///
    /// # Safety
    /// `base` must be the start of a chunk of this column's archetype and the
    /// rows must lie below its capacity.
    unsafe fn initialize(&self, base: *mut u8, index: usize, count: usize) {
        if self.size == 0 || self.category != ComponentCategory::Plain {
            return;
        }
        let start = base.add(self.offset + index * self.size);
        match self.init {
            Some(init) => {
                for i in 0..count {
                    init(start.add(i * self.size));
                }
            }
            None => ptr::write_bytes(start, 0, count * self.size),
        }
    }
}

/// Archetype: one component-type set and its chunks
pub struct Archetype {
    id: ArchetypeId,
    types: SmallVec<[TypeIndex; 8]>,
    columns: SmallVec<[Column; 8]>,
    capacity: usize,
    stride: usize,
    num_shared: usize,
    num_managed: usize,
    entity_count: usize,
    chunks: Vec<ChunkId>,
    chunks_with_room: Vec<ChunkId>,
}

impl Archetype {
    fn new(id: ArchetypeId, types: &[TypeIndex], registry: &TypeRegistry) -> Result<Self> {
        let mut columns: SmallVec<[Column; 8]> = SmallVec::with_capacity(types.len());
        let mut num_shared = 0;
        let mut num_managed = 0;
        let mut stride = 0;

        for &type_index in types {
            let info = registry.info(type_index);
            let shared_slot = (info.category == ComponentCategory::Shared).then(|| {
                num_shared += 1;
                num_shared - 1
            });
            let managed_slot = (info.category == ComponentCategory::Managed).then(|| {
                num_managed += 1;
                num_managed - 1
            });
            stride += info.size_in_chunk;
            columns.push(Column {
                type_index,
                category: info.category,
                offset: 0,
                size: info.size_in_chunk,
                align: info.align,
                shared_slot,
                managed_slot,
                init: info.init,
            });
        }

        let usable = CHUNK_SIZE - num_shared * SHARED_INDEX_BYTES;
        if stride == 0 || stride > usable {
            return Err(EcsError::ArchetypeTooLarge { stride, usable });
        }
        let capacity = usable / stride;

        // Widest alignment first: every column then starts on a multiple of its
        // own alignment without padding.
        let mut order: SmallVec<[usize; 8]> =
            (0..columns.len()).filter(|&i| columns[i].size > 0).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(columns[i].align));
        let mut offset = 0;
        for i in order {
            columns[i].offset = offset;
            offset += columns[i].size * capacity;
        }
        debug_assert!(offset <= usable);

        Ok(Self {
            id,
            types: SmallVec::from_slice(types),
            columns,
            capacity,
            stride,
            num_shared,
            num_managed,
            entity_count: 0,
            chunks: Vec::new(),
            chunks_with_room: Vec::new(),
        })
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted type list, Entity first
    pub fn types(&self) -> &[TypeIndex] {
        &self.types
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, position: usize) -> &Column {
        &self.columns[position]
    }

    /// Position of a type in [`types`](Self::types)
    pub fn position_of(&self, type_index: TypeIndex) -> Option<usize> {
        self.types.binary_search(&type_index).ok()
    }

    pub fn has(&self, type_index: TypeIndex) -> bool {
        self.position_of(type_index).is_some()
    }

    /// Entities per chunk
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of chunk memory per entity
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Chunk bytes available to columns
    pub fn usable_bytes(&self) -> usize {
        CHUNK_SIZE - self.num_shared * SHARED_INDEX_BYTES
    }

    pub fn num_shared(&self) -> usize {
        self.num_shared
    }

    pub fn num_managed(&self) -> usize {
        self.num_managed
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn chunks(&self) -> &[ChunkId] {
        &self.chunks
    }

    pub fn chunks_with_room(&self) -> &[ChunkId] {
        &self.chunks_with_room
    }
}

type ListenerMap = AHashMap<(ArchetypeId, TypeIndex), Vec<Arc<dyn ManagedObjectListener>>>;

/// Owner of all archetypes and chunks of one world
pub struct ArchetypeTable {
    archetypes: Vec<Archetype>,
    lookup: AHashMap<u64, SmallVec<[ArchetypeId; 2]>>,
    chunks: Vec<Option<Chunk>>,
    free_chunk_slots: Vec<ChunkId>,
    managed_tables: SlotMap<ManagedTableKey, ManagedTable>,
    listeners: ListenerMap,
    type_versions: Vec<u32>,
}

impl ArchetypeTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            archetypes: Vec::with_capacity(capacity),
            lookup: AHashMap::with_capacity(capacity),
            chunks: Vec::new(),
            free_chunk_slots: Vec::new(),
            managed_tables: SlotMap::with_key(),
            listeners: AHashMap::new(),
            type_versions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Archetype by an id handed out by this table
    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    /// Exact lookup of a canonical (sorted, Entity-first) type list
    pub fn find(&self, types: &[TypeIndex]) -> Option<ArchetypeId> {
        self.lookup
            .get(&hash_type_list(types))?
            .iter()
            .copied()
            .find(|id| self.archetypes[id.index()].types.as_slice() == types)
    }

    /// Create the archetype for a canonical type list not yet in the table.
    pub(crate) fn create(&mut self, types: &[TypeIndex]) -> Result<ArchetypeId> {
        #[cfg(feature = "profiling")]
        let span = tracing::info_span!("archetype.create", component_count = types.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        debug_assert!(self.find(types).is_none());
        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, types, TypeRegistry::global())?;
        tracing::debug!(
            archetype = id.0,
            types = types.len(),
            capacity = archetype.capacity,
            stride = archetype.stride,
            "created archetype"
        );
        self.archetypes.push(archetype);
        self.lookup
            .entry(hash_type_list(types))
            .or_default()
            .push(id);
        Ok(id)
    }

    /// Chunk by id, `None` once released
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn live_chunk(&self, id: ChunkId) -> &Chunk {
        match self.chunk(id) {
            Some(chunk) => chunk,
            None => unreachable!("chunk {} was released", id.0),
        }
    }

    fn live_chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        match self.chunks.get_mut(id.index()).and_then(Option::as_mut) {
            Some(chunk) => chunk,
            None => unreachable!("chunk {} was released", id.0),
        }
    }

    /// Chunks currently holding entities
    pub fn live_chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Entity id stored at a chunk row
    pub fn entity_at(&self, chunk: ChunkId, index: usize) -> Entity {
        let chunk = self.live_chunk(chunk);
        let column = &self.archetypes[chunk.archetype.index()].columns[0];
        debug_assert!(index < chunk.capacity);
        // SAFETY: the Entity column is initialized for every allocated row.
        unsafe { ptr::read(chunk.column_ptr(column.offset).cast::<Entity>().add(index)) }
    }

    /// Pointer to one row of the column at `position`
    pub(crate) fn component_ptr(&self, chunk: ChunkId, position: usize, index: usize) -> *mut u8 {
        let chunk = self.live_chunk(chunk);
        let column = &self.archetypes[chunk.archetype.index()].columns[position];
        debug_assert!(index < chunk.capacity);
        // SAFETY: the row lies inside the column.
        unsafe { chunk.column_ptr(column.offset).add(index * column.size) }
    }

    /// A chunk of `archetype` with free rows and exactly the given shared
    /// values: reuse one from the has-room list, else take a pooled or fresh
    /// buffer.
    pub(crate) fn get_chunk_with_room(
        &mut self,
        archetype: ArchetypeId,
        shared: &[SharedIndex],
        shared_values: &mut SharedValueTable,
    ) -> ChunkId {
        let arch = &self.archetypes[archetype.index()];
        debug_assert_eq!(shared.len(), arch.num_shared);
        for &id in arch.chunks_with_room.iter().rev() {
            if self.live_chunk(id).matches_shared(shared) {
                return id;
            }
        }
        self.new_chunk(archetype, shared, shared_values)
    }

    fn new_chunk(
        &mut self,
        archetype: ArchetypeId,
        shared: &[SharedIndex],
        shared_values: &mut SharedValueTable,
    ) -> ChunkId {
        let arch = &self.archetypes[archetype.index()];
        let managed = (arch.num_managed > 0).then(|| {
            self.managed_tables
                .insert(ManagedTable::new(arch.num_managed, arch.capacity))
        });
        let mut chunk = Chunk {
            buffer: ChunkBuffer::acquire(),
            archetype,
            count: 0,
            capacity: arch.capacity,
            num_shared: arch.num_shared,
            managed,
            list_position: arch.chunks.len(),
            room_position: Some(arch.chunks_with_room.len()),
        };
        for (slot, &index) in shared.iter().enumerate() {
            chunk.set_shared_index(slot, index);
            shared_values.add_reference(index);
            shared_values.bump_version(index);
        }

        let id = match self.free_chunk_slots.pop() {
            Some(id) => {
                self.chunks[id.index()] = Some(chunk);
                id
            }
            None => {
                self.chunks.push(Some(chunk));
                ChunkId((self.chunks.len() - 1) as u32)
            }
        };
        let arch = &mut self.archetypes[archetype.index()];
        arch.chunks.push(id);
        arch.chunks_with_room.push(id);
        id
    }

    /// Claim up to `count` rows at the end of `chunk`. Returns the first row
    /// and the number claimed; callers loop until satisfied.
    pub(crate) fn allocate_into_chunk(
        &mut self,
        chunk: ChunkId,
        count: usize,
        shared_values: &mut SharedValueTable,
    ) -> (usize, usize) {
        let c = self.live_chunk(chunk);
        let base = c.count;
        let allocated = count.min(c.capacity - c.count);
        self.set_chunk_count(chunk, base + allocated, shared_values);
        (base, allocated)
    }

    /// The only place chunk-list membership changes: a chunk joins the
    /// has-room list when it drops below capacity, leaves it when it fills, and
    /// is released to the pool at zero.
    pub(crate) fn set_chunk_count(
        &mut self,
        id: ChunkId,
        count: usize,
        shared_values: &mut SharedValueTable,
    ) {
        let (archetype, old, capacity) = {
            let chunk = self.live_chunk(id);
            (chunk.archetype, chunk.count, chunk.capacity)
        };
        debug_assert!(count <= capacity);
        if count == old {
            return;
        }
        self.bump_type_versions(archetype);
        let arch = &mut self.archetypes[archetype.index()];
        arch.entity_count = arch.entity_count + count - old;

        if count == 0 {
            self.release_chunk(id, shared_values);
            return;
        }
        if old == capacity && count < capacity {
            let arch = &mut self.archetypes[archetype.index()];
            let position = arch.chunks_with_room.len();
            arch.chunks_with_room.push(id);
            self.live_chunk_mut(id).room_position = Some(position);
        } else if old < capacity && count == capacity {
            self.remove_from_room_list(id);
        }
        self.live_chunk_mut(id).count = count;
    }

    fn remove_from_room_list(&mut self, id: ChunkId) {
        let (archetype, position) = {
            let chunk = self.live_chunk_mut(id);
            (chunk.archetype, chunk.room_position.take())
        };
        let Some(position) = position else {
            return;
        };
        let list = &mut self.archetypes[archetype.index()].chunks_with_room;
        list.swap_remove(position);
        if let Some(moved) = list.get(position).copied() {
            self.live_chunk_mut(moved).room_position = Some(position);
        }
    }

    fn release_chunk(&mut self, id: ChunkId, shared_values: &mut SharedValueTable) {
        self.remove_from_room_list(id);
        let (archetype, position) = {
            let chunk = self.live_chunk(id);
            (chunk.archetype, chunk.list_position)
        };
        let list = &mut self.archetypes[archetype.index()].chunks;
        list.swap_remove(position);
        if let Some(moved) = list.get(position).copied() {
            self.live_chunk_mut(moved).list_position = position;
        }

        let Some(chunk) = self.chunks[id.index()].take() else {
            return;
        };
        for index in chunk.shared_indices() {
            shared_values.bump_version(index);
            shared_values.release(index);
        }
        if let Some(key) = chunk.managed {
            self.managed_tables.remove(key);
        }
        chunk.buffer.release();
        self.free_chunk_slots.push(id);
    }

    /// Write entity ids into consecutive rows
    pub(crate) fn write_entities(&mut self, chunk: ChunkId, base: usize, entities: &[Entity]) {
        let ptr = self.component_ptr(chunk, 0, base).cast::<Entity>();
        debug_assert!(base + entities.len() <= self.live_chunk(chunk).capacity);
        // SAFETY: rows [base, base + len) are inside the Entity column.
        unsafe { ptr::copy_nonoverlapping(entities.as_ptr(), ptr, entities.len()) }
    }

    /// Default-initialize every non-Entity column of the given rows
    pub(crate) fn initialize_rows(&mut self, chunk: ChunkId, base: usize, count: usize) {
        let c = self.live_chunk(chunk);
        let arch = &self.archetypes[c.archetype.index()];
        debug_assert!(base + count <= c.capacity);
        let data = c.buffer.as_ptr();
        for column in arch.columns.iter().skip(1) {
            // SAFETY: rows checked against capacity above.
            unsafe { column.initialize(data, base, count) }
        }
    }

    /// Copy `count` rows between chunks, possibly of different archetypes.
    /// Columns present in both are copied, columns only in the destination
    /// are default-initialized, columns only in the source are dropped.
    pub(crate) fn copy_rows(
        &mut self,
        src_chunk: ChunkId,
        src_index: usize,
        dst_chunk: ChunkId,
        dst_index: usize,
        count: usize,
    ) {
        let src = self.live_chunk(src_chunk);
        let dst = self.live_chunk(dst_chunk);
        debug_assert!(src_index + count <= src.capacity && dst_index + count <= dst.capacity);
        let src_arch = &self.archetypes[src.archetype.index()];
        let dst_arch = &self.archetypes[dst.archetype.index()];
        let src_data = src.buffer.as_ptr();
        let dst_data = dst.buffer.as_ptr();
        let managed = (src.managed, dst.managed);

        let mut i = 0;
        for column in &dst_arch.columns {
            while i < src_arch.types.len() && src_arch.types[i] < column.type_index {
                i += 1;
            }
            if i < src_arch.types.len() && src_arch.types[i] == column.type_index {
                if column.size > 0 {
                    let from = &src_arch.columns[i];
                    // SAFETY: both row ranges are inside their columns. `copy`
                    // tolerates overlap when both chunks are the same.
                    unsafe {
                        ptr::copy(
                            src_data.add(from.offset + src_index * from.size),
                            dst_data.add(column.offset + dst_index * column.size),
                            count * column.size,
                        );
                    }
                }
            } else {
                // SAFETY: destination rows are inside the chunk.
                unsafe { column.initialize(dst_data, dst_index, count) }
            }
        }

        let (Some(src_key), Some(dst_key)) = managed else {
            return;
        };
        let mut slots: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        for column in &dst_arch.columns {
            let (Some(dst_slot), Some(src_pos)) =
                (column.managed_slot, src_arch.position_of(column.type_index))
            else {
                continue;
            };
            if let Some(src_slot) = src_arch.columns[src_pos].managed_slot {
                slots.push((src_slot, dst_slot));
            }
        }
        for row in 0..count {
            for &(src_slot, dst_slot) in &slots {
                let object = self.managed_tables[src_key]
                    .get(src_slot, src_index + row)
                    .cloned();
                self.managed_tables[dst_key].set(dst_slot, dst_index + row, object);
            }
        }
    }

    /// Copy rows out of a chunk owned by another table whose archetype has the
    /// same type list, and therefore the same layout. Managed columns are not
    /// copied.
    pub(crate) fn copy_rows_from(
        &mut self,
        dst_chunk: ChunkId,
        dst_index: usize,
        src_table: &ArchetypeTable,
        src_chunk: ChunkId,
        src_index: usize,
        count: usize,
    ) {
        let src = src_table.live_chunk(src_chunk);
        let dst = self.live_chunk(dst_chunk);
        let arch = &self.archetypes[dst.archetype.index()];
        debug_assert_eq!(
            arch.types,
            src_table.archetypes[src.archetype.index()].types
        );
        debug_assert!(src_index + count <= src.capacity && dst_index + count <= dst.capacity);
        for column in arch.columns.iter().filter(|c| c.size > 0) {
            // SAFETY: identical layouts, distinct buffers.
            unsafe {
                ptr::copy_nonoverlapping(
                    src.column_ptr(column.offset + src_index * column.size),
                    dst.column_ptr(column.offset + dst_index * column.size),
                    count * column.size,
                );
            }
        }
    }

    /// Copy one row's non-Entity columns into `count` consecutive rows
    pub(crate) fn replicate_row(
        &mut self,
        src_chunk: ChunkId,
        src_index: usize,
        dst_chunk: ChunkId,
        dst_base: usize,
        count: usize,
    ) {
        let src = self.live_chunk(src_chunk);
        let dst = self.live_chunk(dst_chunk);
        debug_assert_eq!(src.archetype, dst.archetype);
        debug_assert!(dst_base + count <= dst.capacity);
        let arch = &self.archetypes[src.archetype.index()];
        let src_data = src.buffer.as_ptr();
        let dst_data = dst.buffer.as_ptr();
        for column in arch.columns.iter().skip(1).filter(|c| c.size > 0) {
            // SAFETY: source row and destination rows are disjoint rows of the
            // same column layout.
            unsafe {
                let from = src_data.add(column.offset + src_index * column.size);
                for row in 0..count {
                    let to = dst_data.add(column.offset + (dst_base + row) * column.size);
                    ptr::copy_nonoverlapping(from, to, column.size);
                }
            }
        }

        if let (Some(src_key), Some(dst_key)) = (src.managed, dst.managed) {
            let objects = self.managed_tables[src_key].row(src_index);
            let table = &mut self.managed_tables[dst_key];
            for row in 0..count {
                for (slot, object) in objects.iter().enumerate() {
                    table.set(slot, dst_base + row, object.clone());
                }
            }
        }
    }

    pub(crate) fn clear_managed_rows(&mut self, chunk: ChunkId, start: usize, count: usize) {
        if let Some(key) = self.live_chunk(chunk).managed {
            let table = &mut self.managed_tables[key];
            for row in start..start + count {
                table.clear_row(row);
            }
        }
    }

    pub(crate) fn managed_object(
        &self,
        chunk: ChunkId,
        managed_slot: usize,
        index: usize,
    ) -> Option<&ManagedObject> {
        let key = self.live_chunk(chunk).managed?;
        self.managed_tables.get(key)?.get(managed_slot, index)
    }

    pub(crate) fn set_managed_object(
        &mut self,
        chunk: ChunkId,
        managed_slot: usize,
        index: usize,
        object: Option<ManagedObject>,
    ) {
        let (archetype, key) = {
            let c = self.live_chunk(chunk);
            (c.archetype, c.managed)
        };
        let Some(key) = key else {
            return;
        };
        self.managed_tables[key].set(managed_slot, index, object);

        let type_index = self.archetypes[archetype.index()]
            .columns
            .iter()
            .find(|c| c.managed_slot == Some(managed_slot))
            .map(|c| c.type_index);
        if let Some(type_index) = type_index {
            if let Some(listeners) = self.listeners.get(&(archetype, type_index)) {
                for listener in listeners {
                    listener.on_managed_object_modified();
                }
            }
        }
    }

    pub fn add_managed_listener(
        &mut self,
        archetype: ArchetypeId,
        type_index: TypeIndex,
        listener: Arc<dyn ManagedObjectListener>,
    ) {
        self.listeners
            .entry((archetype, type_index))
            .or_default()
            .push(listener);
    }

    pub fn remove_managed_listener(
        &mut self,
        archetype: ArchetypeId,
        type_index: TypeIndex,
        listener: &Arc<dyn ManagedObjectListener>,
    ) {
        if let Some(listeners) = self.listeners.get_mut(&(archetype, type_index)) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn bump_type_versions(&mut self, archetype: ArchetypeId) {
        for &ty in &self.archetypes[archetype.index()].types {
            let i = ty.index();
            if i >= self.type_versions.len() {
                self.type_versions.resize(i + 1, 0);
            }
            self.type_versions[i] = self.type_versions[i].wrapping_add(1);
        }
    }

    /// Bumped whenever an archetype containing the type gains or loses rows
    pub fn type_version(&self, type_index: TypeIndex) -> u32 {
        self.type_versions.get(type_index.index()).copied().unwrap_or(0)
    }

    /// Verify chunk lists, counts and back-pointers. Returns the number of
    /// entities stored.
    pub fn check_internal_consistency(&self) -> Result<usize> {
        let mut total = 0;
        let mut listed_chunks = 0;
        for arch in &self.archetypes {
            let mut sum = 0;
            let mut with_room = 0;
            for (position, &id) in arch.chunks.iter().enumerate() {
                let chunk = self.chunk(id).ok_or_else(|| {
                    EcsError::InconsistentStorage(format!(
                        "archetype {} lists released chunk {}",
                        arch.id.0, id.0
                    ))
                })?;
                if chunk.archetype != arch.id || chunk.list_position != position {
                    return Err(EcsError::InconsistentStorage(format!(
                        "chunk {} back-pointer does not match archetype {}",
                        id.0, arch.id.0
                    )));
                }
                if chunk.count == 0 || chunk.count > chunk.capacity {
                    return Err(EcsError::InconsistentStorage(format!(
                        "chunk {} holds {} of {} rows",
                        id.0, chunk.count, chunk.capacity
                    )));
                }
                if chunk.has_room() {
                    with_room += 1;
                }
                sum += chunk.count;
            }
            for (position, &id) in arch.chunks_with_room.iter().enumerate() {
                let room_position = self.chunk(id).and_then(|c| c.room_position);
                if room_position != Some(position) {
                    return Err(EcsError::InconsistentStorage(format!(
                        "has-room list of archetype {} is out of sync at {}",
                        arch.id.0, position
                    )));
                }
            }
            if with_room != arch.chunks_with_room.len() {
                return Err(EcsError::InconsistentStorage(format!(
                    "archetype {} has {} chunks with room, lists {}",
                    arch.id.0,
                    with_room,
                    arch.chunks_with_room.len()
                )));
            }
            if sum != arch.entity_count {
                return Err(EcsError::InconsistentStorage(format!(
                    "archetype {} counts {} entities, chunks hold {}",
                    arch.id.0, arch.entity_count, sum
                )));
            }
            total += sum;
            listed_chunks += arch.chunks.len();
        }
        if listed_chunks != self.live_chunk_count() {
            return Err(EcsError::InconsistentStorage(format!(
                "{} live chunks, {} listed by archetypes",
                self.live_chunk_count(),
                listed_chunks
            )));
        }
        Ok(total)
    }
}

impl Drop for ArchetypeTable {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..).flatten() {
            chunk.buffer.release();
        }
    }
}
