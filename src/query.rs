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

//! Column views over a group
//!
//! A group's entities form one logical sequence ordered by matched archetype,
//! then chunk, then row. Views resolve a flat index with a cursor that
//! remembers the last chunk range, so sequential scans stay O(1) amortized.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::Index;
use std::slice;

use crate::archetype::ArchetypeTable;
use crate::chunk::{Chunk, ChunkId};
use crate::component::Component;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::group::{GroupData, MatchingArchetype};
use crate::shared::SharedIndex;
use crate::type_registry::{TypeIndex, TypeRegistry};

/// Last resolved chunk range
#[derive(Debug, Clone, Copy, Default)]
struct CursorCache {
    match_pos: usize,
    archetype_base: usize,
    chunk_pos: usize,
    chunk_base: usize,
    begin: usize,
    end: usize,
    chunk: Option<ChunkId>,
}

/// A resolved chunk range of a group
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkRange {
    pub match_pos: usize,
    pub chunk: ChunkId,
    pub begin: usize,
    pub end: usize,
}

/// Flat index → (chunk, row) resolver for one group
pub(crate) struct GroupCursor<'a> {
    archetypes: &'a ArchetypeTable,
    group: &'a GroupData,
    len: usize,
    cache: Cell<CursorCache>,
}

impl<'a> GroupCursor<'a> {
    pub(crate) fn new(archetypes: &'a ArchetypeTable, group: &'a GroupData) -> Self {
        Self {
            archetypes,
            group,
            len: group.len(archetypes),
            cache: Cell::new(CursorCache::default()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn chunk_passes(&self, matched: &MatchingArchetype, chunk: &Chunk) -> bool {
        match (self.group.filter(), matched.filter_slot) {
            (Some(filter), Some(slot)) => chunk.shared_index(slot) == filter.value,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Chunk range containing `index`
    pub(crate) fn resolve(&self, index: usize) -> Option<ChunkRange> {
        if index >= self.len {
            return None;
        }
        let mut c = self.cache.get();
        if let Some(chunk) = c.chunk {
            if c.begin <= index && index < c.end {
                return Some(ChunkRange {
                    match_pos: c.match_pos,
                    chunk,
                    begin: c.begin,
                    end: c.end,
                });
            }
        }
        if c.chunk.is_none() || index < c.begin {
            c = CursorCache::default();
        } else {
            c.chunk_pos += 1;
            c.chunk_base = c.end;
        }

        let matches = self.group.matches();
        let filtered = self.group.filter().is_some();
        while c.match_pos < matches.len() {
            let matched = &matches[c.match_pos];
            let archetype = self.archetypes.archetype(matched.archetype);
            if !filtered && c.chunk_pos == 0 && c.archetype_base + archetype.entity_count() <= index {
                c.archetype_base += archetype.entity_count();
                c.chunk_base = c.archetype_base;
                c.match_pos += 1;
                continue;
            }
            let chunks = archetype.chunks();
            while c.chunk_pos < chunks.len() {
                let id = chunks[c.chunk_pos];
                if let Some(chunk) = self.archetypes.chunk(id) {
                    if self.chunk_passes(matched, chunk) {
                        let end = c.chunk_base + chunk.count();
                        if index < end {
                            c.begin = c.chunk_base;
                            c.end = end;
                            c.chunk = Some(id);
                            self.cache.set(c);
                            return Some(ChunkRange {
                                match_pos: c.match_pos,
                                chunk: id,
                                begin: c.begin,
                                end,
                            });
                        }
                        c.chunk_base = end;
                    }
                }
                c.chunk_pos += 1;
            }
            c.match_pos += 1;
            c.chunk_pos = 0;
            c.archetype_base = c.chunk_base;
        }
        None
    }

    /// Every chunk the group sees, in index order
    pub(crate) fn chunks(&self) -> impl Iterator<Item = (&'a MatchingArchetype, ChunkId, &'a Chunk)> + '_ {
        let archetypes = self.archetypes;
        self.group.matches().iter().flat_map(move |matched| {
            archetypes
                .archetype(matched.archetype)
                .chunks()
                .iter()
                .filter_map(move |&id| Some((matched, id, archetypes.chunk(id)?)))
        })
        .filter(|(matched, _, chunk)| self.chunk_passes(matched, chunk))
    }

    /// Archetype column position of a view's column in a matched archetype
    fn column_position(&self, column: ViewColumn, match_pos: usize) -> usize {
        match column {
            ViewColumn::Entity => 0,
            ViewColumn::Required(i) => self.group.matches()[match_pos].type_positions[i],
        }
    }

    fn column_base(&self, column: ViewColumn, range: ChunkRange) -> *mut u8 {
        let position = self.column_position(column, range.match_pos);
        self.archetypes.component_ptr(range.chunk, position, 0)
    }
}

#[derive(Debug, Clone, Copy)]
enum ViewColumn {
    Entity,
    /// Index among the group's required types
    Required(usize),
}

/// Resolve `T` to a required position of the group
pub(crate) fn required_column<T: Component>(group: &GroupData) -> Result<(TypeIndex, usize)> {
    let type_index = TypeRegistry::global().component_index::<T>()?;
    let position = group
        .required_position(type_index)
        .ok_or(EcsError::ComponentNotFound {
            component: std::any::type_name::<T>(),
        })?;
    Ok((type_index, position))
}

/// Cached `[begin, end)` range and column base pointer of a view
#[derive(Clone, Copy)]
struct ViewCache<T> {
    begin: usize,
    end: usize,
    base: *mut T,
}

impl<T> Default for ViewCache<T> {
    fn default() -> Self {
        Self {
            begin: 0,
            end: 0,
            base: std::ptr::null_mut(),
        }
    }
}

struct ColumnView<'a, T> {
    cursor: GroupCursor<'a>,
    column: ViewColumn,
    cache: Cell<ViewCache<T>>,
}

impl<'a, T: Copy> ColumnView<'a, T> {
    fn new(cursor: GroupCursor<'a>, column: ViewColumn) -> Self {
        Self {
            cursor,
            column,
            cache: Cell::new(ViewCache::default()),
        }
    }

    fn element_ptr(&self, index: usize) -> Option<*mut T> {
        let cache = self.cache.get();
        if cache.begin <= index && index < cache.end {
            // SAFETY: cached range lies inside one chunk column.
            return Some(unsafe { cache.base.add(index - cache.begin) });
        }
        let range = self.cursor.resolve(index)?;
        let base = self.cursor.column_base(self.column, range).cast::<T>();
        self.cache.set(ViewCache {
            begin: range.begin,
            end: range.end,
            base,
        });
        // SAFETY: `index` is within the resolved range.
        Some(unsafe { base.add(index - range.begin) })
    }

    fn chunk_slices(&self) -> impl Iterator<Item = (*mut T, usize)> + '_ {
        self.cursor.chunks().map(move |(matched, id, chunk)| {
            let position = match self.column {
                ViewColumn::Entity => 0,
                ViewColumn::Required(i) => matched.type_positions[i],
            };
            (
                self.cursor
                    .archetypes
                    .component_ptr(id, position, 0)
                    .cast::<T>(),
                chunk.count(),
            )
        })
    }
}

/// Read-only view of one plain component across a group
pub struct ComponentArray<'a, T: Copy> {
    view: ColumnView<'a, T>,
    _marker: PhantomData<&'a T>,
}

/// Entity ids of a group
pub type EntityArray<'a> = ComponentArray<'a, Entity>;

impl<'a, T: Copy> ComponentArray<'a, T> {
    pub(crate) fn new(cursor: GroupCursor<'a>, position: usize) -> Self {
        Self {
            view: ColumnView::new(cursor, ViewColumn::Required(position)),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.view.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        // SAFETY: the owning world is borrowed for 'a and its fences drained.
        self.view
            .element_ptr(index)
            .map(|ptr| unsafe { ptr.read() })
    }

    /// One slice per chunk
    pub fn chunks(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        self.view
            .chunk_slices()
            .map(|(ptr, len)| unsafe { slice::from_raw_parts(ptr.cast_const(), len) })
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.chunks().flat_map(|s| s.iter().copied())
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl<'a> ComponentArray<'a, Entity> {
    pub(crate) fn entities(cursor: GroupCursor<'a>) -> Self {
        Self {
            view: ColumnView::new(cursor, ViewColumn::Entity),
            _marker: PhantomData,
        }
    }
}

impl<'a, T: Copy> Index<usize> for ComponentArray<'a, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.view.element_ptr(index) {
            // SAFETY: element lives as long as the borrowed world.
            Some(ptr) => unsafe { &*ptr },
            None => panic!("index {index} out of range for group of length {}", self.len()),
        }
    }
}

/// Read-write view of one plain component across a group
pub struct ComponentArrayMut<'a, T: Component> {
    view: ColumnView<'a, T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: Component> ComponentArrayMut<'a, T> {
    pub(crate) fn new(cursor: GroupCursor<'a>, position: usize) -> Self {
        Self {
            view: ColumnView::new(cursor, ViewColumn::Required(position)),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.view.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.view
            .element_ptr(index)
            .map(|ptr| unsafe { ptr.read() })
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.view.element_ptr(index).map(|ptr| unsafe { &mut *ptr })
    }

    /// Returns false when `index` is out of range
    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.view.element_ptr(index) {
            Some(ptr) => {
                unsafe { ptr.write(value) };
                true
            }
            None => false,
        }
    }

    /// One mutable slice per chunk
    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut [T]> + '_ {
        self.view
            .chunk_slices()
            .map(|(ptr, len)| unsafe { slice::from_raw_parts_mut(ptr, len) })
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        for chunk in self.chunks_mut() {
            chunk.iter_mut().for_each(&mut f);
        }
    }

    /// Raw per-chunk columns, for splitting work across threads
    pub(crate) fn raw_chunks(&self) -> Vec<(*mut T, usize)> {
        self.view.chunk_slices().collect()
    }
}

/// Shared-value index of every entity of a group
pub struct SharedIndexArray<'a> {
    cursor: GroupCursor<'a>,
    position: usize,
}

impl<'a> SharedIndexArray<'a> {
    pub(crate) fn new(cursor: GroupCursor<'a>, position: usize) -> Self {
        Self { cursor, position }
    }

    pub fn len(&self) -> usize {
        self.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<SharedIndex> {
        let range = self.cursor.resolve(index)?;
        let matched = &self.cursor.group.matches()[range.match_pos];
        let archetype = self.cursor.archetypes.archetype(matched.archetype);
        let slot = archetype
            .column(matched.type_positions[self.position])
            .shared_slot?;
        Some(self.cursor.archetypes.chunk(range.chunk)?.shared_index(slot))
    }
}

/// One chunk of a group
pub struct GroupChunk<'a> {
    archetypes: &'a ArchetypeTable,
    matched: &'a MatchingArchetype,
    id: ChunkId,
    chunk: &'a Chunk,
}

impl<'a> GroupChunk<'a> {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.chunk.count()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.count() == 0
    }

    pub fn matched(&self) -> &'a MatchingArchetype {
        self.matched
    }

    pub fn entities(&self) -> &'a [Entity] {
        let ptr = self.archetypes.component_ptr(self.id, 0, 0).cast::<Entity>();
        // SAFETY: the first `count` rows of the Entity column are initialized.
        unsafe { slice::from_raw_parts(ptr.cast_const(), self.chunk.count()) }
    }

    /// Column of `T`, if the chunk's archetype has it
    pub fn column<T: Component>(&self) -> Option<&'a [T]> {
        let type_index = TypeRegistry::global().component_index::<T>().ok()?;
        let position = self
            .archetypes
            .archetype(self.matched.archetype)
            .position_of(type_index)?;
        let ptr = self.archetypes.component_ptr(self.id, position, 0).cast::<T>();
        // SAFETY: as above, for the `T` column.
        Some(unsafe { slice::from_raw_parts(ptr.cast_const(), self.chunk.count()) })
    }

    pub fn shared_indices(&self) -> smallvec::SmallVec<[SharedIndex; 4]> {
        self.chunk.shared_indices()
    }
}

pub(crate) fn group_chunks<'a>(cursor: &GroupCursor<'a>) -> Vec<GroupChunk<'a>> {
    let archetypes = cursor.archetypes;
    cursor
        .chunks()
        .map(|(matched, id, chunk)| GroupChunk {
            archetypes,
            matched,
            id,
            chunk,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;
    use crate::config::WorldConfig;
    use crate::group::GroupId;
    use crate::storage::Storage;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Speed(u32);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Tint(u8);

    fn setup() -> (Storage, GroupId) {
        let registry = TypeRegistry::global();
        let speed = registry.component_index::<Speed>().unwrap();
        let tint = registry.component_index::<Tint>().unwrap();
        let mut storage = Storage::new(&WorldConfig::default());
        let plain = storage.get_or_create_archetype([speed]).unwrap();
        let tinted = storage.get_or_create_archetype([speed, tint]).unwrap();

        let mut entities = Vec::new();
        storage.create_entities(plain, 3000, &mut entities).unwrap();
        storage.create_entities(tinted, 100, &mut entities).unwrap();
        for (i, &e) in entities.iter().enumerate() {
            storage.set_component(e, Speed(i as u32)).unwrap();
        }
        let Storage {
            archetypes,
            shared,
            groups,
            ..
        } = &mut storage;
        let id = groups
            .get_or_create(&[ComponentType::from_index(speed)], None, archetypes, shared)
            .unwrap();
        (storage, id)
    }

    #[test]
    fn test_sequential_and_random_access_agree() {
        let (storage, id) = setup();
        let group = storage.groups().get(id).unwrap();
        let cursor = GroupCursor::new(storage.archetypes(), group);
        let array = ComponentArray::<Speed>::new(cursor, 0);
        assert_eq!(array.len(), 3100);

        let sequential: Vec<Speed> = (0..array.len()).map(|i| array.get(i).unwrap()).collect();
        assert_eq!(sequential, array.to_vec());
        assert_eq!(array.get(3099), Some(sequential[3099]));
        assert_eq!(array.get(5), Some(sequential[5]));
        assert_eq!(array[2048], sequential[2048]);
        assert_eq!(array.get(3100), None);

        let mut values: Vec<u32> = sequential.iter().map(|s| s.0).collect();
        values.sort_unstable();
        assert_eq!(values, (0..3100).collect::<Vec<_>>());
    }

    #[test]
    fn test_entity_array_matches_chunks() {
        let (storage, id) = setup();
        let group = storage.groups().get(id).unwrap();
        let entities = EntityArray::entities(GroupCursor::new(storage.archetypes(), group));
        let chunks = group_chunks(&GroupCursor::new(storage.archetypes(), group));
        let flattened: Vec<Entity> = chunks.iter().flat_map(|c| c.entities().iter().copied()).collect();
        assert_eq!(flattened, entities.to_vec());
        for (i, &e) in flattened.iter().enumerate() {
            assert_eq!(entities.get(i), Some(e));
            assert_eq!(
                storage.get_component::<Speed>(e).unwrap(),
                chunks
                    .iter()
                    .flat_map(|c| c.column::<Speed>().unwrap().iter().copied())
                    .nth(i)
                    .unwrap()
            );
        }
    }
}
