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

//! Refcounted, deduplicated table of shared component values
//!
//! Index 0 is the default value of every shared type and is never released.
//! Released indices are not recycled within a world's lifetime.

use std::any::Any;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use crate::component::SharedComponent;
use crate::type_registry::TypeIndex;

/// Index into the shared-value table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SharedIndex(pub(crate) u32);

impl SharedIndex {
    /// The default value of any shared type
    pub const DEFAULT: SharedIndex = SharedIndex(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

type BoxedValue = Box<dyn Any + Send + Sync>;

/// Type-erased operations captured at insert time
#[derive(Clone, Copy)]
struct SharedVTable {
    eq: fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool,
    clone: fn(&(dyn Any + Send + Sync)) -> BoxedValue,
}

fn erased_eq<T: SharedComponent>(a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn erased_clone<T: SharedComponent>(value: &(dyn Any + Send + Sync)) -> BoxedValue {
    match value.downcast_ref::<T>() {
        Some(v) => Box::new(v.clone()),
        None => Box::new(T::default()),
    }
}

impl SharedVTable {
    fn of<T: SharedComponent>() -> Self {
        Self {
            eq: erased_eq::<T>,
            clone: erased_clone::<T>,
        }
    }
}

struct SharedEntry {
    type_index: TypeIndex,
    hash: u64,
    value: Option<BoxedValue>,
    vtable: Option<SharedVTable>,
    refcount: u32,
    version: u32,
}

fn hash_value<T: Hash>(type_index: TypeIndex, value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    type_index.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

/// Shared-value table
pub struct SharedValueTable {
    entries: Vec<SharedEntry>,
    lookup: FxHashMap<u64, SmallVec<[u32; 2]>>,
}

impl Default for SharedValueTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedValueTable {
    pub fn new() -> Self {
        Self {
            entries: vec![SharedEntry {
                type_index: TypeIndex::ENTITY,
                hash: 0,
                value: None,
                vtable: None,
                refcount: 1,
                version: 1,
            }],
            lookup: FxHashMap::default(),
        }
    }

    /// Intern `value`. The default value is always index 0; any other value
    /// gains one reference.
    pub fn insert<T: SharedComponent>(&mut self, type_index: TypeIndex, value: T) -> SharedIndex {
        if value == T::default() {
            return SharedIndex::DEFAULT;
        }
        let hash = hash_value(type_index, &value);
        if let Some(found) = self.find(type_index, hash, &value, SharedVTable::of::<T>()) {
            self.entries[found.index()].refcount += 1;
            return found;
        }
        self.push(type_index, hash, Box::new(value), SharedVTable::of::<T>())
    }

    fn find(
        &self,
        type_index: TypeIndex,
        hash: u64,
        value: &(dyn Any + Send + Sync),
        vtable: SharedVTable,
    ) -> Option<SharedIndex> {
        let candidates = self.lookup.get(&hash)?;
        candidates
            .iter()
            .copied()
            .find(|&i| {
                let entry = &self.entries[i as usize];
                entry.type_index == type_index
                    && entry
                        .value
                        .as_deref()
                        .is_some_and(|stored| (vtable.eq)(stored, value))
            })
            .map(SharedIndex)
    }

    fn push(
        &mut self,
        type_index: TypeIndex,
        hash: u64,
        value: BoxedValue,
        vtable: SharedVTable,
    ) -> SharedIndex {
        let index = self.entries.len() as u32;
        self.entries.push(SharedEntry {
            type_index,
            hash,
            value: Some(value),
            vtable: Some(vtable),
            refcount: 1,
            version: 1,
        });
        self.lookup.entry(hash).or_default().push(index);
        SharedIndex(index)
    }

    /// Add a reference to a live index
    pub fn add_reference(&mut self, index: SharedIndex) {
        if index == SharedIndex::DEFAULT {
            return;
        }
        if let Some(entry) = self.entries.get_mut(index.index()) {
            entry.refcount += 1;
        }
    }

    /// Drop a reference. At zero the payload is freed and the value is no
    /// longer findable; the index stays retired.
    pub fn release(&mut self, index: SharedIndex) {
        if index == SharedIndex::DEFAULT {
            return;
        }
        let Some(entry) = self.entries.get_mut(index.index()) else {
            return;
        };
        debug_assert!(entry.refcount > 0, "shared index {} over-released", index.0);
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return;
        }
        entry.value = None;
        let hash = entry.hash;
        if let Some(list) = self.lookup.get_mut(&hash) {
            list.retain(|i| *i != index.0);
            if list.is_empty() {
                self.lookup.remove(&hash);
            }
        }
    }

    /// Value behind `index`. Index 0 yields `T::default()`; a released index
    /// or a type mismatch yields `None`.
    pub fn get<T: SharedComponent>(&self, index: SharedIndex) -> Option<T> {
        if index == SharedIndex::DEFAULT {
            return Some(T::default());
        }
        self.entries
            .get(index.index())?
            .value
            .as_deref()?
            .downcast_ref::<T>()
            .cloned()
    }

    pub fn refcount(&self, index: SharedIndex) -> u32 {
        self.entries.get(index.index()).map_or(0, |e| e.refcount)
    }

    pub fn type_of(&self, index: SharedIndex) -> Option<TypeIndex> {
        if index == SharedIndex::DEFAULT {
            return None;
        }
        self.entries.get(index.index()).map(|e| e.type_index)
    }

    /// Bumped whenever a chunk referencing this value is created or emptied
    pub fn version(&self, index: SharedIndex) -> u32 {
        self.entries.get(index.index()).map_or(0, |e| e.version)
    }

    pub(crate) fn bump_version(&mut self, index: SharedIndex) {
        if let Some(entry) = self.entries.get_mut(index.index()) {
            entry.version = entry.version.wrapping_add(1);
        }
    }

    /// Index of an already interned value, without adding a reference
    pub fn index_of<T: SharedComponent>(&self, type_index: TypeIndex, value: &T) -> Option<SharedIndex> {
        if *value == T::default() {
            return Some(SharedIndex::DEFAULT);
        }
        self.find(
            type_index,
            hash_value(type_index, value),
            value,
            SharedVTable::of::<T>(),
        )
    }

    /// Default value first, then every live value of the type in insertion order
    pub fn unique_values<T: SharedComponent>(&self, type_index: TypeIndex) -> Vec<T> {
        let mut values = vec![T::default()];
        values.extend(
            self.entries
                .iter()
                .skip(1)
                .filter(|e| e.type_index == type_index)
                .filter_map(|e| e.value.as_deref()?.downcast_ref::<T>().cloned()),
        );
        values
    }

    /// Number of live non-default values
    pub fn live_count(&self) -> usize {
        self.entries.iter().skip(1).filter(|e| e.value.is_some()).count()
    }

    /// Sum of references held on non-default values
    pub fn outstanding_references(&self) -> usize {
        self.entries
            .iter()
            .skip(1)
            .map(|e| e.refcount as usize)
            .sum()
    }

    /// Intern the value behind `index` into another table, adding one reference
    /// there.
    pub(crate) fn transfer(&self, index: SharedIndex, dst: &mut SharedValueTable) -> SharedIndex {
        if index == SharedIndex::DEFAULT {
            return SharedIndex::DEFAULT;
        }
        let Some(entry) = self.entries.get(index.index()) else {
            return SharedIndex::DEFAULT;
        };
        let (Some(value), Some(vtable)) = (entry.value.as_deref(), entry.vtable) else {
            return SharedIndex::DEFAULT;
        };
        if let Some(found) = dst.find(entry.type_index, entry.hash, value, vtable) {
            dst.entries[found.index()].refcount += 1;
            return found;
        }
        dst.push(entry.type_index, entry.hash, (vtable.clone)(value), vtable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Hash)]
    struct Team(u32);
    impl SharedComponent for Team {}

    #[derive(Debug, Clone, Default, PartialEq, Hash)]
    struct Layer(u32);
    impl SharedComponent for Layer {}

    const TEAM: TypeIndex = TypeIndex(900);
    const LAYER: TypeIndex = TypeIndex(901);

    #[test]
    fn test_insert_same_value_dedups() {
        let mut table = SharedValueTable::new();
        let a = table.insert(TEAM, Team(3));
        let b = table.insert(TEAM, Team(3));
        assert_eq!(a, b);
        assert_eq!(table.refcount(a), 2);

        table.release(a);
        assert_eq!(table.refcount(a), 1);
        table.release(b);
        assert_eq!(table.refcount(a), 0);
        assert_eq!(table.get::<Team>(a), None);
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_default_is_index_zero() {
        let mut table = SharedValueTable::new();
        for _ in 0..5 {
            assert_eq!(table.insert(TEAM, Team::default()), SharedIndex::DEFAULT);
        }
        table.release(SharedIndex::DEFAULT);
        assert_eq!(table.refcount(SharedIndex::DEFAULT), 1);
        assert_eq!(table.get::<Team>(SharedIndex::DEFAULT), Some(Team(0)));
    }

    #[test]
    fn test_released_index_not_recycled() {
        let mut table = SharedValueTable::new();
        let a = table.insert(TEAM, Team(1));
        table.release(a);
        let b = table.insert(TEAM, Team(1));
        assert_ne!(a, b);
        assert_eq!(table.get::<Team>(b), Some(Team(1)));
    }

    #[test]
    fn test_types_do_not_collide() {
        let mut table = SharedValueTable::new();
        let team = table.insert(TEAM, Team(7));
        let layer = table.insert(LAYER, Layer(7));
        assert_ne!(team, layer);
        assert_eq!(table.get::<Layer>(team), None);
        assert_eq!(table.unique_values::<Team>(TEAM), vec![Team(0), Team(7)]);
    }

    #[test]
    fn test_transfer_reuses_existing_value() {
        let mut src = SharedValueTable::new();
        let mut dst = SharedValueTable::new();
        let existing = dst.insert(TEAM, Team(9));
        let idx = src.insert(TEAM, Team(9));
        let moved = src.transfer(idx, &mut dst);
        assert_eq!(moved, existing);
        assert_eq!(dst.refcount(existing), 2);
        assert_eq!(src.transfer(SharedIndex::DEFAULT, &mut dst), SharedIndex::DEFAULT);
    }
}
