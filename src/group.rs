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

//! Groups: cached, incrementally maintained archetype matches
//!
//! A group is keyed by its sorted component types and an optional pinned
//! shared value. Every archetype created after the group is tested once in
//! [`GroupRegistry::on_archetype_created`].

use std::hash::{Hash, Hasher};

use ahash::AHashMap;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeId, ArchetypeTable};
use crate::component::{AccessMode, ComponentType};
use crate::error::{EcsError, Result};
use crate::shared::{SharedIndex, SharedValueTable};
use crate::type_registry::{ComponentCategory, TypeIndex, TypeRegistry};

/// Handle of a group inside one world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shared value every matched chunk must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedFilter {
    pub type_index: TypeIndex,
    pub value: SharedIndex,
}

/// One archetype matched by a group
#[derive(Debug, Clone)]
pub struct MatchingArchetype {
    pub archetype: ArchetypeId,
    /// Position in the archetype of each required type, in group order
    pub type_positions: SmallVec<[usize; 8]>,
    /// Footer slot of the filter type
    pub filter_slot: Option<usize>,
}

/// Group definition and its matches
#[derive(Debug)]
pub struct GroupData {
    id: GroupId,
    types: SmallVec<[ComponentType; 8]>,
    filter: Option<SharedFilter>,
    matches: Vec<MatchingArchetype>,
    reader_types: SmallVec<[TypeIndex; 8]>,
    writer_types: SmallVec<[TypeIndex; 8]>,
}

impl GroupData {
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Sorted component types, subtractive ones included
    pub fn types(&self) -> &[ComponentType] {
        &self.types
    }

    /// Types an entity must have, in the order used by `type_positions`
    pub fn required(&self) -> impl Iterator<Item = &ComponentType> {
        self.types
            .iter()
            .filter(|t| t.access != AccessMode::Subtractive)
    }

    /// Index of `type_index` among the required types
    pub fn required_position(&self, type_index: TypeIndex) -> Option<usize> {
        self.required().position(|t| t.type_index == type_index)
    }

    pub fn filter(&self) -> Option<SharedFilter> {
        self.filter
    }

    pub fn matches(&self) -> &[MatchingArchetype] {
        &self.matches
    }

    /// Plain types the group reads
    pub fn reader_types(&self) -> &[TypeIndex] {
        &self.reader_types
    }

    /// Plain types the group writes
    pub fn writer_types(&self) -> &[TypeIndex] {
        &self.writer_types
    }

    /// Merge-walk subset test with exclusions
    fn match_archetype(&self, archetype: &Archetype) -> Option<MatchingArchetype> {
        let arch_types = archetype.types();
        let mut positions = SmallVec::new();
        let mut i = 0;
        for component in &self.types {
            while i < arch_types.len() && arch_types[i] < component.type_index {
                i += 1;
            }
            let present = i < arch_types.len() && arch_types[i] == component.type_index;
            match (component.access, present) {
                (AccessMode::Subtractive, true) => return None,
                (AccessMode::Subtractive, false) => {}
                (_, true) => positions.push(i),
                (_, false) => return None,
            }
        }

        let filter_slot = match self.filter {
            Some(filter) => {
                let position = archetype.position_of(filter.type_index)?;
                Some(archetype.column(position).shared_slot?)
            }
            None => None,
        };

        Some(MatchingArchetype {
            archetype: archetype.id(),
            type_positions: positions,
            filter_slot,
        })
    }

    /// Number of entities the group currently sees
    pub fn len(&self, archetypes: &ArchetypeTable) -> usize {
        match self.filter {
            None => self
                .matches
                .iter()
                .map(|m| archetypes.archetype(m.archetype).entity_count())
                .sum(),
            Some(filter) => self
                .matches
                .iter()
                .flat_map(|m| {
                    let slot = m.filter_slot;
                    archetypes
                        .archetype(m.archetype)
                        .chunks()
                        .iter()
                        .map(move |&id| (id, slot))
                })
                .filter_map(|(id, slot)| {
                    let chunk = archetypes.chunk(id)?;
                    (chunk.shared_index(slot?) == filter.value).then_some(chunk.count())
                })
                .sum(),
        }
    }

    pub fn is_empty(&self, archetypes: &ArchetypeTable) -> bool {
        self.len(archetypes) == 0
    }
}

fn group_key(types: &[ComponentType], filter: Option<SharedFilter>) -> u64 {
    let mut hasher = FxHasher::default();
    types.hash(&mut hasher);
    filter.hash(&mut hasher);
    hasher.finish()
}

/// Sort, drop the implicit Entity type, reject duplicates.
fn canonical_group_types(
    types: &[ComponentType],
    filter: Option<SharedFilter>,
) -> Result<SmallVec<[ComponentType; 8]>> {
    let mut list: SmallVec<[ComponentType; 8]> = types
        .iter()
        .copied()
        .filter(|t| t.type_index != TypeIndex::ENTITY)
        .collect();
    if let Some(filter) = filter {
        if !list.iter().any(|t| t.type_index == filter.type_index) {
            list.push(ComponentType::from_index(filter.type_index).with_access(AccessMode::ReadOnly));
        }
    }
    list.sort_unstable_by_key(|t| t.type_index);
    for pair in list.windows(2) {
        if pair[0].type_index == pair[1].type_index {
            return Err(EcsError::DuplicateComponent {
                component: TypeRegistry::global().name(pair[0].type_index),
            });
        }
    }
    Ok(list)
}

/// All groups of one world
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: Vec<GroupData>,
    lookup: AHashMap<u64, SmallVec<[GroupId; 2]>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, id: GroupId) -> Option<&GroupData> {
        self.groups.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupData> {
        self.groups.iter()
    }

    /// Find the group for `types` and `filter`, creating it by testing every
    /// existing archetype. A new filtered group keeps a reference on its value.
    pub(crate) fn get_or_create(
        &mut self,
        types: &[ComponentType],
        filter: Option<SharedFilter>,
        archetypes: &ArchetypeTable,
        shared_values: &mut SharedValueTable,
    ) -> Result<GroupId> {
        let types = canonical_group_types(types, filter)?;
        let key = group_key(&types, filter);
        if let Some(candidates) = self.lookup.get(&key) {
            for &id in candidates {
                let group = &self.groups[id.index()];
                if group.types == types && group.filter == filter {
                    return Ok(id);
                }
            }
        }

        let registry = TypeRegistry::global();
        let mut reader_types = SmallVec::new();
        let mut writer_types = SmallVec::new();
        for component in &types {
            if !registry.category(component.type_index).requires_fence() {
                continue;
            }
            match component.access {
                AccessMode::ReadOnly => reader_types.push(component.type_index),
                AccessMode::ReadWrite => writer_types.push(component.type_index),
                AccessMode::Subtractive => {}
            }
        }

        if let Some(filter) = filter {
            if registry.category(filter.type_index) != ComponentCategory::Shared {
                return Err(EcsError::ComponentCategoryMismatch {
                    component: registry.name(filter.type_index),
                    registered: registry.category(filter.type_index),
                    requested: ComponentCategory::Shared,
                });
            }
            shared_values.add_reference(filter.value);
        }

        let id = GroupId(self.groups.len() as u32);
        let mut group = GroupData {
            id,
            types,
            filter,
            matches: Vec::new(),
            reader_types,
            writer_types,
        };
        group.matches = archetypes
            .iter()
            .filter_map(|archetype| group.match_archetype(archetype))
            .collect();
        tracing::debug!(group = id.0, matches = group.matches.len(), "created group");

        self.groups.push(group);
        self.lookup.entry(key).or_default().push(id);
        Ok(id)
    }

    /// Offer a new archetype to every group
    pub(crate) fn on_archetype_created(&mut self, archetype: &Archetype) {
        for group in &mut self.groups {
            if let Some(matched) = group.match_archetype(archetype) {
                group.matches.push(matched);
            }
        }
    }

    /// Release the references pinned by filtered groups
    pub(crate) fn release_filters(&mut self, shared_values: &mut SharedValueTable) {
        for group in &mut self.groups {
            if let Some(filter) = group.filter.take() {
                shared_values.release(filter.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::canonical_type_list;

    #[derive(Debug, Clone, Copy, Default)]
    struct Health(u32);

    #[derive(Debug, Clone, Copy, Default)]
    struct Armor(u32);

    #[derive(Debug, Clone, Copy, Default)]
    struct Frozen;

    fn archetype(table: &mut ArchetypeTable, types: &[TypeIndex]) -> ArchetypeId {
        let list = canonical_type_list(types.iter().copied()).unwrap();
        match table.find(&list) {
            Some(id) => id,
            None => table.create(&list).unwrap(),
        }
    }

    #[test]
    fn test_group_identity_ignores_order() {
        let h = ComponentType::of::<Health>().unwrap();
        let a = ComponentType::read_only::<Armor>().unwrap();
        let table = ArchetypeTable::with_capacity(4);
        let mut shared = SharedValueTable::new();
        let mut groups = GroupRegistry::new();
        let first = groups.get_or_create(&[h, a], None, &table, &mut shared).unwrap();
        let second = groups.get_or_create(&[a, h], None, &table, &mut shared).unwrap();
        assert_eq!(first, second);
        assert_eq!(groups.len(), 1);

        let group = groups.get(first).unwrap();
        assert_eq!(group.writer_types(), &[h.type_index]);
        assert_eq!(group.reader_types(), &[a.type_index]);
    }

    #[test]
    fn test_matches_supersets_and_honors_exclusion() {
        let h = ComponentType::of::<Health>().unwrap();
        let a = ComponentType::of::<Armor>().unwrap();
        let f = ComponentType::of::<Frozen>().unwrap();
        let mut table = ArchetypeTable::with_capacity(4);
        let mut shared = SharedValueTable::new();
        let mut groups = GroupRegistry::new();

        let only_h = archetype(&mut table, &[h.type_index]);
        let with_a = archetype(&mut table, &[h.type_index, a.type_index]);
        let frozen = archetype(&mut table, &[h.type_index, f.type_index]);
        let _only_a = archetype(&mut table, &[a.type_index]);

        let id = groups
            .get_or_create(&[h, f.exclude()], None, &table, &mut shared)
            .unwrap();
        let matched: Vec<_> = groups.get(id).unwrap().matches().iter().map(|m| m.archetype).collect();
        assert_eq!(matched, vec![only_h, with_a]);
        assert!(!matched.contains(&frozen));

        let both = archetype(&mut table, &[h.type_index, a.type_index, f.type_index]);
        let late = archetype(&mut table, &[h.type_index, a.type_index, TypeIndex::ENTITY]);
        assert_eq!(late, with_a);
        let arch = table.archetype(both);
        groups.on_archetype_created(arch);
        assert_eq!(groups.get(id).unwrap().matches().len(), 2);
    }

    #[test]
    fn test_type_positions_follow_group_order() {
        let h = ComponentType::of::<Health>().unwrap();
        let a = ComponentType::of::<Armor>().unwrap();
        let mut table = ArchetypeTable::with_capacity(4);
        let mut shared = SharedValueTable::new();
        let mut groups = GroupRegistry::new();
        let id = archetype(&mut table, &[h.type_index, a.type_index]);
        let group_id = groups.get_or_create(&[a, h], None, &table, &mut shared).unwrap();
        let group = groups.get(group_id).unwrap();
        let arch = table.archetype(id);
        let matched = &group.matches()[0];
        for (component, &position) in group.required().zip(&matched.type_positions) {
            assert_eq!(arch.types()[position], component.type_index);
        }
    }

    #[test]
    fn test_duplicate_group_type_rejected() {
        let h = ComponentType::of::<Health>().unwrap();
        let table = ArchetypeTable::with_capacity(4);
        let mut shared = SharedValueTable::new();
        let mut groups = GroupRegistry::new();
        assert!(matches!(
            groups.get_or_create(&[h, h.exclude()], None, &table, &mut shared),
            Err(EcsError::DuplicateComponent { .. })
        ));
    }
}
