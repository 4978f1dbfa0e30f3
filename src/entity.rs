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

//! Entity handles and the entity address table

use serde::{Deserialize, Serialize};

use crate::archetype::{ArchetypeId, ArchetypeTable};
use crate::chunk::ChunkId;
use crate::error::{EcsError, Result, SpawnError};

/// Generational entity handle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Never refers to a live entity, generations start at 1
    pub const NULL: Entity = Entity {
        index: 0,
        generation: 0,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Entity location in storage (archetype, chunk, index in chunk)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub chunk: ChunkId,
    pub index_in_chunk: usize,
}

const FREE_LIST_END: u32 = u32::MAX;

/// Largest usable entity index
const MAX_ENTITY_INDEX: usize = FREE_LIST_END as usize - 1;

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Vacant { next_free: u32 },
    Occupied(EntityLocation),
}

#[derive(Debug, Clone, Copy)]
struct EntitySlot {
    generation: u32,
    state: SlotState,
}

/// Dense index → location table with an intrusive free list
pub struct EntityTable {
    slots: Vec<EntitySlot>,
    free_head: u32,
    live: usize,
}

impl EntityTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut table = Self {
            slots: Vec::new(),
            free_head: FREE_LIST_END,
            live: 0,
        };
        table.grow_to(capacity.max(1));
        table
    }

    /// Number of slots, live or free
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Grow to at least `capacity` slots. Never shrinks.
    pub fn reserve_capacity(&mut self, capacity: usize) {
        if capacity > self.slots.len() {
            self.grow_to(capacity);
        }
    }

    fn grow_to(&mut self, capacity: usize) {
        let capacity = capacity.min(MAX_ENTITY_INDEX + 1);
        let start = self.slots.len();
        if capacity <= start {
            return;
        }
        self.slots.reserve_exact(capacity - start);
        for i in start..capacity {
            let next_free = if i + 1 == capacity {
                self.free_head
            } else {
                (i + 1) as u32
            };
            self.slots.push(EntitySlot {
                generation: 1,
                state: SlotState::Vacant { next_free },
            });
        }
        self.free_head = start as u32;
    }

    /// O(1) generation check
    pub fn exists(&self, entity: Entity) -> bool {
        match self.slots.get(entity.index as usize) {
            Some(slot) => {
                slot.generation == entity.generation
                    && matches!(slot.state, SlotState::Occupied(_))
            }
            None => false,
        }
    }

    /// Current location of a live entity
    pub fn location(&self, entity: Entity) -> Result<EntityLocation> {
        let slot = self
            .slots
            .get(entity.index as usize)
            .ok_or(EcsError::EntityNotFound)?;
        crate::error::ecs_check!(slot.generation == entity.generation, EcsError::EntityNotFound);
        match slot.state {
            SlotState::Occupied(location) => Ok(location),
            SlotState::Vacant { .. } => Err(EcsError::EntityNotFound),
        }
    }

    /// Handle currently stored at `index`, if live
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        let slot = self.slots.get(index as usize)?;
        match slot.state {
            SlotState::Occupied(_) => Some(Entity::new(index, slot.generation)),
            SlotState::Vacant { .. } => None,
        }
    }

    /// Fails when `count` more handles would exhaust the index space
    pub(crate) fn ensure_room(&self, count: usize) -> Result<()> {
        if self.live + count > MAX_ENTITY_INDEX {
            return Err(SpawnError::EntityCapacityExhausted {
                attempted: self.live + count,
                capacity: MAX_ENTITY_INDEX,
            }
            .into());
        }
        Ok(())
    }

    /// Pop `count` free slots and place them at consecutive chunk indices
    /// starting from `base_index`. New handles are appended to `out`.
    pub(crate) fn allocate(
        &mut self,
        archetype: ArchetypeId,
        chunk: ChunkId,
        base_index: usize,
        count: usize,
        out: &mut Vec<Entity>,
    ) -> Result<()> {
        self.ensure_room(count)?;
        out.reserve(count);
        for i in 0..count {
            if self.free_head == FREE_LIST_END {
                let doubled = (self.slots.len() * 2).max(16);
                self.grow_to(doubled);
            }
            let index = self.free_head;
            let slot = &mut self.slots[index as usize];
            self.free_head = match slot.state {
                SlotState::Vacant { next_free } => next_free,
                SlotState::Occupied(_) => {
                    return Err(EcsError::InconsistentStorage(format!(
                        "free list points at live slot {index}"
                    )))
                }
            };
            slot.state = SlotState::Occupied(EntityLocation {
                archetype,
                chunk,
                index_in_chunk: base_index + i,
            });
            out.push(Entity::new(index, slot.generation));
        }
        self.live += count;
        Ok(())
    }

    pub(crate) fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        if let Some(slot) = self.slots.get_mut(entity.index as usize) {
            slot.state = SlotState::Occupied(location);
        }
    }

    fn release_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        slot.state = SlotState::Vacant {
            next_free: self.free_head,
        };
        self.free_head = index;
        self.live -= 1;
    }

    /// Free the longest prefix of `entities` that sits at consecutive indices of
    /// one chunk. Returns where the run started and how long it is.
    pub(crate) fn deallocate_run(&mut self, entities: &[Entity]) -> Result<(EntityLocation, usize)> {
        let first = match entities.first() {
            Some(&entity) => self.location(entity)?,
            None => return Err(EcsError::EntityNotFound),
        };

        let mut run = 0;
        for (i, &entity) in entities.iter().enumerate() {
            let Ok(location) = self.location(entity) else {
                break;
            };
            if location.chunk != first.chunk || location.index_in_chunk != first.index_in_chunk + i
            {
                break;
            }
            run += 1;
        }

        for &entity in &entities[..run] {
            self.release_slot(entity.index);
        }
        Ok((first, run))
    }

    /// Iterate live handles in index order
    pub fn iter(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot.state {
                SlotState::Occupied(location) => {
                    Some((Entity::new(index as u32, slot.generation), location))
                }
                SlotState::Vacant { .. } => None,
            })
    }

    /// Verify that every live slot round-trips through its chunk's entity column
    /// and that the free list covers exactly the vacant slots.
    pub fn check_internal_consistency(&self, archetypes: &ArchetypeTable) -> Result<usize> {
        let mut live = 0;
        for (entity, location) in self.iter() {
            live += 1;
            let chunk = archetypes.chunk(location.chunk).ok_or_else(|| {
                EcsError::InconsistentStorage(format!("{entity:?} points at a released chunk"))
            })?;
            if chunk.archetype() != location.archetype || location.index_in_chunk >= chunk.count() {
                return Err(EcsError::InconsistentStorage(format!(
                    "{entity:?} location {location:?} is outside its chunk"
                )));
            }
            let stored = archetypes.entity_at(location.chunk, location.index_in_chunk);
            if stored != entity {
                return Err(EcsError::InconsistentStorage(format!(
                    "{entity:?} chunk slot holds {stored:?}"
                )));
            }
        }

        let mut free = 0;
        let mut cursor = self.free_head;
        while cursor != FREE_LIST_END {
            free += 1;
            if free > self.slots.len() {
                return Err(EcsError::InconsistentStorage("free list has a cycle".into()));
            }
            cursor = match self.slots[cursor as usize].state {
                SlotState::Vacant { next_free } => next_free,
                SlotState::Occupied(_) => {
                    return Err(EcsError::InconsistentStorage(format!(
                        "free list reaches live slot {cursor}"
                    )))
                }
            };
        }

        if live != self.live || live + free != self.slots.len() {
            return Err(EcsError::InconsistentStorage(format!(
                "{live} live + {free} free slots, table has {} slots and counts {} live",
                self.slots.len(),
                self.live
            )));
        }
        let archetype_total: usize = archetypes.iter().map(|a| a.entity_count()).sum();
        if archetype_total != live {
            return Err(EcsError::InconsistentStorage(format!(
                "archetypes hold {archetype_total} entities, address table holds {live}"
            )));
        }
        Ok(live)
    }
}
