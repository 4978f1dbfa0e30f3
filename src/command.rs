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

//! Deferred structural commands
//!
//! Producer tasks record commands into 8-byte aligned, variable-length
//! records; the structural thread replays them in order with
//! [`CommandBuffer::playback`].
//!
//! Record layout, all fields `u32`:
//!
//! ```text
//! [opcode][total_size] [entity.index][entity.generation]? [archetype][0]?
//! [type_index][size][payload, padded to 8]?
//! ```

use std::mem;
use std::ptr;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::ArchetypeId;
use crate::component::Component;
use crate::config::WorldConfig;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::type_registry::{TypeIndex, TypeRegistry};
use crate::utils::align_to;
use crate::world::World;

const RECORD_ALIGN: usize = 8;
const HEADER_SIZE: usize = 8;
const ENTITY_SIZE: usize = 8;
const ARCHETYPE_SIZE: usize = 8;
const COMPONENT_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Opcode {
    CreateEntity = 1,
    DestroyEntity = 2,
    AddComponent = 3,
    SetComponent = 4,
    RemoveComponent = 5,
    AddComponentToCreated = 6,
    SetComponentOnCreated = 7,
}

impl Opcode {
    fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Opcode::CreateEntity,
            2 => Opcode::DestroyEntity,
            3 => Opcode::AddComponent,
            4 => Opcode::SetComponent,
            5 => Opcode::RemoveComponent,
            6 => Opcode::AddComponentToCreated,
            7 => Opcode::SetComponentOnCreated,
            _ => return None,
        })
    }

    fn has_entity(self) -> bool {
        matches!(
            self,
            Opcode::DestroyEntity
                | Opcode::AddComponent
                | Opcode::SetComponent
                | Opcode::RemoveComponent
        )
    }

    fn has_component(self) -> bool {
        !matches!(self, Opcode::CreateEntity | Opcode::DestroyEntity)
    }
}

/// Decoded command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateEntity(ArchetypeId),
    DestroyEntity(Entity),
    AddComponent { entity: Entity, type_index: TypeIndex },
    SetComponent { entity: Entity, type_index: TypeIndex },
    RemoveComponent { entity: Entity, type_index: TypeIndex },
    /// Targets the entity of the last `CreateEntity`
    AddComponentToCreated { type_index: TypeIndex },
    /// Targets the entity of the last `CreateEntity`
    SetComponentOnCreated { type_index: TypeIndex },
}

/// A decoded record plus where its payload lives
struct Record {
    command: Command,
    payload: *const u8,
    payload_len: usize,
}

struct Block {
    words: Vec<u64>,
    used: usize,
}

impl Block {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            words: vec![0; bytes / RECORD_ALIGN],
            used: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.words.len() * RECORD_ALIGN
    }

    fn base(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    fn base_mut(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }
}

/// Growable buffer of deferred commands
pub struct CommandBuffer {
    blocks: Vec<Block>,
    min_block_size: usize,
    len: usize,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::with_block_size(WorldConfig::default().command_block_size)
    }

    pub fn with_config(config: &WorldConfig) -> Self {
        Self::with_block_size(config.command_block_size)
    }

    /// Blocks are at least `block_size` bytes; larger records get their own block
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            min_block_size: align_to(block_size.max(RECORD_ALIGN), RECORD_ALIGN),
            len: 0,
        }
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes used by records
    pub fn byte_len(&self) -> usize {
        self.blocks.iter().map(|b| b.used).sum()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }

    /// Space for one record of `size` bytes, 8-byte aligned
    fn reserve(&mut self, size: usize) -> *mut u8 {
        let needs_block = match self.blocks.last() {
            Some(block) => block.capacity() - block.used < size,
            None => true,
        };
        if needs_block {
            self.blocks
                .push(Block::with_capacity(self.min_block_size.max(size)));
        }
        let block = match self.blocks.last_mut() {
            Some(block) => block,
            None => unreachable!("a block was just pushed"),
        };
        // SAFETY: `used + size <= capacity` was ensured above.
        let ptr = unsafe { block.base_mut().add(block.used) };
        block.used += size;
        ptr
    }

    fn record(
        &mut self,
        opcode: Opcode,
        entity: Option<Entity>,
        archetype: Option<ArchetypeId>,
        component: Option<(TypeIndex, *const u8, usize)>,
    ) {
        let payload_len = component.map_or(0, |(_, _, len)| len);
        let size = HEADER_SIZE
            + entity.map_or(0, |_| ENTITY_SIZE)
            + archetype.map_or(0, |_| ARCHETYPE_SIZE)
            + component.map_or(0, |_| COMPONENT_HEADER_SIZE + align_to(payload_len, RECORD_ALIGN));
        let base = self.reserve(size);

        // SAFETY: `base` is 8-aligned with `size` writable bytes; every field
        // write stays inside that range.
        unsafe {
            let mut cursor = base.cast::<u32>();
            let mut put = |value: u32| {
                cursor.write(value);
                cursor = cursor.add(1);
            };
            put(opcode as u32);
            put(size as u32);
            if let Some(entity) = entity {
                put(entity.index());
                put(entity.generation());
            }
            if let Some(archetype) = archetype {
                put(archetype.0);
                put(0);
            }
            if let Some((type_index, src, len)) = component {
                put(type_index.0);
                put(len as u32);
                if len > 0 {
                    ptr::copy_nonoverlapping(src, cursor.cast::<u8>(), len);
                }
            }
        }
        self.len += 1;
    }

    fn record_value<T: Component>(&mut self, opcode: Opcode, entity: Option<Entity>, value: T) -> Result<()> {
        let type_index = TypeRegistry::global().component_index::<T>()?;
        let src = (&value as *const T).cast::<u8>();
        self.record(
            opcode,
            entity,
            None,
            Some((type_index, src, mem::size_of::<T>())),
        );
        Ok(())
    }

    /// Create an entity; later `*_created` commands target it
    pub fn create_entity(&mut self, archetype: ArchetypeId) {
        self.record(Opcode::CreateEntity, None, Some(archetype), None);
    }

    pub fn destroy_entity(&mut self, entity: Entity) {
        self.record(Opcode::DestroyEntity, Some(entity), None, None);
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.record_value(Opcode::AddComponent, Some(entity), value)
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.record_value(Opcode::SetComponent, Some(entity), value)
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let type_index = TypeRegistry::global().component_index::<T>()?;
        self.record(
            Opcode::RemoveComponent,
            Some(entity),
            None,
            Some((type_index, ptr::null(), 0)),
        );
        Ok(())
    }

    pub fn add_component_to_created<T: Component>(&mut self, value: T) -> Result<()> {
        self.record_value(Opcode::AddComponentToCreated, None, value)
    }

    pub fn set_component_on_created<T: Component>(&mut self, value: T) -> Result<()> {
        self.record_value(Opcode::SetComponentOnCreated, None, value)
    }

    fn decode(block: &Block, offset: usize) -> Result<Record> {
        let corrupt = |what: &str| EcsError::CommandError(format!("{what} at byte {offset}"));
        if offset + HEADER_SIZE > block.used {
            return Err(corrupt("truncated header"));
        }
        // SAFETY: reads below stay under `block.used` (checked against the
        // record's total size) and are 4-byte aligned.
        unsafe {
            let mut cursor = block.base().add(offset).cast::<u32>();
            let mut take = || {
                let value = cursor.read();
                cursor = cursor.add(1);
                value
            };
            let opcode = Opcode::from_u32(take()).ok_or_else(|| corrupt("unknown opcode"))?;
            let size = take() as usize;
            if size < HEADER_SIZE || size % RECORD_ALIGN != 0 || offset + size > block.used {
                return Err(corrupt("bad record size"));
            }
            let expected = HEADER_SIZE
                + if opcode.has_entity() { ENTITY_SIZE } else { 0 }
                + if opcode == Opcode::CreateEntity { ARCHETYPE_SIZE } else { 0 }
                + if opcode.has_component() { COMPONENT_HEADER_SIZE } else { 0 };
            if size < expected {
                return Err(corrupt("record too short"));
            }

            let entity = opcode.has_entity().then(|| {
                let index = take();
                Entity::new(index, take())
            });
            let archetype = (opcode == Opcode::CreateEntity).then(|| {
                let id = take();
                take();
                ArchetypeId(id)
            });
            let (type_index, payload_len) = if opcode.has_component() {
                (TypeIndex(take()), take() as usize)
            } else {
                (TypeIndex::ENTITY, 0)
            };
            if expected + align_to(payload_len, RECORD_ALIGN) != size {
                return Err(corrupt("payload size mismatch"));
            }
            let payload = cursor.cast::<u8>();

            let entity = entity.unwrap_or(Entity::NULL);
            let command = match opcode {
                Opcode::CreateEntity => Command::CreateEntity(archetype.unwrap_or(ArchetypeId(0))),
                Opcode::DestroyEntity => Command::DestroyEntity(entity),
                Opcode::AddComponent => Command::AddComponent { entity, type_index },
                Opcode::SetComponent => Command::SetComponent { entity, type_index },
                Opcode::RemoveComponent => Command::RemoveComponent { entity, type_index },
                Opcode::AddComponentToCreated => Command::AddComponentToCreated { type_index },
                Opcode::SetComponentOnCreated => Command::SetComponentOnCreated { type_index },
            };
            Ok(Record {
                command,
                payload,
                payload_len,
            })
        }
    }

    fn record_size(block: &Block, offset: usize) -> usize {
        // SAFETY: called only after `decode` validated the header.
        unsafe { block.base().add(offset + 4).cast::<u32>().read() as usize }
    }

    /// Decoded commands in recorded order
    pub fn commands(&self) -> Result<Vec<Command>> {
        let mut out = Vec::with_capacity(self.len);
        for block in &self.blocks {
            let mut offset = 0;
            while offset < block.used {
                out.push(Self::decode(block, offset)?.command);
                offset += Self::record_size(block, offset);
            }
        }
        Ok(out)
    }

    /// Replay every command against `world` in recorded order, then clear.
    /// Stops at the first failing command; the remaining ones are dropped.
    pub fn playback(&mut self, world: &mut World) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = info_span!("command_buffer.playback", commands = self.len);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let blocks = mem::take(&mut self.blocks);
        self.len = 0;
        let mut created: Option<Entity> = None;
        for block in &blocks {
            let mut offset = 0;
            while offset < block.used {
                let record = Self::decode(block, offset)?;
                Self::apply(world, &record, &mut created)?;
                offset += Self::record_size(block, offset);
            }
        }
        Ok(())
    }

    fn apply(world: &mut World, record: &Record, created: &mut Option<Entity>) -> Result<()> {
        let last_created = || {
            created.ok_or_else(|| {
                EcsError::CommandError("no entity created before an implicit command".into())
            })
        };
        let (payload, len) = (record.payload, record.payload_len);
        // SAFETY: payloads were copied from live values of the recorded type.
        unsafe {
            match record.command {
                Command::CreateEntity(archetype) => {
                    *created = Some(world.create_entity(archetype)?);
                }
                Command::DestroyEntity(entity) => world.destroy_entity(entity)?,
                Command::AddComponent { entity, type_index } => {
                    world.add_component_raw(entity, type_index, payload, len)?
                }
                Command::SetComponent { entity, type_index } => {
                    world.set_component_raw(entity, type_index, payload, len)?
                }
                Command::RemoveComponent { entity, type_index } => {
                    world.remove_component_index(entity, type_index)?
                }
                Command::AddComponentToCreated { type_index } => {
                    world.add_component_raw(last_created()?, type_index, payload, len)?
                }
                Command::SetComponentOnCreated { type_index } => {
                    world.set_component_raw(last_created()?, type_index, payload, len)?
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("commands", &self.len)
            .field("blocks", &self.blocks.len())
            .field("bytes", &self.byte_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Hp(u16);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Big([u64; 32]);

    #[test]
    fn test_records_are_aligned_and_ordered() {
        let mut buffer = CommandBuffer::with_block_size(64);
        let e = Entity::new(3, 1);
        buffer.add_component(e, Hp(5)).unwrap();
        buffer.destroy_entity(e);
        buffer.add_component_to_created(Big::default()).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.byte_len() % RECORD_ALIGN, 0);
        assert!(buffer.blocks.len() >= 2);

        let hp = TypeRegistry::global().component_index::<Hp>().unwrap();
        let big = TypeRegistry::global().component_index::<Big>().unwrap();
        assert_eq!(
            buffer.commands().unwrap(),
            vec![
                Command::AddComponent {
                    entity: e,
                    type_index: hp
                },
                Command::DestroyEntity(e),
                Command::AddComponentToCreated { type_index: big },
            ]
        );
    }

    #[test]
    fn test_implicit_command_without_create_fails() {
        let mut world = World::new();
        let mut buffer = CommandBuffer::new();
        buffer.set_component_on_created(Hp(1)).unwrap();
        assert!(matches!(
            buffer.playback(&mut world),
            Err(EcsError::CommandError(_))
        ));
        assert!(buffer.is_empty());
    }
}
