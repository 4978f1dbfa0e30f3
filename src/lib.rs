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

//! Chunked ECS - archetype storage engine
//!
//! Entities of the same component layout live together in fixed 16 KiB
//! chunks with one packed array per component type. Groups select
//! archetypes by required and excluded types and expose chunk-spanning
//! component arrays. Per-type dependency fences order background jobs
//! against each other and against structural changes.

pub mod archetype;
pub mod chunk;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod fence;
pub mod group;
pub mod job;
pub mod managed;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod prelude;
#[cfg(feature = "profiling")]
pub mod profiling;
pub mod query;
pub mod shared;
pub mod storage;
pub mod transaction;
pub mod type_registry;
pub mod utils;
pub mod world;

#[cfg(test)]
mod tests;

pub use archetype::{Archetype, ArchetypeId, ArchetypeTable};
pub use chunk::{ChunkId, CHUNK_SIZE};
pub use command::{Command, CommandBuffer};
pub use component::{
    AccessMode, Component, ComponentSet, ComponentType, ManagedComponent, SharedComponent,
};
pub use config::WorldConfig;
pub use entity::{Entity, EntityLocation};
pub use error::{EcsError, Result, SpawnError};
pub use fence::ComponentFences;
pub use group::{GroupData, GroupId, SharedFilter};
pub use job::{JobCompleter, JobHandle};
pub use managed::{DirtyFlag, ManagedObjectListener};
pub use query::{ComponentArray, ComponentArrayMut, EntityArray, GroupChunk, SharedIndexArray};
pub use shared::SharedIndex;
pub use storage::Storage;
pub use transaction::EntityTransaction;
pub use type_registry::{ComponentCategory, TypeIndex, TypeRegistry};
pub use world::World;
