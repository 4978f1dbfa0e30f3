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

//! Exclusive entity transactions
//!
//! While a transaction is open the per-type fences are suspended and one task
//! owns the storage tables. The transaction can only use archetypes that
//! already exist, so no group has to be updated from the task.

use crate::archetype::ArchetypeId;
use crate::component::{Component, ComponentSet};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::fence::ComponentFences;
use crate::job::JobHandle;
use crate::storage::Storage;
use crate::type_registry::TypeIndex;

/// Exclusive access to a world's tables, usable from another thread
pub struct EntityTransaction<'w> {
    storage: &'w mut Storage,
    fences: &'w ComponentFences,
}

impl<'w> EntityTransaction<'w> {
    pub(crate) fn new(storage: &'w mut Storage, fences: &'w ComponentFences) -> Self {
        Self { storage, fences }
    }

    /// Handle every task using this transaction must wait for
    pub fn dependency(&self) -> JobHandle {
        self.fences.transaction_dependency()
    }

    /// Register the task doing the transaction's work; it must depend on
    /// [`dependency`](Self::dependency).
    pub fn set_dependency(&self, handle: JobHandle) -> Result<()> {
        self.fences.set_transaction_dependency(handle)
    }

    /// Archetype for exactly these types, which must already exist
    pub fn existing_archetype(&self, types: &[TypeIndex]) -> Result<ArchetypeId> {
        self.storage.find_archetype(types.iter().copied())
    }

    pub fn existing_archetype_of<S: ComponentSet>(&self) -> Result<ArchetypeId> {
        self.storage.find_archetype(S::type_indices()?)
    }

    pub fn create_entity(&mut self, archetype: ArchetypeId) -> Result<Entity> {
        let mut out = Vec::with_capacity(1);
        self.storage.create_entities(archetype, 1, &mut out)?;
        out.pop().ok_or(EcsError::EntityNotFound)
    }

    pub fn create_entities(&mut self, archetype: ArchetypeId, count: usize) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(count);
        self.storage.create_entities(archetype, count, &mut out)?;
        Ok(out)
    }

    pub fn exists(&self, entity: Entity) -> bool {
        self.storage.exists(entity)
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<T> {
        self.storage.get_component(entity)
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.storage.set_component(entity, value)
    }
}
