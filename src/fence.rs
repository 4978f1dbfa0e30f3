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

//! Per-type read/write dependency fences
//!
//! Each component type keeps the handle of its last writer and a small ring of
//! concurrent readers. A task that reads a type depends on the last writer; a
//! task that writes it depends on the writer and every reader. When the reader
//! ring fills up, its handles are folded into one.

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{ecs_check, EcsError, Result};
use crate::job::JobHandle;
use crate::type_registry::TypeIndex;

/// Reader handles kept per type before they are combined
pub const MAX_READ_FENCES: usize = 17;

/// Which fences of a type to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceKind {
    /// Wait for the last writer, enough for reading
    Read,
    /// Wait for the last writer and all readers, required for writing
    Write,
}

#[derive(Default)]
struct TypeFences {
    writer: JobHandle,
    readers: SmallVec<[JobHandle; MAX_READ_FENCES]>,
}

impl TypeFences {
    fn combine_readers(&mut self) {
        let combined = JobHandle::combine(&self.readers);
        self.readers.clear();
        self.readers.push(combined);
    }
}

struct FenceState {
    types: Vec<TypeFences>,
    has_clean_handles: bool,
    in_transaction: bool,
    transaction: JobHandle,
}

impl FenceState {
    fn fences_mut(&mut self, type_index: TypeIndex) -> &mut TypeFences {
        let i = type_index.index();
        if i >= self.types.len() {
            self.types.resize_with(i + 1, TypeFences::default);
        }
        &mut self.types[i]
    }

    fn all_handles(&self) -> Vec<JobHandle> {
        let mut handles = Vec::new();
        for fences in &self.types {
            handles.push(fences.writer.clone());
            handles.extend(fences.readers.iter().cloned());
        }
        handles
    }
}

/// Dependency bookkeeping for one world
pub struct ComponentFences {
    state: Mutex<FenceState>,
}

impl Default for ComponentFences {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFences {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FenceState {
                types: Vec::new(),
                has_clean_handles: true,
                in_transaction: false,
                transaction: JobHandle::completed(),
            }),
        }
    }

    /// Everything a task reading `reads` and writing `writes` must wait for
    pub fn get_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> JobHandle {
        let state = self.state.lock();
        let mut handles: SmallVec<[JobHandle; 32]> = SmallVec::new();
        for ty in reads {
            if let Some(fences) = state.types.get(ty.index()) {
                handles.push(fences.writer.clone());
            }
        }
        for ty in writes {
            if let Some(fences) = state.types.get(ty.index()) {
                handles.push(fences.writer.clone());
                handles.extend(fences.readers.iter().cloned());
            }
        }
        JobHandle::combine(&handles)
    }

    /// Record a scheduled task: it becomes the writer of `writes` and a reader
    /// of `reads`.
    pub fn add_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex], handle: &JobHandle) {
        let mut state = self.state.lock();
        for &ty in writes {
            state.fences_mut(ty).writer = handle.clone();
        }
        for &ty in reads {
            let fences = state.fences_mut(ty);
            fences.readers.push(handle.clone());
            if fences.readers.len() == MAX_READ_FENCES {
                fences.combine_readers();
            }
        }
        if !reads.is_empty() || !writes.is_empty() {
            state.has_clean_handles = false;
        }
    }

    /// Block until the last writer of `type_index` finished
    pub fn complete_write_dependency(&self, type_index: TypeIndex) -> Result<()> {
        let writer = {
            let state = self.state.lock();
            match state.types.get(type_index.index()) {
                Some(fences) => fences.writer.clone(),
                None => return Ok(()),
            }
        };
        writer.complete()
    }

    /// Block until the last writer and every reader of `type_index` finished
    pub fn complete_read_and_write_dependency(&self, type_index: TypeIndex) -> Result<()> {
        let (writer, readers) = {
            let mut state = self.state.lock();
            if type_index.index() >= state.types.len() {
                return Ok(());
            }
            let fences = state.fences_mut(type_index);
            (fences.writer.clone(), std::mem::take(&mut fences.readers))
        };
        let mut result = Ok(());
        for reader in &readers {
            if let Err(err) = reader.complete() {
                result = Err(err);
            }
        }
        writer.complete()?;
        result
    }

    pub fn complete(&self, type_index: TypeIndex, kind: FenceKind) -> Result<()> {
        match kind {
            FenceKind::Read => self.complete_write_dependency(type_index),
            FenceKind::Write => self.complete_read_and_write_dependency(type_index),
        }
    }

    /// Wait for whatever a synchronous reader of `reads` and writer of `writes` needs
    pub fn complete_dependencies(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> Result<()> {
        for &ty in reads {
            self.complete_write_dependency(ty)?;
        }
        for &ty in writes {
            self.complete_read_and_write_dependency(ty)?;
        }
        Ok(())
    }

    /// Join every tracked handle and forget them. Called before structural
    /// changes; an abandoned handle is reported here.
    pub fn complete_all_and_invalidate(&self) -> Result<()> {
        let handles = {
            let mut state = self.state.lock();
            if state.has_clean_handles {
                return Ok(());
            }
            let handles = state.all_handles();
            state.types.clear();
            state.has_clean_handles = true;
            handles
        };
        let mut result = Ok(());
        for handle in &handles {
            if let Err(err) = handle.complete() {
                result = Err(err);
            }
        }
        result
    }

    /// One handle over every outstanding fence
    pub fn all_dependencies(&self) -> JobHandle {
        JobHandle::combine(&self.state.lock().all_handles())
    }

    /// Number of tracked handles that are not yet complete
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock();
        let mut handles = state.all_handles();
        if state.in_transaction {
            handles.push(state.transaction.clone());
        }
        handles.iter().filter(|h| !h.is_completed()).count()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    /// Enter exclusive-transaction mode, capturing every outstanding fence as
    /// one handle. A no-op if a transaction is already open.
    pub fn begin_transaction(&self) -> JobHandle {
        let mut state = self.state.lock();
        if !state.in_transaction {
            state.transaction = JobHandle::combine(&state.all_handles());
            state.in_transaction = true;
        }
        state.transaction.clone()
    }

    pub fn transaction_dependency(&self) -> JobHandle {
        self.state.lock().transaction.clone()
    }

    /// Register the task that performs the transaction's work. It must depend
    /// on the current transaction handle.
    pub fn set_transaction_dependency(&self, handle: JobHandle) -> Result<()> {
        let mut state = self.state.lock();
        ecs_check!(
            state.in_transaction,
            EcsError::TransactionError(
                "transaction dependency can only be set while a transaction is open".into()
            )
        );
        ecs_check!(
            handle.depends_on(&state.transaction),
            EcsError::TransactionError(
                "transaction dependency must depend on the transaction handle".into()
            )
        );
        state.transaction = handle;
        Ok(())
    }

    /// Join the transaction handle and return to per-type fences.
    pub fn end_transaction(&self) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            if !state.in_transaction {
                return Ok(());
            }
            state.in_transaction = false;
            std::mem::take(&mut state.transaction)
        };
        handle.complete()
    }
}

impl std::fmt::Debug for ComponentFences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ComponentFences")
            .field("tracked_types", &state.types.len())
            .field("has_clean_handles", &state.has_clean_handles)
            .field("in_transaction", &state.in_transaction)
            .finish()
    }
}
