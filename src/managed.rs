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

//! Managed-object side tables and modification listeners
//!
//! Managed components cannot live in chunk memory, so each chunk with managed
//! types owns a side table of `Arc` references, `capacity` slots per type.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slotmap::new_key_type;

new_key_type! {
    /// Key of a chunk's managed-object table
    pub struct ManagedTableKey;
}

/// Type-erased managed object
pub type ManagedObject = Arc<dyn Any + Send + Sync>;

/// Per-chunk storage for managed components
pub(crate) struct ManagedTable {
    objects: Vec<Option<ManagedObject>>,
    capacity: usize,
}

impl ManagedTable {
    pub(crate) fn new(num_managed: usize, capacity: usize) -> Self {
        Self {
            objects: vec![None; num_managed * capacity],
            capacity,
        }
    }

    #[inline]
    fn slot(&self, managed_slot: usize, index: usize) -> usize {
        managed_slot * self.capacity + index
    }

    pub(crate) fn get(&self, managed_slot: usize, index: usize) -> Option<&ManagedObject> {
        self.objects[self.slot(managed_slot, index)].as_ref()
    }

    pub(crate) fn set(&mut self, managed_slot: usize, index: usize, object: Option<ManagedObject>) {
        let slot = self.slot(managed_slot, index);
        self.objects[slot] = object;
    }

    /// Clone every managed reference at `index`, in managed-slot order
    pub(crate) fn row(&self, index: usize) -> Vec<Option<ManagedObject>> {
        let num_managed = self.objects.len() / self.capacity.max(1);
        (0..num_managed).map(|slot| self.get(slot, index).cloned()).collect()
    }

    pub(crate) fn clear_row(&mut self, index: usize) {
        let num_managed = self.objects.len() / self.capacity.max(1);
        for managed_slot in 0..num_managed {
            let slot = self.slot(managed_slot, index);
            self.objects[slot] = None;
        }
    }
}

/// Notified whenever a managed component of a watched archetype is written.
///
/// Used to mark derived views dirty instead of rescanning every chunk.
pub trait ManagedObjectListener: Send + Sync {
    fn on_managed_object_modified(&self);
}

/// Listener that just raises a flag
#[derive(Debug, Default)]
pub struct DirtyFlag {
    dirty: AtomicBool,
}

impl DirtyFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Read and clear the flag
    pub fn take(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

impl ManagedObjectListener for DirtyFlag {
    fn on_managed_object_modified(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}
