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

//! Fixed-size chunk memory and the process-wide chunk pool
//!
//! A chunk is a 16 KiB block holding one packed column per component type of
//! its archetype. Shared-value indices live in a footer at the end of the
//! block, one `u32` per shared type.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::archetype::ArchetypeId;
use crate::entity::Entity;
use crate::managed::ManagedTableKey;
use crate::shared::SharedIndex;

/// Bytes per chunk
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Alignment of chunk memory, also the largest supported component alignment
pub const CHUNK_ALIGN: usize = 64;

/// Upper bound on entities per chunk (Entity ids alone fill the chunk)
pub const MAX_ENTITIES_PER_CHUNK: usize = CHUNK_SIZE / std::mem::size_of::<Entity>();

/// Empty chunks kept for reuse across all worlds
pub const MAX_POOLED_CHUNKS: usize = 256;

/// Bytes of footer taken by one shared-value index
pub const SHARED_INDEX_BYTES: usize = std::mem::size_of::<u32>();

/// Chunk slot id inside one archetype table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

static CHUNK_POOL: Mutex<Vec<ChunkBuffer>> = parking_lot::const_mutex(Vec::new());

/// Number of empty chunk buffers waiting in the process-wide pool
pub fn pooled_chunk_count() -> usize {
    CHUNK_POOL.lock().len()
}

/// Owned, aligned `CHUNK_SIZE` allocation
pub(crate) struct ChunkBuffer {
    ptr: NonNull<u8>,
}

// SAFETY: the buffer is plain bytes owned by exactly one chunk at a time.
unsafe impl Send for ChunkBuffer {}
unsafe impl Sync for ChunkBuffer {}

impl ChunkBuffer {
    fn layout() -> Layout {
        // SAFETY: both constants are non-zero and CHUNK_ALIGN is a power of two.
        unsafe { Layout::from_size_align_unchecked(CHUNK_SIZE, CHUNK_ALIGN) }
    }

    fn allocate() -> Self {
        let layout = Self::layout();
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Self { ptr },
            None => alloc::handle_alloc_error(layout),
        }
    }

    /// Take a buffer from the pool, or allocate a fresh one
    pub(crate) fn acquire() -> Self {
        if let Some(buffer) = CHUNK_POOL.lock().pop() {
            return buffer;
        }
        tracing::trace!("chunk pool empty, allocating");
        Self::allocate()
    }

    /// Return the buffer to the pool, freeing it if the pool is full
    pub(crate) fn release(self) {
        let mut pool = CHUNK_POOL.lock();
        if pool.len() < MAX_POOLED_CHUNKS {
            pool.push(self);
        }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), Self::layout()) }
    }
}

/// One block of entities sharing an archetype
pub struct Chunk {
    pub(crate) buffer: ChunkBuffer,
    pub(crate) archetype: ArchetypeId,
    pub(crate) count: usize,
    pub(crate) capacity: usize,
    pub(crate) num_shared: usize,
    pub(crate) managed: Option<ManagedTableKey>,
    /// Position in the archetype's list of all chunks
    pub(crate) list_position: usize,
    /// Position in the archetype's has-room list
    pub(crate) room_position: Option<usize>,
}

impl Chunk {
    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_room(&self) -> bool {
        self.count < self.capacity
    }

    #[inline]
    fn footer_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.num_shared);
        let offset = CHUNK_SIZE - (self.num_shared - slot) * SHARED_INDEX_BYTES;
        // SAFETY: offset lies inside the buffer.
        unsafe { self.buffer.as_ptr().add(offset) }
    }

    /// Shared-value index stored in footer slot `slot`
    pub fn shared_index(&self, slot: usize) -> SharedIndex {
        // SAFETY: footer_ptr is in bounds; footer slots are 4-byte aligned.
        SharedIndex(unsafe { ptr::read(self.footer_ptr(slot).cast::<u32>()) })
    }

    pub(crate) fn set_shared_index(&mut self, slot: usize, index: SharedIndex) {
        // SAFETY: as above, and `&mut self` means no view is reading the footer.
        unsafe { ptr::write(self.footer_ptr(slot).cast::<u32>(), index.0) }
    }

    /// All footer indices in shared-type order
    pub fn shared_indices(&self) -> SmallVec<[SharedIndex; 4]> {
        (0..self.num_shared).map(|slot| self.shared_index(slot)).collect()
    }

    pub(crate) fn matches_shared(&self, shared: &[SharedIndex]) -> bool {
        shared.len() == self.num_shared
            && shared
                .iter()
                .enumerate()
                .all(|(slot, &index)| self.shared_index(slot) == index)
    }

    /// Start of a column
    #[inline]
    pub(crate) fn column_ptr(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= CHUNK_SIZE);
        // SAFETY: column offsets are laid out inside the buffer.
        unsafe { self.buffer.as_ptr().add(offset) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_shared(num_shared: usize) -> Chunk {
        Chunk {
            buffer: ChunkBuffer::acquire(),
            archetype: ArchetypeId(0),
            count: 0,
            capacity: 4,
            num_shared,
            managed: None,
            list_position: 0,
            room_position: None,
        }
    }

    #[test]
    fn test_footer_round_trip() {
        let mut chunk = chunk_with_shared(3);
        chunk.set_shared_index(0, SharedIndex(7));
        chunk.set_shared_index(1, SharedIndex(0));
        chunk.set_shared_index(2, SharedIndex(42));
        assert_eq!(
            chunk.shared_indices().as_slice(),
            &[SharedIndex(7), SharedIndex(0), SharedIndex(42)]
        );
        assert!(chunk.matches_shared(&[SharedIndex(7), SharedIndex(0), SharedIndex(42)]));
        assert!(!chunk.matches_shared(&[SharedIndex(7), SharedIndex(1), SharedIndex(42)]));
        chunk.buffer.release();
    }

    #[test]
    fn test_buffer_alignment() {
        let buffer = ChunkBuffer::acquire();
        assert_eq!(buffer.as_ptr() as usize % CHUNK_ALIGN, 0);
        buffer.release();
    }

    #[test]
    fn test_max_entities_per_chunk() {
        assert_eq!(MAX_ENTITIES_PER_CHUNK, 2048);
    }
}
