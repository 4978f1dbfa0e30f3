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

//! Rayon-backed job scheduling
//!
//! Jobs start on the rayon pool once their dependency finishes. Group
//! columns can be processed one chunk per task.

use rayon::prelude::*;

use crate::component::Component;
use crate::error::Result;
use crate::group::GroupId;
use crate::job::JobHandle;
use crate::world::World;

/// Run `job` on the rayon pool after `dependency` completes.
///
/// If the dependency is abandoned the job never runs and the returned
/// handle is abandoned too.
pub fn schedule<F>(dependency: &JobHandle, job: F) -> JobHandle
where
    F: FnOnce() + Send + 'static,
{
    let (completer, handle) = JobHandle::pending();
    dependency.when_complete(move |ok| {
        if ok {
            rayon::spawn(move || {
                job();
                completer.complete();
            });
        } else {
            drop(completer);
        }
    });
    handle
}

/// Column slice handed to one worker
struct ChunkSlice<T>(*mut T, usize);

// SAFETY: every slice covers a distinct chunk column.
unsafe impl<T: Send> Send for ChunkSlice<T> {}
unsafe impl<T: Send> Sync for ChunkSlice<T> {}

impl World {
    /// Mutate `T` across a group, one rayon task per chunk
    pub fn par_for_each_chunk_mut<T, F>(&mut self, group: GroupId, f: F) -> Result<()>
    where
        T: Component,
        F: Fn(&mut [T]) + Send + Sync,
    {
        let array = self.component_array_mut::<T>(group)?;
        let slices: Vec<ChunkSlice<T>> = array
            .raw_chunks()
            .into_iter()
            .map(|(ptr, len)| ChunkSlice(ptr, len))
            .collect();

        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("par_for_each_chunk", chunks = slices.len()).entered();

        slices.par_iter().for_each(|slice| {
            // SAFETY: the view holds `&mut World` for the duration and
            // slices do not overlap.
            let column = unsafe { std::slice::from_raw_parts_mut(slice.0, slice.1) };
            f(column);
        });
        drop(array);
        Ok(())
    }

    /// Mutate every `T` in a group in parallel
    pub fn par_for_each_mut<T, F>(&mut self, group: GroupId, f: F) -> Result<()>
    where
        T: Component,
        F: Fn(&mut T) + Send + Sync,
    {
        self.par_for_each_chunk_mut::<T, _>(group, |column| column.iter_mut().for_each(&f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Counter(u64);

    #[test]
    fn test_schedule_waits_for_dependency() {
        let (completer, dependency) = JobHandle::pending();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_job = ran.clone();
        let handle = schedule(&dependency, move || {
            ran_in_job.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        completer.complete();
        handle.complete().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandoned_dependency_skips_job() {
        let (completer, dependency) = JobHandle::pending();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_job = ran.clone();
        let handle = schedule(&dependency, move || {
            ran_in_job.fetch_add(1, Ordering::SeqCst);
        });
        drop(completer);
        assert!(handle.complete().is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_par_for_each_mut_touches_every_entity() {
        let mut world = World::new();
        let archetype = world
            .create_archetype(&[ComponentType::of::<Counter>().unwrap()])
            .unwrap();
        world.create_entities(archetype, 5000).unwrap();
        let group = world
            .create_group(&[ComponentType::of::<Counter>().unwrap()])
            .unwrap();

        world.par_for_each_mut::<Counter, _>(group, |c| c.0 += 2).unwrap();

        let values = world.component_array::<Counter>(group).unwrap();
        assert_eq!(values.len(), 5000);
        assert!(values.iter().all(|c| c.0 == 2));
    }
}
