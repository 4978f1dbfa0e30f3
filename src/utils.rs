//! Utility functions

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::type_registry::TypeIndex;

/// Align value to power of 2
pub fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Stable hash of a sorted type list, used as the archetype/group lookup key
pub fn hash_type_list(types: &[TypeIndex]) -> u64 {
    let mut hasher = FxHasher::default();
    types.hash(&mut hasher);
    hasher.finish()
}

/// Insert into a sorted list, keeping it sorted. Returns false if already present.
pub fn sorted_insert<T: Ord + Copy>(list: &mut smallvec::SmallVec<[T; 8]>, value: T) -> bool {
    match list.binary_search(&value) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, value);
            true
        }
    }
}
