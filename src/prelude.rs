//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use chunked_ecs::prelude::*;
//! ```

pub use crate::archetype::ArchetypeId;
pub use crate::command::{Command, CommandBuffer};
pub use crate::component::{
    AccessMode, Component, ComponentSet, ComponentType, ManagedComponent, SharedComponent,
};
pub use crate::config::WorldConfig;
pub use crate::entity::{Entity, EntityLocation};
pub use crate::error::{EcsError, Result};
pub use crate::group::GroupId;
pub use crate::job::{JobCompleter, JobHandle};
pub use crate::managed::{DirtyFlag, ManagedObjectListener};
pub use crate::query::{ComponentArray, ComponentArrayMut, EntityArray, GroupChunk};
pub use crate::shared::SharedIndex;
pub use crate::transaction::EntityTransaction;
pub use crate::world::World;

#[cfg(feature = "parallel")]
pub use crate::parallel::schedule;
