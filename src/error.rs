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

//! Error types

use std::fmt;

use crate::type_registry::ComponentCategory;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Stale or never-created entity handle
    EntityNotFound,

    /// Entity does not carry the requested component
    ComponentNotFound { component: &'static str },

    /// Component type listed twice, or added to an entity that already has it
    DuplicateComponent { component: &'static str },

    /// The Entity id column is part of every archetype
    EntityColumnRemoval,

    /// Component type cannot live in chunk memory
    InvalidComponentType(String),

    /// Type was first registered under another category
    ComponentCategoryMismatch {
        component: &'static str,
        registered: ComponentCategory,
        requested: ComponentCategory,
    },

    /// Registry is full
    TooManyComponentTypes { max: usize },

    /// One entity of this archetype does not fit in a chunk
    ArchetypeTooLarge { stride: usize, usable: usize },

    /// Archetype not found
    ArchetypeNotFound,

    /// Group id from another world
    GroupNotFound,

    /// A dependency token was dropped without being completed
    JobAbandoned,

    /// Transaction misuse
    TransactionError(String),

    /// Storage tables disagree with each other
    InconsistentStorage(String),

    /// Managed side tables cannot be moved between worlds
    ManagedDataNotMovable,

    /// Command buffer error
    CommandError(String),

    /// Configuration could not be parsed
    ConfigError(String),

    /// Spawn error with detailed context
    SpawnError(SpawnError),
}

/// Detailed spawn error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// Entity index space exhausted
    EntityCapacityExhausted { attempted: usize, capacity: usize },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::EntityCapacityExhausted { attempted, capacity } => {
                write!(f, "Entity capacity exhausted: attempted to create {attempted}, max is {capacity}")
            }
        }
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity does not exist"),
            EcsError::ComponentNotFound { component } => {
                write!(f, "Component {component} not found on entity")
            }
            EcsError::DuplicateComponent { component } => {
                write!(f, "Component {component} appears more than once")
            }
            EcsError::EntityColumnRemoval => write!(f, "The Entity component cannot be removed"),
            EcsError::InvalidComponentType(msg) => write!(f, "Invalid component type: {msg}"),
            EcsError::ComponentCategoryMismatch {
                component,
                registered,
                requested,
            } => write!(
                f,
                "Component {component} is registered as {registered:?}, requested as {requested:?}"
            ),
            EcsError::TooManyComponentTypes { max } => {
                write!(f, "Too many component types (max {max})")
            }
            EcsError::ArchetypeTooLarge { stride, usable } => write!(
                f,
                "Archetype stride of {stride} bytes does not fit in {usable} usable chunk bytes"
            ),
            EcsError::ArchetypeNotFound => write!(f, "Archetype not found"),
            EcsError::GroupNotFound => write!(f, "Group not found"),
            EcsError::JobAbandoned => write!(f, "Job handle was dropped without completing"),
            EcsError::TransactionError(msg) => write!(f, "Transaction error: {msg}"),
            EcsError::InconsistentStorage(msg) => write!(f, "Inconsistent storage: {msg}"),
            EcsError::ManagedDataNotMovable => {
                write!(f, "Entities with managed components cannot be moved between worlds")
            }
            EcsError::CommandError(msg) => write!(f, "Command error: {msg}"),
            EcsError::ConfigError(msg) => write!(f, "Config error: {msg}"),
            EcsError::SpawnError(spawn_err) => write!(f, "Spawn error: {spawn_err}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::ConfigError(err.to_string())
    }
}

impl From<SpawnError> for EcsError {
    fn from(err: SpawnError) -> Self {
        EcsError::SpawnError(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;

/// Usage check compiled in only with the `checked` feature.
///
/// Returns the given error from the enclosing function when the condition fails.
macro_rules! ecs_check {
    ($cond:expr, $err:expr) => {
        #[cfg(feature = "checked")]
        {
            if !$cond {
                return Err($err);
            }
        }
    };
}

pub(crate) use ecs_check;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_entity_message() {
        assert_eq!(EcsError::EntityNotFound.to_string(), "Entity does not exist");
    }

    #[test]
    fn test_spawn_error_wraps() {
        let err: EcsError = SpawnError::EntityCapacityExhausted {
            attempted: 10,
            capacity: 5,
        }
        .into();
        assert!(err.to_string().contains("attempted to create 10"));
    }
}
