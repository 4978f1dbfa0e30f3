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

//! World configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for a [`World`](crate::world::World).
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Slots reserved in the entity address table up front
    pub initial_entity_capacity: usize,
    /// Archetype records reserved up front
    pub initial_archetype_capacity: usize,
    /// Minimum size of one command buffer block, in bytes
    pub command_block_size: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_entity_capacity: 1024,
            initial_archetype_capacity: 64,
            command_block_size: 64 * 1024,
        }
    }
}

impl WorldConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
