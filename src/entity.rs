// Copyright 2025 Prism ECS Contributors
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

//! Entity identifiers and the recycling allocator.

use std::collections::VecDeque;
use std::fmt;

/// Versioned entity handle.
///
/// Packs a 32-bit identifier and a 32-bit version into 64 bits. Two handles
/// with the same id but different versions refer to different lifetimes of
/// that id and compare unequal. Ordering is lexicographic: id, then version.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Entity {
    id: u32,
    version: u32,
}

impl Entity {
    /// The null entity (id 0, version 0). Never issued by the allocator.
    pub const NULL: Entity = Entity { id: 0, version: 0 };

    /// Construct from raw halves.
    pub const fn new(id: u32, version: u32) -> Self {
        Self { id, version }
    }

    pub const fn id(self) -> u32 {
        self.id
    }

    pub const fn version(self) -> u32 {
        self.version
    }

    pub const fn is_null(self) -> bool {
        self.id == 0 && self.version == 0
    }

    /// Pack into a single u64: id in the high half, version in the low half.
    ///
    /// The layout makes the packed ordering agree with `Ord`.
    pub const fn to_bits(self) -> u64 {
        ((self.id as u64) << 32) | self.version as u64
    }

    /// Inverse of [`Entity::to_bits`].
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            id: (bits >> 32) as u32,
            version: bits as u32,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.version)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.version)
    }
}

/// Entity id allocator with FIFO recycling.
///
/// Fresh ids come from a monotonic counter starting at 1 (id 0 belongs to
/// [`Entity::NULL`]). Destroyed handles go to a free queue; a recycled id is
/// reissued with `version + 1`, so any handle to a prior lifetime of the id
/// compares unequal to the new one. An id whose version would overflow is
/// retired instead of reissued.
#[derive(Debug, Default)]
pub(crate) struct EntityAllocator {
    next_id: u32,
    free: VecDeque<Entity>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            free: VecDeque::new(),
        }
    }

    /// Allocate a fresh or recycled handle.
    ///
    /// # Panics
    /// Panics when the 32-bit id space is exhausted and no id is recyclable.
    pub fn allocate(&mut self) -> Entity {
        while let Some(prev) = self.free.pop_front() {
            if prev.version() == u32::MAX {
                // Retired: a higher version can no longer be issued for it.
                continue;
            }
            return Entity::new(prev.id(), prev.version() + 1);
        }

        if self.next_id == u32::MAX {
            panic!("entity id space exhausted ({} ids issued)", self.next_id);
        }
        let id = self.next_id;
        self.next_id += 1;
        Entity::new(id, 1)
    }

    /// Return a destroyed handle's id to the free queue.
    pub fn free(&mut self, entity: Entity) {
        debug_assert!(!entity.is_null());
        self.free.push_back(entity);
    }

    /// Record an externally issued handle (snapshot restore) so fresh ids
    /// never collide with it.
    pub fn mark_issued(&mut self, entity: Entity) {
        if entity.id() >= self.next_id {
            self.next_id = entity.id() + 1;
        }
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
