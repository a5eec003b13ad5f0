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

//! Archetype storage: the set of entities sharing one signature.
//!
//! An archetype owns an ordered list of chunks and the location map
//! resolving each entity to its `(chunk, slot)`. Chunks fill lowest index
//! first; removal may leave vacancies in non-last chunks, which only
//! [`Archetype::remove_empty_chunks`] reclaims.

use rustc_hash::FxHashMap;

use crate::chunk::Chunk;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::Component;
use crate::signature::Signature;

/// Entity location inside an archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub chunk: usize,
    pub slot: usize,
}

/// Chunked storage for one signature.
pub struct Archetype {
    signature: Signature,
    chunks: Vec<Chunk>,
    locations: FxHashMap<Entity, EntityLocation>,
    chunk_capacity: usize,
}

impl Archetype {
    pub fn new(signature: Signature, chunk_capacity: usize) -> Self {
        Self {
            signature,
            chunks: Vec::new(),
            locations: FxHashMap::default(),
            chunk_capacity,
        }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.locations.contains_key(&entity)
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Insert an entity into the first chunk with a free slot (lowest
    /// index), appending a new chunk at the tail when all are full.
    /// The caller writes the new row's component values.
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityLocation> {
        if self.locations.contains_key(&entity) {
            return Err(EcsError::Duplicate);
        }

        let chunk_index = match self.chunks.iter().position(|c| !c.is_full()) {
            Some(index) => index,
            None => {
                self.chunks.push(Chunk::new(self.signature, self.chunk_capacity));
                self.chunks.len() - 1
            }
        };
        let slot = self.chunks[chunk_index].add_entity(entity)?;
        let location = EntityLocation { chunk: chunk_index, slot };
        self.locations.insert(entity, location);
        Ok(location)
    }

    /// Ensure free capacity for `additional` entities, appending chunks as
    /// needed. Batch instantiation calls this once up front.
    pub fn reserve(&mut self, additional: usize) {
        let mut free: usize = self
            .chunks
            .iter()
            .map(|c| c.capacity() - c.len())
            .sum();
        while free < additional {
            self.chunks.push(Chunk::new(self.signature, self.chunk_capacity));
            free += self.chunk_capacity;
        }
    }

    /// Remove an entity, swap-filling its slot and rewriting the swapped
    /// entity's location. Dropped rows are dropped.
    pub fn remove_entity(&mut self, entity: Entity) -> Result<()> {
        let location = self.locations.remove(&entity).ok_or(EcsError::NotFound)?;
        let swapped = self.chunks[location.chunk].remove_entity(location.slot)?;
        if let Some(swapped) = swapped {
            self.locations.insert(swapped, location);
        }
        Ok(())
    }

    /// Migration variant: rows in `preserved` were already copied to the
    /// destination archetype and are not dropped here.
    pub(crate) fn remove_entity_after_move(
        &mut self,
        entity: Entity,
        preserved: Signature,
    ) -> Result<()> {
        let location = self.locations.remove(&entity).ok_or(EcsError::NotFound)?;
        let swapped =
            self.chunks[location.chunk].remove_entity_after_move(location.slot, preserved)?;
        if let Some(swapped) = swapped {
            self.locations.insert(swapped, location);
        }
        Ok(())
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T> {
        let location = self.locations.get(&entity).ok_or(EcsError::NotFound)?;
        self.chunks[location.chunk].get::<T>(location.slot)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T> {
        let location = *self.locations.get(&entity).ok_or(EcsError::NotFound)?;
        self.chunks[location.chunk].get_mut::<T>(location.slot)
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let location = *self.locations.get(&entity).ok_or(EcsError::NotFound)?;
        self.chunks[location.chunk].set(location.slot, value)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.signature.has::<T>() && self.contains(entity)
    }

    /// Move an entity's row into a specific chunk (defragmentation).
    ///
    /// The target chunk must have a free slot. The source tail's location is
    /// rewritten if the removal swapped it.
    pub fn move_entity_to_chunk(&mut self, entity: Entity, target_chunk: usize) -> Result<()> {
        let location = *self.locations.get(&entity).ok_or(EcsError::NotFound)?;
        if target_chunk >= self.chunks.len() {
            return Err(EcsError::OutOfRange {
                index: target_chunk,
                len: self.chunks.len(),
            });
        }
        if location.chunk == target_chunk {
            return Ok(());
        }
        if self.chunks[target_chunk].is_full() {
            return Err(EcsError::ChunkFull);
        }

        // Split so the source and target chunks can be borrowed together.
        let (src, dst) = if location.chunk < target_chunk {
            let (left, right) = self.chunks.split_at_mut(target_chunk);
            (&mut left[location.chunk], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(location.chunk);
            (&mut right[0], &mut left[target_chunk])
        };

        let dst_slot = dst.add_entity(entity)?;
        dst.copy_row_from(src, self.signature, location.slot, dst_slot);
        let swapped = src.remove_entity_after_move(location.slot, self.signature)?;

        if let Some(swapped) = swapped {
            self.locations.insert(swapped, location);
        }
        self.locations.insert(
            entity,
            EntityLocation {
                chunk: target_chunk,
                slot: dst_slot,
            },
        );
        Ok(())
    }

    /// Fraction of allocated slots in use. 1.0 for an archetype with no
    /// chunks (nothing is wasted).
    pub fn utilization(&self) -> f32 {
        let total = self.chunks.len() * self.chunk_capacity;
        if total == 0 {
            return 1.0;
        }
        self.locations.len() as f32 / total as f32
    }

    /// Release empty chunks and rewrite the locations of every entity in a
    /// shifted chunk. A sole remaining chunk is kept even when empty.
    /// Returns the number of chunks released.
    pub fn remove_empty_chunks(&mut self) -> usize {
        let before = self.chunks.len();
        if before <= 1 {
            return 0;
        }
        let live = self.chunks.iter().filter(|c| !c.is_empty()).count();
        let released = if live == 0 {
            self.chunks.truncate(1);
            before - 1
        } else {
            self.chunks.retain(|c| !c.is_empty());
            before - live
        };
        if released > 0 {
            self.rebuild_locations();
        }
        released
    }

    fn rebuild_locations(&mut self) {
        self.locations.clear();
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            for (slot, &entity) in chunk.entities().iter().enumerate() {
                self.locations.insert(
                    entity,
                    EntityLocation {
                        chunk: chunk_index,
                        slot,
                    },
                );
            }
        }
    }

    pub(crate) fn bytes_capacity(&self) -> usize {
        self.chunks.iter().map(Chunk::bytes_capacity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Position, Velocity};

    fn pos_archetype(chunk_capacity: usize) -> Archetype {
        Archetype::new(Signature::EMPTY.with::<Position>(), chunk_capacity)
    }

    fn pos(x: f32) -> Position {
        Position { x, y: 0.0, z: 0.0 }
    }

    #[test]
    fn test_add_fills_lowest_chunk_first() {
        let mut arch = pos_archetype(2);
        for i in 1..=5u32 {
            arch.add_entity(Entity::new(i, 1)).unwrap();
        }
        assert_eq!(arch.chunk_count(), 3);

        // Free a slot in chunk 0; the next insert lands there, not at the tail.
        arch.remove_entity(Entity::new(1, 1)).unwrap();
        let loc = arch.add_entity(Entity::new(6, 1)).unwrap();
        assert_eq!(loc.chunk, 0);
    }

    #[test]
    fn test_duplicate_add_fails() {
        let mut arch = pos_archetype(2);
        arch.add_entity(Entity::new(1, 1)).unwrap();
        assert!(matches!(
            arch.add_entity(Entity::new(1, 1)),
            Err(EcsError::Duplicate)
        ));
    }

    #[test]
    fn test_location_map_tracks_swaps() {
        let mut arch = pos_archetype(4);
        for i in 1..=3u32 {
            let e = Entity::new(i, 1);
            arch.add_entity(e).unwrap();
            arch.set_component(e, pos(i as f32)).unwrap();
        }

        arch.remove_entity(Entity::new(1, 1)).unwrap();

        // The tail entity was swapped into slot 0 and its location rewritten.
        let loc = arch.location(Entity::new(3, 1)).unwrap();
        assert_eq!(loc, EntityLocation { chunk: 0, slot: 0 });
        assert_eq!(arch.get_component::<Position>(Entity::new(3, 1)).unwrap().x, 3.0);
    }

    #[test]
    fn test_location_invariant_holds() {
        let mut arch = pos_archetype(2);
        for i in 1..=7u32 {
            arch.add_entity(Entity::new(i, 1)).unwrap();
        }
        arch.remove_entity(Entity::new(2, 1)).unwrap();
        arch.remove_entity(Entity::new(5, 1)).unwrap();

        for (chunk_index, chunk) in arch.chunks().iter().enumerate() {
            for (slot, &entity) in chunk.entities().iter().enumerate() {
                assert_eq!(
                    arch.location(entity).unwrap(),
                    EntityLocation { chunk: chunk_index, slot }
                );
            }
        }
    }

    #[test]
    fn test_has_component() {
        let mut arch = pos_archetype(4);
        let e = Entity::new(1, 1);
        arch.add_entity(e).unwrap();
        assert!(arch.has_component::<Position>(e));
        assert!(!arch.has_component::<Velocity>(e));
        assert!(!arch.has_component::<Position>(Entity::new(2, 1)));
    }

    #[test]
    fn test_reserve_allocates_chunks() {
        let mut arch = pos_archetype(4);
        arch.reserve(10);
        assert_eq!(arch.chunk_count(), 3);

        // Already enough room: no further growth.
        arch.reserve(10);
        assert_eq!(arch.chunk_count(), 3);
    }

    #[test]
    fn test_remove_empty_chunks_rewrites_locations() {
        let mut arch = pos_archetype(2);
        for i in 1..=6u32 {
            let e = Entity::new(i, 1);
            arch.add_entity(e).unwrap();
            arch.set_component(e, pos(i as f32)).unwrap();
        }

        // Empty out the middle chunk.
        arch.remove_entity(Entity::new(3, 1)).unwrap();
        arch.remove_entity(Entity::new(4, 1)).unwrap();
        assert_eq!(arch.chunk_count(), 3);

        let released = arch.remove_empty_chunks();
        assert_eq!(released, 1);
        assert_eq!(arch.chunk_count(), 2);

        // Entities from the shifted tail chunk still resolve.
        for &id in &[1u32, 2, 5, 6] {
            let e = Entity::new(id, 1);
            let loc = arch.location(e).unwrap();
            assert_eq!(arch.chunk(loc.chunk).unwrap().entity(loc.slot).unwrap(), e);
            assert_eq!(arch.get_component::<Position>(e).unwrap().x, id as f32);
        }
    }

    #[test]
    fn test_move_entity_to_chunk() {
        let mut arch = pos_archetype(2);
        for i in 1..=3u32 {
            let e = Entity::new(i, 1);
            arch.add_entity(e).unwrap();
            arch.set_component(e, pos(i as f32)).unwrap();
        }
        arch.remove_entity(Entity::new(2, 1)).unwrap();

        // Pull the lone tail-chunk entity forward into the vacancy.
        arch.move_entity_to_chunk(Entity::new(3, 1), 0).unwrap();
        let loc = arch.location(Entity::new(3, 1)).unwrap();
        assert_eq!(loc.chunk, 0);
        assert_eq!(arch.get_component::<Position>(Entity::new(3, 1)).unwrap().x, 3.0);
        assert!(arch.chunk(1).unwrap().is_empty());
    }

    #[test]
    fn test_utilization() {
        let mut arch = pos_archetype(4);
        assert_eq!(arch.utilization(), 1.0);
        arch.add_entity(Entity::new(1, 1)).unwrap();
        assert_eq!(arch.utilization(), 0.25);
    }
}
