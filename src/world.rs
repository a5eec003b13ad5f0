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

//! World: central entity and archetype storage.
//!
//! The world owns the entity allocator, the archetype registry keyed by
//! signature, the change tracker, the event channels, and the scheduler.
//! Structural mutation (component add/remove, create/destroy) migrates
//! entity rows between archetypes; everything else reads or writes in
//! place.

use std::ptr::NonNull;

use ahash::AHashMap;

use crate::archetype::Archetype;
use crate::blueprint::Blueprint;
use crate::change::ChangeTracker;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::entity::{Entity, EntityAllocator};
use crate::error::{EcsError, Result};
use crate::events::{Event, EventChannel, EventHub, DEFAULT_CHANNEL_CAPACITY};
use crate::query::{ChunkIter, ChunkIterMut, Query};
use crate::registry::{self, Component};
use crate::schedule::{Scheduler, System, SystemTiming};
use crate::signature::Signature;
use crate::time::Time;

/// World construction knobs.
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    /// Entity slots per chunk.
    pub chunk_capacity: usize,
    /// Capacity for event channels created without an explicit one.
    pub default_channel_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            default_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Central ECS container.
pub struct World {
    allocator: EntityAllocator,
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<Signature, usize>,

    /// Cache for archetype transitions when adding/removing components:
    /// `(source archetype, component id, added) -> destination archetype`.
    transitions: AHashMap<(usize, u8, bool), usize>,

    entity_archetype: AHashMap<Entity, usize>,
    tracker: ChangeTracker,
    events: EventHub,
    scheduler: Scheduler,
    time: Time,
    config: WorldConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let mut world = Self {
            allocator: EntityAllocator::new(),
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            transitions: AHashMap::with_capacity(128),
            entity_archetype: AHashMap::new(),
            tracker: ChangeTracker::new(),
            events: EventHub::new(config.default_channel_capacity),
            scheduler: Scheduler::new(),
            time: Time::new(),
            config,
        };
        // The empty-signature archetype is always index 0; newly created
        // entities land there.
        world.get_or_create_archetype(Signature::EMPTY);
        world
    }

    // ========== Entities ==========

    /// Allocate a new entity in the empty-signature archetype.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.archetypes[0]
            .add_entity(entity)
            .expect("fresh entity cannot already exist");
        self.entity_archetype.insert(entity, 0);
        entity
    }

    /// Destroy an entity: remove its row, forget its change state, and
    /// return its id to the free queue for versioned recycling.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        let arch_index = self
            .entity_archetype
            .remove(&entity)
            .ok_or(EcsError::NotFound)?;
        self.archetypes[arch_index].remove_entity(entity)?;
        self.tracker.forget(entity);
        self.allocator.free(entity);
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_archetype.contains_key(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_archetype.len()
    }

    /// Current signature of an entity, if alive.
    pub fn signature_of(&self, entity: Entity) -> Option<Signature> {
        self.entity_archetype
            .get(&entity)
            .map(|&i| self.archetypes[i].signature())
    }

    // ========== Components ==========

    /// Add or overwrite a component.
    ///
    /// When the entity's archetype already has `T`, the value is written in
    /// place. Otherwise the entity's whole row migrates to the archetype
    /// with signature `S ∪ {T}` and the new value is written there. Either
    /// way `T` is marked dirty for the entity.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let id = registry::register::<T>()?;
        let arch_index = *self
            .entity_archetype
            .get(&entity)
            .ok_or(EcsError::NotFound)?;

        if self.archetypes[arch_index].signature().has_id(id) {
            self.archetypes[arch_index].set_component(entity, value)?;
            self.tracker.mark_changed_id(entity, id);
            return Ok(());
        }

        let dest_index = self.transition_target(arch_index, id, true);
        self.migrate_entity(entity, arch_index, dest_index)?;
        self.archetypes[dest_index].set_component(entity, value)?;
        self.entity_archetype.insert(entity, dest_index);
        self.tracker.mark_changed_id(entity, id);
        Ok(())
    }

    /// Remove a component, migrating the row to `S \ {T}`. No-op when the
    /// entity does not have `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let arch_index = *self
            .entity_archetype
            .get(&entity)
            .ok_or(EcsError::NotFound)?;
        let Some(id) = registry::id_of::<T>() else {
            return Ok(());
        };
        if !self.archetypes[arch_index].signature().has_id(id) {
            return Ok(());
        }

        let dest_index = self.transition_target(arch_index, id, false);
        self.migrate_entity(entity, arch_index, dest_index)?;
        self.entity_archetype.insert(entity, dest_index);
        Ok(())
    }

    /// Immutable component access. Total: absent entity or component is `None`.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let &arch_index = self.entity_archetype.get(&entity)?;
        self.archetypes[arch_index].get_component(entity).ok()
    }

    /// Mutable component access; marks `T` dirty for the entity.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let &arch_index = self.entity_archetype.get(&entity)?;
        let id = registry::id_of::<T>()?;
        if !self.archetypes[arch_index].signature().has_id(id) {
            return None;
        }
        self.tracker.mark_changed_id(entity, id);
        self.archetypes[arch_index].get_component_mut(entity).ok()
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.entity_archetype
            .get(&entity)
            .is_some_and(|&i| self.archetypes[i].signature().has::<T>())
    }

    fn transition_target(&mut self, arch_index: usize, id: u8, added: bool) -> usize {
        if let Some(&dest) = self.transitions.get(&(arch_index, id, added)) {
            return dest;
        }
        let signature = self.archetypes[arch_index].signature();
        let dest_signature = if added {
            signature.with_id(id)
        } else {
            signature.without_id(id)
        };
        let dest = self.get_or_create_archetype(dest_signature);
        self.transitions.insert((arch_index, id, added), dest);
        dest
    }

    /// Move an entity's row between archetypes, preserving every component
    /// in the signature intersection bit-exactly.
    fn migrate_entity(
        &mut self,
        entity: Entity,
        src_index: usize,
        dst_index: usize,
    ) -> Result<()> {
        debug_assert_ne!(src_index, dst_index);

        // Borrow both archetypes at once.
        let (src, dst) = if src_index < dst_index {
            let (left, right) = self.archetypes.split_at_mut(dst_index);
            (&mut left[src_index], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(src_index);
            (&mut right[0], &mut left[dst_index])
        };

        let shared = src.signature().intersection(dst.signature());
        let src_loc = src.location(entity).ok_or(EcsError::NotFound)?;

        // Reserve the destination slot, then copy the shared columns.
        let dst_loc = dst.add_entity(entity)?;
        let (src_chunk, dst_chunk) = (
            src.chunk(src_loc.chunk).unwrap(),
            dst.chunk_mut(dst_loc.chunk).unwrap(),
        );
        dst_chunk.copy_row_from(src_chunk, shared, src_loc.slot, dst_loc.slot);

        // Swap-remove the source row. Shared columns moved out bitwise; any
        // source-only column (the removed component) is dropped here. The
        // swapped tail's location is rewritten inside.
        src.remove_entity_after_move(entity, shared)?;
        Ok(())
    }

    fn get_or_create_archetype(&mut self, signature: Signature) -> usize {
        if let Some(&index) = self.archetype_index.get(&signature) {
            return index;
        }
        self.archetypes
            .push(Archetype::new(signature, self.config.chunk_capacity));
        let index = self.archetypes.len() - 1;
        self.archetype_index.insert(signature, index);
        tracing::trace!(?signature, index, "created archetype");
        index
    }

    // ========== Archetype access ==========

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Archetype holding an entity, if alive.
    pub fn archetype_of(&self, entity: Entity) -> Option<&Archetype> {
        self.entity_archetype
            .get(&entity)
            .map(|&i| &self.archetypes[i])
    }

    /// Release empty chunks across every archetype. Returns the number of
    /// chunks reclaimed.
    pub fn compact(&mut self) -> usize {
        self.archetypes
            .iter_mut()
            .map(Archetype::remove_empty_chunks)
            .sum()
    }

    // ========== Queries ==========

    /// Iterate chunk views matching a query.
    pub fn iter_chunks(&self, query: &Query) -> ChunkIter<'_> {
        ChunkIter::new(self, *query)
    }

    /// Iterate mutable chunk views matching a query.
    pub fn iter_chunks_mut(&mut self, query: &Query) -> ChunkIterMut<'_> {
        ChunkIterMut::new(self, *query)
    }

    /// Number of entities a query addresses this frame (after the changed
    /// filter).
    pub fn query_count(&self, query: &Query) -> usize {
        self.iter_chunks(query).map(|view| view.len()).sum()
    }

    pub(crate) fn query_parts_mut(&mut self) -> (*mut Archetype, NonNull<ChangeTracker>) {
        (
            self.archetypes.as_mut_ptr(),
            NonNull::from(&mut self.tracker),
        )
    }

    // ========== Change tracking ==========

    pub fn change_tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn has_changed<T: Component>(&self, entity: Entity) -> bool {
        self.tracker.has_changed::<T>(entity)
    }

    pub fn mark_changed<T: Component>(&mut self, entity: Entity) {
        self.tracker.mark_changed::<T>(entity);
    }

    // ========== Events ==========

    /// Channel for `T`, created on first access with the default capacity.
    pub fn events<T: Event>(&mut self) -> &EventChannel<T> {
        self.events.channel::<T>()
    }

    /// Channel for `T` with an explicit capacity; an existing channel is
    /// returned unchanged. Fails with `CapacityExceeded` for capacity 0.
    pub fn events_with_capacity<T: Event>(&mut self, capacity: usize) -> Result<&EventChannel<T>> {
        self.events.channel_with_capacity::<T>(capacity)
    }

    /// Channel for `T` if one has been created.
    pub fn try_events<T: Event>(&self) -> Option<&EventChannel<T>> {
        self.events.try_channel::<T>()
    }

    /// Publish convenience: creates the channel on first use.
    pub fn publish<T: Event>(&mut self, event: T) {
        self.events.channel::<T>().publish(event);
    }

    /// Flag `T`'s channel for clearing at every frame boundary.
    pub fn mark_one_frame<T: Event>(&mut self) {
        self.events.mark_one_frame::<T>();
    }

    pub fn is_one_frame<T: Event>(&self) -> bool {
        self.events.is_one_frame::<T>()
    }

    // ========== Scheduling and the frame boundary ==========

    /// Register a system. Execution order is `(phase, order, registration)`.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        self.scheduler.add_system(Box::new(system));
    }

    pub fn system_count(&self) -> usize {
        self.scheduler.system_count()
    }

    /// Timing for a registered system, by name.
    pub fn system_timing(&self, name: &str) -> Option<&SystemTiming> {
        self.scheduler.timing(name)
    }

    /// Zero every system's timing peak.
    pub fn reset_timing_peaks(&mut self) {
        self.scheduler.reset_peaks();
    }

    /// Advance one frame: run every system in phase order, then clear
    /// one-frame channels, then advance the change tracker.
    pub fn step(&mut self, delta_time: f32) {
        self.run_systems(delta_time);
        self.end_frame();
    }

    /// Run the scheduler without the frame boundary. Callers that need to
    /// observe change-tracker state after a tick use this, then call
    /// [`World::end_frame`] themselves.
    pub fn run_systems(&mut self, delta_time: f32) {
        self.time.advance(delta_time);

        // The scheduler is detached while it runs so systems get `&mut World`.
        // Systems registered mid-frame land in the placeholder and are
        // folded back in afterwards.
        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.run(self, delta_time);
        let registered_mid_frame = std::mem::take(&mut self.scheduler);
        scheduler.absorb(registered_mid_frame);
        self.scheduler = scheduler;
    }

    /// The frame boundary without running systems: clear one-frame event
    /// channels, then advance the change tracker.
    pub fn end_frame(&mut self) {
        self.events.clear_one_frame();
        self.tracker.advance_frame();
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    // ========== Blueprints ==========

    /// Instantiate one entity from a blueprint, placing it directly in the
    /// blueprint's archetype.
    pub fn instantiate(&mut self, blueprint: &Blueprint) -> Result<Entity> {
        let mut out = self.instantiate_batch(blueprint, 1)?;
        Ok(out.pop().unwrap())
    }

    /// Instantiate `count` entities from a blueprint. Destination chunks are
    /// reserved up front so creation does not degrade to per-entity
    /// allocation.
    pub fn instantiate_batch(&mut self, blueprint: &Blueprint, count: usize) -> Result<Vec<Entity>> {
        let signature = blueprint.signature();
        let arch_index = self.get_or_create_archetype(signature);
        let archetype = &mut self.archetypes[arch_index];
        archetype.reserve(count);

        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = self.allocator.allocate();
            let location = archetype.add_entity(entity)?;
            let chunk = archetype.chunk_mut(location.chunk).unwrap();
            for entry in blueprint.entries() {
                let dst = chunk.raw_row_mut(entry.component_id(), location.slot)?;
                // SAFETY: the row belongs to the entry's component column and
                // was sized/aligned for it at chunk construction.
                unsafe { entry.write_row(dst) };
            }
            self.entity_archetype.insert(entity, arch_index);
            entities.push(entity);
        }
        Ok(entities)
    }

    // ========== Snapshot support ==========

    /// Re-create an entity with a preserved handle (snapshot restore).
    /// Returns the index of the archetype it was placed in.
    pub(crate) fn restore_entity(&mut self, entity: Entity, signature: Signature) -> Result<usize> {
        if self.entity_archetype.contains_key(&entity) {
            return Err(EcsError::Duplicate);
        }
        let arch_index = self.get_or_create_archetype(signature);
        self.archetypes[arch_index].add_entity(entity)?;
        self.entity_archetype.insert(entity, arch_index);
        self.allocator.mark_issued(entity);
        Ok(arch_index)
    }

    pub(crate) fn archetypes_mut(&mut self) -> &mut [Archetype] {
        &mut self.archetypes
    }

    // ========== Diagnostics ==========

    /// Approximate memory footprint of the storage.
    pub fn memory_stats(&self) -> MemoryStats {
        let chunk_memory: usize = self.archetypes.iter().map(Archetype::bytes_capacity).sum();
        let entity_index_memory =
            self.entity_archetype.capacity() * std::mem::size_of::<(Entity, usize)>();
        MemoryStats {
            entity_index_memory,
            chunk_memory,
            total_memory: entity_index_memory + chunk_memory,
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory statistics for the world
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub entity_index_memory: usize,
    pub chunk_memory: usize,
    pub total_memory: usize,
}
