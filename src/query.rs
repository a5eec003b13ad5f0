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

//! Component queries.
//!
//! A [`Query`] is four signature filter sets: required (`with`), forbidden
//! (`without`), change-filtered (`changed`), and `optional`. Iteration
//! yields one view per non-empty chunk of every matching archetype, in
//! archetype registration order. When the changed set is non-empty, each
//! view is narrowed to the slots whose entity has a dirty bit in the set;
//! chunks where nothing survives are skipped.

use std::marker::PhantomData;
use std::ptr::NonNull;

use smallvec::SmallVec;

use crate::archetype::Archetype;
use crate::change::ChangeTracker;
use crate::chunk::Chunk;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::{self, Component};
use crate::signature::Signature;
use crate::world::World;

/// Composable archetype filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Query {
    required: Signature,
    forbidden: Signature,
    changed: Signature,
    optional: Signature,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `T` to be present.
    pub fn with<T: Component>(mut self) -> Self {
        self.required = self.required.with::<T>();
        self
    }

    /// Require `T` to be absent.
    pub fn without<T: Component>(mut self) -> Self {
        self.forbidden = self.forbidden.with::<T>();
        self
    }

    /// Require `T` to be present *and* dirty this frame.
    pub fn changed<T: Component>(mut self) -> Self {
        let sig = Signature::EMPTY.with::<T>();
        self.required = self.required.union(sig);
        self.changed = self.changed.union(sig);
        self
    }

    /// Allow `T` without requiring it; presence does not affect matching.
    pub fn optional<T: Component>(mut self) -> Self {
        self.optional = self.optional.with::<T>();
        self
    }

    /// Archetype match predicate:
    /// `sig ⊇ (required \ optional)  ∧  sig ∩ forbidden = ∅`.
    pub fn matches(&self, signature: Signature) -> bool {
        signature.has_all(self.required.difference(self.optional))
            && signature.has_none(self.forbidden)
    }

    pub(crate) fn changed_mask(&self) -> u64 {
        self.changed.bits()
    }

    fn matched_archetypes(&self, archetypes: &[Archetype]) -> SmallVec<[usize; 16]> {
        archetypes
            .iter()
            .enumerate()
            .filter(|(_, a)| self.matches(a.signature()))
            .map(|(i, _)| i)
            .collect()
    }
}

type SlotList = SmallVec<[u32; 32]>;

fn surviving_slots(chunk: &Chunk, tracker: &ChangeTracker, mask: u64) -> SlotList {
    chunk
        .entities()
        .iter()
        .enumerate()
        .filter(|&(_, &e)| tracker.any_changed(e, mask))
        .map(|(i, _)| i as u32)
        .collect()
}

/// Read-only view over a chunk, possibly narrowed by a changed filter.
///
/// Indexed accessors take dense indices in `[0, len())`; for a filtered
/// view these map to the surviving source slots. `column` and `entities`
/// expose the whole source chunk and are the fast path for unfiltered
/// iteration.
pub struct ChunkView<'w> {
    chunk: &'w Chunk,
    slots: Option<SlotList>,
}

impl<'w> ChunkView<'w> {
    /// Number of addressable slots (surviving slots when filtered).
    pub fn len(&self) -> usize {
        match &self.slots {
            Some(slots) => slots.len(),
            None => self.chunk.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_filtered(&self) -> bool {
        self.slots.is_some()
    }

    pub fn signature(&self) -> Signature {
        self.chunk.signature()
    }

    pub fn has<T: Component>(&self) -> bool {
        self.chunk.signature().has::<T>()
    }

    fn source_slot(&self, index: usize) -> Result<usize> {
        match &self.slots {
            Some(slots) => slots
                .get(index)
                .map(|&s| s as usize)
                .ok_or(EcsError::OutOfRange {
                    index,
                    len: slots.len(),
                }),
            None => Ok(index),
        }
    }

    pub fn entity(&self, index: usize) -> Result<Entity> {
        self.chunk.entity(self.source_slot(index)?)
    }

    /// All entities of the source chunk, in slot order.
    pub fn entities(&self) -> &'w [Entity] {
        self.chunk.entities()
    }

    pub fn get<T: Component>(&self, index: usize) -> Result<&'w T> {
        self.chunk.get(self.source_slot(index)?)
    }

    /// `None` when `T` is outside the signature (optional components).
    pub fn try_get<T: Component>(&self, index: usize) -> Option<&'w T> {
        self.get(index).ok()
    }

    /// The whole source column.
    pub fn column<T: Component>(&self) -> Result<&'w [T]> {
        self.chunk.column()
    }
}

/// Iterator over matching chunks of a shared world. Fixed-size cursor; the
/// only per-step allocation is the slot list of a changed-filtered view.
pub struct ChunkIter<'w> {
    world: &'w World,
    query: Query,
    matched: SmallVec<[usize; 16]>,
    arch_cursor: usize,
    chunk_cursor: usize,
}

impl<'w> ChunkIter<'w> {
    pub(crate) fn new(world: &'w World, query: Query) -> Self {
        let matched = query.matched_archetypes(world.archetypes());
        Self {
            world,
            query,
            matched,
            arch_cursor: 0,
            chunk_cursor: 0,
        }
    }
}

impl<'w> Iterator for ChunkIter<'w> {
    type Item = ChunkView<'w>;

    fn next(&mut self) -> Option<ChunkView<'w>> {
        let mask = self.query.changed_mask();
        loop {
            let &arch_index = self.matched.get(self.arch_cursor)?;
            let archetype = &self.world.archetypes()[arch_index];
            let Some(chunk) = archetype.chunk(self.chunk_cursor) else {
                self.arch_cursor += 1;
                self.chunk_cursor = 0;
                continue;
            };
            self.chunk_cursor += 1;
            if chunk.is_empty() {
                continue;
            }
            if mask != 0 {
                let slots = surviving_slots(chunk, self.world.change_tracker(), mask);
                if slots.is_empty() {
                    continue;
                }
                return Some(ChunkView {
                    chunk,
                    slots: Some(slots),
                });
            }
            return Some(ChunkView { chunk, slots: None });
        }
    }
}

/// Mutable view over a chunk. Writes land in the source chunk and mark the
/// change tracker for the written component.
pub struct ChunkViewMut<'w> {
    chunk: NonNull<Chunk>,
    tracker: NonNull<ChangeTracker>,
    slots: Option<SlotList>,
    _world: PhantomData<&'w mut World>,
}

impl<'w> ChunkViewMut<'w> {
    fn chunk(&self) -> &Chunk {
        // SAFETY: the iterator yields each chunk at most once and holds the
        // world mutably borrowed for 'w, so no other reference exists.
        unsafe { self.chunk.as_ref() }
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        // SAFETY: as above; &mut self serializes access through this view.
        unsafe { &mut *self.chunk.as_ptr() }
    }

    fn mark(&mut self, entity: Entity, id: u8) {
        // SAFETY: tracker references are created transiently, one at a time.
        unsafe { (*self.tracker.as_ptr()).mark_changed_id(entity, id) };
    }

    pub fn len(&self) -> usize {
        match &self.slots {
            Some(slots) => slots.len(),
            None => self.chunk().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_filtered(&self) -> bool {
        self.slots.is_some()
    }

    pub fn signature(&self) -> Signature {
        self.chunk().signature()
    }

    pub fn has<T: Component>(&self) -> bool {
        self.chunk().signature().has::<T>()
    }

    fn source_slot(&self, index: usize) -> Result<usize> {
        match &self.slots {
            Some(slots) => slots
                .get(index)
                .map(|&s| s as usize)
                .ok_or(EcsError::OutOfRange {
                    index,
                    len: slots.len(),
                }),
            None => Ok(index),
        }
    }

    pub fn entity(&self, index: usize) -> Result<Entity> {
        self.chunk().entity(self.source_slot(index)?)
    }

    /// All entities of the source chunk, in slot order.
    pub fn entities(&self) -> &[Entity] {
        self.chunk().entities()
    }

    pub fn get<T: Component>(&self, index: usize) -> Result<&T> {
        self.chunk().get(self.source_slot(index)?)
    }

    pub fn try_get<T: Component>(&self, index: usize) -> Option<&T> {
        self.get(index).ok()
    }

    /// Mutable access to one row; marks `T` dirty for that entity.
    pub fn get_mut<T: Component>(&mut self, index: usize) -> Result<&mut T> {
        let slot = self.source_slot(index)?;
        let entity = self.chunk().entity(slot)?;
        let id = registry::id_of::<T>().ok_or(EcsError::NotInSignature)?;
        self.mark(entity, id);
        self.chunk_mut().get_mut(slot)
    }

    /// Write one row; marks `T` dirty for that entity.
    pub fn set<T: Component>(&mut self, index: usize, value: T) -> Result<()> {
        let slot = self.source_slot(index)?;
        let entity = self.chunk().entity(slot)?;
        let id = registry::id_of::<T>().ok_or(EcsError::NotInSignature)?;
        self.chunk_mut().set(slot, value)?;
        self.mark(entity, id);
        Ok(())
    }

    /// The whole source column, read-only.
    pub fn column<T: Component>(&self) -> Result<&[T]> {
        self.chunk().column()
    }

    /// The whole source column, mutable. Taking it declares intent to write:
    /// every addressed entity is marked dirty for `T`.
    pub fn column_mut<T: Component>(&mut self) -> Result<&mut [T]> {
        let id = registry::id_of::<T>().ok_or(EcsError::NotInSignature)?;
        if !self.chunk().signature().has_id(id) {
            return Err(EcsError::NotInSignature);
        }
        match self.slots.clone() {
            Some(slots) => {
                for &slot in &slots {
                    let entity = self.chunk().entity(slot as usize)?;
                    self.mark(entity, id);
                }
            }
            None => {
                for slot in 0..self.chunk().len() {
                    let entity = self.chunk().entity(slot)?;
                    self.mark(entity, id);
                }
            }
        }
        self.chunk_mut().column_mut()
    }

    /// `column_mut` for an optional component: `None` when absent.
    pub fn try_column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        match self.column_mut() {
            Ok(column) => Some(column),
            Err(_) => None,
        }
    }
}

/// Iterator over matching chunks of an exclusively borrowed world.
///
/// Holds the world borrow for its whole lifetime, so structural mutation
/// during iteration is rejected at compile time.
pub struct ChunkIterMut<'w> {
    archetypes: *mut Archetype,
    tracker: NonNull<ChangeTracker>,
    query: Query,
    matched: SmallVec<[usize; 16]>,
    arch_cursor: usize,
    chunk_cursor: usize,
    _world: PhantomData<&'w mut World>,
}

impl<'w> ChunkIterMut<'w> {
    pub(crate) fn new(world: &'w mut World, query: Query) -> Self {
        let matched = query.matched_archetypes(world.archetypes());
        let (archetypes, tracker) = world.query_parts_mut();
        Self {
            archetypes,
            tracker,
            query,
            matched,
            arch_cursor: 0,
            chunk_cursor: 0,
            _world: PhantomData,
        }
    }
}

impl<'w> Iterator for ChunkIterMut<'w> {
    type Item = ChunkViewMut<'w>;

    fn next(&mut self) -> Option<ChunkViewMut<'w>> {
        let mask = self.query.changed_mask();
        loop {
            let &arch_index = self.matched.get(self.arch_cursor)?;
            // SAFETY: `matched` indexes the archetype vec captured at
            // construction; the exclusive world borrow prevents it from
            // moving. The reference is dropped before `next` returns.
            let archetype = unsafe { &mut *self.archetypes.add(arch_index) };
            let Some(chunk) = archetype.chunk_mut(self.chunk_cursor) else {
                self.arch_cursor += 1;
                self.chunk_cursor = 0;
                continue;
            };
            self.chunk_cursor += 1;
            if chunk.is_empty() {
                continue;
            }
            if mask != 0 {
                // SAFETY: shared tracker read; no view method is running.
                let tracker = unsafe { self.tracker.as_ref() };
                let slots = surviving_slots(chunk, tracker, mask);
                if slots.is_empty() {
                    continue;
                }
                return Some(ChunkViewMut {
                    chunk: NonNull::from(chunk),
                    tracker: self.tracker,
                    slots: Some(slots),
                    _world: PhantomData,
                });
            }
            return Some(ChunkViewMut {
                chunk: NonNull::from(chunk),
                tracker: self.tracker,
                slots: None,
                _world: PhantomData,
            });
        }
    }
}
