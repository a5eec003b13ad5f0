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

//! Fixed-capacity columnar chunk.
//!
//! A chunk stores up to `capacity` entities of one signature: a dense
//! entity array plus one contiguous column per component type. Columns are
//! materialized lazily on first access, zero-initialized to capacity;
//! subsequent accesses return the same backing storage. Component values
//! move in and out bitwise; a value with drop glue is dropped when its row
//! is removed. Removal is swap-with-last so live rows stay dense.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::{self, Component, ComponentInfo};
use crate::signature::Signature;

/// Default number of entity slots per chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 512;

/// Type-erased component column: `capacity` rows of one component type,
/// allocated zeroed with the component's own alignment.
pub(crate) struct Column {
    id: u8,
    data: NonNull<u8>,
    item_layout: Layout,
    capacity: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

// The stored component types are Send + Sync by the `Component` bound.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    fn new(info: &ComponentInfo, capacity: usize) -> Self {
        let size = info
            .layout
            .size()
            .checked_mul(capacity)
            .expect("column allocation size overflow");
        let data = if size == 0 {
            // ZST column, or zero capacity: a dangling aligned pointer.
            NonNull::new(info.layout.align() as *mut u8).unwrap()
        } else {
            let array_layout = Layout::from_size_align(size, info.layout.align()).unwrap();
            let ptr = unsafe { alloc_zeroed(array_layout) };
            NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(array_layout))
        };
        Self {
            id: info.id,
            data,
            item_layout: info.layout,
            capacity,
            drop_fn: info.drop_fn,
        }
    }

    fn item_size(&self) -> usize {
        self.item_layout.size()
    }

    pub(crate) fn row_ptr(&self, slot: usize) -> *const u8 {
        debug_assert!(slot < self.capacity);
        unsafe { self.data.as_ptr().add(slot * self.item_size()) }
    }

    pub(crate) fn row_ptr_mut(&mut self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.capacity);
        unsafe { self.data.as_ptr().add(slot * self.item_size()) }
    }

    /// Drop the value stored in `slot`, if the type has drop glue.
    ///
    /// # Safety
    /// The row must hold an initialized value that is not read again.
    unsafe fn drop_row(&mut self, slot: usize) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(self.row_ptr_mut(slot));
        }
    }

    /// Bitwise move of row `from` into row `to`. `from` is left stale.
    fn move_row(&mut self, from: usize, to: usize) {
        debug_assert_ne!(from, to);
        let size = self.item_size();
        unsafe {
            std::ptr::copy_nonoverlapping(self.row_ptr(from), self.row_ptr_mut(to), size);
        }
    }

    /// Bitwise copy of a row from another column of the same component type.
    fn copy_row_from(&mut self, src: &Column, src_slot: usize, dst_slot: usize) {
        debug_assert_eq!(self.id, src.id);
        let size = self.item_size();
        unsafe {
            std::ptr::copy_nonoverlapping(src.row_ptr(src_slot), self.row_ptr_mut(dst_slot), size);
        }
    }

    /// Zero a row, matching what an untouched lazy column reads as.
    fn zero_row(&mut self, slot: usize) {
        let size = self.item_size();
        unsafe { std::ptr::write_bytes(self.row_ptr_mut(slot), 0, size) };
    }

    fn as_slice<T>(&self, len: usize) -> &[T] {
        debug_assert!(len <= self.capacity);
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const T, len) }
    }

    fn as_slice_mut<T>(&mut self, len: usize) -> &mut [T] {
        debug_assert!(len <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr() as *mut T, len) }
    }

    fn bytes_capacity(&self) -> usize {
        self.item_size() * self.capacity
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        // Live rows are dropped by the owning chunk; only free the buffer.
        let size = self.bytes_capacity();
        if size > 0 {
            let layout = Layout::from_size_align(size, self.item_layout.align()).unwrap();
            unsafe { dealloc(self.data.as_ptr(), layout) };
        }
    }
}

/// Column slot that defers allocation until first access.
///
/// `OnceLock` lets the shared-reference read path materialize too, and
/// keeps the chunk `Sync`.
struct LazyColumn {
    info: ComponentInfo,
    cell: OnceLock<Column>,
}

impl LazyColumn {
    fn new(info: ComponentInfo) -> Self {
        Self {
            info,
            cell: OnceLock::new(),
        }
    }

    fn component_id(&self) -> u8 {
        self.info.id
    }

    /// Backing storage, allocated zeroed on the first call.
    fn materialize(&self, capacity: usize) -> &Column {
        self.cell.get_or_init(|| Column::new(&self.info, capacity))
    }

    fn materialize_mut(&mut self, capacity: usize) -> &mut Column {
        self.materialize(capacity);
        self.cell.get_mut().unwrap()
    }

    /// Backing storage if it has been materialized.
    fn get(&self) -> Option<&Column> {
        self.cell.get()
    }

    fn get_mut(&mut self) -> Option<&mut Column> {
        self.cell.get_mut()
    }
}

/// Fixed-capacity column store for one signature.
pub struct Chunk {
    signature: Signature,
    capacity: usize,
    entities: Vec<Entity>,
    columns: Vec<LazyColumn>,
    column_index: FxHashMap<u8, usize>,
}

impl Chunk {
    /// Create a chunk with one (unmaterialized) column slot per component
    /// in `signature`. Column storage is allocated on first access.
    ///
    /// # Panics
    /// Panics if `signature` names an unregistered component id.
    pub fn new(signature: Signature, capacity: usize) -> Self {
        let mut columns = Vec::with_capacity(signature.count() as usize);
        let mut column_index = FxHashMap::default();
        for id in signature.ids() {
            let info = registry::info(id).expect("signature references unregistered component id");
            column_index.insert(id, columns.len());
            columns.push(LazyColumn::new(info));
        }
        Self {
            signature,
            capacity,
            entities: Vec::with_capacity(capacity),
            columns,
            column_index,
        }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entities.len() == self.capacity
    }

    /// Append an entity, returning its slot. The caller is responsible for
    /// writing the new row in every column.
    pub fn add_entity(&mut self, entity: Entity) -> Result<usize> {
        if self.is_full() {
            return Err(EcsError::ChunkFull);
        }
        let slot = self.entities.len();
        self.entities.push(entity);
        Ok(slot)
    }

    /// Swap-with-last removal across the entity slot and every materialized
    /// column. Returns the entity that was moved into `index`, if any.
    pub fn remove_entity(&mut self, index: usize) -> Result<Option<Entity>> {
        self.swap_remove_inner(index, self.signature)
    }

    /// Removal variant for migration: rows in `preserved` were already moved
    /// out bitwise and must not be dropped here.
    pub(crate) fn remove_entity_after_move(
        &mut self,
        index: usize,
        preserved: Signature,
    ) -> Result<Option<Entity>> {
        self.swap_remove_inner(index, self.signature.difference(preserved))
    }

    fn swap_remove_inner(&mut self, index: usize, drop_mask: Signature) -> Result<Option<Entity>> {
        let len = self.entities.len();
        if index >= len {
            return Err(EcsError::OutOfRange { index, len });
        }
        let last = len - 1;
        for lazy in &mut self.columns {
            let id = lazy.component_id();
            // Untouched columns have no rows to drop or move.
            let Some(column) = lazy.get_mut() else { continue };
            if drop_mask.has_id(id) {
                unsafe { column.drop_row(index) };
            }
            if index < last {
                column.move_row(last, index);
            }
        }
        self.entities.swap_remove(index);
        Ok(if index < last {
            Some(self.entities[index])
        } else {
            None
        })
    }

    pub fn entity(&self, index: usize) -> Result<Entity> {
        self.entities
            .get(index)
            .copied()
            .ok_or(EcsError::OutOfRange {
                index,
                len: self.entities.len(),
            })
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Linear scan for an entity's slot. Rare paths only; the owning
    /// archetype's location map is the fast path.
    pub fn find(&self, entity: Entity) -> Option<usize> {
        self.entities.iter().position(|&e| e == entity)
    }

    fn column_for<T: Component>(&self) -> Result<&Column> {
        let id = registry::id_of::<T>().ok_or(EcsError::NotInSignature)?;
        let idx = *self.column_index.get(&id).ok_or(EcsError::NotInSignature)?;
        Ok(self.columns[idx].materialize(self.capacity))
    }

    fn column_for_mut<T: Component>(&mut self) -> Result<&mut Column> {
        let id = registry::id_of::<T>().ok_or(EcsError::NotInSignature)?;
        let idx = *self.column_index.get(&id).ok_or(EcsError::NotInSignature)?;
        let capacity = self.capacity;
        Ok(self.columns[idx].materialize_mut(capacity))
    }

    /// The `T` column as a slice of length `len()`. Materializes the column
    /// on first call; subsequent calls return the same backing storage.
    pub fn column<T: Component>(&self) -> Result<&[T]> {
        let len = self.entities.len();
        Ok(self.column_for::<T>()?.as_slice(len))
    }

    /// The `T` column as a mutable slice of length `len()`.
    pub fn column_mut<T: Component>(&mut self) -> Result<&mut [T]> {
        let len = self.entities.len();
        Ok(self.column_for_mut::<T>()?.as_slice_mut(len))
    }

    pub fn get<T: Component>(&self, index: usize) -> Result<&T> {
        let column = self.column_for::<T>()?;
        if index >= self.entities.len() {
            return Err(EcsError::OutOfRange {
                index,
                len: self.entities.len(),
            });
        }
        Ok(unsafe { &*(column.row_ptr(index) as *const T) })
    }

    pub fn get_mut<T: Component>(&mut self, index: usize) -> Result<&mut T> {
        let len = self.entities.len();
        let column = self.column_for_mut::<T>()?;
        if index >= len {
            return Err(EcsError::OutOfRange { index, len });
        }
        Ok(unsafe { &mut *(column.row_ptr_mut(index) as *mut T) })
    }

    /// Write a value into a row. The previous bytes are overwritten without
    /// being dropped; rows are initialized exactly once by their writer.
    pub fn set<T: Component>(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.entities.len();
        let column = self.column_for_mut::<T>()?;
        if index >= len {
            return Err(EcsError::OutOfRange { index, len });
        }
        unsafe { std::ptr::write(column.row_ptr_mut(index) as *mut T, value) };
        Ok(())
    }

    /// Raw row pointer for type-erased writers (blueprint instantiation).
    pub(crate) fn raw_row_mut(&mut self, id: u8, slot: usize) -> Result<*mut u8> {
        let len = self.entities.len();
        let capacity = self.capacity;
        let idx = *self.column_index.get(&id).ok_or(EcsError::NotInSignature)?;
        if slot >= len {
            return Err(EcsError::OutOfRange { index: slot, len });
        }
        Ok(self.columns[idx].materialize_mut(capacity).row_ptr_mut(slot))
    }

    /// Raw row pointer for type-erased readers (snapshot serialization).
    pub(crate) fn raw_row(&self, id: u8, slot: usize) -> Result<*const u8> {
        let len = self.entities.len();
        let idx = *self.column_index.get(&id).ok_or(EcsError::NotInSignature)?;
        if slot >= len {
            return Err(EcsError::OutOfRange { index: slot, len });
        }
        Ok(self.columns[idx].materialize(self.capacity).row_ptr(slot))
    }

    /// Bitwise copy of the rows named by `ids` from `src` into this chunk.
    /// Used by archetype migration; both slots must already exist.
    pub(crate) fn copy_row_from(
        &mut self,
        src: &Chunk,
        ids: Signature,
        src_slot: usize,
        dst_slot: usize,
    ) {
        let capacity = self.capacity;
        for id in ids.ids() {
            let src_idx = src.column_index[&id];
            let dst_idx = self.column_index[&id];
            match src.columns[src_idx].get() {
                Some(src_column) => {
                    self.columns[dst_idx]
                        .materialize_mut(capacity)
                        .copy_row_from(src_column, src_slot, dst_slot);
                }
                None => {
                    // The source column was never touched, so the row reads
                    // as zeros; an already materialized destination column
                    // must not keep its previous occupant's bytes.
                    if let Some(dst_column) = self.columns[dst_idx].get_mut() {
                        dst_column.zero_row(dst_slot);
                    }
                }
            }
        }
    }

    pub(crate) fn bytes_capacity(&self) -> usize {
        self.columns
            .iter()
            .filter_map(LazyColumn::get)
            .map(Column::bytes_capacity)
            .sum::<usize>()
            + self.capacity * std::mem::size_of::<Entity>()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for lazy in &mut self.columns {
            if let Some(column) = lazy.get_mut() {
                for slot in 0..self.entities.len() {
                    unsafe { column.drop_row(slot) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Position, Tag, Velocity};

    fn chunk_with<T: Component>(capacity: usize) -> Chunk {
        Chunk::new(Signature::EMPTY.with::<T>(), capacity)
    }

    #[test]
    fn test_add_until_full() {
        let mut chunk = chunk_with::<Position>(2);
        assert_eq!(chunk.add_entity(Entity::new(1, 1)).unwrap(), 0);
        assert_eq!(chunk.add_entity(Entity::new(2, 1)).unwrap(), 1);
        assert!(chunk.is_full());
        assert!(matches!(
            chunk.add_entity(Entity::new(3, 1)),
            Err(EcsError::ChunkFull)
        ));
    }

    #[test]
    fn test_swap_remove_moves_last_row() {
        let mut chunk = chunk_with::<Position>(4);
        for i in 1..=3u32 {
            let slot = chunk.add_entity(Entity::new(i, 1)).unwrap();
            chunk
                .set(slot, Position { x: i as f32, y: 0.0, z: 0.0 })
                .unwrap();
        }

        let swapped = chunk.remove_entity(0).unwrap();
        assert_eq!(swapped, Some(Entity::new(3, 1)));
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.get::<Position>(0).unwrap().x, 3.0);
        assert_eq!(chunk.entity(0).unwrap(), Entity::new(3, 1));
    }

    #[test]
    fn test_remove_last_returns_none() {
        let mut chunk = chunk_with::<Position>(4);
        chunk.add_entity(Entity::new(1, 1)).unwrap();
        assert_eq!(chunk.remove_entity(0).unwrap(), None);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut chunk = chunk_with::<Position>(4);
        chunk.add_entity(Entity::new(1, 1)).unwrap();
        assert!(matches!(
            chunk.remove_entity(3),
            Err(EcsError::OutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_column_not_in_signature() {
        let chunk = chunk_with::<Position>(4);
        assert!(matches!(
            chunk.column::<Velocity>(),
            Err(EcsError::NotInSignature)
        ));
    }

    #[test]
    fn test_column_slice_tracks_len() {
        let mut chunk = chunk_with::<Position>(8);
        assert_eq!(chunk.column::<Position>().unwrap().len(), 0);

        let slot = chunk.add_entity(Entity::new(1, 1)).unwrap();
        chunk
            .set(slot, Position { x: 1.0, y: 2.0, z: 3.0 })
            .unwrap();

        let col = chunk.column::<Position>().unwrap();
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].y, 2.0);
    }

    #[test]
    fn test_columns_materialize_lazily() {
        let signature = Signature::EMPTY.with::<Position>().with::<Velocity>();
        let mut chunk = Chunk::new(signature, 8);
        let baseline = chunk.bytes_capacity();

        // Adding entities touches no column storage.
        chunk.add_entity(Entity::new(1, 1)).unwrap();
        assert_eq!(chunk.bytes_capacity(), baseline);

        // First write materializes only the written column.
        chunk
            .set(0, Position { x: 1.0, y: 0.0, z: 0.0 })
            .unwrap();
        let after_position = chunk.bytes_capacity();
        assert_eq!(
            after_position,
            baseline + 8 * std::mem::size_of::<Position>()
        );

        // A read access materializes too, zero-initialized.
        assert_eq!(chunk.column::<Velocity>().unwrap()[0].x, 0.0);
        assert_eq!(
            chunk.bytes_capacity(),
            after_position + 8 * std::mem::size_of::<Velocity>()
        );
    }

    #[test]
    fn test_column_backing_storage_is_stable() {
        let mut chunk = chunk_with::<Position>(4);
        chunk.add_entity(Entity::new(1, 1)).unwrap();

        let first = chunk.column::<Position>().unwrap().as_ptr();
        chunk
            .set(0, Position { x: 9.0, y: 9.0, z: 9.0 })
            .unwrap();
        let second = chunk.column::<Position>().unwrap().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_sized_component() {
        let mut chunk = chunk_with::<Tag>(4);
        let slot = chunk.add_entity(Entity::new(1, 1)).unwrap();
        chunk.set(slot, Tag).unwrap();
        assert_eq!(chunk.column::<Tag>().unwrap().len(), 1);
        chunk.remove_entity(0).unwrap();
    }

    #[test]
    fn test_find_is_linear_scan() {
        let mut chunk = chunk_with::<Position>(4);
        chunk.add_entity(Entity::new(7, 1)).unwrap();
        chunk.add_entity(Entity::new(9, 1)).unwrap();
        assert_eq!(chunk.find(Entity::new(9, 1)), Some(1));
        assert_eq!(chunk.find(Entity::new(8, 1)), None);
    }
}
