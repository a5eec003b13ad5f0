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

//! Component type registry.
//!
//! Process-wide mapping from component type to a dense id in `[0, 63]`.
//! Registration is first-touch and ids are stable within a registry
//! generation. Each registered type carries a small vtable (layout, drop
//! glue, optional serde trampolines) so the type-erased storage and the
//! serialization paths never touch reflection at runtime.

use std::alloc::Layout;
use std::any::{Any, TypeId};
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EcsError, Result};

/// Hard limit on distinct component types per registry generation.
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Marker trait for components.
///
/// Components must be `'static` (no borrowed data).
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Boxed type-erased component value, as held by blueprints.
pub type ErasedValue = Box<dyn Any + Send + Sync>;

/// Serde trampolines installed by [`register_serializable`].
///
/// All entries are plain function pointers monomorphized at registration;
/// the serialization paths dispatch through these without reflection.
#[derive(Clone, Copy)]
pub struct SerdeVtable {
    /// Serialize a boxed value to JSON.
    pub value_to_json: fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value>,
    /// Deserialize JSON into a boxed value.
    pub value_from_json: fn(&serde_json::Value) -> Result<ErasedValue>,
    /// Deep-copy a boxed value.
    pub clone_value: fn(&(dyn Any + Send + Sync)) -> ErasedValue,
    /// Clone a boxed value into a raw column row.
    ///
    /// # Safety
    /// `dst` must point at a writable, properly aligned row for this type.
    pub write_row: unsafe fn(&(dyn Any + Send + Sync), dst: *mut u8),
    /// Serialize a column row to JSON.
    ///
    /// # Safety
    /// `src` must point at an initialized row of this type.
    pub row_to_json: unsafe fn(src: *const u8) -> Result<serde_json::Value>,
    /// Deserialize JSON directly into a raw column row.
    ///
    /// # Safety
    /// `dst` must point at a writable, properly aligned row for this type.
    pub row_from_json: unsafe fn(&serde_json::Value, dst: *mut u8) -> Result<()>,
}

/// Per-type metadata recorded at registration.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    pub id: u8,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub layout: Layout,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
    pub serde: Option<SerdeVtable>,
}

#[derive(Default)]
struct RegistryInner {
    ids: FxHashMap<TypeId, u8>,
    names: FxHashMap<&'static str, u8>,
    infos: Vec<ComponentInfo>,
    generation: u64,
}

fn registry() -> &'static RwLock<RegistryInner> {
    static REGISTRY: OnceLock<RwLock<RegistryInner>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(RegistryInner::default()))
}

fn make_info<T: Component>(id: u8) -> ComponentInfo {
    ComponentInfo {
        id,
        type_id: TypeId::of::<T>(),
        type_name: std::any::type_name::<T>(),
        layout: Layout::new::<T>(),
        drop_fn: if std::mem::needs_drop::<T>() {
            Some(|ptr| unsafe {
                std::ptr::drop_in_place(ptr as *mut T);
            })
        } else {
            None
        },
        serde: None,
    }
}

fn register_with<T: Component>(serde: Option<SerdeVtable>) -> Result<u8> {
    let mut inner = registry().write();
    if let Some(&id) = inner.ids.get(&TypeId::of::<T>()) {
        // Upgrade a plain registration with serde support in place.
        if serde.is_some() && inner.infos[id as usize].serde.is_none() {
            inner.infos[id as usize].serde = serde;
        }
        return Ok(id);
    }

    if inner.infos.len() >= MAX_COMPONENT_TYPES {
        return Err(EcsError::CapacityExceeded);
    }

    let id = inner.infos.len() as u8;
    let mut info = make_info::<T>(id);
    info.serde = serde;
    inner.ids.insert(info.type_id, id);
    inner.names.insert(info.type_name, id);
    inner.infos.push(info);
    Ok(id)
}

/// Register `T`, assigning the next dense id if it is absent.
///
/// Fails with `CapacityExceeded` when the 65th distinct type is registered.
pub fn register<T: Component>() -> Result<u8> {
    register_with::<T>(None)
}

/// Register `T` with serde trampolines so blueprints and snapshots can
/// serialize it. Idempotent; upgrades an existing plain registration.
pub fn register_serializable<T>() -> Result<u8>
where
    T: Component + Clone + Serialize + DeserializeOwned,
{
    let vtable = SerdeVtable {
        value_to_json: |value| {
            let concrete = value.downcast_ref::<T>().unwrap();
            serde_json::to_value(concrete).map_err(EcsError::from)
        },
        value_from_json: |json| {
            let concrete: T = serde_json::from_value(json.clone())?;
            Ok(Box::new(concrete) as ErasedValue)
        },
        clone_value: |value| {
            let concrete = value.downcast_ref::<T>().unwrap();
            Box::new(concrete.clone()) as ErasedValue
        },
        write_row: |value, dst| {
            let concrete = value.downcast_ref::<T>().unwrap().clone();
            unsafe { std::ptr::write(dst as *mut T, concrete) };
        },
        row_to_json: |src| {
            let concrete = unsafe { &*(src as *const T) };
            serde_json::to_value(concrete).map_err(EcsError::from)
        },
        row_from_json: |json, dst| {
            let concrete: T = serde_json::from_value(json.clone())?;
            unsafe { std::ptr::write(dst as *mut T, concrete) };
            Ok(())
        },
    };
    register_with::<T>(Some(vtable))
}

/// Dense id of `T`, or `None` if unregistered. Infallible read path.
pub fn id_of<T: Component>() -> Option<u8> {
    registry().read().ids.get(&TypeId::of::<T>()).copied()
}

/// First-touch id of `T`: registers if absent.
///
/// # Panics
/// Panics when the type limit is reached. Callers that need the error
/// instead should call [`register`] explicitly at startup.
pub fn component_id<T: Component>() -> u8 {
    match register::<T>() {
        Ok(id) => id,
        Err(err) => panic!(
            "failed to register component type {}: {err}",
            std::any::type_name::<T>()
        ),
    }
}

/// Metadata for a registered id.
pub fn info(id: u8) -> Option<ComponentInfo> {
    registry().read().infos.get(id as usize).copied()
}

/// Metadata looked up by stable type name (deserialization path).
pub fn info_by_name(name: &str) -> Option<ComponentInfo> {
    let inner = registry().read();
    let id = *inner.names.get(name)?;
    inner.infos.get(id as usize).copied()
}

/// Stable type name for a registered id.
pub fn type_name(id: u8) -> Option<&'static str> {
    registry().read().infos.get(id as usize).map(|i| i.type_name)
}

/// Number of registered component types in the current generation.
pub fn registered_count() -> usize {
    registry().read().infos.len()
}

/// Current registry generation. Bumped by [`reset`].
pub fn generation() -> u64 {
    registry().read().generation
}

/// Drop every registration and start a new generation.
///
/// Test tooling only: ids held by live worlds, chunks, or signatures become
/// meaningless after a reset. Production code must not rely on id reuse
/// across generations.
pub fn reset() {
    let mut inner = registry().write();
    inner.ids.clear();
    inner.names.clear();
    inner.infos.clear();
    inner.generation += 1;
}
