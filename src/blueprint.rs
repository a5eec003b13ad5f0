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

//! Blueprints: declarative component bundles.
//!
//! A blueprint is an ordered collection of `(component type, value)` pairs
//! with set semantics on the type. Worlds instantiate entities from it, and
//! it round-trips through a textual (JSON) and a binary format. The binary
//! layout is: 1-byte version (`1`), little-endian u32 component count, then
//! per component a u32-length-prefixed UTF-8 type name followed by a
//! u32-length-prefixed UTF-8 JSON-encoded value.

use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{EcsError, Result};
use crate::registry::{self, Component, ErasedValue};
use crate::signature::Signature;

const BINARY_VERSION: u8 = 1;

/// One `(type, value)` pair of a blueprint.
pub struct BlueprintEntry {
    id: u8,
    type_name: &'static str,
    value: ErasedValue,
    clone_fn: fn(&(dyn std::any::Any + Send + Sync)) -> ErasedValue,
    write_fn: unsafe fn(&(dyn std::any::Any + Send + Sync), *mut u8),
}

impl BlueprintEntry {
    pub fn component_id(&self) -> u8 {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Clone the stored value into a raw column row.
    ///
    /// # Safety
    /// `dst` must be a writable row sized and aligned for this component.
    pub(crate) unsafe fn write_row(&self, dst: *mut u8) {
        (self.write_fn)(self.value.as_ref(), dst);
    }

    fn deep_clone(&self) -> BlueprintEntry {
        BlueprintEntry {
            id: self.id,
            type_name: self.type_name,
            value: (self.clone_fn)(self.value.as_ref()),
            clone_fn: self.clone_fn,
            write_fn: self.write_fn,
        }
    }
}

/// Declarative component bundle.
#[derive(Default)]
pub struct Blueprint {
    entries: SmallVec<[BlueprintEntry; 8]>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `T`, replacing any prior entry of the same type in place.
    pub fn with<T: Component + Clone>(mut self, value: T) -> Self {
        let id = registry::component_id::<T>();
        let entry = BlueprintEntry {
            id,
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
            clone_fn: |v| Box::new(v.downcast_ref::<T>().unwrap().clone()),
            write_fn: |v, dst| {
                let value = v.downcast_ref::<T>().unwrap().clone();
                unsafe { std::ptr::write(dst as *mut T, value) };
            },
        };
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Remove `T` if present.
    pub fn without<T: Component>(mut self) -> Self {
        if let Some(id) = registry::id_of::<T>() {
            self.entries.retain(|e| e.id != id);
        }
        self
    }

    pub fn has<T: Component>(&self) -> bool {
        registry::id_of::<T>()
            .is_some_and(|id| self.entries.iter().any(|e| e.id == id))
    }

    /// The stored value of `T`. Total: `None` when absent.
    pub fn get<T: Component>(&self) -> Option<&T> {
        let id = registry::id_of::<T>()?;
        self.entries
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.value.downcast_ref())
    }

    /// Signature implied by the stored component types.
    pub fn signature(&self) -> Signature {
        self.entries
            .iter()
            .fold(Signature::EMPTY, |sig, e| sig.with_id(e.id))
    }

    pub fn component_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &BlueprintEntry> + '_ {
        self.entries.iter()
    }

    // ========== Textual format ==========

    /// Serialize to the textual format. Every component must have been
    /// registered through `register_serializable`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut components = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let vtable = serde_vtable(entry.id, entry.type_name)?;
            components.push(ComponentDoc {
                type_name: entry.type_name.to_string(),
                value_json: (vtable.value_to_json)(entry.value.as_ref())?,
            });
        }
        serde_json::to_value(BlueprintDoc { components }).map_err(EcsError::from)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_json()?).map_err(EcsError::from)
    }

    /// Deserialize from the textual format. Unknown type names fail with
    /// `NotFound`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let doc: BlueprintDoc = serde_json::from_value(value.clone())?;
        let mut blueprint = Blueprint::new();
        for component in &doc.components {
            let info = registry::info_by_name(&component.type_name).ok_or(EcsError::NotFound)?;
            let vtable = info.serde.ok_or(EcsError::NotFound)?;
            let entry = BlueprintEntry {
                id: info.id,
                type_name: info.type_name,
                value: (vtable.value_from_json)(&component.value_json)?,
                clone_fn: vtable.clone_value,
                write_fn: vtable.write_row,
            };
            match blueprint.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => blueprint.entries.push(entry),
            }
        }
        Ok(blueprint)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    // ========== Binary format ==========

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = vec![BINARY_VERSION];
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            let vtable = serde_vtable(entry.id, entry.type_name)?;
            let value_json =
                serde_json::to_string(&(vtable.value_to_json)(entry.value.as_ref())?)?;
            write_lp_str(&mut out, entry.type_name);
            write_lp_str(&mut out, &value_json);
        }
        Ok(out)
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, offset: 0 };
        let version = cursor.read_u8()?;
        if version != BINARY_VERSION {
            return Err(EcsError::UnsupportedVersion(version));
        }
        let count = cursor.read_u32()?;
        let mut blueprint = Blueprint::new();
        for _ in 0..count {
            let type_name = cursor.read_lp_str()?;
            let value_json = cursor.read_lp_str()?;

            let info = registry::info_by_name(type_name).ok_or(EcsError::NotFound)?;
            let vtable = info.serde.ok_or(EcsError::NotFound)?;
            let json: serde_json::Value = serde_json::from_str(value_json)?;
            let entry = BlueprintEntry {
                id: info.id,
                type_name: info.type_name,
                value: (vtable.value_from_json)(&json)?,
                clone_fn: vtable.clone_value,
                write_fn: vtable.write_row,
            };
            match blueprint.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => blueprint.entries.push(entry),
            }
        }
        Ok(blueprint)
    }

    // ========== Files ==========

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_binary()?)?;
        Ok(())
    }

    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_binary(&bytes)
    }
}

impl Clone for Blueprint {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.iter().map(BlueprintEntry::deep_clone).collect(),
        }
    }
}

fn serde_vtable(id: u8, type_name: &str) -> Result<registry::SerdeVtable> {
    registry::info(id)
        .and_then(|i| i.serde)
        .ok_or_else(|| {
            EcsError::InvalidArgument(format!(
                "component type `{type_name}` is not registered as serializable"
            ))
        })
}

fn write_lp_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or_else(|| EcsError::MalformedPayload("unexpected end of payload".into()))?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let end = self.offset + 4;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| EcsError::MalformedPayload("unexpected end of payload".into()))?;
        self.offset = end;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_lp_str(&mut self) -> Result<&'a str> {
        let len = self.read_u32()? as usize;
        let end = self
            .offset
            .checked_add(len)
            .ok_or_else(|| EcsError::MalformedPayload("length prefix overflow".into()))?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| EcsError::MalformedPayload("unexpected end of payload".into()))?;
        self.offset = end;
        std::str::from_utf8(slice)
            .map_err(|e| EcsError::MalformedPayload(format!("invalid UTF-8: {e}")))
    }
}

/// JSON document shape of the textual format.
#[derive(Serialize, Deserialize)]
struct BlueprintDoc {
    components: Vec<ComponentDoc>,
}

#[derive(Serialize, Deserialize)]
struct ComponentDoc {
    type_name: String,
    value_json: serde_json::Value,
}

/// Named blueprint store.
#[derive(Default)]
pub struct BlueprintLibrary {
    blueprints: AHashMap<String, Blueprint>,
}

impl BlueprintLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blueprint under a name. Empty names are rejected with
    /// `InvalidArgument`; taken names with `Duplicate`.
    pub fn insert(&mut self, name: &str, blueprint: Blueprint) -> Result<()> {
        if name.is_empty() {
            return Err(EcsError::InvalidArgument("blueprint name is empty".into()));
        }
        if self.blueprints.contains_key(name) {
            return Err(EcsError::Duplicate);
        }
        self.blueprints.insert(name.to_string(), blueprint);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Blueprint> {
        self.blueprints.get(name).ok_or(EcsError::NotFound)
    }

    pub fn remove(&mut self, name: &str) -> Option<Blueprint> {
        self.blueprints.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blueprints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.blueprints.keys().map(String::as_str)
    }
}
