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

//! World snapshots.
//!
//! Layout: sentinel byte `0x7F`, little-endian u32 entity count, little-
//! endian u32 archetype count, then an LZ4 block (size-prepended) holding
//! the JSON-encoded archetype rows. The counts sit uncompressed in the
//! header so metadata queries never touch the payload. Entity handles are
//! preserved across a save/load cycle.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry;
use crate::signature::Signature;
use crate::world::World;

const SNAPSHOT_SENTINEL: u8 = 0x7f;
const HEADER_LEN: usize = 9;

/// Uncompressed snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub entity_count: u32,
    pub archetype_count: u32,
}

#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    archetypes: Vec<ArchetypeDump>,
}

#[derive(Serialize, Deserialize)]
struct ArchetypeDump {
    /// Stable type names, one per serialized column.
    components: Vec<String>,
    rows: Vec<RowDump>,
}

#[derive(Serialize, Deserialize)]
struct RowDump {
    entity: u64,
    /// Component values, parallel to `components`.
    values: Vec<serde_json::Value>,
}

/// Serialize the whole world.
///
/// Components without serde registration are skipped (with a warning), so a
/// snapshot restores only what `register_serializable` covered.
pub fn save_world(world: &World) -> Result<Vec<u8>> {
    let mut archetypes = Vec::new();
    let mut entity_count: u32 = 0;

    for archetype in world.archetypes() {
        if archetype.is_empty() {
            continue;
        }

        let mut ids = Vec::new();
        let mut components = Vec::new();
        for id in archetype.signature().ids() {
            let info = registry::info(id).expect("archetype references unregistered component id");
            if info.serde.is_some() {
                ids.push((id, info));
                components.push(info.type_name.to_string());
            } else {
                tracing::warn!(
                    component = info.type_name,
                    "component is not serializable; omitted from snapshot"
                );
            }
        }

        let mut rows = Vec::with_capacity(archetype.entity_count());
        for chunk in archetype.chunks() {
            for slot in 0..chunk.len() {
                let mut values = Vec::with_capacity(ids.len());
                for &(id, info) in &ids {
                    let src = chunk.raw_row(id, slot)?;
                    let vtable = info.serde.unwrap();
                    // SAFETY: live rows hold initialized values of the
                    // column's component type.
                    values.push(unsafe { (vtable.row_to_json)(src) }?);
                }
                rows.push(RowDump {
                    entity: chunk.entity(slot)?.to_bits(),
                    values,
                });
                entity_count += 1;
            }
        }
        archetypes.push(ArchetypeDump { components, rows });
    }

    let payload = SnapshotPayload { archetypes };
    let body = serde_json::to_vec(&payload)?;
    let compressed = lz4_flex::compress_prepend_size(&body);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.push(SNAPSHOT_SENTINEL);
    out.extend_from_slice(&entity_count.to_le_bytes());
    out.extend_from_slice(&(payload.archetypes.len() as u32).to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Read the header without decompressing the payload.
pub fn snapshot_metadata(bytes: &[u8]) -> Result<SnapshotHeader> {
    if bytes.is_empty() {
        return Err(EcsError::MalformedPayload("empty snapshot".into()));
    }
    if bytes[0] != SNAPSHOT_SENTINEL {
        return Err(EcsError::UnsupportedVersion(bytes[0]));
    }
    if bytes.len() < HEADER_LEN {
        return Err(EcsError::MalformedPayload("truncated snapshot header".into()));
    }
    Ok(SnapshotHeader {
        entity_count: u32::from_le_bytes(bytes[1..5].try_into().unwrap()),
        archetype_count: u32::from_le_bytes(bytes[5..9].try_into().unwrap()),
    })
}

/// Restore a snapshot into an empty world, preserving entity handles.
///
/// Fails with `StateViolation` when the world already holds entities, and
/// with `NotFound` when the snapshot names a component type that is not
/// registered in this process.
pub fn load_world(world: &mut World, bytes: &[u8]) -> Result<()> {
    let header = snapshot_metadata(bytes)?;
    if world.entity_count() != 0 {
        return Err(EcsError::StateViolation);
    }

    let body = lz4_flex::decompress_size_prepended(&bytes[HEADER_LEN..])
        .map_err(|e| EcsError::MalformedPayload(format!("lz4: {e}")))?;
    let payload: SnapshotPayload = serde_json::from_slice(&body)?;

    if payload.archetypes.len() != header.archetype_count as usize {
        return Err(EcsError::MalformedPayload(
            "archetype count disagrees with header".into(),
        ));
    }

    for dump in &payload.archetypes {
        let mut infos = Vec::with_capacity(dump.components.len());
        let mut signature = Signature::EMPTY;
        for name in &dump.components {
            let info = registry::info_by_name(name).ok_or(EcsError::NotFound)?;
            let vtable = info.serde.ok_or(EcsError::NotFound)?;
            signature = signature.with_id(info.id);
            infos.push((info, vtable));
        }

        for row in &dump.rows {
            if row.values.len() != infos.len() {
                return Err(EcsError::MalformedPayload(
                    "row value count disagrees with archetype columns".into(),
                ));
            }
            let entity = Entity::from_bits(row.entity);
            let arch_index = world.restore_entity(entity, signature)?;

            let archetype = &mut world.archetypes_mut()[arch_index];
            let location = archetype.location(entity).unwrap();
            let chunk = archetype.chunk_mut(location.chunk).unwrap();
            for ((info, vtable), value) in infos.iter().zip(&row.values) {
                let dst = chunk.raw_row_mut(info.id, location.slot)?;
                // SAFETY: the row was sized and aligned for this component
                // at chunk construction and is initialized exactly once.
                unsafe { (vtable.row_from_json)(value, dst)? };
            }
        }
    }
    Ok(())
}

pub fn save_world_to_file<P: AsRef<Path>>(world: &World, path: P) -> Result<()> {
    std::fs::write(path, save_world(world)?)?;
    Ok(())
}

pub fn load_world_from_file<P: AsRef<Path>>(world: &mut World, path: P) -> Result<()> {
    let bytes = std::fs::read(path)?;
    load_world(world, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{register_test_components, Health, Position};

    fn sample_world() -> (World, Vec<Entity>) {
        register_test_components();
        let mut world = World::new();
        let mut entities = Vec::new();
        for i in 0..5 {
            let e = world.create_entity();
            world
                .add_component(e, Position { x: i as f32, y: 2.0 * i as f32, z: 0.0 })
                .unwrap();
            if i % 2 == 0 {
                world.add_component(e, Health { current: 50 + i, max: 100 }).unwrap();
            }
            entities.push(e);
        }
        (world, entities)
    }

    #[test]
    fn test_round_trip_preserves_entities_and_values() {
        let (world, entities) = sample_world();
        let bytes = save_world(&world).unwrap();
        assert_eq!(bytes[0], 0x7f);

        let mut restored = World::new();
        load_world(&mut restored, &bytes).unwrap();

        assert_eq!(restored.entity_count(), world.entity_count());
        for (i, &e) in entities.iter().enumerate() {
            assert!(restored.is_alive(e));
            let p = restored.get_component::<Position>(e).unwrap();
            assert_eq!((p.x, p.y), (i as f32, 2.0 * i as f32));
            assert_eq!(
                restored.has_component::<Health>(e),
                world.has_component::<Health>(e)
            );
        }

        // Fresh ids never collide with restored handles.
        let fresh = restored.create_entity();
        assert!(entities.iter().all(|&e| e.id() != fresh.id()));
    }

    #[test]
    fn test_metadata_reads_header_only() {
        let (world, _) = sample_world();
        let bytes = save_world(&world).unwrap();

        let header = snapshot_metadata(&bytes).unwrap();
        assert_eq!(header.entity_count, 5);
        assert!(header.archetype_count >= 2);

        // Header survives payload truncation.
        let header2 = snapshot_metadata(&bytes[..HEADER_LEN]).unwrap();
        assert_eq!(header, header2);
    }

    #[test]
    fn test_bad_sentinel_rejected() {
        let (world, _) = sample_world();
        let mut bytes = save_world(&world).unwrap();
        bytes[0] = 0x01;
        assert!(matches!(
            snapshot_metadata(&bytes),
            Err(EcsError::UnsupportedVersion(0x01))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let (world, _) = sample_world();
        let bytes = save_world(&world).unwrap();
        let mut fresh = World::new();
        assert!(load_world(&mut fresh, &bytes[..HEADER_LEN + 2]).is_err());
    }

    #[test]
    fn test_load_into_populated_world_rejected() {
        let (world, _) = sample_world();
        let bytes = save_world(&world).unwrap();

        let mut populated = World::new();
        populated.create_entity();
        assert!(matches!(
            load_world(&mut populated, &bytes),
            Err(EcsError::StateViolation)
        ));
    }
}
