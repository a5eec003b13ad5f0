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

//! Prism ECS - chunked archetype Entity Component System
//!
//! Columnar chunk storage, change-tracked queries, a phase-ordered
//! scheduler, and one-frame event channels for simulation workloads.

pub mod archetype;
pub mod blueprint;
pub mod bridge;
pub mod change;
pub mod chunk;
pub mod entity;
pub mod error;
pub mod events;
pub mod query;
pub mod registry;
pub mod schedule;
pub mod signature;
pub mod snapshot;
pub mod time;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, EntityLocation};
pub use blueprint::{Blueprint, BlueprintLibrary};
pub use bridge::{IntentProcessor, VisualBridge};
pub use change::ChangeTracker;
pub use chunk::{Chunk, DEFAULT_CHUNK_CAPACITY};
pub use entity::Entity;
pub use error::{EcsError, Result};
pub use events::{ChannelStats, Event, EventChannel, DEFAULT_CHANNEL_CAPACITY};
pub use query::{ChunkView, ChunkViewMut, Query};
pub use registry::{Component, MAX_COMPONENT_TYPES};
pub use schedule::{BoxedSystem, Phase, Scheduler, System, SystemTiming};
pub use signature::Signature;
pub use snapshot::SnapshotHeader;
pub use time::Time;
pub use world::{MemoryStats, World, WorldConfig};

#[cfg(test)]
pub(crate) mod test_support;
