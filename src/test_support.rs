//! Shared component types for unit tests.
//!
//! Unit tests in this crate reuse these instead of declaring their own so
//! the process-wide registry stays far below its 64-type limit when the
//! whole suite runs in one process.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag;

/// Register the shared types with serde support. Idempotent.
pub fn register_test_components() {
    crate::registry::register_serializable::<Position>().unwrap();
    crate::registry::register_serializable::<Velocity>().unwrap();
    crate::registry::register_serializable::<Health>().unwrap();
    crate::registry::register_serializable::<Tag>().unwrap();
}
