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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity, component, or named blueprint does not exist
    NotFound,

    /// Entity already present in archetype; blueprint name already taken
    Duplicate,

    /// Chunk slot index outside `[0, len)`
    OutOfRange { index: usize, len: usize },

    /// Chunk is at capacity
    ChunkFull,

    /// Column access for a component outside the chunk's signature
    NotInSignature,

    /// Component type limit (64) reached, or a channel was given capacity 0
    CapacityExceeded,

    /// Caller passed an unusable argument (empty name, unserializable type, ...)
    InvalidArgument(String),

    /// File operation failed
    IoError(String),

    /// Serialized payload carries an unknown format version
    UnsupportedVersion(u8),

    /// Serialized payload is truncated or structurally invalid
    MalformedPayload(String),

    /// Operation attempted while the world is in a state that forbids it
    StateViolation,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::NotFound => write!(f, "Not found"),
            EcsError::Duplicate => write!(f, "Already present"),
            EcsError::OutOfRange { index, len } => {
                write!(f, "Slot index {index} out of range (len {len})")
            }
            EcsError::ChunkFull => write!(f, "Chunk is full"),
            EcsError::NotInSignature => write!(f, "Component not in chunk signature"),
            EcsError::CapacityExceeded => write!(f, "Capacity exceeded"),
            EcsError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            EcsError::IoError(msg) => write!(f, "IO error: {msg}"),
            EcsError::UnsupportedVersion(v) => write!(f, "Unsupported format version: {v}"),
            EcsError::MalformedPayload(msg) => write!(f, "Malformed payload: {msg}"),
            EcsError::StateViolation => write!(f, "Operation violates world state contract"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<std::io::Error> for EcsError {
    fn from(err: std::io::Error) -> Self {
        EcsError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::MalformedPayload(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EcsError::OutOfRange { index: 5, len: 3 };
        assert_eq!(err.to_string(), "Slot index 5 out of range (len 3)");

        let err = EcsError::UnsupportedVersion(9);
        assert_eq!(err.to_string(), "Unsupported format version: 9");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EcsError = io.into();
        assert!(matches!(err, EcsError::IoError(_)));
    }
}
