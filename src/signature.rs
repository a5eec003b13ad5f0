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

//! Component signatures.
//!
//! A signature is a 64-bit mask over the component registry: bit `n` set
//! means component id `n` is present. Equality and hashing are the mask
//! itself, which makes signatures cheap archetype keys.

use std::fmt;

use crate::registry::{self, Component};

/// 64-bit component signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Signature(u64);

impl Signature {
    pub const EMPTY: Signature = Signature(0);

    pub const fn from_bits(bits: u64) -> Self {
        Signature(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Signature with `T` added. Registers `T` on first touch.
    pub fn with<T: Component>(self) -> Self {
        self.with_id(registry::component_id::<T>())
    }

    /// Signature with `T` removed.
    pub fn without<T: Component>(self) -> Self {
        match registry::id_of::<T>() {
            Some(id) => self.without_id(id),
            None => self,
        }
    }

    pub const fn with_id(self, id: u8) -> Self {
        Signature(self.0 | (1u64 << id))
    }

    pub const fn without_id(self, id: u8) -> Self {
        Signature(self.0 & !(1u64 << id))
    }

    /// Whether `T` is present. Total: an unregistered type is absent.
    pub fn has<T: Component>(self) -> bool {
        match registry::id_of::<T>() {
            Some(id) => self.has_id(id),
            None => false,
        }
    }

    pub const fn has_id(self, id: u8) -> bool {
        self.0 & (1u64 << id) != 0
    }

    /// All of `other`'s bits present.
    pub const fn has_all(self, other: Signature) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one of `other`'s bits present.
    pub const fn has_any(self, other: Signature) -> bool {
        self.0 & other.0 != 0
    }

    /// None of `other`'s bits present.
    pub const fn has_none(self, other: Signature) -> bool {
        self.0 & other.0 == 0
    }

    pub const fn union(self, other: Signature) -> Self {
        Signature(self.0 | other.0)
    }

    pub const fn intersection(self, other: Signature) -> Self {
        Signature(self.0 & other.0)
    }

    /// Bits of `self` not in `other`.
    pub const fn difference(self, other: Signature) -> Self {
        Signature(self.0 & !other.0)
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterator over set component ids, ascending.
    pub fn ids(self) -> SignatureIds {
        SignatureIds(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:#018x})", self.0)
    }
}

/// Iterator over the set bits of a signature.
pub struct SignatureIds(u64);

impl Iterator for SignatureIds {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let id = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1; // clear lowest set bit
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Position, Velocity};

    #[test]
    fn test_with_without_has() {
        let sig = Signature::EMPTY.with::<Position>();
        assert!(sig.has::<Position>());
        assert!(!sig.has::<Velocity>());
        assert!(!sig.with::<Position>().without::<Position>().has::<Position>());
    }

    #[test]
    fn test_count_and_empty() {
        assert!(Signature::EMPTY.is_empty());
        assert_eq!(Signature::EMPTY.count(), 0);

        let sig = Signature::EMPTY.with_id(0).with_id(5).with_id(63);
        assert_eq!(sig.count(), 3);
        assert!(!sig.is_empty());
    }

    #[test]
    fn test_equality_is_the_mask() {
        let a = Signature::EMPTY.with_id(3).with_id(7);
        let b = Signature::from_bits(a.bits());
        assert_eq!(a, b);
        assert_ne!(a, a.with_id(9));
    }

    #[test]
    fn test_ids_iterates_ascending() {
        let sig = Signature::EMPTY.with_id(9).with_id(0).with_id(41);
        let ids: Vec<u8> = sig.ids().collect();
        assert_eq!(ids, vec![0, 9, 41]);
    }

    // Deterministic LCG, enough to exercise the set algebra over arbitrary masks.
    fn lcg(state: &mut u64) -> u64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *state
    }

    #[test]
    fn test_set_algebra_over_random_masks() {
        let mut state = 0x5eed;
        for _ in 0..1000 {
            let a = Signature::from_bits(lcg(&mut state));
            let b = Signature::from_bits(lcg(&mut state));

            assert_eq!(a.has_all(b), a.bits() & b.bits() == b.bits());
            assert_eq!(a.has_any(b), a.bits() & b.bits() != 0);
            assert_eq!(a.has_none(b), a.bits() & b.bits() == 0);
            assert_eq!(a.union(b).bits(), a.bits() | b.bits());
            assert_eq!(a.intersection(b).bits(), a.bits() & b.bits());
            assert_eq!(a.difference(b).bits(), a.bits() & !b.bits());
            assert_eq!(a.count(), a.bits().count_ones());
        }
    }
}
