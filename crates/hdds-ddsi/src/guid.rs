// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier) and entity ids.
//!
//! GUIDs are totally ordered lexicographically over their 16 bytes. The
//! match trees, the successor walk of liveliness fan-out and the reader
//! history cache's same-timestamp tie-break all depend on that order.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Entity id of an unknown/unspecified entity.
pub const ENTITYID_UNKNOWN: [u8; 4] = [0, 0, 0, 0];
/// Entity id of a participant.
pub const ENTITYID_PARTICIPANT: [u8; 4] = [0x00, 0x00, 0x01, 0xc1];

const KIND_MASK: u8 = 0x3f;
const SOURCE_BUILTIN: u8 = 0xc0;

/// Entity kind encoded in the low byte of an entity id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Participant,
    WriterWithKey,
    WriterNoKey,
    ReaderWithKey,
    ReaderNoKey,
    Unknown,
}

impl EntityKind {
    /// Kind byte (without source bits).
    pub fn to_byte(self) -> u8 {
        match self {
            EntityKind::Participant => 0x01,
            EntityKind::WriterWithKey => 0x02,
            EntityKind::WriterNoKey => 0x03,
            EntityKind::ReaderNoKey => 0x04,
            EntityKind::ReaderWithKey => 0x07,
            EntityKind::Unknown => 0x00,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b & KIND_MASK {
            0x01 => EntityKind::Participant,
            0x02 => EntityKind::WriterWithKey,
            0x03 => EntityKind::WriterNoKey,
            0x04 => EntityKind::ReaderNoKey,
            0x07 => EntityKind::ReaderWithKey,
            _ => EntityKind::Unknown,
        }
    }

    pub fn is_writer(self) -> bool {
        matches!(self, EntityKind::WriterWithKey | EntityKind::WriterNoKey)
    }

    pub fn is_reader(self) -> bool {
        matches!(self, EntityKind::ReaderWithKey | EntityKind::ReaderNoKey)
    }
}

/// RTPS GUID (Globally Unique Identifier)
///
/// 16-byte identifier as laid out by DDS-RTPS v2.3.
///
/// # Structure
/// - Prefix: 12 bytes (identifies the owning participant)
/// - Entity ID: 4 bytes (entity within participant)
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GUID {
    pub prefix: [u8; 12],
    pub entity_id: [u8; 4],
}

impl GUID {
    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Create GUID from separate prefix and entity ID
    pub fn new(prefix: [u8; 12], entity_id: [u8; 4]) -> Self {
        Self { prefix, entity_id }
    }

    /// Participant GUID for a prefix.
    pub fn participant(prefix: [u8; 12]) -> Self {
        Self::new(prefix, ENTITYID_PARTICIPANT)
    }

    /// Convert GUID to 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// Create GUID with all zeros (invalid/placeholder)
    pub fn zero() -> Self {
        Self {
            prefix: [0; 12],
            entity_id: [0; 4],
        }
    }

    /// Check if GUID is zero (invalid)
    pub fn is_zero(&self) -> bool {
        self.prefix.iter().all(|&b| b == 0) && self.entity_id.iter().all(|&b| b == 0)
    }

    pub fn kind(&self) -> EntityKind {
        EntityKind::from_byte(self.entity_id[3])
    }

    pub fn is_builtin(&self) -> bool {
        self.entity_id[3] & SOURCE_BUILTIN == SOURCE_BUILTIN
    }

    /// GUID of the participant owning this entity.
    pub fn participant_guid(&self) -> GUID {
        GUID::participant(self.prefix)
    }

    /// Instance-handle style 64-bit id derived from the GUID bytes.
    pub fn to_iid(&self) -> u64 {
        let b = self.as_bytes();
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in b {
            h ^= u64::from(byte);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.prefix.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}

/// Per-participant allocator of entity-id counters.
///
/// Entity ids are `(counter << 8) | kind`. Freed counters are reused
/// lowest-first.
#[derive(Debug)]
pub struct EntityIdAllocator {
    next: u32,
    limit: u32,
    free: BTreeSet<u32>,
}

impl EntityIdAllocator {
    pub fn new(limit: u32) -> Self {
        Self {
            next: 1,
            limit: limit.min(1 << 24),
            free: BTreeSet::new(),
        }
    }

    /// Allocate an entity id of the given kind.
    pub fn allocate(&mut self, kind: EntityKind) -> Result<[u8; 4]> {
        let counter = if let Some(c) = self.free.pop_first() {
            c
        } else if self.next < self.limit {
            let c = self.next;
            self.next += 1;
            c
        } else {
            return Err(Error::ResourceExhausted(format!(
                "entity id space exhausted ({} ids)",
                self.limit.saturating_sub(1)
            )));
        };
        let v = (counter << 8) | u32::from(kind.to_byte());
        Ok(v.to_be_bytes())
    }

    /// Return an entity id to the pool.
    pub fn release(&mut self, entity_id: [u8; 4]) {
        let counter = u32::from_be_bytes(entity_id) >> 8;
        if counter != 0 && counter < self.next {
            self.free.insert(counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(p: u8, e: u8) -> GUID {
        let mut prefix = [0u8; 12];
        prefix[11] = p;
        GUID::new(prefix, [0, 0, e, 0x02])
    }

    #[test]
    fn test_guid_ordering_is_lexicographic() {
        assert!(guid(1, 9) < guid(2, 0), "prefix dominates entity id");
        assert!(guid(1, 1) < guid(1, 2));
        let a = GUID::from_bytes([0xff; 16]);
        assert!(guid(200, 200) < a);
    }

    #[test]
    fn test_guid_display() {
        let g = GUID::from_bytes([1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 193]);
        assert_eq!(g.to_string(), "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1");
        assert_eq!(g.kind(), EntityKind::Participant);
        assert!(g.is_builtin());
    }

    #[test]
    fn test_allocator_exhaustion_and_reuse() {
        let mut alloc = EntityIdAllocator::new(3);
        let a = alloc.allocate(EntityKind::WriterWithKey).expect("first id");
        let b = alloc.allocate(EntityKind::ReaderWithKey).expect("second id");
        assert_eq!(a, [0, 0, 1, 0x02]);
        assert_eq!(b, [0, 0, 2, 0x07]);
        assert!(matches!(
            alloc.allocate(EntityKind::WriterNoKey),
            Err(Error::ResourceExhausted(_))
        ));
        alloc.release(a);
        let c = alloc.allocate(EntityKind::WriterNoKey).expect("reused id");
        assert_eq!(c, [0, 0, 1, 0x03]);
    }

    #[test]
    fn test_kind_roundtrip() {
        for k in [
            EntityKind::WriterWithKey,
            EntityKind::WriterNoKey,
            EntityKind::ReaderWithKey,
            EntityKind::ReaderNoKey,
        ] {
            assert_eq!(EntityKind::from_byte(k.to_byte()), k);
        }
        assert!(EntityKind::WriterNoKey.is_writer());
        assert!(EntityKind::ReaderNoKey.is_reader());
    }
}
