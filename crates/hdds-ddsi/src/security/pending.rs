// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crypto tokens that arrived before their match.
//!
//! Keyed by (remote, local) GUID: remote/local participant for participant
//! tokens, remote/local endpoint for endpoint tokens. Entries are claimed
//! when the match forms and swept once expired.

use dashmap::DashMap;

use super::exchange::{CryptoTokenKind, DataHolder};
use crate::guid::GUID;
use crate::time::Timestamp;

/// Tokens parked for a (remote, local) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTokens {
    pub kind: CryptoTokenKind,
    pub tokens: Vec<DataHolder>,
    pub expiry: Timestamp,
}

/// Pending crypto-match table.
#[derive(Debug, Default)]
pub struct PendingCryptoMatches {
    map: DashMap<(GUID, GUID), PendingTokens>,
}

impl PendingCryptoMatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park tokens; a later message for the same pair replaces them.
    pub fn insert(&self, remote: GUID, local: GUID, kind: CryptoTokenKind, tokens: Vec<DataHolder>, expiry: Timestamp) {
        log::debug!("[crypto] parking {:?} tokens {:?} -> {:?}", kind, remote, local);
        self.map.insert((remote, local), PendingTokens { kind, tokens, expiry });
    }

    /// Take the tokens for a pair, if any.
    pub fn claim(&self, remote: GUID, local: GUID) -> Option<PendingTokens> {
        self.map.remove(&(remote, local)).map(|(_, p)| p)
    }

    /// Drop expired entries; returns how many were dropped.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let before = self.map.len();
        self.map.retain(|_, p| p.expiry > now);
        let n = before.saturating_sub(self.map.len());
        if n > 0 {
            log::debug!("[crypto] expired {} unclaimed token sets", n);
        }
        n
    }

    /// Drop everything involving `guid` on either side.
    pub fn forget(&self, guid: GUID) {
        self.map.retain(|(r, l), _| *r != guid && *l != guid);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(n: u8) -> GUID {
        GUID::from_bytes([n; 16])
    }

    #[test]
    fn test_claim_once() {
        let p = PendingCryptoMatches::new();
        p.insert(g(1), g(2), CryptoTokenKind::DataWriter, vec![DataHolder::new("t")], Timestamp::from_secs(10));
        assert!(p.claim(g(2), g(1)).is_none(), "key order is (remote, local)");
        let t = p.claim(g(1), g(2)).expect("parked tokens");
        assert_eq!(t.kind, CryptoTokenKind::DataWriter);
        assert!(p.claim(g(1), g(2)).is_none());
    }

    #[test]
    fn test_sweep_expired() {
        let p = PendingCryptoMatches::new();
        p.insert(g(1), g(2), CryptoTokenKind::Participant, vec![], Timestamp::from_secs(1));
        p.insert(g(3), g(2), CryptoTokenKind::Participant, vec![], Timestamp::from_secs(5));
        assert_eq!(p.sweep(Timestamp::from_secs(2)), 1);
        assert_eq!(p.len(), 1);
        p.forget(g(2));
        assert!(p.is_empty());
    }
}
