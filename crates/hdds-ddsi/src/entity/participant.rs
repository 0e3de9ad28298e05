// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local participant.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::guid::{EntityIdAllocator, GUID};
use crate::liveliness::LeaseHeap;
use crate::match_tree::CryptoHandle;
use crate::security::{IdentityHandle, ParticipantSecurity, PermissionsHandle};

/// Authentication status of a (local participant, proxy participant) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairAuth {
    /// Handshake in progress.
    Pending,
    Authenticated {
        crypto: CryptoHandle,
        permissions: PermissionsHandle,
    },
    /// Handshake failed or timed out and unauthenticated peers are allowed:
    /// only unprotected endpoints match.
    Unauthenticated,
}

/// Mutable participant state, guarded by the participant lock. Taken after
/// an endpoint lock, never before.
#[derive(Debug)]
pub(crate) struct ParticipantState {
    pub ids: EntityIdAllocator,
    pub endpoints: BTreeSet<GUID>,
    /// Lease durations of alive automatic-liveliness writers.
    pub leases: LeaseHeap,
    pub identity: Option<IdentityHandle>,
    pub proxypp: BTreeMap<GUID, PairAuth>,
}

/// Local participant.
#[derive(Debug)]
pub struct Participant {
    pub guid: GUID,
    pub security: Option<ParticipantSecurity>,
    pub(crate) state: Mutex<ParticipantState>,
}

impl Participant {
    pub(crate) fn new(
        guid: GUID,
        security: Option<ParticipantSecurity>,
        identity: Option<IdentityHandle>,
        entity_id_limit: u32,
    ) -> Self {
        Self {
            guid,
            security,
            state: Mutex::new(ParticipantState {
                ids: EntityIdAllocator::new(entity_id_limit),
                endpoints: BTreeSet::new(),
                leases: LeaseHeap::new(),
                identity,
                proxypp: BTreeMap::new(),
            }),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.security.is_some()
    }

    /// Whether endpoints on `topic` are protected.
    pub fn protects(&self, topic: &str) -> bool {
        self.security
            .as_ref()
            .is_some_and(|s| !s.unprotected_topics.iter().any(|t| t == topic))
    }

    pub fn pair_auth(&self, proxypp: &GUID) -> Option<PairAuth> {
        self.state.lock().proxypp.get(proxypp).copied()
    }

    pub fn num_endpoints(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Shortest lease among alive automatic-liveliness writers.
    pub fn min_lease(&self) -> Option<std::time::Duration> {
        self.state.lock().leases.min_duration()
    }
}
