// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global entity index: GUID -> entity.
//!
//! Holds the only long-lived strong references. An entity is inserted fully
//! constructed and removed at deletion phase 2, so a lookup yields either a
//! live entity or nothing.

use std::sync::Arc;

use dashmap::DashMap;

use super::{Participant, ProxyParticipant, ProxyReader, ProxyWriter, Reader, Writer};
use crate::guid::GUID;

/// Any entity known to the domain.
#[derive(Debug, Clone)]
pub enum Entity {
    Participant(Arc<Participant>),
    Writer(Arc<Writer>),
    Reader(Arc<Reader>),
    ProxyParticipant(Arc<ProxyParticipant>),
    ProxyWriter(Arc<ProxyWriter>),
    ProxyReader(Arc<ProxyReader>),
}

impl Entity {
    pub fn guid(&self) -> GUID {
        match self {
            Entity::Participant(e) => e.guid,
            Entity::Writer(e) => e.guid,
            Entity::Reader(e) => e.guid,
            Entity::ProxyParticipant(e) => e.guid,
            Entity::ProxyWriter(e) => e.guid,
            Entity::ProxyReader(e) => e.guid,
        }
    }
}

macro_rules! typed_lookup {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self, guid: &GUID) -> Option<Arc<$ty>> {
            match self.map.get(guid).as_deref() {
                Some(Entity::$variant(e)) => Some(Arc::clone(e)),
                _ => None,
            }
        }
    };
}

macro_rules! topic_scan {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Entities of this kind on `topic`, sorted by GUID.
        pub fn $name(&self, topic: &str) -> Vec<Arc<$ty>> {
            let mut v: Vec<Arc<$ty>> = self
                .map
                .iter()
                .filter_map(|r| match r.value() {
                    Entity::$variant(e) if e.topic == topic => Some(Arc::clone(e)),
                    _ => None,
                })
                .collect();
            v.sort_by_key(|e| e.guid);
            v
        }
    };
}

/// Concurrent GUID -> entity map.
#[derive(Debug, Default)]
pub struct EntityIndex {
    map: DashMap<GUID, Entity>,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert; false if the GUID is taken.
    pub fn insert(&self, e: Entity) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.map.entry(e.guid()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(e);
                true
            }
        }
    }

    pub fn remove(&self, guid: &GUID) -> Option<Entity> {
        self.map.remove(guid).map(|(_, e)| e)
    }

    pub fn get(&self, guid: &GUID) -> Option<Entity> {
        self.map.get(guid).map(|r| r.value().clone())
    }

    pub fn contains(&self, guid: &GUID) -> bool {
        self.map.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    typed_lookup!(participant, Participant, Participant);
    typed_lookup!(writer, Writer, Writer);
    typed_lookup!(reader, Reader, Reader);
    typed_lookup!(proxy_participant, ProxyParticipant, ProxyParticipant);
    typed_lookup!(proxy_writer, ProxyWriter, ProxyWriter);
    typed_lookup!(proxy_reader, ProxyReader, ProxyReader);

    topic_scan!(writers_on_topic, Writer, Writer);
    topic_scan!(readers_on_topic, Reader, Reader);
    topic_scan!(proxy_writers_on_topic, ProxyWriter, ProxyWriter);
    topic_scan!(proxy_readers_on_topic, ProxyReader, ProxyReader);

    /// All local participants, sorted by GUID.
    pub fn participants(&self) -> Vec<Arc<Participant>> {
        let mut v: Vec<_> = self
            .map
            .iter()
            .filter_map(|r| match r.value() {
                Entity::Participant(p) => Some(Arc::clone(p)),
                _ => None,
            })
            .collect();
        v.sort_by_key(|p| p.guid);
        v
    }

    /// All proxy participants, sorted by GUID.
    pub fn proxy_participants(&self) -> Vec<Arc<ProxyParticipant>> {
        let mut v: Vec<_> = self
            .map
            .iter()
            .filter_map(|r| match r.value() {
                Entity::ProxyParticipant(p) => Some(Arc::clone(p)),
                _ => None,
            })
            .collect();
        v.sort_by_key(|p| p.guid);
        v
    }
}
