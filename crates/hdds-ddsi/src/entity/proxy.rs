// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxies for remote entities discovered on the network.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::guid::GUID;
use crate::liveliness::Lease;
use crate::match_tree::{AugTree, PrdWrMatch, PwrRdMatch};
use crate::qos::EndpointQos;
use crate::rhc::Sample;
use crate::seq::SeqNum;
use crate::transmit::Defragmenter;
use crate::xevent::EventId;

/// Discovery data describing a remote endpoint.
#[derive(Debug, Clone)]
pub struct ProxyEndpointInfo {
    pub guid: GUID,
    pub topic: String,
    pub type_name: String,
    pub qos: EndpointQos,
    /// Remote endpoint is protected by security.
    pub protected: bool,
    /// Advertised receive buffer size; proxy readers only.
    pub receive_buffer_size: Option<u32>,
}

impl ProxyEndpointInfo {
    pub fn new(guid: GUID, topic: impl Into<String>, type_name: impl Into<String>, qos: EndpointQos) -> Self {
        Self {
            guid,
            topic: topic.into(),
            type_name: type_name.into(),
            qos,
            protected: false,
            receive_buffer_size: None,
        }
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn receive_buffer_size(mut self, size: u32) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProxyParticipantState {
    pub endpoints: BTreeSet<GUID>,
    pub deleting: bool,
}

/// Remote participant.
#[derive(Debug)]
pub struct ProxyParticipant {
    pub guid: GUID,
    /// Advertises security; pairs with local secure participants need a
    /// handshake.
    pub secure: bool,
    pub(crate) state: Mutex<ProxyParticipantState>,
}

impl ProxyParticipant {
    pub(crate) fn new(guid: GUID, secure: bool) -> Self {
        Self {
            guid,
            secure,
            state: Mutex::new(ProxyParticipantState::default()),
        }
    }

    pub fn endpoints(&self) -> Vec<GUID> {
        self.state.lock().endpoints.iter().copied().collect()
    }
}

#[derive(Debug)]
pub(crate) struct ProxyWriterState {
    pub readers: AugTree<GUID, PwrRdMatch>,
    pub alive: bool,
    pub alive_vclock: u32,
    /// Highest seq advertised by a heartbeat or seen in data.
    pub last_seq: SeqNum,
    /// Next seq to deliver in order.
    pub next_deliver: SeqNum,
    pub have_seen_heartbeat: bool,
    /// Out-of-order samples; `None` marks a gapped seq.
    pub reorder: BTreeMap<SeqNum, Option<Sample>>,
    pub defrag: Defragmenter,
    pub lease: Option<Lease>,
    pub lease_event: Option<EventId>,
    pub deleting: bool,
}

impl ProxyWriterState {
    pub fn new(lease: Option<Lease>) -> Self {
        Self {
            readers: AugTree::new(),
            alive: true,
            alive_vclock: 0,
            last_seq: 0,
            next_deliver: 1,
            have_seen_heartbeat: false,
            reorder: BTreeMap::new(),
            defrag: Defragmenter::default(),
            lease,
            lease_event: None,
            deleting: false,
        }
    }

    /// Pop every sample now deliverable in order. Gapped seqs are skipped.
    pub fn take_in_order(&mut self) -> Vec<(SeqNum, Sample)> {
        let mut out = Vec::new();
        while let Some(entry) = self.reorder.remove(&self.next_deliver) {
            if let Some(s) = entry {
                out.push((self.next_deliver, s));
            }
            self.next_deliver += 1;
        }
        self.defrag.drop_below(self.next_deliver);
        out
    }

    /// Seqs in `[next_deliver, upto]` neither buffered nor gapped.
    pub fn missing(&self, upto: SeqNum, limit: usize) -> Vec<SeqNum> {
        (self.next_deliver..=upto)
            .filter(|s| !self.reorder.contains_key(s))
            .take(limit)
            .collect()
    }
}

/// Remote writer.
pub struct ProxyWriter {
    pub guid: GUID,
    pub participant: GUID,
    pub topic: String,
    pub type_name: String,
    pub(crate) qos: ArcSwap<EndpointQos>,
    pub protected: bool,
    pub(crate) state: Mutex<ProxyWriterState>,
}

impl ProxyWriter {
    pub(crate) fn new(info: &ProxyEndpointInfo, lease: Option<Lease>) -> Self {
        Self {
            guid: info.guid,
            participant: info.guid.participant_guid(),
            topic: info.topic.clone(),
            type_name: info.type_name.clone(),
            qos: ArcSwap::from_pointee(info.qos.clone()),
            protected: info.protected,
            state: Mutex::new(ProxyWriterState::new(lease)),
        }
    }

    pub fn qos(&self) -> Arc<EndpointQos> {
        self.qos.load_full()
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }
}

impl fmt::Debug for ProxyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyWriter")
            .field("guid", &self.guid)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProxyReaderState {
    pub writers: AugTree<GUID, PrdWrMatch>,
    pub deleting: bool,
}

/// Remote reader.
pub struct ProxyReader {
    pub guid: GUID,
    pub participant: GUID,
    pub topic: String,
    pub type_name: String,
    pub(crate) qos: ArcSwap<EndpointQos>,
    pub protected: bool,
    pub receive_buffer_size: u32,
    pub(crate) state: Mutex<ProxyReaderState>,
}

impl ProxyReader {
    pub(crate) fn new(info: &ProxyEndpointInfo, default_rcvbuf: u32) -> Self {
        Self {
            guid: info.guid,
            participant: info.guid.participant_guid(),
            topic: info.topic.clone(),
            type_name: info.type_name.clone(),
            qos: ArcSwap::from_pointee(info.qos.clone()),
            protected: info.protected,
            receive_buffer_size: info.receive_buffer_size.unwrap_or(default_rcvbuf),
            state: Mutex::new(ProxyReaderState::default()),
        }
    }

    pub fn qos(&self) -> Arc<EndpointQos> {
        self.qos.load_full()
    }
}

impl fmt::Debug for ProxyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyReader")
            .field("guid", &self.guid)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    fn s(k: u64) -> Sample {
        Sample::new(k, vec![k as u8], Timestamp::ZERO)
    }

    #[test]
    fn test_in_order_delivery_skips_gaps() {
        let mut st = ProxyWriterState::new(None);
        st.reorder.insert(2, Some(s(2)));
        st.reorder.insert(3, None);
        assert!(st.take_in_order().is_empty(), "seq 1 still missing");
        assert_eq!(st.missing(4, 10), vec![1, 4]);
        st.reorder.insert(1, Some(s(1)));
        let got: Vec<SeqNum> = st.take_in_order().into_iter().map(|(q, _)| q).collect();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(st.next_deliver, 4);
    }
}
