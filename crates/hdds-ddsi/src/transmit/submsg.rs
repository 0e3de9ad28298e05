// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Submessages emitted by the core and the transport boundary.
//!
//! Byte encoding is the transport's business; the core only decides what
//! to send and where.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::guid::GUID;
use crate::rhc::SampleKind;
use crate::security::ParticipantGenericMessage;
use crate::seq::{FragmentNumberSet, SeqNum, SequenceNumberSet};
use crate::time::Timestamp;

/// Where a batch of submessages goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The writer's full address set (all matched proxy readers).
    Multicast,
    /// One specific proxy reader, proxy writer or proxy participant.
    Unicast(GUID),
}

/// RTPS submessage, unencoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    Data {
        writer: GUID,
        /// `None` means ENTITYID_UNKNOWN (all readers).
        reader: Option<GUID>,
        seq: SeqNum,
        key: u64,
        kind: SampleKind,
        timestamp: Timestamp,
        payload: Arc<[u8]>,
    },
    DataFrag {
        writer: GUID,
        reader: Option<GUID>,
        seq: SeqNum,
        /// 1-based.
        frag_start: u32,
        frag_size: u32,
        sample_size: u32,
        key: u64,
        kind: SampleKind,
        timestamp: Timestamp,
        /// Key hash and status info travel with the first fragment of a
        /// fresh transmission.
        inline_qos: bool,
        bytes: Vec<u8>,
    },
    Heartbeat {
        writer: GUID,
        reader: Option<GUID>,
        first_seq: SeqNum,
        last_seq: SeqNum,
        count: u32,
        /// Final flag: no ACKNACK required.
        final_flag: bool,
        liveliness: bool,
    },
    HeartbeatFrag {
        writer: GUID,
        reader: Option<GUID>,
        seq: SeqNum,
        last_frag: u32,
        count: u32,
    },
    Gap {
        writer: GUID,
        reader: Option<GUID>,
        /// First irrelevant sequence number.
        gap_start: SeqNum,
        /// `[gap_start, gap_list.base)` plus the set bits are irrelevant.
        gap_list: SequenceNumberSet,
    },
    AckNack {
        reader: GUID,
        writer: GUID,
        set: SequenceNumberSet,
        count: u32,
        final_flag: bool,
    },
    NackFrag {
        reader: GUID,
        writer: GUID,
        seq: SeqNum,
        set: FragmentNumberSet,
        count: u32,
    },
    /// Security builtin-topic message (authentication or crypto tokens).
    Participant(ParticipantGenericMessage),
}

impl Submessage {
    pub fn name(&self) -> &'static str {
        match self {
            Submessage::Data { .. } => "DATA",
            Submessage::DataFrag { .. } => "DATAFRAG",
            Submessage::Heartbeat { .. } => "HEARTBEAT",
            Submessage::HeartbeatFrag { .. } => "HEARTBEATFRAG",
            Submessage::Gap { .. } => "GAP",
            Submessage::AckNack { .. } => "ACKNACK",
            Submessage::NackFrag { .. } => "NACKFRAG",
            Submessage::Participant(_) => "PARTICIPANT_MESSAGE",
        }
    }

    /// Bytes counted against burst limits.
    pub fn payload_len(&self) -> usize {
        match self {
            Submessage::Data { payload, .. } => payload.len(),
            Submessage::DataFrag { bytes, .. } => bytes.len(),
            _ => 0,
        }
    }
}

/// Transport boundary.
///
/// Called without any entity lock held; an implementation may feed
/// messages straight back into the domain's receive path.
pub trait Transmitter: Send + Sync {
    fn send(&self, src: GUID, dst: Destination, msgs: Vec<Submessage>);
}

/// Transmitter that drops everything.
#[derive(Debug, Default)]
pub struct NullTransmitter;

impl Transmitter for NullTransmitter {
    fn send(&self, _src: GUID, _dst: Destination, _msgs: Vec<Submessage>) {}
}

/// One `send` call as captured by [`RecordingTransmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub src: GUID,
    pub dst: Destination,
    pub msg: Submessage,
}

/// Transmitter that records every submessage for inspection.
#[derive(Default)]
pub struct RecordingTransmitter {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent.lock().iter().filter(|s| s.msg.name() == name).count()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transmitter for RecordingTransmitter {
    fn send(&self, src: GUID, dst: Destination, msgs: Vec<Submessage>) {
        let mut sent = self.sent.lock();
        sent.extend(msgs.into_iter().map(|msg| Sent { src, dst, msg }));
    }
}

impl fmt::Debug for RecordingTransmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordingTransmitter({} sent)", self.sent.lock().len())
    }
}
