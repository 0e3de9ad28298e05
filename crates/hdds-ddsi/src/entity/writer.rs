// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local writer.
//!
//! All mutable state sits behind one mutex; the condition variable wakes
//! producers blocked in throttling and `wait_for_acks`. The local-reader
//! array is read lock-free on the write path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use super::Reader;
use crate::config::DdsiConfig;
use crate::guid::GUID;
use crate::heartbeat::{HbControl, HbView};
use crate::liveliness::Lease;
use crate::match_tree::{max_drop_seq, num_reliable_readers, AliveMatch, AugTree, WrPrdTree};
use crate::qos::{EndpointQos, History};
use crate::seq::SeqNum;
use crate::status::{ListenerSlot, LivelinessLostStatus, MatchCounts};
use crate::time::Timestamp;
use crate::transmit::Whc;
use crate::xevent::EventId;

/// Writer lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterLifecycle {
    Operational,
    /// Producers are being drained; writes fail.
    Interrupt,
    /// Deleted, waiting for acknowledgements or the linger timeout.
    Lingering,
    /// Removed from the index, waiting for GC.
    Deleting,
}

/// Local readers a write is delivered to synchronously.
#[derive(Default)]
pub(crate) struct LocalReaders {
    pub valid: bool,
    pub readers: Vec<Arc<Reader>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriterCounters {
    pub rexmit_count: u64,
    pub rexmit_bytes: u64,
    pub rexmit_lost_count: u64,
    pub throttle_count: u64,
    pub time_throttled: Duration,
}

/// Writer state guarded by the writer lock.
#[derive(Debug)]
pub(crate) struct WriterState {
    pub lifecycle: WriterLifecycle,
    /// Highest sequence number written.
    pub seq: SeqNum,
    /// Highest sequence number handed to the transmitter.
    pub seq_xmit: SeqNum,
    pub whc: Whc,
    pub readers: WrPrdTree,
    pub local_readers: AugTree<GUID, AliveMatch>,
    pub hbcontrol: HbControl,
    pub hbcount: u32,
    pub hbfragcount: u32,
    pub heartbeat_event: Option<EventId>,
    pub linger_event: Option<EventId>,
    pub lease: Option<Lease>,
    pub lease_event: Option<EventId>,
    pub alive: bool,
    pub alive_vclock: u32,
    pub retransmitting: bool,
    /// Producers currently blocked in throttling.
    pub throttling: u32,
    pub whc_low: u64,
    pub whc_high: u64,
    pub t_whc_high_upd: Timestamp,
    pub rexmit_burst_size_limit: u32,
    pub init_burst_size_limit: u32,
    pub counts: MatchCounts,
    pub liveliness_lost: LivelinessLostStatus,
    pub counters: WriterCounters,
}

impl WriterState {
    pub fn new(qos: &EndpointQos, cfg: &DdsiConfig, lease: Option<Lease>) -> Self {
        let (whc_low, whc_high) = match qos.history {
            History::KeepLast(_) => (u64::MAX, u64::MAX),
            History::KeepAll if cfg.whc_adaptive => (cfg.whc_lowwater_mark, cfg.whc_init_highwater_mark),
            History::KeepAll => (cfg.whc_lowwater_mark, cfg.whc_highwater_mark),
        };
        Self {
            lifecycle: WriterLifecycle::Operational,
            seq: 0,
            seq_xmit: 0,
            whc: Whc::new(qos),
            readers: WrPrdTree::new(),
            local_readers: AugTree::new(),
            hbcontrol: HbControl::default(),
            hbcount: 0,
            hbfragcount: 0,
            heartbeat_event: None,
            linger_event: None,
            lease,
            lease_event: None,
            alive: true,
            alive_vclock: 0,
            retransmitting: false,
            throttling: 0,
            whc_low,
            whc_high,
            t_whc_high_upd: Timestamp::ZERO,
            rexmit_burst_size_limit: 0,
            init_burst_size_limit: 0,
            counts: MatchCounts::default(),
            liveliness_lost: LivelinessLostStatus::default(),
            counters: WriterCounters::default(),
        }
    }

    pub fn num_reliable_readers(&self) -> u32 {
        num_reliable_readers(&self.readers)
    }

    pub fn max_drop_seq(&self) -> SeqNum {
        max_drop_seq(&self.readers, self.seq)
    }

    pub fn hb_view(&self) -> HbView {
        HbView {
            seq: self.seq,
            unacked_bytes: self.whc.unacked_bytes(),
            whc_low: self.whc_low,
            whc_high: self.whc_high,
            whc_max_seq: self.whc.state().max_seq(),
            retransmitting: self.retransmitting,
            agg: self.readers.root_aggregate().copied(),
            num_reliable_readers: self.num_reliable_readers(),
            max_drop_seq: self.max_drop_seq(),
        }
    }

    /// A throttled producer may proceed.
    pub fn may_continue(&self) -> bool {
        (self.whc.unacked_bytes() <= self.whc_low && !self.retransmitting)
            || self.lifecycle != WriterLifecycle::Operational
    }

    /// Enter retransmitting; shrinks the adaptive high-water mark.
    pub fn set_retransmitting(&mut self) {
        if !self.retransmitting {
            self.retransmitting = true;
            self.whc_high = (8 * (self.whc_high / 10)).max(self.whc_low);
            log::trace!("[throttle] retransmitting, high-water mark now {}", self.whc_high);
        }
    }

    /// Leave retransmitting; the caller wakes throttled producers.
    pub fn clear_retransmitting(&mut self) -> bool {
        std::mem::replace(&mut self.retransmitting, false)
    }

    /// Advance the lifecycle; never moves backwards. Returns whether it
    /// changed.
    pub fn advance(&mut self, to: WriterLifecycle) -> bool {
        if to > self.lifecycle {
            self.lifecycle = to;
            true
        } else {
            false
        }
    }
}

/// Snapshot of a writer's counters and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterStats {
    pub state: WriterLifecycle,
    pub seq: SeqNum,
    pub seq_xmit: SeqNum,
    pub unacked_bytes: u64,
    pub whc_range: Option<(SeqNum, SeqNum)>,
    pub whc_len: usize,
    pub whc_low: u64,
    pub whc_high: u64,
    pub max_drop_seq: SeqNum,
    pub alive: bool,
    pub retransmitting: bool,
    pub num_readers: usize,
    pub num_reliable_readers: u32,
    pub num_local_readers: usize,
    pub heartbeat_count: u32,
    pub rexmit_count: u64,
    pub rexmit_bytes: u64,
    pub rexmit_lost_count: u64,
    pub throttle_count: u64,
    pub time_throttled: Duration,
    pub rexmit_burst_size_limit: u32,
    pub init_burst_size_limit: u32,
    pub liveliness_lost: u32,
}

/// Local writer.
pub struct Writer {
    pub guid: GUID,
    pub participant: GUID,
    pub topic: String,
    pub type_name: String,
    pub qos: EndpointQos,
    /// Data is protected by the security plugins.
    pub protected: bool,
    pub(crate) listener: ListenerSlot,
    pub(crate) state: Mutex<WriterState>,
    pub(crate) throttle_cond: Condvar,
    pub(crate) rdary: ArcSwap<LocalReaders>,
}

impl Writer {
    pub fn stats(&self) -> WriterStats {
        let st = self.state.lock();
        let whc = st.whc.state();
        WriterStats {
            state: st.lifecycle,
            seq: st.seq,
            seq_xmit: st.seq_xmit,
            unacked_bytes: whc.unacked_bytes,
            whc_range: whc.range,
            whc_len: st.whc.len(),
            whc_low: st.whc_low,
            whc_high: st.whc_high,
            max_drop_seq: st.max_drop_seq(),
            alive: st.alive,
            retransmitting: st.retransmitting,
            num_readers: st.readers.len(),
            num_reliable_readers: st.num_reliable_readers(),
            num_local_readers: st.local_readers.len(),
            heartbeat_count: st.hbcount,
            rexmit_count: st.counters.rexmit_count,
            rexmit_bytes: st.counters.rexmit_bytes,
            rexmit_lost_count: st.counters.rexmit_lost_count,
            throttle_count: st.counters.throttle_count,
            time_throttled: st.counters.time_throttled,
            rexmit_burst_size_limit: st.rexmit_burst_size_limit,
            init_burst_size_limit: st.init_burst_size_limit,
            liveliness_lost: st.liveliness_lost.total_count,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.qos.is_reliable()
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("guid", &self.guid)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for LocalReaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalReaders(valid={}, n={})", self.valid, self.readers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::Qos;

    fn state(qos: &EndpointQos) -> WriterState {
        WriterState::new(qos, &DdsiConfig::default(), None)
    }

    #[test]
    fn test_keep_last_is_never_throttled() {
        let st = state(&EndpointQos::writer_default());
        assert_eq!(st.whc_high, u64::MAX);
        assert!(st.may_continue());
    }

    #[test]
    fn test_retransmitting_shrinks_high_mark() {
        let qos = Qos::new().keep_all().merge(&EndpointQos::writer_default());
        let mut st = state(&qos);
        let cfg = DdsiConfig::default();
        assert_eq!(st.whc_high, cfg.whc_init_highwater_mark);
        st.set_retransmitting();
        assert_eq!(st.whc_high, 8 * (cfg.whc_init_highwater_mark / 10));
        assert!(!st.may_continue() || st.whc.unacked_bytes() <= st.whc_low);
        assert!(st.clear_retransmitting());
        assert!(!st.clear_retransmitting());
    }

    #[test]
    fn test_lifecycle_only_advances() {
        let mut st = state(&EndpointQos::writer_default());
        assert!(st.advance(WriterLifecycle::Lingering));
        assert!(!st.advance(WriterLifecycle::Interrupt));
        assert_eq!(st.lifecycle, WriterLifecycle::Lingering);
        assert!(st.may_continue(), "non-operational writers never block");
    }
}
