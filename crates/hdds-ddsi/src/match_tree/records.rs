// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Match records, one per matched peer.

use std::time::Duration;

use crate::seq::{count_newer, SeqNum, SEQ_MAX};
use crate::time::Timestamp;

/// Opaque handle handed out by the cryptography plugin for a matched pair.
pub type CryptoHandle = u64;

/// Round-trip latency estimate of a reader, fed from heartbeat/ACKNACK pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyEstimator {
    pub min: Duration,
    pub max: Duration,
    sum: Duration,
    count: u32,
}

impl LatencyEstimator {
    pub fn record(&mut self, sample: Duration) {
        if self.count == 0 || sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
        self.sum = self.sum.saturating_add(sample);
        self.count = self.count.saturating_add(1);
    }

    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.sum / self.count)
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Count/time pair implementing the duplicate-message rule for ACKNACK,
/// NACKFRAG and HEARTBEAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptState {
    pub count: u32,
    pub t_accepted: Timestamp,
}

impl Default for AcceptState {
    fn default() -> Self {
        // count 0 so that the first real message (count >= 1) is newer
        Self {
            count: 0,
            t_accepted: Timestamp::ZERO,
        }
    }
}

impl AcceptState {
    /// Accept `count` if it is newer, or if `timeout` has passed since the
    /// last accepted one (peer restarted its counter), or if forced.
    pub fn accept(&mut self, count: u32, now: Timestamp, timeout: Duration, force: bool) -> bool {
        if !count_newer(count, self.count) && !force && now < self.t_accepted + timeout {
            return false;
        }
        self.count = count;
        self.t_accepted = now;
        true
    }
}

/// Writer-side record of a matched proxy reader.
#[derive(Debug, Clone)]
pub struct WrPrdMatch {
    /// Proxy reader requested reliable delivery.
    pub reliable: bool,
    /// Highest sequence number acknowledged; `SEQ_MAX` for best-effort readers.
    pub seq: SeqNum,
    pub has_replied_to_hb: bool,
    /// Reader is believed to be in sync without having ACKed.
    pub assumed_in_sync: bool,
    /// Writer sequence number at match time.
    pub last_seq: SeqNum,
    pub acknack: AcceptState,
    pub nackfrag: AcceptState,
    pub num_acks: u32,
    pub num_nacks: u32,
    pub rexmit_requests: u32,
    pub non_responsive_count: u32,
    /// Heartbeat count we last sent and when, for latency estimation.
    pub t_last_hb_sent: Timestamp,
    pub latency: LatencyEstimator,
    pub crypto: Option<CryptoHandle>,
}

impl WrPrdMatch {
    /// A match that behaves as if everything has been acknowledged.
    pub fn pretend_acked(writer_seq: SeqNum) -> Self {
        Self {
            reliable: false,
            seq: SEQ_MAX,
            has_replied_to_hb: true,
            assumed_in_sync: false,
            last_seq: writer_seq,
            acknack: AcceptState::default(),
            nackfrag: AcceptState::default(),
            num_acks: 0,
            num_nacks: 0,
            rexmit_requests: 0,
            non_responsive_count: 0,
            t_last_hb_sent: Timestamp::ZERO,
            latency: LatencyEstimator::default(),
            crypto: None,
        }
    }

    /// Reliable match that still has to answer a heartbeat.
    pub fn reliable(writer_seq: SeqNum, assumed_in_sync: bool) -> Self {
        Self {
            reliable: true,
            seq: writer_seq,
            has_replied_to_hb: false,
            assumed_in_sync,
            ..Self::pretend_acked(writer_seq)
        }
    }
}

/// Local-only match used for intra-process liveliness propagation, kept by
/// both the writer (per local reader) and the reader (per local writer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliveMatch {
    pub alive: bool,
    pub alive_vclock: u32,
}

impl AliveMatch {
    pub fn new(alive: bool, alive_vclock: u32) -> Self {
        Self { alive, alive_vclock }
    }
}

/// Reader-side record of a matched writer (local or proxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdWrMatch {
    pub live: AliveMatch,
    pub crypto: Option<CryptoHandle>,
}

/// Synchronization state of a reader with respect to a proxy writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    InSync,
    /// Catching up on historical data up to and including `end_of_tl_seq`.
    TlCatchup { end_of_tl_seq: SeqNum },
    OutOfSync,
}

/// Proxy-writer-side record of a matched local reader: the reader's ack
/// tracking towards that remote writer.
#[derive(Debug, Clone)]
pub struct PwrRdMatch {
    pub sync: SyncState,
    pub heartbeat: AcceptState,
    pub heartbeat_frag: AcceptState,
    pub t_last_nack: Timestamp,
    pub seq_last_nack: SeqNum,
    /// ACKNACK count of the next ACKNACK sent for this pair.
    pub acknack_count: u32,
    pub nackfrag_count: u32,
    pub crypto: Option<CryptoHandle>,
}

impl PwrRdMatch {
    pub fn new(sync: SyncState) -> Self {
        Self {
            sync,
            heartbeat: AcceptState::default(),
            heartbeat_frag: AcceptState::default(),
            t_last_nack: Timestamp::ZERO,
            seq_last_nack: 0,
            acknack_count: 0,
            nackfrag_count: 0,
            crypto: None,
        }
    }
}

/// Proxy-reader-side record of a matched local writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrdWrMatch {
    pub crypto: Option<CryptoHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_state_duplicates() {
        let mut a = AcceptState::default();
        let timeout = Duration::from_millis(500);
        let t0 = Timestamp::from_secs(1);
        assert!(a.accept(1, t0, timeout, false));
        assert!(!a.accept(1, t0, timeout, false), "same count is a duplicate");
        assert!(a.accept(2, t0, timeout, false));
        assert!(!a.accept(1, t0 + Duration::from_millis(100), timeout, false), "older count");
        assert!(
            a.accept(1, t0 + Duration::from_millis(600), timeout, false),
            "old count accepted after the timeout window"
        );
        assert!(a.accept(1, t0 + Duration::from_millis(600), timeout, true), "forced");
    }

    #[test]
    fn test_latency_estimator() {
        let mut l = LatencyEstimator::default();
        assert!(l.mean().is_none());
        l.record(Duration::from_millis(4));
        l.record(Duration::from_millis(2));
        assert_eq!(l.min, Duration::from_millis(2));
        assert_eq!(l.max, Duration::from_millis(4));
        assert_eq!(l.mean(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_new_match_init() {
        let be = WrPrdMatch::pretend_acked(7);
        assert_eq!(be.seq, SEQ_MAX);
        assert!(be.has_replied_to_hb);
        let rel = WrPrdMatch::reliable(7, false);
        assert_eq!(rel.seq, 7);
        assert!(!rel.has_replied_to_hb);
        assert!(rel.reliable);
    }
}
