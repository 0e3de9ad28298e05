// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-writer heartbeat control.
//!
//! All decisions are functions of an [`HbView`] snapshot of the writer plus
//! the [`HbControl`] timestamps, so they can be evaluated (and tested)
//! without a writer or a clock.

use std::time::Duration;

use crate::config::DdsiConfig;
use crate::match_tree::WrPrdAggregate;
use crate::seq::SeqNum;
use crate::time::Timestamp;
use crate::transmit::Destination;

/// Gap between piggybacked heartbeats on different packets.
const PIGGYBACK_MIN_GAP: Duration = Duration::from_micros(100);

/// Heartbeat bookkeeping of one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HbControl {
    pub t_of_last_write: Timestamp,
    pub t_of_last_hb: Timestamp,
    pub t_of_last_ackhb: Timestamp,
    /// Next scheduled heartbeat event.
    pub tsched: Timestamp,
    pub hbs_since_last_write: u32,
    pub last_packetid: u32,
}

impl Default for HbControl {
    fn default() -> Self {
        Self {
            t_of_last_write: Timestamp::ZERO,
            t_of_last_hb: Timestamp::ZERO,
            t_of_last_ackhb: Timestamp::ZERO,
            tsched: Timestamp::NEVER,
            hbs_since_last_write: 0,
            last_packetid: 0,
        }
    }
}

/// Snapshot of the writer state the heartbeat logic reads.
#[derive(Debug, Clone, Copy)]
pub struct HbView {
    pub seq: SeqNum,
    pub unacked_bytes: u64,
    pub whc_low: u64,
    pub whc_high: u64,
    /// Highest seq in the WHC, `None` if it is empty.
    pub whc_max_seq: Option<SeqNum>,
    pub retransmitting: bool,
    /// Root aggregate of the proxy-reader tree, `None` without readers.
    pub agg: Option<WrPrdAggregate>,
    pub num_reliable_readers: u32,
    pub max_drop_seq: SeqNum,
}

/// Whether a heartbeat asks for an ACKNACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckRequired {
    No,
    /// Request an ACK, but the heartbeat need not be forced out.
    Maybe,
    /// Request an ACK and force the heartbeat out.
    Must,
}

impl AckRequired {
    pub fn is_required(self) -> bool {
        self != AckRequired::No
    }
}

/// Result of evaluating the heartbeat schedule at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatDecision {
    /// The writer needs a heartbeat event at all.
    pub scheduled: bool,
    /// A heartbeat is due now.
    pub send_now: bool,
    pub ack_required: AckRequired,
    pub destination: Destination,
    /// Interval until the next evaluation.
    pub interval: Duration,
}

impl HbControl {
    /// Current heartbeat interval.
    ///
    /// The base interval doubles for every two heartbeats beyond the fifth
    /// since the last write (up to the maximum), halves at 3/4 and again at
    /// 1/2 of the water-mark band, halves while retransmitting, and never
    /// drops below the minimum.
    pub fn interval(&self, v: &HbView, cfg: &DdsiConfig) -> Duration {
        let mut ret = cfg.hb_interval_sched;
        if self.hbs_since_last_write > 5 {
            let mut cnt = (self.hbs_since_last_write - 5) / 2;
            while cnt > 0 && ret * 2 < cfg.hb_interval_sched_max {
                ret *= 2;
                cnt -= 1;
            }
        }
        let band = v.whc_high.saturating_sub(v.whc_low);
        if v.unacked_bytes >= v.whc_low + 3 * band / 4 {
            ret /= 2;
        }
        if v.unacked_bytes >= v.whc_low + band / 2 {
            ret /= 2;
        }
        if v.retransmitting {
            ret /= 2;
        }
        ret.max(cfg.hb_interval_sched_min)
    }

    /// Whether the writer needs a heartbeat event at all: some reader never
    /// replied to a heartbeat (even with nothing in the history), or the
    /// history holds data some reader still lacks.
    pub fn must_have_hb_scheduled(v: &HbView) -> bool {
        let Some(agg) = v.agg else {
            return false;
        };
        if !agg.all_have_replied_to_hb {
            return true;
        }
        v.whc_max_seq.is_some_and(|whc_max| v.max_drop_seq < whc_max)
    }

    /// Whether a full interval has passed since the last heartbeat.
    pub fn must_send(&self, v: &HbView, cfg: &DdsiConfig, now: Timestamp) -> bool {
        now >= self.t_of_last_hb + self.interval(v, cfg)
    }

    fn ack_required_generic(
        &self,
        v: &HbView,
        cfg: &DdsiConfig,
        tlast: Timestamp,
        now: Timestamp,
        piggyback: bool,
    ) -> AckRequired {
        let hb_intv_ack = cfg.hb_interval_sched;
        let window = if piggyback { hb_intv_ack * 4 / 5 } else { hb_intv_ack };
        if now >= tlast + window {
            return AckRequired::Must;
        }
        let band = v.whc_high.saturating_sub(v.whc_low);
        if v.unacked_bytes >= v.whc_low + band / 2 {
            if now >= self.t_of_last_ackhb + cfg.hb_interval_sched_min {
                return AckRequired::Must;
            } else if now >= self.t_of_last_ackhb + cfg.hb_interval_min {
                return AckRequired::Maybe;
            }
        }
        AckRequired::No
    }

    /// Ack requirement of a timer-driven heartbeat.
    pub fn ack_required(&self, v: &HbView, cfg: &DdsiConfig, now: Timestamp) -> AckRequired {
        self.ack_required_generic(v, cfg, self.t_of_last_write, now, false)
    }

    /// Where a heartbeat not aimed at a specific reader goes.
    ///
    /// Multicast unless exactly one reliable reader is behind, in which case
    /// that reader is the unicast target.
    pub fn destination(v: &HbView) -> Destination {
        let Some(agg) = v.agg else {
            return Destination::Multicast;
        };
        if v.num_reliable_readers == 0 || v.seq > agg.max_seq {
            return Destination::Multicast;
        }
        let n_unacked = v
            .num_reliable_readers
            .saturating_sub(agg.num_reliable_readers_where_seq_equals_max);
        match (n_unacked, agg.arbitrary_unacked_reader) {
            (1, Some(reader)) => Destination::Unicast(reader),
            _ => Destination::Multicast,
        }
    }

    /// Full decision for the heartbeat event at `now`. Pure: no state changes.
    pub fn decide(&self, v: &HbView, cfg: &DdsiConfig, now: Timestamp) -> HeartbeatDecision {
        let scheduled = Self::must_have_hb_scheduled(v);
        let send_now = scheduled && self.must_send(v, cfg, now);
        HeartbeatDecision {
            scheduled,
            send_now,
            ack_required: if send_now { self.ack_required(v, cfg, now) } else { AckRequired::No },
            destination: Self::destination(v),
            interval: self.interval(v, cfg),
        }
    }

    /// Record that a heartbeat went out.
    pub fn note_hb(&mut self, now: Timestamp, ack_required: bool) {
        if ack_required {
            self.t_of_last_ackhb = now;
        }
        self.t_of_last_hb = now;
        self.hbs_since_last_write = self.hbs_since_last_write.wrapping_add(1);
    }

    /// Record new data; returns the new schedule time if it moved earlier.
    pub fn note_asyncwrite(&mut self, now: Timestamp, cfg: &DdsiConfig) -> Option<Timestamp> {
        self.hbs_since_last_write = 0;
        let tnext = now + cfg.hb_interval_sched;
        if tnext < self.tsched {
            self.tsched = tnext;
            Some(tnext)
        } else {
            None
        }
    }

    /// Piggyback decision for a DATA going out in packet `packetid`.
    ///
    /// Returns the ack requirement when a heartbeat should be attached, and
    /// possibly a new (earlier) schedule time for the heartbeat event.
    pub fn piggyback(
        &mut self,
        v: &HbView,
        cfg: &DdsiConfig,
        now: Timestamp,
        packetid: u32,
    ) -> (Option<AckRequired>, Option<Timestamp>) {
        let tlast = self.t_of_last_write;
        let last_packetid = self.last_packetid;
        let t_of_last_hb = self.t_of_last_hb;
        self.t_of_last_write = now;
        self.last_packetid = packetid;
        let resched = self.note_asyncwrite(now, cfg);

        let ack = self.ack_required_generic(v, cfg, tlast, now, true);
        let attach = if ack == AckRequired::Must {
            Some(ack)
        } else if last_packetid != packetid && now.saturating_duration_since(t_of_last_hb) > PIGGYBACK_MIN_GAP {
            Some(ack)
        } else {
            None
        };
        (attach, resched)
    }
}

/// Sequence range advertised by a heartbeat.
///
/// Empty WHC: `[seq + 1, seq]`. Otherwise `[whc_min, whc_max]`, with the
/// upper end clamped to what has been transmitted unless the writer is
/// transient-local.
pub fn heartbeat_range(
    whc_range: Option<(SeqNum, SeqNum)>,
    seq: SeqNum,
    seq_xmit: SeqNum,
    transient_local: bool,
) -> (SeqNum, SeqNum) {
    match whc_range {
        None => (seq + 1, seq),
        Some((lo, hi)) => {
            let hi = if transient_local { hi } else { hi.min(seq_xmit) };
            (lo, hi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::GUID;
    use crate::match_tree::{max_drop_seq, WrPrdMatch, WrPrdTree};

    fn g(n: u8) -> GUID {
        let mut b = [0u8; 16];
        b[11] = n;
        b[15] = 0x07;
        GUID::from_bytes(b)
    }

    fn view(tree: &WrPrdTree, seq: SeqNum) -> HbView {
        HbView {
            seq,
            unacked_bytes: 0,
            whc_low: 1024,
            whc_high: 500 * 1024,
            whc_max_seq: Some(seq),
            retransmitting: false,
            agg: tree.root_aggregate().copied(),
            num_reliable_readers: crate::match_tree::num_reliable_readers(tree),
            max_drop_seq: max_drop_seq(tree, seq),
        }
    }

    fn acked(seq: SeqNum) -> WrPrdMatch {
        let mut m = WrPrdMatch::reliable(0, false);
        m.seq = seq;
        m.has_replied_to_hb = true;
        m
    }

    #[test]
    fn test_interval_backoff_and_pressure() {
        let cfg = DdsiConfig::default();
        let tree = WrPrdTree::new();
        let mut v = view(&tree, 1);
        let mut hbc = HbControl::default();
        assert_eq!(hbc.interval(&v, &cfg), Duration::from_millis(100));
        hbc.hbs_since_last_write = 9;
        assert_eq!(hbc.interval(&v, &cfg), Duration::from_millis(400));
        hbc.hbs_since_last_write = 1000;
        assert_eq!(hbc.interval(&v, &cfg), Duration::from_millis(6400), "capped below max");
        hbc.hbs_since_last_write = 0;
        v.unacked_bytes = v.whc_high;
        assert_eq!(hbc.interval(&v, &cfg), Duration::from_millis(25), "two stacking halvings");
        v.retransmitting = true;
        assert_eq!(hbc.interval(&v, &cfg), Duration::from_millis(20), "clamped to minimum");
    }

    #[test]
    fn test_unicast_to_single_slow_reader() {
        let mut tree = WrPrdTree::new();
        tree.insert(g(1), acked(5)).ok();
        tree.insert(g(2), acked(3)).ok();
        let v = view(&tree, 5);
        assert_eq!(v.max_drop_seq, 3);
        assert_eq!(HbControl::destination(&v), Destination::Unicast(g(2)));
        let hbc = HbControl::default();
        let cfg = DdsiConfig::default();
        let now = Timestamp::from_secs(10);
        assert_eq!(hbc.decide(&v, &cfg, now), hbc.decide(&v, &cfg, now), "decision is pure");
    }

    #[test]
    fn test_multicast_cases() {
        let mut tree = WrPrdTree::new();
        tree.insert(g(1), acked(3)).ok();
        tree.insert(g(2), acked(3)).ok();
        assert_eq!(HbControl::destination(&view(&tree, 5)), Destination::Multicast, "writer ahead of all");
        assert_eq!(HbControl::destination(&view(&tree, 3)), Destination::Multicast, "nobody behind");
        tree.insert(g(3), acked(1)).ok();
        tree.insert(g(4), acked(2)).ok();
        assert_eq!(HbControl::destination(&view(&tree, 3)), Destination::Multicast, "several behind");
    }

    #[test]
    fn test_must_have_scheduled() {
        let mut tree = WrPrdTree::new();
        assert!(!HbControl::must_have_hb_scheduled(&view(&tree, 3)), "no readers");
        tree.insert(g(1), WrPrdMatch::reliable(3, false)).ok();
        assert!(HbControl::must_have_hb_scheduled(&view(&tree, 3)), "reader never replied");
        tree.update(&g(1), |m| {
            m.has_replied_to_hb = true;
            m.seq = 3;
        });
        assert!(!HbControl::must_have_hb_scheduled(&view(&tree, 3)), "everything acked");
    }

    #[test]
    fn test_empty_history_still_needs_heartbeat() {
        let mut tree = WrPrdTree::new();
        tree.insert(g(1), WrPrdMatch::reliable(0, false)).ok();
        let mut v = view(&tree, 0);
        v.whc_max_seq = None;
        assert!(HbControl::must_have_hb_scheduled(&v), "new reader has not replied yet");
        tree.update(&g(1), |m| m.has_replied_to_hb = true);
        let mut v = view(&tree, 0);
        v.whc_max_seq = None;
        assert!(!HbControl::must_have_hb_scheduled(&v), "replied and nothing to send");
    }

    #[test]
    fn test_ack_required_under_pressure() {
        let cfg = DdsiConfig::default();
        let tree = WrPrdTree::new();
        let mut v = view(&tree, 1);
        let mut hbc = HbControl::default();
        let now = Timestamp::from_secs(1);
        hbc.t_of_last_write = now;
        hbc.t_of_last_ackhb = now;
        assert_eq!(hbc.ack_required(&v, &cfg, now), AckRequired::No);
        v.unacked_bytes = v.whc_high;
        assert_eq!(hbc.ack_required(&v, &cfg, now + Duration::from_millis(6)), AckRequired::Maybe);
        assert_eq!(hbc.ack_required(&v, &cfg, now + Duration::from_millis(21)), AckRequired::Must);
        v.unacked_bytes = 0;
        assert_eq!(hbc.ack_required(&v, &cfg, now + Duration::from_millis(100)), AckRequired::Must);
    }

    #[test]
    fn test_heartbeat_range() {
        assert_eq!(heartbeat_range(None, 7, 7, false), (8, 7));
        assert_eq!(heartbeat_range(Some((3, 9)), 9, 6, false), (3, 6));
        assert_eq!(heartbeat_range(Some((3, 9)), 9, 6, true), (3, 9));
    }
}
