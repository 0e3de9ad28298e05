// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history cache (WHC).
//!
//! Ordered by sequence number and guarded by the owning writer's lock.
//! Tracks the number of unacknowledged payload bytes that drives throttling
//! and heartbeat rates.
//!
//! Retention rules:
//! - acknowledged samples are dropped, except that a transient-local writer
//!   keeps the last `depth` samples of every instance (all of them under
//!   KEEP_ALL) for late joiners;
//! - under KEEP_LAST, a new sample pushes the oldest sample of its instance
//!   out even if unacknowledged;
//! - samples with a finite expiry are dropped once expired.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::qos::{EndpointQos, History};
use crate::rhc::{Sample, SampleKind};
use crate::seq::SeqNum;
use crate::time::Timestamp;

/// One cached sample.
#[derive(Debug, Clone)]
pub struct WhcEntry {
    pub seq: SeqNum,
    pub sample: Sample,
    /// Absolute expiry, `NEVER` if none.
    pub expiry: Timestamp,
    /// Counted in the unacknowledged byte total.
    pub unacked: bool,
    /// Last retransmission, for retransmit merging.
    pub last_rexmit: Timestamp,
}

impl WhcEntry {
    pub fn size(&self) -> u64 {
        self.sample.size() as u64
    }
}

/// Summary of a WHC, as read by heartbeat and throttling logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WhcState {
    /// Lowest and highest cached seq; `None` when empty.
    pub range: Option<(SeqNum, SeqNum)>,
    pub unacked_bytes: u64,
}

impl WhcState {
    pub fn min_seq(&self) -> Option<SeqNum> {
        self.range.map(|(lo, _)| lo)
    }

    pub fn max_seq(&self) -> Option<SeqNum> {
        self.range.map(|(_, hi)| hi)
    }
}

/// Writer history cache.
#[derive(Debug)]
pub struct Whc {
    entries: BTreeMap<SeqNum, WhcEntry>,
    /// Per-instance seqs in the cache, oldest first.
    instances: HashMap<u64, VecDeque<SeqNum>>,
    unacked_bytes: u64,
    /// Highest seq known to be acknowledged by all.
    max_drop_seq: SeqNum,
    /// History depth per instance; `None` for KEEP_ALL.
    hdepth: Option<usize>,
    transient_local: bool,
}

impl Whc {
    pub fn new(qos: &EndpointQos) -> Self {
        Self {
            entries: BTreeMap::new(),
            instances: HashMap::new(),
            unacked_bytes: 0,
            max_drop_seq: 0,
            hdepth: match qos.history {
                History::KeepLast(n) => Some(n.max(1) as usize),
                History::KeepAll => None,
            },
            transient_local: qos.is_transient_local(),
        }
    }

    pub fn state(&self) -> WhcState {
        let range = match (self.entries.keys().next(), self.entries.keys().next_back()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        };
        WhcState {
            range,
            unacked_bytes: self.unacked_bytes,
        }
    }

    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, seq: SeqNum) -> Option<&WhcEntry> {
        self.entries.get(&seq)
    }

    pub fn get_mut(&mut self, seq: SeqNum) -> Option<&mut WhcEntry> {
        self.entries.get_mut(&seq)
    }

    /// Entries with seq in `[from, to]`.
    pub fn range(&self, from: SeqNum, to: SeqNum) -> impl Iterator<Item = &WhcEntry> {
        self.entries.range(from..=to).map(|(_, e)| e)
    }

    /// Insert a freshly written sample. `seq` must exceed every cached seq.
    pub fn insert(&mut self, seq: SeqNum, sample: Sample, expiry: Timestamp) {
        let key = sample.key;
        let entry = WhcEntry {
            seq,
            sample,
            expiry,
            unacked: seq > self.max_drop_seq,
            last_rexmit: Timestamp::ZERO,
        };
        if entry.unacked {
            self.unacked_bytes += entry.size();
        }
        self.entries.insert(seq, entry);
        let idx = self.instances.entry(key).or_default();
        idx.push_back(seq);
        if let Some(depth) = self.hdepth {
            while idx.len() > depth {
                let Some(old) = idx.pop_front() else { break };
                if let Some(e) = self.entries.remove(&old) {
                    if e.unacked {
                        self.unacked_bytes -= e.size();
                    }
                    log::trace!("[whc] seq {} pushed out by KEEP_LAST depth", old);
                }
            }
        }
    }

    fn retained(&self, e: &WhcEntry) -> bool {
        if !self.transient_local {
            return false;
        }
        let Some(depth) = self.hdepth else {
            return true;
        };
        self.instances
            .get(&e.sample.key)
            .and_then(|idx| idx.iter().rev().take(depth).find(|&&s| s == e.seq))
            .is_some()
    }

    fn unlink(&mut self, seq: SeqNum, key: u64) {
        if let Some(idx) = self.instances.get_mut(&key) {
            idx.retain(|&s| s != seq);
            if idx.is_empty() {
                self.instances.remove(&key);
            }
        }
    }

    /// Mark everything up to `max_drop_seq` acknowledged and drop what is no
    /// longer retained. Returns the number of entries dropped.
    pub fn remove_acked(&mut self, max_drop_seq: SeqNum) -> usize {
        if max_drop_seq <= self.max_drop_seq {
            return 0;
        }
        let mut dropped = Vec::new();
        for (&seq, e) in self.entries.range_mut(..=max_drop_seq) {
            if e.unacked {
                e.unacked = false;
                self.unacked_bytes -= e.sample.size() as u64;
            }
            dropped.push(seq);
        }
        self.max_drop_seq = max_drop_seq;
        let mut n = 0;
        for seq in dropped {
            let Some(e) = self.entries.get(&seq) else { continue };
            if self.retained(e) {
                continue;
            }
            let key = e.sample.key;
            self.entries.remove(&seq);
            self.unlink(seq, key);
            n += 1;
        }
        if n > 0 {
            log::trace!("[whc] dropped {} acked samples up to seq {}", n, max_drop_seq);
        }
        n
    }

    /// Drop expired entries regardless of acknowledgement. Returns the
    /// number dropped and the earliest remaining expiry.
    pub fn remove_expired(&mut self, now: Timestamp) -> (usize, Timestamp) {
        let expired: Vec<(SeqNum, u64)> = self
            .entries
            .values()
            .filter(|e| e.expiry <= now)
            .map(|e| (e.seq, e.sample.key))
            .collect();
        for &(seq, key) in &expired {
            if let Some(e) = self.entries.remove(&seq) {
                if e.unacked {
                    self.unacked_bytes -= e.size();
                }
            }
            self.unlink(seq, key);
        }
        let next = self.entries.values().map(|e| e.expiry).min().unwrap_or(Timestamp::NEVER);
        (expired.len(), next)
    }

    /// Remove a single entry (deadline-only insertion).
    pub fn remove(&mut self, seq: SeqNum) -> Option<WhcEntry> {
        let e = self.entries.remove(&seq)?;
        if e.unacked {
            self.unacked_bytes -= e.size();
        }
        self.unlink(seq, e.sample.key);
        Some(e)
    }

    /// Retained samples for a late-joining local reader, in seq order.
    pub fn retained_samples(&self) -> Vec<(SeqNum, Sample)> {
        self.entries.values().map(|e| (e.seq, e.sample.clone())).collect()
    }

    /// Drop everything (writer teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.instances.clear();
        self.unacked_bytes = 0;
    }
}

/// Expiry of a freshly written sample.
pub fn sample_expiry(qos: &EndpointQos, kind: SampleKind, now: Timestamp) -> Timestamp {
    if kind != SampleKind::Write || crate::time::is_infinite(qos.lifespan) {
        Timestamp::NEVER
    } else {
        now + qos.lifespan
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::qos::Qos;

    fn sample(key: u64, len: usize) -> Sample {
        Sample::new(key, vec![0u8; len], Timestamp::ZERO)
    }

    #[test]
    fn test_unacked_bytes_accounting() {
        let mut whc = Whc::new(&Qos::new().keep_all().merge(&EndpointQos::writer_default()));
        for seq in 1..=4 {
            whc.insert(seq, sample(seq, 10), Timestamp::NEVER);
        }
        assert_eq!(whc.unacked_bytes(), 40);
        assert_eq!(whc.remove_acked(2), 2);
        assert_eq!(whc.unacked_bytes(), 20);
        assert_eq!(whc.state().range, Some((3, 4)));
        assert_eq!(whc.remove_acked(1), 0, "max_drop_seq never goes back");
    }

    #[test]
    fn test_never_drops_above_max_drop() {
        let mut whc = Whc::new(&Qos::new().keep_all().merge(&EndpointQos::writer_default()));
        for seq in 1..=10 {
            whc.insert(seq, sample(1, 1), Timestamp::NEVER);
        }
        whc.remove_acked(6);
        for seq in 7..=10 {
            assert!(whc.get(seq).is_some(), "seq {} above max_drop_seq must stay", seq);
        }
    }

    #[test]
    fn test_transient_local_retention() {
        let qos = Qos::new()
            .transient_local()
            .keep_last(2)
            .merge(&EndpointQos::writer_default());
        let mut whc = Whc::new(&qos);
        for seq in 1..=3 {
            whc.insert(seq, sample(7, 5), Timestamp::NEVER);
        }
        assert_eq!(whc.len(), 2, "KEEP_LAST 2 pushes seq 1 out");
        whc.remove_acked(3);
        assert_eq!(whc.len(), 2, "acked but retained for late joiners");
        assert_eq!(whc.unacked_bytes(), 0);
        let seqs: Vec<_> = whc.retained_samples().into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_lifespan_expiry() {
        let qos = Qos::new()
            .keep_all()
            .lifespan(Duration::from_millis(100))
            .merge(&EndpointQos::writer_default());
        let mut whc = Whc::new(&qos);
        let t0 = Timestamp::from_secs(1);
        whc.insert(1, sample(1, 4), sample_expiry(&qos, SampleKind::Write, t0));
        whc.insert(2, sample(1, 4).with_kind(SampleKind::Dispose), sample_expiry(&qos, SampleKind::Dispose, t0));
        let (n, next) = whc.remove_expired(t0 + Duration::from_millis(150));
        assert_eq!(n, 1);
        assert_eq!(next, Timestamp::NEVER, "dispose never expires");
        assert_eq!(whc.unacked_bytes(), 4);
    }
}
