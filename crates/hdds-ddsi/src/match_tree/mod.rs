// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Match-record store.
//!
//! Every local writer and reader keeps its matched peers in ordered trees
//! keyed by peer GUID:
//!
//! ```text
//! Writer ── readers:        AugTree<GUID, WrPrdMatch, WrPrdAugment>  (proxy readers)
//!        └─ local_readers:  AugTree<GUID, AliveMatch>
//! Reader ── writers:        AugTree<GUID, RdWrMatch>                 (proxy writers)
//!        └─ local_writers:  AugTree<GUID, RdWrMatch>
//! ProxyWriter ── readers:   AugTree<GUID, PwrRdMatch>                (local readers)
//! ProxyReader ── writers:   AugTree<GUID, PrdWrMatch>                (local writers)
//! ```
//!
//! The proxy-reader tree of a writer carries a [`WrPrdAggregate`] answering
//! "how far behind is the slowest reliable reader" in O(1).

mod avl;
mod records;

pub use avl::{AugTree, Augment, Iter, NoAugment};
pub use records::{
    AcceptState, AliveMatch, CryptoHandle, LatencyEstimator, PrdWrMatch, PwrRdMatch, RdWrMatch,
    SyncState, WrPrdMatch,
};

use crate::guid::GUID;
use crate::seq::{SeqNum, SEQ_MAX};

/// Aggregate over a subtree of a writer's proxy-reader matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrPrdAggregate {
    /// Minimum acknowledged seq; records that never replied count as 0.
    pub min_seq: SeqNum,
    /// Maximum acknowledged seq; `SEQ_MAX` records count as 0.
    pub max_seq: SeqNum,
    pub all_have_replied_to_hb: bool,
    /// Replied records whose acknowledged seq equals `max_seq`.
    pub num_reliable_readers_where_seq_equals_max: u32,
    /// Some reader of this subtree that is behind, if any.
    pub arbitrary_unacked_reader: Option<GUID>,
    /// GUID of the subtree's root node.
    node: GUID,
}

/// Augmentation of a writer's proxy-reader tree.
#[derive(Debug)]
pub struct WrPrdAugment;

impl Augment<GUID, WrPrdMatch> for WrPrdAugment {
    type Agg = WrPrdAggregate;

    fn augment(
        key: &GUID,
        m: &WrPrdMatch,
        left: Option<&WrPrdAggregate>,
        right: Option<&WrPrdAggregate>,
    ) -> WrPrdAggregate {
        let children = || left.into_iter().chain(right);

        let own_min = if m.has_replied_to_hb { m.seq } else { 0 };
        let own_max = if m.seq < SEQ_MAX { m.seq } else { 0 };
        let min_seq = children().map(|a| a.min_seq).fold(own_min, SeqNum::min);
        let max_seq = children().map(|a| a.max_seq).fold(own_max, SeqNum::max);
        let all_have_replied_to_hb = m.has_replied_to_hb && children().all(|a| a.all_have_replied_to_hb);

        let num_eq_max = if max_seq == 0 {
            0
        } else {
            u32::from(m.seq == max_seq && m.has_replied_to_hb)
                + children()
                    .filter(|a| a.max_seq == max_seq)
                    .map(|a| a.num_reliable_readers_where_seq_equals_max)
                    .sum::<u32>()
        };

        // Prefer this node, then any child candidate, then a child subtree
        // that is behind as a whole.
        let own_unacked = m.seq < max_seq
            || (m.reliable && (m.seq == SEQ_MAX || m.seq == 0 || !m.has_replied_to_hb));
        let arbitrary_unacked_reader = if own_unacked {
            Some(*key)
        } else {
            children()
                .find_map(|a| a.arbitrary_unacked_reader)
                .or_else(|| {
                    children()
                        .find(|a| a.max_seq != 0 && a.max_seq < max_seq)
                        .map(|a| a.node)
                })
        };

        WrPrdAggregate {
            min_seq,
            max_seq,
            all_have_replied_to_hb,
            num_reliable_readers_where_seq_equals_max: num_eq_max,
            arbitrary_unacked_reader,
            node: *key,
        }
    }
}

/// A writer's proxy-reader tree.
pub type WrPrdTree = AugTree<GUID, WrPrdMatch, WrPrdAugment>;

/// Sequence number up to which a writer may drop history: the slowest
/// reader's acknowledged seq, or `writer_seq` when nothing is waited for.
pub fn max_drop_seq(readers: &WrPrdTree, writer_seq: SeqNum) -> SeqNum {
    match readers.root_aggregate() {
        None => writer_seq,
        Some(agg) if agg.min_seq == SEQ_MAX => writer_seq,
        Some(agg) => agg.min_seq,
    }
}

/// Number of reliable matches in a writer's proxy-reader tree.
pub fn num_reliable_readers(readers: &WrPrdTree) -> u32 {
    readers.iter().filter(|(_, m)| m.reliable).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(n: u8) -> GUID {
        let mut b = [0u8; 16];
        b[11] = n;
        b[15] = 0x07;
        GUID::from_bytes(b)
    }

    fn acked(seq: SeqNum) -> WrPrdMatch {
        let mut m = WrPrdMatch::reliable(0, false);
        m.seq = seq;
        m.has_replied_to_hb = true;
        m
    }

    #[test]
    fn test_slowest_reader_scenario() {
        let mut t = WrPrdTree::new();
        t.insert(g(1), acked(5)).ok();
        t.insert(g(2), acked(3)).ok();
        assert_eq!(max_drop_seq(&t, 5), 3);
        let agg = t.root_aggregate().copied().expect("non-empty");
        assert_eq!(agg.max_seq, 5);
        assert_eq!(agg.num_reliable_readers_where_seq_equals_max, 1);
        assert_eq!(agg.arbitrary_unacked_reader, Some(g(2)));
    }

    #[test]
    fn test_unreplied_counts_as_zero() {
        let mut t = WrPrdTree::new();
        t.insert(g(1), acked(9)).ok();
        t.insert(g(2), WrPrdMatch::reliable(9, false)).ok();
        let agg = t.root_aggregate().copied().expect("non-empty");
        assert_eq!(agg.min_seq, 0, "a reader that never replied is maximally behind");
        assert!(!agg.all_have_replied_to_hb);
        assert_eq!(agg.arbitrary_unacked_reader, Some(g(2)));
    }

    #[test]
    fn test_sentinel_never_reaches_max() {
        let mut t = WrPrdTree::new();
        for n in 1..=5 {
            t.insert(g(n), WrPrdMatch::pretend_acked(3)).ok();
        }
        let agg = t.root_aggregate().copied().expect("non-empty");
        assert_eq!(agg.max_seq, 0);
        assert_eq!(agg.min_seq, SEQ_MAX);
        assert_eq!(agg.num_reliable_readers_where_seq_equals_max, 0);
        assert_eq!(agg.arbitrary_unacked_reader, None);
        assert_eq!(max_drop_seq(&t, 3), 3, "best-effort readers do not hold history");
    }

    #[test]
    fn test_all_caught_up_has_no_candidate() {
        let mut t = WrPrdTree::new();
        for n in 1..=7 {
            t.insert(g(n), acked(4)).ok();
        }
        let agg = t.root_aggregate().copied().expect("non-empty");
        assert_eq!(agg.num_reliable_readers_where_seq_equals_max, 7);
        assert_eq!(agg.arbitrary_unacked_reader, None);
        t.update(&g(6), |m| m.seq = 2);
        let agg = t.root_aggregate().copied().expect("non-empty");
        assert_eq!(agg.arbitrary_unacked_reader, Some(g(6)));
        assert_eq!(agg.num_reliable_readers_where_seq_equals_max, 6);
    }

    #[test]
    fn test_empty_tree_drop_seq() {
        let t = WrPrdTree::new();
        assert_eq!(max_drop_seq(&t, 42), 42);
        assert!(t.root_aggregate().is_none());
    }
}
