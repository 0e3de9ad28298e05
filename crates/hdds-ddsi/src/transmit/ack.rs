// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACKNACK and NACKFRAG handling on the writer side.

use super::{fragment_count, sample_submessages, Destination, Submessage};
use crate::config::RetransmitMerging;
use crate::domain::DomainContext;
use crate::entity::lifecycle::writer_nolinger;
use crate::entity::{WriterLifecycle, WriterState};
use crate::guid::GUID;
use crate::heartbeat::{ensure_heartbeat_event, make_heartbeat};
use crate::seq::{seq_valid, FragmentNumberSet, NumberSet, SeqNum, SequenceNumberSet, MAX_BITMAP_BITS, SEQ_MAX};
use crate::time::{is_infinite, Timestamp};

/// Outgoing traffic produced under the writer lock.
#[derive(Default)]
struct Replies {
    directed: Vec<Submessage>,
    merged: Vec<Submessage>,
}

/// ACKNACK from proxy reader `prd` to local writer `wr`.
pub(crate) fn handle_acknack(
    ctx: &DomainContext,
    prd: GUID,
    wr: GUID,
    set: &SequenceNumberSet,
    count: u32,
    final_flag: bool,
) {
    if !set.fits_below(SEQ_MAX) {
        log::warn!("[acknack] {:?} -> {:?}: set base {} out of range, dropped", prd, wr, set.base());
        return;
    }
    let Some(wr) = ctx.index.writer(&wr) else {
        log::warn!("[acknack] {:?} -> unknown writer {:?}, dropped", prd, wr);
        return;
    };
    let now = ctx.now();
    let cfg = &ctx.config;
    let mut out = Replies::default();

    let mut guard = wr.state.lock();
    let reliable = match guard.readers.get(&prd) {
        Some(m) => m.reliable,
        None => {
            log::debug!("[acknack] {:?} not matched with {:?}, dropped", prd, wr.guid);
            return;
        }
    };
    if !reliable {
        log::trace!("[acknack] best-effort reader {:?} ignored", prd);
        return;
    }

    // base <= 1 with an empty set: the reader has nothing yet
    let preemptive = set.base() <= 1 && set.num_bits() == 0;
    let accepted = guard
        .readers
        .update(&prd, |m| m.acknack.accept(count, now, cfg.ack_accept_timeout, preemptive))
        .unwrap_or(false);
    if !accepted {
        log::trace!("[acknack] duplicate #{} from {:?}", count, prd);
        return;
    }

    let st: &mut WriterState = &mut guard;
    let wr_seq = st.seq;
    let acked = set.base().saturating_sub(1);
    let pure_ack = !set.any();
    let mut pure_nonhist_ack = false;
    let mut in_sync = false;
    st.readers.update(&prd, |m| {
        pure_nonhist_ack = pure_ack && acked >= m.seq;
        if pure_ack {
            m.num_acks = m.num_acks.wrapping_add(1);
        } else {
            m.num_nacks = m.num_nacks.wrapping_add(1);
            m.rexmit_requests = m.rexmit_requests.wrapping_add(1);
        }
        if acked > m.seq {
            m.seq = acked.min(wr_seq);
        }
        if pure_nonhist_ack && !m.has_replied_to_hb {
            m.has_replied_to_hb = true;
            if m.t_last_hb_sent != Timestamp::ZERO {
                m.latency.record(now.saturating_duration_since(m.t_last_hb_sent));
            }
        }
        if !preemptive && pure_nonhist_ack {
            m.assumed_in_sync = true;
        }
        in_sync = m.assumed_in_sync;
        m.last_seq = wr_seq;
        m.non_responsive_count = 0;
    });

    let drop_seq = st.max_drop_seq();
    let dropped = st.whc.remove_acked(drop_seq);
    if !is_infinite(wr.qos.lifespan) {
        st.whc.remove_expired(now);
    }
    log::trace!(
        "[acknack] {:?} -> {:?}: ack<{} bits={} max_drop={} dropped={}",
        prd,
        wr.guid,
        set.base(),
        set.num_bits(),
        drop_seq,
        dropped
    );

    // Requested seqs, plus the accelerated catch-up window for readers
    // that never sent a pure ack.
    let accel = cfg.accelerate_rexmit_block_size;
    let (base, window) = if preemptive {
        match st.whc.state().min_seq() {
            Some(min) => (min, accel),
            None => (set.base(), 0),
        }
    } else if !in_sync && set.num_bits() < accel {
        (set.base(), accel)
    } else {
        (set.base(), set.num_bits())
    };
    let requested: Vec<SeqNum> = (0..window)
        .map(|i| base + u64::from(i))
        .take_while(|&s| s <= st.seq_xmit)
        .filter(|&s| preemptive || s >= set.base() + u64::from(set.num_bits()) || set.contains(s))
        .collect();

    let mut gap_seqs = Vec::new();
    let mut rexmits = 0u64;
    let mut lost = 0u64;
    if !requested.is_empty() {
        let merge = in_sync
            && match cfg.retransmit_merging {
                RetransmitMerging::Never => false,
                RetransmitMerging::Always => true,
                RetransmitMerging::Adaptive => st.num_reliable_readers() > 1,
            };
        let mut budget = u64::from(st.rexmit_burst_size_limit.max(1024));
        let frag_size = cfg.fragment_size;
        let per_burst = (st.rexmit_burst_size_limit / frag_size.max(1)).max(1);
        for seq in requested {
            if budget == 0 {
                break;
            }
            let Some(e) = st.whc.get_mut(seq) else {
                gap_seqs.push(seq);
                lost += 1;
                continue;
            };
            let unacked = e.unacked;
            if merge && now < e.last_rexmit + cfg.retransmit_merging_period {
                log::trace!("[acknack] rexmit of {} merged", seq);
                continue;
            }
            e.last_rexmit = now;
            let nfrags = fragment_count(e.sample.size(), frag_size);
            let reader = if merge { None } else { Some(prd) };
            let mut msgs =
                sample_submessages(wr.guid, reader, seq, &e.sample, frag_size, Some((1, per_burst)), false);
            let sent: u64 = msgs.iter().map(|m| m.payload_len() as u64).sum();
            budget = budget.saturating_sub(sent.max(1));
            if per_burst < nfrags {
                st.hbfragcount = st.hbfragcount.wrapping_add(1);
                msgs.push(Submessage::HeartbeatFrag {
                    writer: wr.guid,
                    reader,
                    seq,
                    last_frag: nfrags,
                    count: st.hbfragcount,
                });
            }
            log::trace!("[acknack] rexmit {} to {:?}", seq, reader);
            if unacked {
                st.set_retransmitting();
            }
            st.counters.rexmit_bytes += sent;
            rexmits += 1;
            if merge {
                out.merged.extend(msgs);
            } else {
                out.directed.extend(msgs);
            }
        }
        if budget == 0 {
            log::trace!("[acknack] rexmit limit hit for {:?}", prd);
        }
        if !gap_seqs.is_empty() {
            out.directed.extend(gap_messages(wr.guid, Some(prd), &gap_seqs));
        }
    }
    st.counters.rexmit_count += rexmits + u64::from(!gap_seqs.is_empty());
    st.counters.rexmit_lost_count += lost;

    let responded = rexmits > 0 || !gap_seqs.is_empty();
    if responded {
        if let Some(at) = st.hbcontrol.note_asyncwrite(now, cfg) {
            ensure_heartbeat_event(ctx, &wr, st, at);
        }
    }
    if responded || preemptive {
        out.directed.push(make_heartbeat(&wr, st, Some(prd), true, now));
    } else if !final_flag {
        out.directed.push(make_heartbeat(&wr, st, Some(prd), false, now));
    }

    if st.whc.unacked_bytes() == 0 && st.clear_retransmitting() {
        log::trace!("[throttle] writer {:?} caught up", wr.guid);
    }
    let drained = st.lifecycle == WriterLifecycle::Lingering && st.whc.unacked_bytes() == 0;
    wr.throttle_cond.notify_all();
    drop(guard);

    if !out.directed.is_empty() {
        ctx.tx.send(wr.guid, Destination::Unicast(prd), out.directed);
    }
    if !out.merged.is_empty() {
        ctx.tx.send(wr.guid, Destination::Multicast, out.merged);
    }
    if drained {
        log::debug!("[acknack] lingering writer {:?} fully acknowledged", wr.guid);
        writer_nolinger(ctx, &wr);
    }
}

/// NACKFRAG from `prd` for fragments of `seq`.
pub(crate) fn handle_nackfrag(
    ctx: &DomainContext,
    prd: GUID,
    wr: GUID,
    seq: SeqNum,
    set: &FragmentNumberSet,
    count: u32,
) {
    if !seq_valid(seq) {
        log::warn!("[acknack] NACKFRAG {:?} -> {:?}: seq {} out of range, dropped", prd, wr, seq);
        return;
    }
    let Some(wr) = ctx.index.writer(&wr) else {
        log::warn!("[acknack] NACKFRAG {:?} -> unknown writer {:?}, dropped", prd, wr);
        return;
    };
    let now = ctx.now();
    let cfg = &ctx.config;
    let mut msgs = Vec::new();
    {
        let mut guard = wr.state.lock();
        let st: &mut WriterState = &mut guard;
        let accepted = st
            .readers
            .update(&prd, |m| m.reliable && m.nackfrag.accept(count, now, cfg.ack_accept_timeout, false))
            .unwrap_or(false);
        if !accepted {
            log::trace!("[acknack] NACKFRAG #{} from {:?} ignored", count, prd);
            return;
        }
        match st.whc.get(seq) {
            Some(e) => {
                let nfrags = fragment_count(e.sample.size(), cfg.fragment_size);
                let limit = u64::from(st.rexmit_burst_size_limit.max(1024));
                let mut bytes = 0u64;
                for f in set.iter() {
                    let Ok(f) = u32::try_from(f) else { continue };
                    if f == 0 || f > nfrags || (bytes > 0 && bytes >= limit) {
                        continue;
                    }
                    let frag =
                        sample_submessages(wr.guid, Some(prd), seq, &e.sample, cfg.fragment_size, Some((f, f)), false);
                    bytes += frag.iter().map(|m| m.payload_len() as u64).sum::<u64>();
                    msgs.extend(frag);
                }
                st.counters.rexmit_bytes += bytes;
                st.hbfragcount = st.hbfragcount.wrapping_add(1);
                msgs.push(Submessage::HeartbeatFrag {
                    writer: wr.guid,
                    reader: Some(prd),
                    seq,
                    last_frag: nfrags,
                    count: st.hbfragcount,
                });
            }
            None if seq <= st.seq => msgs.extend(gap_messages(wr.guid, Some(prd), &[seq])),
            None => {}
        }
    }
    if !msgs.is_empty() {
        ctx.tx.send(wr.guid, Destination::Unicast(prd), msgs);
    }
}

/// GAP submessages covering the ascending `seqs`.
///
/// Each GAP covers a contiguous run `[gap_start, base)` plus whatever
/// follows within one bitmap.
pub(crate) fn gap_messages(writer: GUID, reader: Option<GUID>, seqs: &[SeqNum]) -> Vec<Submessage> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < seqs.len() {
        let gap_start = seqs[i];
        let mut j = i + 1;
        while j < seqs.len() && seqs[j] == seqs[j - 1] + 1 {
            j += 1;
        }
        let base = seqs[j - 1] + 1;
        let mut k = j;
        while k < seqs.len() && seqs[k] - base < u64::from(MAX_BITMAP_BITS) {
            k += 1;
        }
        let gap_list = match SequenceNumberSet::from_numbers(base, &seqs[j..k]) {
            Some(set) => set,
            None => {
                k = j;
                NumberSet::new(base, 0)
            }
        };
        out.push(Submessage::Gap {
            writer,
            reader,
            gap_start,
            gap_list,
        });
        i = k;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(n: u8) -> GUID {
        let mut b = [0u8; 16];
        b[11] = n;
        b[15] = 0x03;
        GUID::from_bytes(b)
    }

    fn gaps(seqs: &[SeqNum]) -> Vec<(SeqNum, SeqNum, Vec<SeqNum>)> {
        gap_messages(g(1), None, seqs)
            .into_iter()
            .map(|m| match m {
                Submessage::Gap { gap_start, gap_list, .. } => (gap_start, gap_list.base(), gap_list.iter().collect()),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_gap_contiguous_run() {
        assert_eq!(gaps(&[3, 4, 5]), vec![(3, 6, vec![])]);
    }

    #[test]
    fn test_gap_run_plus_bitmap() {
        assert_eq!(gaps(&[3, 4, 7, 9]), vec![(3, 5, vec![7, 9])]);
    }

    #[test]
    fn test_gap_splits_beyond_bitmap() {
        let far = 2 + u64::from(MAX_BITMAP_BITS) + 10;
        let out = gaps(&[1, far]);
        assert_eq!(out.len(), 2, "second seq is out of bitmap range: {:?}", out);
        assert_eq!(out[0], (1, 2, vec![]));
        assert_eq!(out[1], (far, far + 1, vec![]));
    }

    #[test]
    fn test_gap_empty() {
        assert!(gap_messages(g(1), None, &[]).is_empty());
    }
}
