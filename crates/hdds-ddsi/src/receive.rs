// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side protocol handling: HEARTBEAT, HEARTBEATFRAG, DATA,
//! DATAFRAG and GAP from proxy writers.
//!
//! Each proxy writer keeps one reorder buffer shared by all its matched
//! local readers. Samples are delivered strictly in sequence order while
//! the proxy writer lock is held; gapped sequence numbers are skipped.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::domain::DomainContext;
use crate::entity::{ProxyWriter, ProxyWriterState};
use crate::guid::GUID;
use crate::liveliness::proxy_writer_seen;
use crate::match_tree::SyncState;
use crate::qos::LivelinessKind;
use crate::rhc::{Sample, WriterInfo};
use crate::seq::{seq_valid, NumberSet, SeqNum, SequenceNumberSet, MAX_BITMAP_BITS, SEQ_MAX};
use crate::transmit::{Destination, FragmentIn, Submessage};

/// Upper bound on gap markers recorded ahead of the delivery point.
const MAX_GAP_MARKERS: u64 = 4 * MAX_BITMAP_BITS as u64;

/// Sequence numbers from the wire are checked before any arithmetic on them.
fn in_range(seq: SeqNum, writer: GUID, what: &str) -> bool {
    if seq_valid(seq) {
        return true;
    }
    log::warn!("[receive] {} from {:?}: sequence number {} out of range, dropped", what, writer, seq);
    false
}

fn lookup(ctx: &DomainContext, writer: GUID, what: &str) -> Option<Arc<ProxyWriter>> {
    let pwr = ctx.index.proxy_writer(&writer);
    if pwr.is_none() {
        log::trace!("[receive] {} from unknown proxy writer {:?}", what, writer);
    }
    pwr
}

/// Hand in-order samples to every matched reader's history cache.
fn deliver(ctx: &DomainContext, pwr: &ProxyWriter, st: &ProxyWriterState, samples: &[(SeqNum, Sample)]) {
    if samples.is_empty() {
        return;
    }
    let info = WriterInfo::from_qos(pwr.guid, &pwr.qos());
    for rd in st.readers.keys() {
        let Some(rd) = ctx.index.reader(rd) else {
            continue;
        };
        for (seq, sample) in samples {
            log::trace!("[receive] deliver {:?}#{} to {:?}", pwr.guid, seq, rd.guid);
            rd.rhc.store(&info, sample);
        }
    }
}

/// Treat `[start, end)` as irrelevant. Returns what became deliverable.
fn apply_gap(st: &mut ProxyWriterState, start: SeqNum, end: SeqNum) -> Vec<(SeqNum, Sample)> {
    if end <= st.next_deliver {
        return Vec::new();
    }
    if start <= st.next_deliver {
        let rest = st.reorder.split_off(&end);
        let below = std::mem::replace(&mut st.reorder, rest);
        let mut out: Vec<(SeqNum, Sample)> = below
            .into_iter()
            .filter(|(s, _)| *s >= st.next_deliver)
            .filter_map(|(s, v)| v.map(|v| (s, v)))
            .collect();
        st.next_deliver = end;
        out.extend(st.take_in_order());
        out
    } else {
        let stop = end.min(start + MAX_GAP_MARKERS);
        for s in start..stop {
            st.reorder.entry(s).or_insert(None);
        }
        st.take_in_order()
    }
}

/// Some matched reader wants history from the start.
fn has_tl_catchup(st: &ProxyWriterState) -> bool {
    st.readers
        .iter()
        .any(|(_, m)| matches!(m.sync, SyncState::TlCatchup { .. } | SyncState::OutOfSync))
}

/// First heartbeat: history now ends at `last_seq`.
fn start_tl_catchup(st: &mut ProxyWriterState, last_seq: SeqNum) {
    st.readers.for_each_mut(|_, m| {
        if m.sync == SyncState::OutOfSync {
            m.sync = SyncState::TlCatchup { end_of_tl_seq: last_seq };
        }
    });
}

fn finish_tl_catchup(st: &mut ProxyWriterState) {
    let next = st.next_deliver;
    st.readers.for_each_mut(|_, m| {
        if let SyncState::TlCatchup { end_of_tl_seq } = m.sync {
            if next > end_of_tl_seq {
                m.sync = SyncState::InSync;
            }
        }
    });
}

/// HEARTBEAT from a proxy writer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_heartbeat(
    ctx: &DomainContext,
    writer: GUID,
    reader: Option<GUID>,
    first_seq: SeqNum,
    last_seq: SeqNum,
    count: u32,
    final_flag: bool,
    liveliness: bool,
) {
    if !in_range(first_seq, writer, "HEARTBEAT") || !in_range(last_seq, writer, "HEARTBEAT") {
        return;
    }
    let Some(pwr) = lookup(ctx, writer, "HEARTBEAT") else {
        return;
    };
    if first_seq == 0 || first_seq > last_seq.saturating_add(1) {
        log::warn!("[receive] malformed HEARTBEAT [{}, {}] from {:?}", first_seq, last_seq, writer);
        return;
    }
    let qos = pwr.qos();
    let replies = {
        let mut st = pwr.state.lock();
        if st.deleting {
            return;
        }
        if liveliness || qos.liveliness.kind == LivelinessKind::Automatic {
            proxy_writer_seen(ctx, &pwr, &mut st);
        }
        if !qos.is_reliable() || st.readers.is_empty() {
            return;
        }

        let gap_end = if st.have_seen_heartbeat {
            first_seq
        } else {
            st.have_seen_heartbeat = true;
            if has_tl_catchup(&st) {
                start_tl_catchup(&mut st, last_seq);
                first_seq
            } else if st.next_deliver > 1 {
                // already delivering: keep what is buffered
                first_seq
            } else {
                last_seq + 1
            }
        };
        if last_seq > st.last_seq {
            st.last_seq = last_seq;
        }
        let ready = apply_gap(&mut st, 1, gap_end);
        deliver(ctx, &pwr, &st, &ready);
        finish_tl_catchup(&mut st);

        let base = st.next_deliver;
        let missing: Vec<SeqNum> = st
            .missing(last_seq, MAX_BITMAP_BITS as usize)
            .into_iter()
            .filter(|&s| s - base < u64::from(MAX_BITMAP_BITS))
            .collect();
        log::trace!(
            "[receive] HEARTBEAT {:?} [{}, {}] #{} next={} missing={}",
            writer,
            first_seq,
            last_seq,
            count,
            base,
            missing.len()
        );
        acknacks(ctx, &pwr, &mut st, reader, count, final_flag, base, &missing)
    };
    for (rd, msg) in replies {
        ctx.tx.send(rd, Destination::Unicast(writer), vec![msg]);
    }
}

/// One ACKNACK per reliable matched reader that accepts heartbeat `count`.
#[allow(clippy::too_many_arguments)]
fn acknacks(
    ctx: &DomainContext,
    pwr: &ProxyWriter,
    st: &mut MutexGuard<'_, ProxyWriterState>,
    dst: Option<GUID>,
    count: u32,
    final_flag: bool,
    base: SeqNum,
    missing: &[SeqNum],
) -> Vec<(GUID, Submessage)> {
    let now = ctx.now();
    let set = SequenceNumberSet::from_numbers(base, missing).unwrap_or_else(|| NumberSet::new(base, 0));
    let mut out = Vec::new();
    let readers: Vec<GUID> = st.readers.keys().copied().collect();
    for rd in readers {
        if dst.is_some_and(|d| d != rd) {
            continue;
        }
        if !ctx.index.reader(&rd).is_some_and(|r| r.is_reliable()) {
            continue;
        }
        let msg = st.readers.update(&rd, |m| {
            if !m.heartbeat.accept(count, now, ctx.config.ack_accept_timeout, false) {
                return None;
            }
            if final_flag && missing.is_empty() {
                return None;
            }
            m.acknack_count = m.acknack_count.wrapping_add(1);
            if let Some(&last) = missing.last() {
                m.t_last_nack = now;
                m.seq_last_nack = last;
            }
            Some(Submessage::AckNack {
                reader: rd,
                writer: pwr.guid,
                set: set.clone(),
                count: m.acknack_count,
                final_flag: missing.is_empty(),
            })
        });
        if let Some(Some(msg)) = msg {
            out.push((rd, msg));
        }
    }
    out
}

/// HEARTBEATFRAG: NACK the fragments of `seq` still missing.
pub(crate) fn handle_heartbeat_frag(ctx: &DomainContext, writer: GUID, seq: SeqNum, last_frag: u32, count: u32) {
    if !in_range(seq, writer, "HEARTBEATFRAG") {
        return;
    }
    let Some(pwr) = lookup(ctx, writer, "HEARTBEATFRAG") else {
        return;
    };
    let now = ctx.now();
    let mut replies = Vec::new();
    {
        let mut st = pwr.state.lock();
        if st.deleting || seq < st.next_deliver {
            return;
        }
        let Some(set) = st.defrag.nack_set(seq, last_frag) else {
            return;
        };
        let readers: Vec<GUID> = st.readers.keys().copied().collect();
        for rd in readers {
            let msg = st.readers.update(&rd, |m| {
                if !m.heartbeat_frag.accept(count, now, ctx.config.ack_accept_timeout, false) {
                    return None;
                }
                m.nackfrag_count = m.nackfrag_count.wrapping_add(1);
                Some(Submessage::NackFrag {
                    reader: rd,
                    writer,
                    seq,
                    set: set.clone(),
                    count: m.nackfrag_count,
                })
            });
            if let Some(Some(msg)) = msg {
                replies.push((rd, msg));
                // one reader asking is enough
                break;
            }
        }
    }
    for (rd, msg) in replies {
        ctx.tx.send(rd, Destination::Unicast(writer), vec![msg]);
    }
}

/// A complete sample `seq` from a proxy writer.
pub(crate) fn handle_data(ctx: &DomainContext, writer: GUID, seq: SeqNum, sample: Sample) {
    if !in_range(seq, writer, "DATA") {
        return;
    }
    let Some(pwr) = lookup(ctx, writer, "DATA") else {
        return;
    };
    let mut st = pwr.state.lock();
    if st.deleting {
        return;
    }
    proxy_writer_seen(ctx, &pwr, &mut st);
    accept_sample(ctx, &pwr, &mut st, seq, sample);
}

fn accept_sample(ctx: &DomainContext, pwr: &ProxyWriter, st: &mut ProxyWriterState, seq: SeqNum, sample: Sample) {
    if seq > st.last_seq {
        st.last_seq = seq;
    }
    if !pwr.qos().is_reliable() {
        // best effort: anything newer goes straight through
        if seq >= st.next_deliver {
            st.next_deliver = seq + 1;
            deliver(ctx, pwr, st, &[(seq, sample)]);
        }
        return;
    }
    if !st.have_seen_heartbeat && st.next_deliver == 1 && seq > 1 && !has_tl_catchup(st) {
        // volatile start-up: begin at the first sample seen
        st.next_deliver = seq;
    }
    if seq < st.next_deliver || st.reorder.contains_key(&seq) {
        log::trace!("[receive] duplicate {:?}#{}", pwr.guid, seq);
        return;
    }
    st.reorder.insert(seq, Some(sample));
    let ready = st.take_in_order();
    deliver(ctx, pwr, st, &ready);
    finish_tl_catchup(st);
}

/// DATAFRAG: reassemble, then treat as DATA.
pub(crate) fn handle_data_frag(ctx: &DomainContext, writer: GUID, frag: FragmentIn<'_>) {
    if !in_range(frag.seq, writer, "DATAFRAG") {
        return;
    }
    let Some(pwr) = lookup(ctx, writer, "DATAFRAG") else {
        return;
    };
    let mut st = pwr.state.lock();
    if st.deleting {
        return;
    }
    proxy_writer_seen(ctx, &pwr, &mut st);
    if frag.seq < st.next_deliver {
        return;
    }
    if let Some(sample) = st.defrag.add(frag) {
        accept_sample(ctx, &pwr, &mut st, frag.seq, sample);
    }
}

/// GAP: `[gap_start, gap_list.base)` plus the listed seqs are irrelevant.
pub(crate) fn handle_gap(ctx: &DomainContext, writer: GUID, gap_start: SeqNum, gap_list: &SequenceNumberSet) {
    if !in_range(gap_start, writer, "GAP") {
        return;
    }
    if !gap_list.fits_below(SEQ_MAX) {
        log::warn!("[receive] GAP from {:?}: list base {} out of range, dropped", writer, gap_list.base());
        return;
    }
    let Some(pwr) = lookup(ctx, writer, "GAP") else {
        return;
    };
    let mut st = pwr.state.lock();
    if st.deleting || gap_start == 0 {
        return;
    }
    let mut ready = apply_gap(&mut st, gap_start, gap_list.base());
    for s in gap_list.iter() {
        if s >= st.next_deliver {
            st.reorder.entry(s).or_insert(None);
        }
    }
    ready.extend(st.take_in_order());
    log::trace!(
        "[receive] GAP {:?} [{}, {}) +{} next={}",
        writer,
        gap_start,
        gap_list.base(),
        gap_list.num_bits(),
        st.next_deliver
    );
    deliver(ctx, &pwr, &st, &ready);
    finish_tl_catchup(&mut st);
}
