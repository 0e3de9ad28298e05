// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write path and flow control.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;

use super::{fragment_count, sample_expiry, sample_submessages, Destination, Submessage};
use crate::domain::DomainContext;
use crate::entity::{Writer, WriterLifecycle, WriterState};
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::heartbeat::{ensure_heartbeat_event, make_heartbeat};
use crate::liveliness::{renew_writer_lease_locked, writer_set_alive_locked};
use crate::qos::LivelinessKind;
use crate::rhc::{Sample, WriterInfo};
use crate::seq::SEQ_MAX;
use crate::time::{is_infinite, Timestamp};

/// Minimum time between two high-water mark increases.
const WHC_HIGH_GROWTH_PERIOD: Duration = Duration::from_millis(10);

/// Write one sample: assign a seq, cache it, send it and deliver it to
/// local readers.
pub(crate) fn write(ctx: &DomainContext, wr: &Arc<Writer>, sample: Sample) -> Result<()> {
    let size = sample.size() as u64;
    if size > ctx.config.max_sample_size {
        return Err(Error::BadParameter(format!(
            "sample of {} bytes exceeds the maximum of {}",
            size, ctx.config.max_sample_size
        )));
    }
    let mut st = wr.state.lock();
    if st.lifecycle != WriterLifecycle::Operational {
        return Err(Error::PreconditionNotMet("writer is being deleted".into()));
    }
    if wr.qos.liveliness.kind != LivelinessKind::Automatic {
        renew_writer_lease_locked(ctx, &mut st);
    }
    writer_set_alive_locked(ctx, wr, &mut st);

    if wr.is_reliable() && st.num_reliable_readers() > 0 && st.whc.unacked_bytes() > st.whc_high {
        maybe_grow_whc(ctx, &mut st, ctx.now());
        if st.whc.unacked_bytes() > st.whc_high {
            throttle(ctx, wr, &mut st)?;
        }
    }
    if st.lifecycle != WriterLifecycle::Operational {
        return Err(Error::PreconditionNotMet("writer is being deleted".into()));
    }

    let now = ctx.now();
    st.seq += 1;
    let seq = st.seq;
    let expiry = sample_expiry(&wr.qos, sample.kind, now);
    insert_whc(wr, &mut st, seq, &sample, expiry, now);

    let msgs = if st.readers.is_empty() {
        st.seq_xmit = seq;
        Vec::new()
    } else {
        transmit_locked(ctx, wr, &mut st, seq, &sample, now)
    };
    let rdary = wr.rdary.load_full();
    drop(st);

    if !msgs.is_empty() {
        ctx.tx.send(wr.guid, Destination::Multicast, msgs);
    }
    if rdary.valid && !rdary.readers.is_empty() {
        let mut info = WriterInfo::from_qos(wr.guid, &wr.qos);
        info.lifespan_exp = expiry;
        for rd in &rdary.readers {
            rd.rhc.store(&info, &sample);
        }
    }
    Ok(())
}

fn insert_whc(wr: &Writer, st: &mut WriterState, seq: u64, sample: &Sample, expiry: Timestamp, now: Timestamp) {
    let reliable = wr.is_reliable() && st.num_reliable_readers() > 0;
    if reliable || wr.qos.is_transient_local() {
        st.whc.insert(seq, sample.clone(), expiry);
    } else if !is_infinite(wr.qos.deadline) {
        // instance bookkeeping only
        st.whc.insert(seq, sample.clone(), expiry);
        st.whc.remove(seq);
    }
    let drop_seq = st.max_drop_seq();
    st.whc.remove_acked(drop_seq);
    if !is_infinite(wr.qos.lifespan) {
        st.whc.remove_expired(now);
    }
}

/// Build the initial transmission of `seq`, honoring the initial burst
/// limit, with a piggybacked heartbeat when one is due.
fn transmit_locked(
    ctx: &DomainContext,
    wr: &Arc<Writer>,
    st: &mut MutexGuard<'_, WriterState>,
    seq: u64,
    sample: &Sample,
    now: Timestamp,
) -> Vec<Submessage> {
    let cfg = &ctx.config;
    let frag_size = cfg.fragment_size;
    let nfrags = fragment_count(sample.size(), frag_size);
    let mut msgs = if nfrags <= 1 {
        sample_submessages(wr.guid, None, seq, sample, frag_size, None, true)
    } else {
        let per_burst = (st.init_burst_size_limit / frag_size.max(1)).max(1);
        let last = per_burst.min(nfrags);
        let mut m = sample_submessages(wr.guid, None, seq, sample, frag_size, Some((1, last)), true);
        if last < nfrags {
            st.hbfragcount = st.hbfragcount.wrapping_add(1);
            m.push(Submessage::HeartbeatFrag {
                writer: wr.guid,
                reader: None,
                seq,
                last_frag: nfrags,
                count: st.hbfragcount,
            });
        }
        m
    };
    st.seq_xmit = seq;

    if wr.is_reliable() && st.num_reliable_readers() > 0 {
        let view = st.hb_view();
        let (attach, _) = st.hbcontrol.piggyback(&view, cfg, now, ctx.next_packet_id());
        if let Some(ack) = attach {
            msgs.push(make_heartbeat(wr, st, None, ack.is_required(), now));
        }
        let at = st.hbcontrol.tsched;
        ensure_heartbeat_event(ctx, wr, st, at);
    }
    msgs
}

/// Adaptive high-water mark: grow towards the configured maximum, but
/// never while retransmitting.
fn maybe_grow_whc(ctx: &DomainContext, st: &mut WriterState, now: Timestamp) {
    let cfg = &ctx.config;
    if st.retransmitting || !cfg.whc_adaptive || st.whc_high >= cfg.whc_highwater_mark {
        return;
    }
    if now.saturating_duration_since(st.t_whc_high_upd) < WHC_HIGH_GROWTH_PERIOD {
        return;
    }
    let m = (cfg.whc_highwater_mark - st.whc_high) / 32;
    st.whc_high = if m == 0 { cfg.whc_highwater_mark } else { st.whc_high + m };
    st.t_whc_high_upd = now;
    log::trace!("[throttle] high-water mark raised to {}", st.whc_high);
}

/// Block until enough is acknowledged, the writer leaves `Operational`,
/// or `max_blocking_time` passes.
fn throttle(ctx: &DomainContext, wr: &Arc<Writer>, st: &mut MutexGuard<'_, WriterState>) -> Result<()> {
    let start = ctx.now();
    let deadline = Instant::now().checked_add(wr.qos.max_blocking_time());
    st.throttling += 1;
    st.counters.throttle_count += 1;
    log::debug!(
        "[throttle] writer {:?} blocked: {} unacked > {}",
        wr.guid,
        st.whc.unacked_bytes(),
        st.whc_high
    );

    // readers must ack for the writer to make progress
    let hb = make_heartbeat(wr, st, None, true, start);
    MutexGuard::unlocked(st, || ctx.tx.send(wr.guid, Destination::Multicast, vec![hb]));

    let mut timed_out = false;
    while !st.may_continue() {
        match deadline {
            Some(d) => {
                if wr.throttle_cond.wait_until(st, d).timed_out() {
                    timed_out = !st.may_continue();
                    break;
                }
            }
            None => wr.throttle_cond.wait(st),
        }
    }
    st.throttling -= 1;
    st.counters.time_throttled += ctx.now().saturating_duration_since(start);
    if timed_out {
        log::debug!("[throttle] writer {:?} timed out", wr.guid);
        return Err(Error::Timeout);
    }
    Ok(())
}

/// Wait until `reader` (or every matched reader) acknowledged everything
/// written so far.
pub(crate) fn wait_for_acks(ctx: &DomainContext, wr: &Writer, reader: Option<GUID>, abstimeout: Timestamp) -> Result<()> {
    let deadline = if abstimeout.is_never() {
        None
    } else {
        Instant::now().checked_add(abstimeout.saturating_duration_since(ctx.now()))
    };
    let mut st = wr.state.lock();
    let target = st.seq;
    let acked = |st: &WriterState| match reader {
        None => st.max_drop_seq() >= target,
        Some(rd) => st.readers.get(&rd).map_or(true, |m| m.seq == SEQ_MAX || (m.has_replied_to_hb && m.seq >= target)),
    };
    loop {
        if acked(&st) {
            return Ok(());
        }
        match deadline {
            Some(d) => {
                if wr.throttle_cond.wait_until(&mut st, d).timed_out() {
                    return if acked(&st) { Ok(()) } else { Err(Error::Timeout) };
                }
            }
            None => wr.throttle_cond.wait(&mut st),
        }
    }
}

/// Push a throttled writer out of `Operational` so its producers return.
pub(crate) fn unblock_throttled_writer(wr: &Writer) {
    let mut st = wr.state.lock();
    if st.advance(WriterLifecycle::Interrupt) {
        log::debug!("[throttle] writer {:?} interrupted", wr.guid);
    }
    wr.throttle_cond.notify_all();
}
