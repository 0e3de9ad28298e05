// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat controller and the per-writer heartbeat event.
//!
//! The event is created on the first reliable match and lives until the
//! writer is garbage collected. When nothing needs announcing it stays
//! parked (`tsched == NEVER`) until a write or a new match pulls it in.

mod control;

pub use control::{heartbeat_range, AckRequired, HbControl, HbView, HeartbeatDecision};

use std::sync::Arc;

use crate::domain::{DomainContext, DomainEvent};
use crate::entity::{Writer, WriterLifecycle, WriterState};
use crate::guid::GUID;
use crate::time::Timestamp;
use crate::transmit::{Destination, Submessage};
use crate::xevent::EventId;

/// Build a HEARTBEAT and account for it. Writer lock held.
pub(crate) fn make_heartbeat(
    wr: &Writer,
    st: &mut WriterState,
    reader: Option<GUID>,
    ack_required: bool,
    now: Timestamp,
) -> Submessage {
    let (first_seq, last_seq) = heartbeat_range(st.whc.state().range, st.seq, st.seq_xmit, wr.qos.is_transient_local());
    st.hbcount = st.hbcount.wrapping_add(1);
    st.hbcontrol.note_hb(now, ack_required);
    if let Some(rd) = reader {
        st.readers.update(&rd, |m| m.t_last_hb_sent = now);
    }
    log::trace!(
        "[heartbeat] writer {:?} -> {:?}: [{}, {}] #{} ack={}",
        wr.guid,
        reader,
        first_seq,
        last_seq,
        st.hbcount,
        ack_required
    );
    Submessage::Heartbeat {
        writer: wr.guid,
        reader,
        first_seq,
        last_seq,
        count: st.hbcount,
        final_flag: !ack_required,
        liveliness: false,
    }
}

/// Make sure the heartbeat event fires no later than `at`.
pub(crate) fn ensure_heartbeat_event(ctx: &DomainContext, wr: &Arc<Writer>, st: &mut WriterState, at: Timestamp) {
    if st.lifecycle == WriterLifecycle::Deleting {
        return;
    }
    match st.heartbeat_event {
        Some(id) => {
            // tsched may already have been pulled in by the controller
            if at < st.hbcontrol.tsched {
                st.hbcontrol.tsched = at;
            }
            ctx.events.reschedule_if_earlier(id, at);
        }
        None => {
            st.hbcontrol.tsched = at;
            st.heartbeat_event = Some(ctx.events.schedule(at, DomainEvent::Heartbeat(Arc::clone(wr))));
        }
    }
}

/// Heartbeat event of `wr`.
pub(crate) fn handle_heartbeat_event(ctx: &DomainContext, wr: &Arc<Writer>, id: EventId) {
    let now = ctx.now();
    let (msg, dst) = {
        let mut st = wr.state.lock();
        if st.heartbeat_event != Some(id) {
            return;
        }
        let view = st.hb_view();
        let d = st.hbcontrol.decide(&view, &ctx.config, now);
        if !d.scheduled {
            st.hbcontrol.tsched = Timestamp::NEVER;
            log::trace!("[heartbeat] writer {:?} idle", wr.guid);
            return;
        }
        if !d.send_now {
            let next = st.hbcontrol.t_of_last_hb + d.interval;
            st.hbcontrol.tsched = next;
            ctx.events.reschedule(id, next);
            return;
        }
        let reader = match d.destination {
            Destination::Unicast(rd) => Some(rd),
            Destination::Multicast => None,
        };
        let msg = make_heartbeat(wr, &mut st, reader, d.ack_required.is_required(), now);
        let next = now + st.hbcontrol.interval(&st.hb_view(), &ctx.config);
        st.hbcontrol.tsched = next;
        ctx.events.reschedule(id, next);
        (msg, d.destination)
    };
    ctx.tx.send(wr.guid, dst, vec![msg]);
}
