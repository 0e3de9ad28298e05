// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alive-state propagation.
//!
//! Every writer-side alive transition bumps the writer's `alive_vclock`.
//! Reader-side records only accept a strictly newer vclock, so concurrent
//! notifications can arrive in any order without an older one overwriting a
//! newer one. The fan-out walks matched readers in GUID order, dropping the
//! writer lock around each reader update, and stops early if the writer's
//! vclock moved meanwhile (the newer transition does its own walk).

mod lease;

pub use lease::{Lease, LeaseHeap};

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::domain::{DomainContext, DomainEvent};
use crate::entity::{ProxyWriter, ProxyWriterState, Reader, Writer, WriterState};
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::match_tree::AliveMatch;
use crate::qos::LivelinessKind;
use crate::rhc::WriterInfo;
use crate::seq::vclock_newer;
use crate::status::{LivelinessLostStatus, LivelinessTransition, StatusEvent};

/// Apply a notification to a reader-side record. Returns the transitions to
/// report, in order; empty if the vclock is not newer.
pub fn apply_alive(rec: &mut AliveMatch, alive: bool, vclock: u32) -> Vec<LivelinessTransition> {
    use LivelinessTransition::{AliveToNotAlive, NotAliveToAlive};
    if !vclock_newer(vclock, rec.alive_vclock) {
        return Vec::new();
    }
    let delta = i32::from(alive) - i32::from(rec.alive);
    rec.alive = alive;
    rec.alive_vclock = vclock;
    match delta {
        -1 => vec![AliveToNotAlive],
        1 => vec![NotAliveToAlive],
        // flapped: report both, ending in the observed state
        _ if alive => vec![AliveToNotAlive, NotAliveToAlive],
        _ => vec![NotAliveToAlive, AliveToNotAlive],
    }
}

/// Update `rd`'s record of writer `writer` and report the result. Called
/// without any writer lock held.
pub(crate) fn reader_update_notify_alive(rd: &Reader, writer: &WriterInfo, local: bool, alive: bool, vclock: u32) {
    let wr = writer.guid;
    let (events, unregister) = {
        let mut st = rd.state.lock();
        let tree = if local { &mut st.local_writers } else { &mut st.writers };
        let Some(transitions) = tree.update(&wr, |m| apply_alive(&mut m.live, alive, vclock)) else {
            return;
        };
        let unregister = transitions == [LivelinessTransition::AliveToNotAlive];
        let events: Vec<StatusEvent> = transitions
            .into_iter()
            .map(|t| {
                st.liveliness.apply(wr, t);
                StatusEvent::LivelinessChanged {
                    status: st.liveliness.clone(),
                    transition: t,
                }
            })
            .collect();
        (events, unregister)
    };
    if unregister {
        rd.rhc.unregister_writer(writer);
    }
    for ev in &events {
        log::debug!("[liveliness] reader {:?}: {:?}", rd.guid, ev);
        rd.listener.notify(rd.guid, ev);
    }
}

/// Walk the local readers of `wr` in GUID order.
fn writer_fan_out(ctx: &DomainContext, wr: &Writer, st: &mut MutexGuard<'_, WriterState>, alive: bool, vclock: u32) {
    let info = WriterInfo::from_qos(wr.guid, &wr.qos);
    let mut cursor = st.local_readers.first().map(|(k, _)| *k);
    while let Some(rd_guid) = cursor {
        if let Some(rd) = ctx.index.reader(&rd_guid) {
            MutexGuard::unlocked(st, || reader_update_notify_alive(&rd, &info, true, alive, vclock));
        }
        if st.alive_vclock != vclock {
            log::trace!("[liveliness] writer {:?} changed again, stopping walk", wr.guid);
            break;
        }
        cursor = st.local_readers.successor(&rd_guid).map(|(k, _)| *k);
    }
}

/// Walk the readers matched with `pwr` in GUID order.
fn proxy_writer_fan_out(
    ctx: &DomainContext,
    pwr: &ProxyWriter,
    st: &mut MutexGuard<'_, ProxyWriterState>,
    alive: bool,
    vclock: u32,
) {
    let info = WriterInfo::from_qos(pwr.guid, &pwr.qos());
    let mut cursor = st.readers.first().map(|(k, _)| *k);
    while let Some(rd_guid) = cursor {
        if let Some(rd) = ctx.index.reader(&rd_guid) {
            MutexGuard::unlocked(st, || reader_update_notify_alive(&rd, &info, false, alive, vclock));
        }
        if st.alive_vclock != vclock {
            break;
        }
        cursor = st.readers.successor(&rd_guid).map(|(k, _)| *k);
    }
}

fn has_participant_lease(wr: &Writer) -> bool {
    wr.qos.liveliness.kind == LivelinessKind::Automatic && !crate::time::is_infinite(wr.qos.liveliness.lease_duration)
}

/// Make a not-alive writer alive again, with its lock held.
pub(crate) fn writer_set_alive_locked(ctx: &DomainContext, wr: &Writer, st: &mut MutexGuard<'_, WriterState>) {
    if st.alive {
        return;
    }
    st.alive = true;
    st.alive_vclock = st.alive_vclock.wrapping_add(1);
    if has_participant_lease(wr) {
        if let Some(pp) = ctx.index.participant(&wr.participant) {
            pp.state.lock().leases.insert(wr.qos.liveliness.lease_duration, wr.guid);
        }
    }
    renew_writer_lease_locked(ctx, st);
    let vclock = st.alive_vclock;
    log::debug!("[liveliness] writer {:?} alive (vclock {})", wr.guid, vclock);
    writer_fan_out(ctx, wr, st, true, vclock);
}

/// Mark a writer not alive. Fails if it already is.
pub(crate) fn writer_set_notalive(ctx: &DomainContext, wr: &Writer, notify: bool) -> Result<()> {
    let mut st = wr.state.lock();
    if !st.alive {
        return Err(Error::PreconditionNotMet("writer is not alive".into()));
    }
    st.alive = false;
    st.alive_vclock = st.alive_vclock.wrapping_add(1);
    if has_participant_lease(wr) {
        if let Some(pp) = ctx.index.participant(&wr.participant) {
            pp.state.lock().leases.remove(wr.qos.liveliness.lease_duration, wr.guid);
        }
    }
    let lost = notify.then(|| {
        st.liveliness_lost.total_count += 1;
        st.liveliness_lost.total_count_change = 1;
        StatusEvent::LivelinessLost(LivelinessLostStatus {
            total_count: st.liveliness_lost.total_count,
            total_count_change: 1,
        })
    });
    let vclock = st.alive_vclock;
    log::debug!("[liveliness] writer {:?} not alive (vclock {})", wr.guid, vclock);
    writer_fan_out(ctx, wr, &mut st, false, vclock);
    drop(st);
    if let Some(ev) = lost {
        wr.listener.notify(wr.guid, &ev);
    }
    Ok(())
}

/// Push a manual lease forward and move its expiry event along.
pub(crate) fn renew_writer_lease_locked(ctx: &DomainContext, st: &mut WriterState) {
    if let Some(lease) = st.lease.as_mut() {
        let expiry = lease.renew(ctx.now());
        if let Some(id) = st.lease_event {
            ctx.events.reschedule(id, expiry);
        }
    }
}

/// Manual liveliness assertion.
pub(crate) fn assert_writer_liveliness(ctx: &DomainContext, wr: &Writer) {
    let mut st = wr.state.lock();
    renew_writer_lease_locked(ctx, &mut st);
    writer_set_alive_locked(ctx, wr, &mut st);
}

/// Lease expiry event of a manual-liveliness writer.
pub(crate) fn handle_writer_lease(ctx: &DomainContext, wr: &Writer) {
    let now = ctx.now();
    {
        let st = wr.state.lock();
        let Some(lease) = st.lease else {
            return;
        };
        if !lease.is_expired(now) {
            if let Some(id) = st.lease_event {
                ctx.events.reschedule(id, lease.expiry());
            }
            return;
        }
        // the event stays parked until the next renewal moves it
        if !st.alive {
            return;
        }
    }
    log::info!("[liveliness] writer {:?} lease expired", wr.guid);
    // a concurrent write may have revived it; that is not an error here
    let _ = writer_set_notalive(ctx, wr, true);
}

/// Mark a proxy writer alive; returns false if it already was.
pub(crate) fn proxy_writer_set_alive_locked(
    ctx: &DomainContext,
    pwr: &ProxyWriter,
    st: &mut MutexGuard<'_, ProxyWriterState>,
) -> bool {
    if st.alive {
        return false;
    }
    st.alive = true;
    st.alive_vclock = st.alive_vclock.wrapping_add(1);
    let vclock = st.alive_vclock;
    log::debug!("[liveliness] proxy writer {:?} alive (vclock {})", pwr.guid, vclock);
    proxy_writer_fan_out(ctx, pwr, st, true, vclock);
    true
}

pub(crate) fn proxy_writer_set_alive(ctx: &DomainContext, pwr: &ProxyWriter) -> Result<()> {
    let mut st = pwr.state.lock();
    if st.deleting {
        return Err(Error::AlreadyDeleted);
    }
    renew_proxy_writer_lease_locked(ctx, &mut st);
    if proxy_writer_set_alive_locked(ctx, pwr, &mut st) {
        Ok(())
    } else {
        Err(Error::PreconditionNotMet("proxy writer is alive".into()))
    }
}

pub(crate) fn proxy_writer_set_notalive(ctx: &DomainContext, pwr: &ProxyWriter) -> Result<()> {
    let mut st = pwr.state.lock();
    if !st.alive {
        return Err(Error::PreconditionNotMet("proxy writer is not alive".into()));
    }
    st.alive = false;
    st.alive_vclock = st.alive_vclock.wrapping_add(1);
    let vclock = st.alive_vclock;
    log::debug!("[liveliness] proxy writer {:?} not alive (vclock {})", pwr.guid, vclock);
    proxy_writer_fan_out(ctx, pwr, &mut st, false, vclock);
    Ok(())
}

pub(crate) fn renew_proxy_writer_lease_locked(ctx: &DomainContext, st: &mut ProxyWriterState) {
    if let Some(lease) = st.lease.as_mut() {
        let expiry = lease.renew(ctx.now());
        if let Some(id) = st.lease_event {
            ctx.events.reschedule(id, expiry);
        }
    }
}

/// Data or a liveliness heartbeat arrived from `pwr`.
pub(crate) fn proxy_writer_seen(ctx: &DomainContext, pwr: &ProxyWriter, st: &mut MutexGuard<'_, ProxyWriterState>) {
    renew_proxy_writer_lease_locked(ctx, st);
    proxy_writer_set_alive_locked(ctx, pwr, st);
}

/// Lease expiry event of a proxy writer.
pub(crate) fn handle_proxy_writer_lease(ctx: &DomainContext, pwr: &Arc<ProxyWriter>) {
    let now = ctx.now();
    {
        let st = pwr.state.lock();
        let Some(lease) = st.lease else {
            return;
        };
        if !lease.is_expired(now) {
            if let Some(id) = st.lease_event {
                ctx.events.reschedule(id, lease.expiry());
            }
            return;
        }
        if !st.alive || st.deleting {
            return;
        }
    }
    log::info!("[liveliness] proxy writer {:?} lease expired", pwr.guid);
    let _ = proxy_writer_set_notalive(ctx, pwr);
}

/// Schedule the lease event of a writer or proxy writer with a finite lease.
pub(crate) fn schedule_lease_event(ctx: &DomainContext, lease: Option<Lease>, guid: GUID, proxy: bool) -> Option<crate::xevent::EventId> {
    let lease = lease?;
    let ev = if proxy {
        DomainEvent::ProxyWriterLease(guid)
    } else {
        DomainEvent::WriterLease(guid)
    };
    Some(ctx.events.schedule(lease.expiry(), ev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use LivelinessTransition::*;

    #[test]
    fn test_apply_alive_deltas() {
        let mut rec = AliveMatch::new(true, 0);
        assert_eq!(apply_alive(&mut rec, false, 1), vec![AliveToNotAlive]);
        assert_eq!(apply_alive(&mut rec, true, 2), vec![NotAliveToAlive]);
        assert_eq!(apply_alive(&mut rec, true, 4), vec![AliveToNotAlive, NotAliveToAlive]);
        assert_eq!(apply_alive(&mut rec, false, 5), vec![AliveToNotAlive]);
        assert_eq!(apply_alive(&mut rec, false, 7), vec![NotAliveToAlive, AliveToNotAlive]);
    }

    #[test]
    fn test_stale_vclock_ignored() {
        let mut rec = AliveMatch::new(true, 5);
        assert!(apply_alive(&mut rec, false, 5).is_empty(), "equal vclock");
        assert!(apply_alive(&mut rec, false, 3).is_empty(), "older vclock");
        assert!(rec.alive);
    }

    #[test]
    fn test_out_of_order_keeps_newest() {
        // v1 < v2 < v3 applied as v3, v1, v2
        let mut rec = AliveMatch::new(true, 0);
        apply_alive(&mut rec, false, 3);
        apply_alive(&mut rec, true, 1);
        apply_alive(&mut rec, true, 2);
        assert!(!rec.alive, "v3 carried not-alive");
        assert_eq!(rec.alive_vclock, 3);
    }

    #[test]
    fn test_vclock_wraparound() {
        let mut rec = AliveMatch::new(true, u32::MAX);
        assert_eq!(apply_alive(&mut rec, false, 0), vec![AliveToNotAlive]);
    }
}
