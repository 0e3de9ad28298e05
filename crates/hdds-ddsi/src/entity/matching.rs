// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint matching.
//!
//! A pair matches when the topics agree, the QoS is compatible and the
//! security state of the participant pair admits it. Every `connect_*` is
//! idempotent: an existing match record makes it a no-op. Each side is
//! updated under its own lock, one after the other; listeners run after
//! both locks are gone.

use std::sync::Arc;

use super::{Entity, ProxyParticipant, ProxyReader, ProxyWriter, Reader, Writer, WriterLifecycle, WriterState};
use crate::config::{DdsiConfig, RetransmitMerging};
use crate::domain::DomainContext;
use crate::entity::PairAuth;
use crate::guid::GUID;
use crate::match_tree::{
    AliveMatch, CryptoHandle, PrdWrMatch, PwrRdMatch, RdWrMatch, SyncState, WrPrdMatch,
};
use crate::qos::{check_compatible, EndpointQos};
use crate::rhc::WriterInfo;
use crate::security::tokens::{claim_endpoint_tokens, send_endpoint_tokens};
use crate::security::{CryptoTokenKind, PermissionsHandle};
use crate::seq::SequenceNumberSet;
use crate::status::{LivelinessTransition, StatusEvent};
use crate::transmit::{Destination, Submessage};

/// Security verdict for one endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Deny,
    /// Match without endpoint crypto.
    Plain,
    /// Match with endpoint crypto under the pair's participant crypto.
    Protected {
        pair_crypto: CryptoHandle,
        permissions: PermissionsHandle,
    },
}

/// Decide whether a local endpoint may match a remote one.
pub(crate) fn admit(
    ctx: &DomainContext,
    local_pp: GUID,
    local_protected: bool,
    remote_pp: GUID,
    remote_protected: bool,
) -> Admission {
    let Some(pp) = ctx.index.participant(&local_pp) else {
        return Admission::Deny;
    };
    let Some(sec) = pp.security.as_ref() else {
        return if remote_protected {
            Admission::Deny
        } else {
            Admission::Plain
        };
    };
    if local_protected != remote_protected {
        return Admission::Deny;
    }
    let remote_secure = ctx.index.proxy_participant(&remote_pp).is_some_and(|p| p.secure);
    match pp.pair_auth(&remote_pp) {
        Some(PairAuth::Authenticated { crypto, permissions }) if local_protected => Admission::Protected {
            pair_crypto: crypto,
            permissions,
        },
        Some(PairAuth::Authenticated { .. }) => Admission::Plain,
        Some(PairAuth::Unauthenticated) if !local_protected && sec.allow_unauthenticated => Admission::Plain,
        None if !remote_secure && !local_protected && sec.allow_unauthenticated => Admission::Plain,
        _ => Admission::Deny,
    }
}

fn release_crypto(ctx: &DomainContext, handle: Option<CryptoHandle>) {
    if let (Some(h), Some(sec)) = (handle, ctx.security.as_ref()) {
        sec.plugins.cryptography.unregister(h);
    }
}

/// Retransmit and initial burst limits from the smallest receive buffer of
/// the matched proxy readers.
pub(crate) fn recompute_burst_limits(ctx: &DomainContext, st: &mut WriterState) {
    let min_rcvbuf = st
        .readers
        .keys()
        .filter_map(|g| ctx.index.proxy_reader(g))
        .map(|p| p.receive_buffer_size)
        .min()
        .unwrap_or(ctx.config.default_receive_buffer_size);
    let (rexmit, init) = burst_limits(&ctx.config, min_rcvbuf);
    st.rexmit_burst_size_limit = rexmit;
    st.init_burst_size_limit = init;
}

pub(crate) fn burst_limits(cfg: &DdsiConfig, min_rcvbuf: u32) -> (u32, u32) {
    let rexmit = (min_rcvbuf - min_rcvbuf / 3).clamp(1024, cfg.max_rexmit_burst_size.max(1024));
    let extra = u64::from(min_rcvbuf) * u64::from(cfg.init_transmit_extra_pct) / 100;
    let init = extra.saturating_add(u64::from(rexmit)).min(u64::from(u32::MAX)) as u32;
    (rexmit, init.max(rexmit))
}

/// Rebuild the local-reader delivery array. Writer lock held.
pub(crate) fn rebuild_local_readers(ctx: &DomainContext, wr: &Writer, st: &WriterState) {
    let readers: Vec<Arc<Reader>> = st.local_readers.keys().filter_map(|g| ctx.index.reader(g)).collect();
    wr.rdary.store(Arc::new(super::LocalReaders { valid: true, readers }));
}

/// Endpoints pair up only on identical topic and type names.
fn same_topic(wr_topic: &str, wr_type: &str, rd_topic: &str, rd_type: &str) -> bool {
    if wr_topic != rd_topic {
        return false;
    }
    if wr_type != rd_type {
        log::debug!("[match] topic {}: type {} does not match {}", wr_topic, wr_type, rd_type);
        return false;
    }
    true
}

fn compatible(wr_qos: &EndpointQos, rd_qos: &EndpointQos, wr: GUID, rd: GUID) -> bool {
    match check_compatible(wr_qos, rd_qos) {
        Ok(()) => true,
        Err(policy) => {
            log::debug!("[match] {:?} / {:?}: incompatible {:?}", wr, rd, policy);
            false
        }
    }
}

/// Local writer with a proxy reader.
pub(crate) fn connect_writer_with_proxy_reader(ctx: &DomainContext, wr: &Arc<Writer>, prd: &Arc<ProxyReader>) {
    if !same_topic(&wr.topic, &wr.type_name, &prd.topic, &prd.type_name) {
        return;
    }
    let prd_qos = prd.qos();
    if !compatible(&wr.qos, &prd_qos, wr.guid, prd.guid) {
        return;
    }
    let crypto = match admit(ctx, wr.participant, wr.protected, prd.participant, prd.protected) {
        Admission::Deny => {
            log::trace!("[match] writer {:?} / proxy reader {:?}: not admitted", wr.guid, prd.guid);
            return;
        }
        Admission::Plain => None,
        Admission::Protected { pair_crypto, permissions } => {
            let Some(sec) = ctx.security.as_ref() else {
                return;
            };
            if !sec.plugins.access_control.check_remote_datareader(permissions, &prd.topic) {
                log::trace!("[match] proxy reader {:?} denied by access control", prd.guid);
                return;
            }
            match sec
                .plugins
                .cryptography
                .register_matched_remote_datareader(wr.guid, prd.guid, pair_crypto)
            {
                Ok(h) => Some(h),
                Err(e) => {
                    log::warn!("[crypto] registering proxy reader {:?} failed: {}", prd.guid, e);
                    return;
                }
            }
        }
    };

    let event = {
        let mut st = wr.state.lock();
        if st.lifecycle == WriterLifecycle::Deleting {
            drop(st);
            release_crypto(ctx, crypto);
            return;
        }
        let reliable = prd_qos.is_reliable() && wr.is_reliable();
        let mut m = if reliable {
            WrPrdMatch::reliable(st.seq, ctx.config.retransmit_merging == RetransmitMerging::Always)
        } else {
            WrPrdMatch::pretend_acked(st.seq)
        };
        m.crypto = crypto;
        if st.readers.insert(prd.guid, m).is_err() {
            drop(st);
            release_crypto(ctx, crypto);
            return;
        }
        recompute_burst_limits(ctx, &mut st);
        if reliable {
            crate::heartbeat::ensure_heartbeat_event(ctx, wr, &mut st, ctx.now());
        }
        st.counts.publication(prd.guid, true)
    };
    {
        let mut pst = prd.state.lock();
        if pst.writers.insert(wr.guid, PrdWrMatch { crypto }).is_err() {
            log::debug!("[match] proxy reader {:?} already knew writer {:?}", prd.guid, wr.guid);
        }
    }
    log::debug!("[match] writer {:?} -> proxy reader {:?}", wr.guid, prd.guid);
    wr.listener.notify(wr.guid, &event);
    if let Some(h) = crypto {
        send_endpoint_tokens(ctx, CryptoTokenKind::DataWriter, wr.guid, prd.guid, h);
        claim_endpoint_tokens(ctx, prd.guid, wr.guid, h);
    }
}

/// Proxy writer with a local reader.
pub(crate) fn connect_proxy_writer_with_reader(ctx: &DomainContext, pwr: &Arc<ProxyWriter>, rd: &Arc<Reader>) {
    if !same_topic(&pwr.topic, &pwr.type_name, &rd.topic, &rd.type_name) {
        return;
    }
    let pwr_qos = pwr.qos();
    if !compatible(&pwr_qos, &rd.qos, pwr.guid, rd.guid) {
        return;
    }
    let crypto = match admit(ctx, rd.participant, rd.protected, pwr.participant, pwr.protected) {
        Admission::Deny => {
            log::trace!("[match] proxy writer {:?} / reader {:?}: not admitted", pwr.guid, rd.guid);
            return;
        }
        Admission::Plain => None,
        Admission::Protected { pair_crypto, permissions } => {
            let Some(sec) = ctx.security.as_ref() else {
                return;
            };
            if !sec.plugins.access_control.check_remote_datawriter(permissions, &pwr.topic) {
                log::trace!("[match] proxy writer {:?} denied by access control", pwr.guid);
                return;
            }
            match sec
                .plugins
                .cryptography
                .register_matched_remote_datawriter(rd.guid, pwr.guid, pair_crypto)
            {
                Ok(h) => Some(h),
                Err(e) => {
                    log::warn!("[crypto] registering proxy writer {:?} failed: {}", pwr.guid, e);
                    return;
                }
            }
        }
    };

    let reliable = pwr_qos.is_reliable() && rd.is_reliable();
    let (alive, vclock, acknack) = {
        let mut pst = pwr.state.lock();
        if pst.deleting || pst.readers.contains_key(&rd.guid) {
            drop(pst);
            release_crypto(ctx, crypto);
            return;
        }
        // a transient-local reader wants the writer's history; until the
        // first heartbeat its extent is unknown
        let sync = if !(rd.qos.is_transient_local() && pwr_qos.is_transient_local()) {
            SyncState::InSync
        } else if !pst.have_seen_heartbeat {
            SyncState::OutOfSync
        } else if pst.last_seq >= pst.next_deliver {
            SyncState::TlCatchup {
                end_of_tl_seq: pst.last_seq,
            }
        } else {
            SyncState::InSync
        };
        let mut m = PwrRdMatch::new(sync);
        m.crypto = crypto;
        let acknack = reliable.then(|| {
            m.acknack_count += 1;
            Submessage::AckNack {
                reader: rd.guid,
                writer: pwr.guid,
                set: SequenceNumberSet::new(1, 0),
                count: m.acknack_count,
                final_flag: false,
            }
        });
        if pst.readers.insert(rd.guid, m).is_err() {
            drop(pst);
            release_crypto(ctx, crypto);
            return;
        }
        (pst.alive, pst.alive_vclock, acknack)
    };

    let events = {
        let mut rst = rd.state.lock();
        let rec = RdWrMatch {
            live: AliveMatch::new(alive, vclock),
            crypto,
        };
        if rst.deleting || rst.writers.insert(pwr.guid, rec).is_err() {
            Vec::new()
        } else {
            matched_events(&mut rst, pwr.guid, alive)
        }
    };
    log::debug!("[match] proxy writer {:?} -> reader {:?}", pwr.guid, rd.guid);
    for ev in &events {
        rd.listener.notify(rd.guid, ev);
    }
    if let Some(msg) = acknack {
        ctx.tx.send(rd.guid, Destination::Unicast(pwr.guid), vec![msg]);
    }
    if let Some(h) = crypto {
        send_endpoint_tokens(ctx, CryptoTokenKind::DataReader, rd.guid, pwr.guid, h);
        claim_endpoint_tokens(ctx, pwr.guid, rd.guid, h);
    }
}

fn matched_events(rst: &mut super::ReaderState, writer: GUID, alive: bool) -> Vec<StatusEvent> {
    let mut events = Vec::with_capacity(2);
    if alive {
        rst.liveliness.apply(writer, LivelinessTransition::AliveFromNone);
        events.push(StatusEvent::LivelinessChanged {
            status: rst.liveliness.clone(),
            transition: LivelinessTransition::AliveFromNone,
        });
    }
    events.push(rst.counts.subscription(writer, true));
    events
}

/// Local writer with a local reader. Transient-local history is delivered
/// to the reader straight away.
pub(crate) fn connect_writer_with_reader(ctx: &DomainContext, wr: &Arc<Writer>, rd: &Arc<Reader>) {
    if !same_topic(&wr.topic, &wr.type_name, &rd.topic, &rd.type_name)
        || !compatible(&wr.qos, &rd.qos, wr.guid, rd.guid)
    {
        return;
    }
    let (alive, vclock, pub_event, retained) = {
        let mut st = wr.state.lock();
        if st.lifecycle == WriterLifecycle::Deleting {
            return;
        }
        let vclock = st.alive_vclock;
        if st.local_readers.insert(rd.guid, AliveMatch::new(true, vclock)).is_err() {
            return;
        }
        rebuild_local_readers(ctx, wr, &st);
        let retained = if wr.qos.is_transient_local() && rd.qos.is_transient_local() {
            st.whc.retained_samples()
        } else {
            Vec::new()
        };
        let ev = st.counts.publication(rd.guid, true);
        (st.alive, st.alive_vclock, ev, retained)
    };
    let events = {
        let mut rst = rd.state.lock();
        let rec = RdWrMatch {
            live: AliveMatch::new(alive, vclock),
            crypto: None,
        };
        if rst.deleting || rst.local_writers.insert(wr.guid, rec).is_err() {
            Vec::new()
        } else {
            matched_events(&mut rst, wr.guid, alive)
        }
    };
    log::debug!("[match] writer {:?} -> local reader {:?}", wr.guid, rd.guid);
    wr.listener.notify(wr.guid, &pub_event);
    for ev in &events {
        rd.listener.notify(rd.guid, ev);
    }
    if !retained.is_empty() {
        let info = WriterInfo::from_qos(wr.guid, &wr.qos);
        for (_, sample) in &retained {
            rd.rhc.store(&info, sample);
        }
    }
}

/// Writer side of dropping a proxy reader. Returns true when the writer was
/// lingering and has nothing left unacknowledged.
pub(crate) fn writer_drop_proxy_reader(ctx: &DomainContext, wr: &Writer, prd: GUID) -> bool {
    let (m, event, drained) = {
        let mut st = wr.state.lock();
        let Some(m) = st.readers.remove(&prd) else {
            return false;
        };
        recompute_burst_limits(ctx, &mut st);
        let drop_seq = st.max_drop_seq();
        st.whc.remove_acked(drop_seq);
        if st.whc.unacked_bytes() == 0 && st.clear_retransmitting() {
            log::trace!("[throttle] writer {:?} no longer retransmitting", wr.guid);
        }
        wr.throttle_cond.notify_all();
        let drained = st.lifecycle == WriterLifecycle::Lingering && st.whc.unacked_bytes() == 0;
        (m, st.counts.publication(prd, false), drained)
    };
    release_crypto(ctx, m.crypto);
    log::debug!("[match] writer {:?} dropped proxy reader {:?}", wr.guid, prd);
    wr.listener.notify(wr.guid, &event);
    drained
}

/// Reader side of dropping a writer (local or proxy).
pub(crate) fn reader_drop_writer(ctx: &DomainContext, rd: &Reader, info: &WriterInfo, local: bool) {
    let events = {
        let mut rst = rd.state.lock();
        let tree = if local { &mut rst.local_writers } else { &mut rst.writers };
        let Some(m) = tree.remove(&info.guid) else {
            return;
        };
        release_crypto(ctx, m.crypto);
        let t = if m.live.alive {
            LivelinessTransition::AliveToNone
        } else {
            LivelinessTransition::NotAliveToNone
        };
        rst.liveliness.apply(info.guid, t);
        let live = StatusEvent::LivelinessChanged {
            status: rst.liveliness.clone(),
            transition: t,
        };
        [live, rst.counts.subscription(info.guid, false)]
    };
    rd.rhc.unregister_writer(info);
    log::debug!("[match] reader {:?} dropped writer {:?}", rd.guid, info.guid);
    for ev in &events {
        rd.listener.notify(rd.guid, ev);
    }
}

pub(crate) fn proxy_writer_drop_reader(ctx: &DomainContext, pwr: &ProxyWriter, rd: GUID) {
    let m = pwr.state.lock().readers.remove(&rd);
    if let Some(m) = m {
        release_crypto(ctx, m.crypto);
    }
}

pub(crate) fn proxy_reader_drop_writer(prd: &ProxyReader, wr: GUID) {
    prd.state.lock().writers.remove(&wr);
}

pub(crate) fn writer_drop_local_reader(ctx: &DomainContext, wr: &Writer, rd: GUID) {
    let event = {
        let mut st = wr.state.lock();
        if st.local_readers.remove(&rd).is_none() {
            return;
        }
        if st.lifecycle != WriterLifecycle::Deleting {
            rebuild_local_readers(ctx, wr, &st);
        }
        st.counts.publication(rd, false)
    };
    wr.listener.notify(wr.guid, &event);
}

/// Undo a writer / proxy reader match on both sides.
pub(crate) fn unmatch_writer_proxy_reader(ctx: &DomainContext, wr: &Arc<Writer>, prd: &ProxyReader) {
    proxy_reader_drop_writer(prd, wr.guid);
    if writer_drop_proxy_reader(ctx, wr, prd.guid) {
        super::lifecycle::writer_nolinger(ctx, wr);
    }
}

/// Undo a proxy writer / reader match on both sides.
pub(crate) fn unmatch_proxy_writer_reader(ctx: &DomainContext, pwr: &ProxyWriter, rd: &Reader) {
    proxy_writer_drop_reader(ctx, pwr, rd.guid);
    reader_drop_writer(ctx, rd, &WriterInfo::from_qos(pwr.guid, &pwr.qos()), false);
}

pub(crate) fn match_writer_with_proxy_readers(ctx: &DomainContext, wr: &Arc<Writer>) {
    for prd in ctx.index.proxy_readers_on_topic(&wr.topic) {
        connect_writer_with_proxy_reader(ctx, wr, &prd);
    }
}

pub(crate) fn match_reader_with_proxy_writers(ctx: &DomainContext, rd: &Arc<Reader>) {
    for pwr in ctx.index.proxy_writers_on_topic(&rd.topic) {
        connect_proxy_writer_with_reader(ctx, &pwr, rd);
    }
}

pub(crate) fn match_proxy_writer_with_readers(ctx: &DomainContext, pwr: &Arc<ProxyWriter>) {
    for rd in ctx.index.readers_on_topic(&pwr.topic) {
        connect_proxy_writer_with_reader(ctx, pwr, &rd);
    }
}

pub(crate) fn match_proxy_reader_with_writers(ctx: &DomainContext, prd: &Arc<ProxyReader>) {
    for wr in ctx.index.writers_on_topic(&prd.topic) {
        connect_writer_with_proxy_reader(ctx, &wr, prd);
    }
}

pub(crate) fn match_writer_with_local_readers(ctx: &DomainContext, wr: &Arc<Writer>) {
    for rd in ctx.index.readers_on_topic(&wr.topic) {
        connect_writer_with_reader(ctx, wr, &rd);
    }
}

pub(crate) fn match_reader_with_local_writers(ctx: &DomainContext, rd: &Arc<Reader>) {
    for wr in ctx.index.writers_on_topic(&rd.topic) {
        connect_writer_with_reader(ctx, &wr, rd);
    }
}

/// Re-run matching for every endpoint of a proxy participant whose
/// authentication state changed.
pub(crate) fn rematch_proxy_participant(ctx: &DomainContext, proxypp: &ProxyParticipant) {
    for guid in proxypp.endpoints() {
        match ctx.index.get(&guid) {
            Some(Entity::ProxyWriter(pwr)) => match_proxy_writer_with_readers(ctx, &pwr),
            Some(Entity::ProxyReader(prd)) => match_proxy_reader_with_writers(ctx, &prd),
            _ => {}
        }
    }
}

/// New QoS from discovery: drop pairs that became incompatible, then match.
pub(crate) fn update_proxy_writer_qos(ctx: &DomainContext, pwr: &Arc<ProxyWriter>, qos: EndpointQos) {
    pwr.qos.store(Arc::new(qos));
    let qos = pwr.qos();
    let matched: Vec<GUID> = pwr.state.lock().readers.keys().copied().collect();
    for g in matched {
        if let Some(rd) = ctx.index.reader(&g) {
            if check_compatible(&qos, &rd.qos).is_err() {
                unmatch_proxy_writer_reader(ctx, pwr, &rd);
            }
        }
    }
    match_proxy_writer_with_readers(ctx, pwr);
}

pub(crate) fn update_proxy_reader_qos(ctx: &DomainContext, prd: &Arc<ProxyReader>, qos: EndpointQos) {
    prd.qos.store(Arc::new(qos));
    let qos = prd.qos();
    let matched: Vec<GUID> = prd.state.lock().writers.keys().copied().collect();
    for g in matched {
        if let Some(wr) = ctx.index.writer(&g) {
            if check_compatible(&wr.qos, &qos).is_err() {
                unmatch_writer_proxy_reader(ctx, &wr, prd);
            }
        }
    }
    match_proxy_reader_with_writers(ctx, prd);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_limits() {
        let cfg = DdsiConfig::default();
        let (rexmit, init) = burst_limits(&cfg, 128 * 1024);
        assert_eq!(rexmit, 128 * 1024 - 128 * 1024 / 3);
        assert_eq!(init, u32::MAX, "unlimited extra saturates");
        let (rexmit, _) = burst_limits(&cfg, 600);
        assert_eq!(rexmit, 1024, "clamped to the floor");
    }

    #[test]
    fn test_burst_limits_with_extra_pct() {
        let mut cfg = DdsiConfig::default();
        cfg.init_transmit_extra_pct = 50;
        cfg.max_rexmit_burst_size = 4096;
        let (rexmit, init) = burst_limits(&cfg, 30_000);
        assert_eq!(rexmit, 4096);
        assert_eq!(init, 15_000 + 4096);
    }
}
