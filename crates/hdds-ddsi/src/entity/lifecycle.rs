// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity creation, two-phase deletion and garbage collection.
//!
//! ```text
//! create ─▶ index insert ─▶ match local ─▶ match proxies
//!
//! delete_writer ─┬─ nothing unacked ──────────────────────┐
//!                └─ Lingering ── all acked / linger timer ─┤
//!                                                          ▼
//!                               nolinger: Deleting, index remove, GC enqueue
//!                                                          ▼
//!                               GC: drop matches, free WHC, `Deleted`
//! ```
//!
//! `writer_nolinger` runs at most once per writer; whoever gets there
//! second finds the writer already `Deleting` and does nothing.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use super::matching::{
    match_proxy_reader_with_writers, match_proxy_writer_with_readers, match_reader_with_local_writers,
    match_reader_with_proxy_writers, match_writer_with_local_readers, match_writer_with_proxy_readers,
    proxy_reader_drop_writer, proxy_writer_drop_reader, reader_drop_writer, recompute_burst_limits,
    unmatch_proxy_writer_reader, unmatch_writer_proxy_reader, writer_drop_local_reader, writer_drop_proxy_reader,
};
use super::{
    Entity, LocalReaders, Participant, ProxyEndpointInfo, ProxyParticipant, ProxyReader, ProxyWriter, Reader,
    ReaderState, Writer, WriterLifecycle, WriterState,
};
use crate::domain::{DomainContext, DomainEvent};
use crate::error::{Error, Result};
use crate::gc::GcRequest;
use crate::guid::{EntityKind, GUID};
use crate::liveliness::{schedule_lease_event, Lease};
use crate::qos::{EndpointQos, LivelinessKind, Qos};
use crate::rhc::{ReaderHistoryCache, WriterInfo};
use crate::security::{handshake, ParticipantSecurity};
use crate::status::{ListenerSlot, SharedListener, StatusEvent};
use crate::time::is_infinite;

pub(crate) fn create_participant(
    ctx: &DomainContext,
    prefix: [u8; 12],
    security: Option<ParticipantSecurity>,
) -> Result<Arc<Participant>> {
    let guid = GUID::participant(prefix);
    if ctx.index.contains(&guid) {
        return Err(Error::PreconditionNotMet(format!("{:?} already exists", guid)));
    }
    let identity = match &security {
        Some(_) => {
            let sec = ctx
                .security
                .as_ref()
                .ok_or_else(|| Error::PreconditionNotMet("domain has no security plugins".into()))?;
            Some(sec.plugins.authentication.validate_local_identity(guid)?)
        }
        None => None,
    };
    let pp = Arc::new(Participant::new(guid, security, identity, ctx.config.entity_id_limit));
    if !ctx.index.insert(Entity::Participant(Arc::clone(&pp))) {
        return Err(Error::PreconditionNotMet(format!("{:?} already exists", guid)));
    }
    log::debug!("[entity] participant {:?} created (secure={})", guid, pp.is_secure());
    if pp.is_secure() {
        for proxypp in ctx.index.proxy_participants() {
            if proxypp.secure {
                handshake::begin(ctx, &pp, &proxypp);
            }
        }
    }
    Ok(pp)
}

pub(crate) fn delete_participant(ctx: &DomainContext, guid: GUID) -> Result<()> {
    let pp = ctx
        .index
        .participant(&guid)
        .ok_or_else(|| Error::BadParameter(format!("unknown participant {:?}", guid)))?;
    let n = pp.num_endpoints();
    if n > 0 {
        return Err(Error::PreconditionNotMet(format!("participant still owns {} endpoints", n)));
    }
    ctx.index.remove(&guid);
    handshake::forget(ctx, guid);
    log::debug!("[entity] participant {:?} deleted", guid);
    Ok(())
}

fn allocate_guid(pp: &Participant, kind: EntityKind) -> Result<GUID> {
    let eid = pp.state.lock().ids.allocate(kind)?;
    Ok(GUID::new(pp.guid.prefix, eid))
}

fn check_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::BadParameter("empty topic name".into()));
    }
    Ok(())
}

fn has_participant_lease(qos: &EndpointQos) -> bool {
    qos.liveliness.kind == LivelinessKind::Automatic && !is_infinite(qos.liveliness.lease_duration)
}

pub(crate) fn create_writer(
    ctx: &DomainContext,
    participant: GUID,
    topic: &str,
    type_name: &str,
    qos: &Qos,
    listener: Option<SharedListener>,
) -> Result<Arc<Writer>> {
    check_topic(topic)?;
    let pp = ctx
        .index
        .participant(&participant)
        .ok_or_else(|| Error::BadParameter(format!("unknown participant {:?}", participant)))?;
    let qos = qos.merge(&EndpointQos::writer_default());
    let guid = allocate_guid(&pp, EntityKind::WriterWithKey)?;

    // automatic leases live in the participant's heap, manual ones here
    let lease = if qos.liveliness.kind == LivelinessKind::Automatic {
        None
    } else {
        Lease::new(qos.liveliness.lease_duration, ctx.now())
    };
    let mut st = WriterState::new(&qos, &ctx.config, lease);
    recompute_burst_limits(ctx, &mut st);
    let wr = Arc::new(Writer {
        guid,
        participant,
        topic: topic.to_string(),
        type_name: type_name.to_string(),
        protected: pp.protects(topic),
        qos,
        listener: ListenerSlot::new(listener),
        state: Mutex::new(st),
        throttle_cond: Condvar::new(),
        rdary: ArcSwap::from_pointee(LocalReaders {
            valid: true,
            readers: Vec::new(),
        }),
    });
    {
        let mut st = wr.state.lock();
        ctx.index.insert(Entity::Writer(Arc::clone(&wr)));
        st.lease_event = schedule_lease_event(ctx, st.lease, guid, false);
    }
    {
        let mut ps = pp.state.lock();
        ps.endpoints.insert(guid);
        if has_participant_lease(&wr.qos) {
            ps.leases.insert(wr.qos.liveliness.lease_duration, guid);
        }
    }
    log::debug!("[entity] writer {:?} created on topic '{}'", guid, topic);
    match_writer_with_local_readers(ctx, &wr);
    match_writer_with_proxy_readers(ctx, &wr);
    Ok(wr)
}

pub(crate) fn create_reader(
    ctx: &DomainContext,
    participant: GUID,
    topic: &str,
    type_name: &str,
    qos: &Qos,
    rhc: Arc<dyn ReaderHistoryCache>,
    listener: Option<SharedListener>,
) -> Result<Arc<Reader>> {
    check_topic(topic)?;
    let pp = ctx
        .index
        .participant(&participant)
        .ok_or_else(|| Error::BadParameter(format!("unknown participant {:?}", participant)))?;
    let qos = qos.merge(&EndpointQos::reader_default());
    let guid = allocate_guid(&pp, EntityKind::ReaderWithKey)?;
    let rd = Arc::new(Reader {
        guid,
        participant,
        topic: topic.to_string(),
        type_name: type_name.to_string(),
        protected: pp.protects(topic),
        qos,
        rhc,
        listener: ListenerSlot::new(listener),
        state: Mutex::new(ReaderState::default()),
    });
    {
        let _st = rd.state.lock();
        ctx.index.insert(Entity::Reader(Arc::clone(&rd)));
    }
    pp.state.lock().endpoints.insert(guid);
    log::debug!("[entity] reader {:?} created on topic '{}'", guid, topic);
    match_reader_with_local_writers(ctx, &rd);
    match_reader_with_proxy_writers(ctx, &rd);
    Ok(rd)
}

/// Phase 1 of writer deletion.
pub(crate) fn delete_writer(ctx: &DomainContext, wr: &Arc<Writer>) -> Result<()> {
    let mut st = wr.state.lock();
    if st.lifecycle >= WriterLifecycle::Lingering {
        return Err(Error::AlreadyDeleted);
    }
    let unacked = st.whc.unacked_bytes();
    if unacked == 0 {
        drop(st);
        writer_nolinger(ctx, wr);
        return Ok(());
    }
    st.advance(WriterLifecycle::Lingering);
    let at = ctx.now() + ctx.config.writer_linger_duration;
    st.linger_event = Some(ctx.events.schedule(at, DomainEvent::WriterLinger(wr.guid)));
    wr.throttle_cond.notify_all();
    log::debug!("[gc] writer {:?} lingering, {} bytes unacknowledged", wr.guid, unacked);
    Ok(())
}

pub(crate) fn delete_writer_nolinger(ctx: &DomainContext, wr: &Arc<Writer>) -> Result<()> {
    if writer_nolinger(ctx, wr) {
        Ok(())
    } else {
        Err(Error::AlreadyDeleted)
    }
}

/// Phase 2 of writer deletion. Returns false if it already ran.
pub(crate) fn writer_nolinger(ctx: &DomainContext, wr: &Arc<Writer>) -> bool {
    {
        let mut st = wr.state.lock();
        if !st.advance(WriterLifecycle::Deleting) {
            return false;
        }
        for id in [st.linger_event.take(), st.lease_event.take()].into_iter().flatten() {
            ctx.events.cancel(id);
        }
        if st.alive && has_participant_lease(&wr.qos) {
            if let Some(pp) = ctx.index.participant(&wr.participant) {
                pp.state.lock().leases.remove(wr.qos.liveliness.lease_duration, wr.guid);
            }
        }
        st.lease = None;
        wr.throttle_cond.notify_all();
    }
    ctx.index.remove(&wr.guid);
    wr.rdary.store(Arc::new(LocalReaders::default()));
    log::debug!("[gc] writer {:?} deleting", wr.guid);
    ctx.gc.enqueue(GcRequest::Writer(Arc::clone(wr)));
    true
}

/// Linger timer of a writer.
pub(crate) fn handle_writer_linger(ctx: &DomainContext, guid: GUID) {
    let Some(wr) = ctx.index.writer(&guid) else {
        return;
    };
    let lingering = wr.state.lock().lifecycle == WriterLifecycle::Lingering;
    if lingering {
        log::debug!("[gc] writer {:?} linger expired", guid);
        writer_nolinger(ctx, &wr);
    }
}

pub(crate) fn delete_reader(ctx: &DomainContext, rd: &Arc<Reader>) -> Result<()> {
    {
        let mut st = rd.state.lock();
        if st.deleting {
            return Err(Error::AlreadyDeleted);
        }
        st.deleting = true;
    }
    ctx.index.remove(&rd.guid);
    log::debug!("[gc] reader {:?} deleting", rd.guid);
    ctx.gc.enqueue(GcRequest::Reader(Arc::clone(rd)));
    Ok(())
}

pub(crate) fn new_proxy_participant(ctx: &DomainContext, guid: GUID, secure: bool) -> Result<Arc<ProxyParticipant>> {
    let proxypp = Arc::new(ProxyParticipant::new(guid.participant_guid(), secure));
    if !ctx.index.insert(Entity::ProxyParticipant(Arc::clone(&proxypp))) {
        return Err(Error::PreconditionNotMet(format!("{:?} already known", proxypp.guid)));
    }
    log::debug!("[entity] proxy participant {:?} (secure={})", proxypp.guid, secure);
    if secure {
        for pp in ctx.index.participants() {
            if pp.is_secure() {
                handshake::begin(ctx, &pp, &proxypp);
            }
        }
    }
    Ok(proxypp)
}

pub(crate) fn delete_proxy_participant(ctx: &DomainContext, guid: GUID) -> Result<()> {
    let proxypp = ctx
        .index
        .proxy_participant(&guid)
        .ok_or_else(|| Error::BadParameter(format!("unknown proxy participant {:?}", guid)))?;
    {
        let mut st = proxypp.state.lock();
        if st.deleting {
            return Err(Error::AlreadyDeleted);
        }
        st.deleting = true;
    }
    for ep in proxypp.endpoints() {
        let r = if ep.kind().is_writer() {
            delete_proxy_writer(ctx, ep)
        } else {
            delete_proxy_reader(ctx, ep)
        };
        if let Err(e) = r {
            log::debug!("[entity] proxy endpoint {:?}: {}", ep, e);
        }
    }
    handshake::forget(ctx, guid);
    for pp in ctx.index.participants() {
        pp.state.lock().proxypp.remove(&guid);
    }
    ctx.index.remove(&guid);
    ctx.gc.enqueue(GcRequest::ProxyParticipant(proxypp));
    Ok(())
}

fn owning_proxy_participant(ctx: &DomainContext, info: &ProxyEndpointInfo) -> Result<Arc<ProxyParticipant>> {
    let ppguid = info.guid.participant_guid();
    let proxypp = ctx
        .index
        .proxy_participant(&ppguid)
        .ok_or_else(|| Error::PreconditionNotMet(format!("unknown proxy participant {:?}", ppguid)))?;
    if ctx.index.contains(&info.guid) {
        return Err(Error::PreconditionNotMet(format!("{:?} already known", info.guid)));
    }
    Ok(proxypp)
}

pub(crate) fn new_proxy_writer(ctx: &DomainContext, info: &ProxyEndpointInfo) -> Result<Arc<ProxyWriter>> {
    check_topic(&info.topic)?;
    let proxypp = owning_proxy_participant(ctx, info)?;
    let lease = Lease::new(info.qos.liveliness.lease_duration, ctx.now());
    let pwr = Arc::new(ProxyWriter::new(info, lease));
    {
        let mut st = pwr.state.lock();
        if !ctx.index.insert(Entity::ProxyWriter(Arc::clone(&pwr))) {
            return Err(Error::PreconditionNotMet(format!("{:?} already known", info.guid)));
        }
        st.lease_event = schedule_lease_event(ctx, lease, pwr.guid, true);
    }
    proxypp.state.lock().endpoints.insert(pwr.guid);
    log::debug!("[entity] proxy writer {:?} on topic '{}'", pwr.guid, pwr.topic);
    match_proxy_writer_with_readers(ctx, &pwr);
    Ok(pwr)
}

pub(crate) fn new_proxy_reader(ctx: &DomainContext, info: &ProxyEndpointInfo) -> Result<Arc<ProxyReader>> {
    check_topic(&info.topic)?;
    let proxypp = owning_proxy_participant(ctx, info)?;
    let prd = Arc::new(ProxyReader::new(info, ctx.config.default_receive_buffer_size));
    if !ctx.index.insert(Entity::ProxyReader(Arc::clone(&prd))) {
        return Err(Error::PreconditionNotMet(format!("{:?} already known", info.guid)));
    }
    proxypp.state.lock().endpoints.insert(prd.guid);
    log::debug!("[entity] proxy reader {:?} on topic '{}'", prd.guid, prd.topic);
    match_proxy_reader_with_writers(ctx, &prd);
    Ok(prd)
}

fn forget_proxy_endpoint(ctx: &DomainContext, guid: GUID) {
    if let Some(proxypp) = ctx.index.proxy_participant(&guid.participant_guid()) {
        proxypp.state.lock().endpoints.remove(&guid);
    }
    ctx.index.remove(&guid);
}

pub(crate) fn delete_proxy_writer(ctx: &DomainContext, guid: GUID) -> Result<()> {
    let pwr = ctx
        .index
        .proxy_writer(&guid)
        .ok_or_else(|| Error::BadParameter(format!("unknown proxy writer {:?}", guid)))?;
    {
        let mut st = pwr.state.lock();
        st.deleting = true;
        if let Some(id) = st.lease_event.take() {
            ctx.events.cancel(id);
        }
    }
    forget_proxy_endpoint(ctx, guid);
    ctx.gc.enqueue(GcRequest::ProxyWriter(pwr));
    Ok(())
}

pub(crate) fn delete_proxy_reader(ctx: &DomainContext, guid: GUID) -> Result<()> {
    let prd = ctx
        .index
        .proxy_reader(&guid)
        .ok_or_else(|| Error::BadParameter(format!("unknown proxy reader {:?}", guid)))?;
    prd.state.lock().deleting = true;
    forget_proxy_endpoint(ctx, guid);
    ctx.gc.enqueue(GcRequest::ProxyReader(prd));
    Ok(())
}

fn release_endpoint_id(ctx: &DomainContext, participant: GUID, guid: GUID) {
    if let Some(pp) = ctx.index.participant(&participant) {
        let mut ps = pp.state.lock();
        ps.endpoints.remove(&guid);
        ps.ids.release(guid.entity_id);
    }
}

/// Process one GC request. Returns it back if it has to be retried later.
pub(crate) fn gc_process(ctx: &DomainContext, req: GcRequest) -> Option<GcRequest> {
    match req {
        GcRequest::Writer(wr) => {
            let throttling = wr.state.lock().throttling;
            if throttling > 0 {
                wr.throttle_cond.notify_all();
                log::debug!("[gc] writer {:?} still throttling, requeue", wr.guid);
                return Some(GcRequest::Writer(wr));
            }
            gc_delete_writer(ctx, &wr);
        }
        GcRequest::Reader(rd) => gc_delete_reader(ctx, &rd),
        GcRequest::ProxyWriter(pwr) => {
            let readers: Vec<GUID> = pwr.state.lock().readers.keys().copied().collect();
            for g in readers {
                match ctx.index.reader(&g) {
                    Some(rd) => unmatch_proxy_writer_reader(ctx, &pwr, &rd),
                    None => proxy_writer_drop_reader(ctx, &pwr, g),
                }
            }
            log::debug!("[gc] proxy writer {:?} freed", pwr.guid);
        }
        GcRequest::ProxyReader(prd) => {
            let writers: Vec<GUID> = prd.state.lock().writers.keys().copied().collect();
            for g in writers {
                match ctx.index.writer(&g) {
                    Some(wr) => unmatch_writer_proxy_reader(ctx, &wr, &prd),
                    None => proxy_reader_drop_writer(&prd, g),
                }
            }
            log::debug!("[gc] proxy reader {:?} freed", prd.guid);
        }
        GcRequest::ProxyParticipant(proxypp) => {
            log::debug!("[gc] proxy participant {:?} freed", proxypp.guid);
        }
    }
    None
}

fn gc_delete_writer(ctx: &DomainContext, wr: &Arc<Writer>) {
    let (proxies, locals) = {
        let mut st = wr.state.lock();
        if let Some(id) = st.heartbeat_event.take() {
            ctx.events.cancel(id);
        }
        let proxies: Vec<GUID> = st.readers.keys().copied().collect();
        let locals: Vec<GUID> = st.local_readers.keys().copied().collect();
        (proxies, locals)
    };
    for g in proxies {
        if let Some(prd) = ctx.index.proxy_reader(&g) {
            proxy_reader_drop_writer(&prd, wr.guid);
        }
        writer_drop_proxy_reader(ctx, wr, g);
    }
    let info = WriterInfo::from_qos(wr.guid, &wr.qos);
    for g in locals {
        if let Some(rd) = ctx.index.reader(&g) {
            reader_drop_writer(ctx, &rd, &info, true);
        }
        writer_drop_local_reader(ctx, wr, g);
    }
    wr.state.lock().whc.clear();
    release_endpoint_id(ctx, wr.participant, wr.guid);
    log::debug!("[gc] writer {:?} freed", wr.guid);
    wr.listener.notify(wr.guid, &StatusEvent::Deleted);
}

fn gc_delete_reader(ctx: &DomainContext, rd: &Arc<Reader>) {
    let (remote, local) = {
        let mut st = rd.state.lock();
        (st.writers.drain(), st.local_writers.drain())
    };
    for (g, m) in remote {
        if let Some(pwr) = ctx.index.proxy_writer(&g) {
            proxy_writer_drop_reader(ctx, &pwr, rd.guid);
        }
        if let (Some(h), Some(sec)) = (m.crypto, ctx.security.as_ref()) {
            sec.plugins.cryptography.unregister(h);
        }
    }
    for (g, _) in local {
        if let Some(wr) = ctx.index.writer(&g) {
            writer_drop_local_reader(ctx, &wr, rd.guid);
        }
    }
    release_endpoint_id(ctx, rd.participant, rd.guid);
    log::debug!("[gc] reader {:?} freed", rd.guid);
    rd.listener.notify(rd.guid, &StatusEvent::Deleted);
}
