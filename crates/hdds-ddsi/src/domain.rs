// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domain: the context object every operation runs against.
//!
//! A [`Domain`] owns the configuration, clock, entity index, event queue,
//! GC queue, transmitter and (optionally) the security plugins. With
//! background threads enabled, `hdds-xevent` fires timed events and
//! `hdds-gc` frees deleted entities; without them the caller drives both
//! through [`Domain::process_events`] and [`Domain::process_gc`].
//!
//! ```text
//!             ┌──────────── Domain ────────────┐
//! discovery ─▶│ index ◀── matching / lifecycle │──▶ Transmitter
//! receive   ─▶│ events ◀─ heartbeat / lease    │
//!             │ gc     ◀─ delete_*             │
//!             └────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::DdsiConfig;
use crate::entity::{lifecycle, matching, Entity, EntityIndex, ProxyEndpointInfo, Reader, Writer, WriterStats};
use crate::error::{Error, Result};
use crate::gc::GcQueue;
use crate::guid::GUID;
use crate::heartbeat::{self, HeartbeatDecision};
use crate::liveliness;
use crate::qos::{EndpointQos, Qos};
use crate::receive;
use crate::rhc::{ReaderHistoryCache, Sample, SampleKind};
use crate::security::{
    classify_auth, classify_crypto, handshake, tokens, HandshakeListener, HandshakeState, ParticipantGenericMessage,
    ParticipantSecurity, SecurityContext, SecurityPlugins,
};
use crate::seq::{FragmentNumberSet, SeqNum, SequenceNumberSet};
use crate::status::{LivelinessChangedStatus, SharedListener};
use crate::time::{Clock, SystemClock, Timestamp};
use crate::transmit::{ack, write, Destination, FragmentIn, NullTransmitter, Submessage, Transmitter};
use crate::xevent::{EventId, EventQueue};

/// Longest a background thread sleeps before re-checking for shutdown.
const THREAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Back-off of the GC thread after requeueing a request that is not ready.
const GC_REQUEUE_BACKOFF: Duration = Duration::from_millis(1);

/// Timed event kinds.
#[derive(Debug, Clone)]
pub(crate) enum DomainEvent {
    Heartbeat(Arc<Writer>),
    WriterLinger(GUID),
    WriterLease(GUID),
    ProxyWriterLease(GUID),
    Handshake { local: GUID, remote: GUID, generation: u64 },
    HandshakeTimeout { local: GUID, remote: GUID },
    PendingMatchSweep,
}

/// Shared state of one domain.
pub(crate) struct DomainContext {
    pub config: DdsiConfig,
    pub clock: Arc<dyn Clock>,
    pub index: EntityIndex,
    pub events: EventQueue<DomainEvent>,
    pub gc: GcQueue,
    pub tx: Arc<dyn Transmitter>,
    pub security: Option<SecurityContext>,
    packet_id: AtomicU32,
    stop: AtomicBool,
}

impl DomainContext {
    fn new(
        config: DdsiConfig,
        clock: Arc<dyn Clock>,
        tx: Arc<dyn Transmitter>,
        security: Option<SecurityContext>,
    ) -> Self {
        Self {
            config,
            clock,
            index: EntityIndex::new(),
            events: EventQueue::new(),
            gc: GcQueue::new(),
            tx,
            security,
            packet_id: AtomicU32::new(0),
            stop: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn for_tests(config: DdsiConfig) -> Self {
        use crate::time::ManualClock;
        Self::new(
            config,
            Arc::new(ManualClock::new(Timestamp::from_secs(1))),
            Arc::new(NullTransmitter),
            None,
        )
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Identifier of the next outgoing packet, used by heartbeat
    /// piggybacking to tell packets apart.
    pub fn next_packet_id(&self) -> u32 {
        self.packet_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn handle_event(&self, id: EventId, ev: DomainEvent) {
        match ev {
            DomainEvent::Heartbeat(wr) => heartbeat::handle_heartbeat_event(self, &wr, id),
            DomainEvent::WriterLinger(guid) => {
                self.events.cancel(id);
                lifecycle::handle_writer_linger(self, guid);
            }
            DomainEvent::WriterLease(guid) => match self.index.writer(&guid) {
                Some(wr) => liveliness::handle_writer_lease(self, &wr),
                None => {
                    self.events.cancel(id);
                }
            },
            DomainEvent::ProxyWriterLease(guid) => match self.index.proxy_writer(&guid) {
                Some(pwr) => liveliness::handle_proxy_writer_lease(self, &pwr),
                None => {
                    self.events.cancel(id);
                }
            },
            DomainEvent::Handshake {
                local,
                remote,
                generation,
            } => {
                self.events.cancel(id);
                handshake::on_timer(self, local, remote, generation);
            }
            DomainEvent::HandshakeTimeout { local, remote } => {
                self.events.cancel(id);
                handshake::on_timeout(self, local, remote);
            }
            DomainEvent::PendingMatchSweep => tokens::sweep(self),
        }
    }

    /// Fire every event that is due. Returns how many fired.
    fn process_due_events(&self) -> usize {
        let mut n = 0;
        while let Some((id, ev)) = self.events.pop_due(self.now()) {
            log::trace!("[xevent] firing {:?}", id);
            self.handle_event(id, ev);
            n += 1;
        }
        n
    }

    /// One pass over the GC queue; requests that are not ready yet go back
    /// to the end. Returns how many were completed.
    fn process_gc_round(&self) -> usize {
        let mut done = 0;
        for req in self.gc.drain_snapshot() {
            match lifecycle::gc_process(self, req) {
                Some(again) => self.gc.enqueue(again),
                None => done += 1,
            }
        }
        done
    }
}

impl std::fmt::Debug for DomainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainContext")
            .field("entities", &self.index.len())
            .field("events", &self.events.len())
            .field("gc", &self.gc.len())
            .field("security", &self.security)
            .finish()
    }
}

/// Builder for [`Domain`].
pub struct DomainBuilder {
    config: DdsiConfig,
    clock: Option<Arc<dyn Clock>>,
    tx: Option<Arc<dyn Transmitter>>,
    security: Option<SecurityPlugins>,
    handshake_listener: Option<HandshakeListener>,
    threads: bool,
}

impl DomainBuilder {
    fn new() -> Self {
        Self {
            config: DdsiConfig::default(),
            clock: None,
            tx: None,
            security: None,
            handshake_listener: None,
            threads: true,
        }
    }

    pub fn config(mut self, config: DdsiConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source; defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Transport boundary; defaults to dropping everything.
    pub fn transmitter(mut self, tx: Arc<dyn Transmitter>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Enable DDS Security with the given plugins.
    pub fn security(mut self, plugins: SecurityPlugins) -> Self {
        self.security = Some(plugins);
        self
    }

    /// Called once per (local, remote) participant pair when its
    /// handshake ends.
    pub fn handshake_listener(mut self, listener: HandshakeListener) -> Self {
        self.handshake_listener = Some(listener);
        self
    }

    /// Run the timer and GC threads (default `true`).
    pub fn threads(mut self, enabled: bool) -> Self {
        self.threads = enabled;
        self
    }

    pub fn build(self) -> Result<Domain> {
        self.config.validate()?;
        let security = self
            .security
            .map(|plugins| SecurityContext::new(plugins, &self.config, self.handshake_listener));
        let ctx = Arc::new(DomainContext::new(
            self.config,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            self.tx.unwrap_or_else(|| Arc::new(NullTransmitter)),
            security,
        ));
        let threads = if self.threads {
            vec![spawn_xevent(Arc::downgrade(&ctx)), spawn_gc(Arc::downgrade(&ctx))]
        } else {
            Vec::new()
        };
        log::debug!("[entity] domain created (threads={})", !threads.is_empty());
        Ok(Domain { ctx, threads })
    }
}

fn spawn_xevent(ctx: Weak<DomainContext>) -> JoinHandle<()> {
    #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
    let handle = thread::Builder::new()
        .name("hdds-xevent".to_string())
        .spawn(move || loop {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            if ctx.events.is_stopped() {
                return;
            }
            ctx.process_due_events();
            ctx.events.wait(ctx.now(), THREAD_POLL_INTERVAL);
        })
        .expect("Failed to spawn hdds-xevent thread");
    handle
}

fn spawn_gc(ctx: Weak<DomainContext>) -> JoinHandle<()> {
    #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
    let handle = thread::Builder::new()
        .name("hdds-gc".to_string())
        .spawn(move || loop {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            if ctx.stop.load(Ordering::Acquire) {
                return;
            }
            if let Some(req) = ctx.gc.recv_timeout(THREAD_POLL_INTERVAL) {
                if let Some(again) = lifecycle::gc_process(&ctx, req) {
                    ctx.gc.enqueue(again);
                    drop(ctx);
                    thread::sleep(GC_REQUEUE_BACKOFF);
                }
            }
        })
        .expect("Failed to spawn hdds-gc thread");
    handle
}

/// One DDSI domain instance.
///
/// Dropping it stops and joins the background threads. Entities still in
/// the index are released with it.
pub struct Domain {
    ctx: Arc<DomainContext>,
    threads: Vec<JoinHandle<()>>,
}

impl Domain {
    pub fn builder() -> DomainBuilder {
        DomainBuilder::new()
    }

    /// Current time of the domain clock.
    pub fn now(&self) -> Timestamp {
        self.ctx.now()
    }

    pub fn config(&self) -> &DdsiConfig {
        &self.ctx.config
    }

    fn writer(&self, guid: GUID) -> Result<Arc<Writer>> {
        self.ctx
            .index
            .writer(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown writer {:?}", guid)))
    }

    fn reader(&self, guid: GUID) -> Result<Arc<Reader>> {
        self.ctx
            .index
            .reader(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown reader {:?}", guid)))
    }

    /// True while `guid` is in the entity index.
    pub fn contains(&self, guid: GUID) -> bool {
        self.ctx.index.contains(&guid)
    }

    pub fn entity(&self, guid: GUID) -> Option<Entity> {
        self.ctx.index.get(&guid)
    }

    // ---- local entities ----

    pub fn create_participant(&self, prefix: [u8; 12], security: Option<ParticipantSecurity>) -> Result<GUID> {
        lifecycle::create_participant(&self.ctx, prefix, security).map(|pp| pp.guid)
    }

    /// Fails with `PreconditionNotMet` while the participant owns endpoints
    /// (including deleted ones the GC has not freed yet).
    pub fn delete_participant(&self, guid: GUID) -> Result<()> {
        lifecycle::delete_participant(&self.ctx, guid)
    }

    pub fn create_writer(
        &self,
        participant: GUID,
        topic: &str,
        type_name: &str,
        qos: &Qos,
        listener: Option<SharedListener>,
    ) -> Result<GUID> {
        lifecycle::create_writer(&self.ctx, participant, topic, type_name, qos, listener).map(|wr| wr.guid)
    }

    pub fn create_reader(
        &self,
        participant: GUID,
        topic: &str,
        type_name: &str,
        qos: &Qos,
        rhc: Arc<dyn ReaderHistoryCache>,
        listener: Option<SharedListener>,
    ) -> Result<GUID> {
        lifecycle::create_reader(&self.ctx, participant, topic, type_name, qos, rhc, listener).map(|rd| rd.guid)
    }

    /// Delete a writer, lingering until its reliable readers acknowledged
    /// everything (bounded by `writer_linger_duration`).
    pub fn delete_writer(&self, guid: GUID) -> Result<()> {
        let wr = self.writer(guid)?;
        lifecycle::delete_writer(&self.ctx, &wr)
    }

    pub fn delete_writer_nolinger(&self, guid: GUID) -> Result<()> {
        let wr = self.writer(guid)?;
        lifecycle::delete_writer_nolinger(&self.ctx, &wr)
    }

    pub fn delete_reader(&self, guid: GUID) -> Result<()> {
        let rd = self.reader(guid)?;
        lifecycle::delete_reader(&self.ctx, &rd)
    }

    // ---- writing ----

    /// Write `payload` for instance `key`, stamped with the domain clock.
    pub fn write(&self, writer: GUID, key: u64, payload: impl Into<Arc<[u8]>>) -> Result<()> {
        let ts = self.now();
        self.write_with_timestamp(writer, key, payload, ts)
    }

    pub fn write_with_timestamp(
        &self,
        writer: GUID,
        key: u64,
        payload: impl Into<Arc<[u8]>>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.write_sample(writer, Sample::new(key, payload, timestamp))
    }

    /// Write a fully formed sample (any [`SampleKind`]).
    pub fn write_sample(&self, writer: GUID, sample: Sample) -> Result<()> {
        let wr = self.writer(writer)?;
        write::write(&self.ctx, &wr, sample)
    }

    pub fn dispose(&self, writer: GUID, key: u64) -> Result<()> {
        let sample = Sample::new(key, Vec::new(), self.now()).with_kind(SampleKind::Dispose);
        self.write_sample(writer, sample)
    }

    pub fn unregister_instance(&self, writer: GUID, key: u64) -> Result<()> {
        let sample = Sample::new(key, Vec::new(), self.now()).with_kind(SampleKind::Unregister);
        self.write_sample(writer, sample)
    }

    /// Block until `reader` (or all matched readers) acknowledged every
    /// sample written so far, or `abstimeout` passes.
    pub fn wait_for_acks(&self, writer: GUID, reader: Option<GUID>, abstimeout: Timestamp) -> Result<()> {
        let wr = self.writer(writer)?;
        write::wait_for_acks(&self.ctx, &wr, reader, abstimeout)
    }

    pub fn unblock_throttled_writer(&self, writer: GUID) -> Result<()> {
        let wr = self.writer(writer)?;
        write::unblock_throttled_writer(&wr);
        Ok(())
    }

    pub fn assert_writer_liveliness(&self, writer: GUID) -> Result<()> {
        let wr = self.writer(writer)?;
        liveliness::assert_writer_liveliness(&self.ctx, &wr);
        Ok(())
    }

    pub fn writer_set_notalive(&self, writer: GUID, notify: bool) -> Result<()> {
        let wr = self.writer(writer)?;
        liveliness::writer_set_notalive(&self.ctx, &wr, notify)
    }

    // ---- discovery ----

    pub fn new_proxy_participant(&self, guid: GUID, secure: bool) -> Result<()> {
        lifecycle::new_proxy_participant(&self.ctx, guid, secure).map(|_| ())
    }

    pub fn delete_proxy_participant(&self, guid: GUID) -> Result<()> {
        lifecycle::delete_proxy_participant(&self.ctx, guid)
    }

    pub fn new_proxy_writer(&self, info: &ProxyEndpointInfo) -> Result<()> {
        lifecycle::new_proxy_writer(&self.ctx, info).map(|_| ())
    }

    pub fn new_proxy_reader(&self, info: &ProxyEndpointInfo) -> Result<()> {
        lifecycle::new_proxy_reader(&self.ctx, info).map(|_| ())
    }

    pub fn delete_proxy_writer(&self, guid: GUID) -> Result<()> {
        lifecycle::delete_proxy_writer(&self.ctx, guid)
    }

    pub fn delete_proxy_reader(&self, guid: GUID) -> Result<()> {
        lifecycle::delete_proxy_reader(&self.ctx, guid)
    }

    /// Replace a proxy writer's QoS and re-run matching for it.
    pub fn update_proxy_writer_qos(&self, guid: GUID, qos: EndpointQos) -> Result<()> {
        let pwr = self
            .ctx
            .index
            .proxy_writer(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy writer {:?}", guid)))?;
        matching::update_proxy_writer_qos(&self.ctx, &pwr, qos);
        Ok(())
    }

    pub fn update_proxy_reader_qos(&self, guid: GUID, qos: EndpointQos) -> Result<()> {
        let prd = self
            .ctx
            .index
            .proxy_reader(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy reader {:?}", guid)))?;
        matching::update_proxy_reader_qos(&self.ctx, &prd, qos);
        Ok(())
    }

    /// Lease regained.
    pub fn proxy_writer_set_alive(&self, guid: GUID) -> Result<()> {
        let pwr = self
            .ctx
            .index
            .proxy_writer(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy writer {:?}", guid)))?;
        liveliness::proxy_writer_set_alive(&self.ctx, &pwr)
    }

    /// Lease lost.
    pub fn proxy_writer_set_notalive(&self, guid: GUID) -> Result<()> {
        let pwr = self
            .ctx
            .index
            .proxy_writer(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy writer {:?}", guid)))?;
        liveliness::proxy_writer_set_notalive(&self.ctx, &pwr)
    }

    pub fn match_writer_with_proxy_readers(&self, writer: GUID) -> Result<()> {
        let wr = self.writer(writer)?;
        matching::match_writer_with_proxy_readers(&self.ctx, &wr);
        Ok(())
    }

    pub fn match_reader_with_proxy_writers(&self, reader: GUID) -> Result<()> {
        let rd = self.reader(reader)?;
        matching::match_reader_with_proxy_writers(&self.ctx, &rd);
        Ok(())
    }

    pub fn match_proxy_writer_with_readers(&self, guid: GUID) -> Result<()> {
        let pwr = self
            .ctx
            .index
            .proxy_writer(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy writer {:?}", guid)))?;
        matching::match_proxy_writer_with_readers(&self.ctx, &pwr);
        Ok(())
    }

    pub fn match_proxy_reader_with_writers(&self, guid: GUID) -> Result<()> {
        let prd = self
            .ctx
            .index
            .proxy_reader(&guid)
            .ok_or_else(|| Error::BadParameter(format!("unknown proxy reader {:?}", guid)))?;
        matching::match_proxy_reader_with_writers(&self.ctx, &prd);
        Ok(())
    }

    // ---- receive path ----

    pub fn handle_acknack(&self, reader: GUID, writer: GUID, set: &SequenceNumberSet, count: u32, final_flag: bool) {
        ack::handle_acknack(&self.ctx, reader, writer, set, count, final_flag);
    }

    pub fn handle_nackfrag(&self, reader: GUID, writer: GUID, seq: SeqNum, set: &FragmentNumberSet, count: u32) {
        ack::handle_nackfrag(&self.ctx, reader, writer, seq, set, count);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn handle_heartbeat(
        &self,
        writer: GUID,
        reader: Option<GUID>,
        first_seq: SeqNum,
        last_seq: SeqNum,
        count: u32,
        final_flag: bool,
        liveliness: bool,
    ) {
        receive::handle_heartbeat(&self.ctx, writer, reader, first_seq, last_seq, count, final_flag, liveliness);
    }

    pub fn handle_heartbeat_frag(&self, writer: GUID, seq: SeqNum, last_frag: u32, count: u32) {
        receive::handle_heartbeat_frag(&self.ctx, writer, seq, last_frag, count);
    }

    pub fn handle_data(&self, writer: GUID, seq: SeqNum, sample: Sample) {
        receive::handle_data(&self.ctx, writer, seq, sample);
    }

    pub fn handle_data_frag(&self, writer: GUID, frag: FragmentIn<'_>) {
        receive::handle_data_frag(&self.ctx, writer, frag);
    }

    pub fn handle_gap(&self, writer: GUID, gap_start: SeqNum, gap_list: &SequenceNumberSet) {
        receive::handle_gap(&self.ctx, writer, gap_start, gap_list);
    }

    pub fn handle_auth_message(&self, msg: &ParticipantGenericMessage) {
        handshake::handle_auth_message(&self.ctx, msg);
    }

    pub fn handle_crypto_exchange_message(&self, msg: &ParticipantGenericMessage) {
        tokens::handle_crypto_exchange_message(&self.ctx, msg);
    }

    /// Feed a batch of submessages received from `src` into the matching
    /// receive handlers. `dst` is only used for logging.
    pub fn deliver(&self, src: GUID, dst: Destination, msgs: Vec<Submessage>) {
        for msg in msgs {
            log::trace!("[receive] {} from {:?} to {:?}", msg.name(), src, dst);
            match msg {
                Submessage::Data {
                    writer,
                    seq,
                    key,
                    kind,
                    timestamp,
                    payload,
                    ..
                } => self.handle_data(writer, seq, Sample::new(key, payload, timestamp).with_kind(kind)),
                Submessage::DataFrag {
                    writer,
                    seq,
                    frag_start,
                    frag_size,
                    sample_size,
                    key,
                    kind,
                    timestamp,
                    bytes,
                    ..
                } => self.handle_data_frag(
                    writer,
                    FragmentIn {
                        seq,
                        frag_start,
                        frag_size,
                        sample_size,
                        key,
                        kind,
                        timestamp,
                        bytes: &bytes,
                    },
                ),
                Submessage::Heartbeat {
                    writer,
                    reader,
                    first_seq,
                    last_seq,
                    count,
                    final_flag,
                    liveliness,
                } => self.handle_heartbeat(writer, reader, first_seq, last_seq, count, final_flag, liveliness),
                Submessage::HeartbeatFrag {
                    writer,
                    seq,
                    last_frag,
                    count,
                    ..
                } => self.handle_heartbeat_frag(writer, seq, last_frag, count),
                Submessage::Gap {
                    writer,
                    gap_start,
                    gap_list,
                    ..
                } => self.handle_gap(writer, gap_start, &gap_list),
                Submessage::AckNack {
                    reader,
                    writer,
                    set,
                    count,
                    final_flag,
                } => self.handle_acknack(reader, writer, &set, count, final_flag),
                Submessage::NackFrag {
                    reader,
                    writer,
                    seq,
                    set,
                    count,
                } => self.handle_nackfrag(reader, writer, seq, &set, count),
                Submessage::Participant(m) => {
                    if classify_auth(&m).is_some() {
                        self.handle_auth_message(&m);
                    } else if classify_crypto(&m).is_some() {
                        self.handle_crypto_exchange_message(&m);
                    } else {
                        log::warn!("[receive] unrecognized message class {} from {:?}", m.message_class, src);
                    }
                }
            }
        }
    }

    // ---- introspection ----

    pub fn writer_stats(&self, writer: GUID) -> Result<WriterStats> {
        Ok(self.writer(writer)?.stats())
    }

    /// What the heartbeat controller would do right now for `writer`.
    pub fn writer_heartbeat_decision(&self, writer: GUID) -> Result<HeartbeatDecision> {
        let wr = self.writer(writer)?;
        let st = wr.state.lock();
        let view = st.hb_view();
        Ok(st.hbcontrol.decide(&view, &self.ctx.config, self.ctx.now()))
    }

    pub fn reader_liveliness(&self, reader: GUID) -> Result<LivelinessChangedStatus> {
        Ok(self.reader(reader)?.liveliness())
    }

    /// Number of proxy and local writers matched with `reader`.
    pub fn reader_num_writers(&self, reader: GUID) -> Result<usize> {
        Ok(self.reader(reader)?.num_writers())
    }

    /// Handshake state of a (local, remote) participant pair, `None` if no
    /// handshake is registered.
    pub fn handshake_state(&self, local: GUID, remote: GUID) -> Option<HandshakeState> {
        self.ctx.security.as_ref()?.handshakes.state(local, remote)
    }

    /// Absolute time of the earliest pending timed event.
    pub fn next_event(&self) -> Option<Timestamp> {
        self.ctx.events.next_deadline()
    }

    /// Fire every due timed event. Returns how many fired.
    pub fn process_events(&self) -> usize {
        self.ctx.process_due_events()
    }

    /// Run one GC pass. Returns how many requests completed.
    pub fn process_gc(&self) -> usize {
        self.ctx.process_gc_round()
    }

    /// Requests waiting in the GC queue.
    pub fn gc_pending(&self) -> usize {
        self.ctx.gc.len()
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("ctx", &self.ctx)
            .field("threads", &self.threads.len())
            .finish()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        self.ctx.stop.store(true, Ordering::Release);
        self.ctx.events.stop();
        for t in self.threads.drain(..) {
            if t.join().is_err() {
                log::error!("[entity] domain thread panicked");
            }
        }
        log::debug!("[entity] domain dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn domain(clock: Arc<ManualClock>) -> Domain {
        Domain::builder().clock(clock).threads(false).build().expect("domain")
    }

    #[test]
    fn test_packet_ids_are_distinct() {
        let ctx = DomainContext::for_tests(DdsiConfig::default());
        let a = ctx.next_packet_id();
        let b = ctx.next_packet_id();
        assert_ne!(a, b, "consecutive packet ids must differ");
    }

    #[test]
    fn test_unknown_writer_is_bad_parameter() {
        let d = domain(Arc::new(ManualClock::new(Timestamp::from_secs(1))));
        let bogus = GUID::new([9; 12], [0, 0, 1, 0x02]);
        assert!(matches!(d.delete_writer(bogus), Err(Error::BadParameter(_))));
        assert!(matches!(d.write(bogus, 1, vec![1u8]), Err(Error::BadParameter(_))));
    }

    #[test]
    fn test_delete_writer_without_readers_skips_linger() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
        let d = domain(Arc::clone(&clock));
        let pp = d.create_participant([1; 12], None).expect("participant");
        let wr = d
            .create_writer(pp, "T", "Ty", &Qos::new().reliable(Duration::from_millis(100)), None)
            .expect("writer");
        d.delete_writer(wr).expect("delete");
        assert!(!d.contains(wr), "writer without readers goes away immediately");
        assert_eq!(d.process_gc(), 1, "one GC request processed");
        d.delete_participant(pp).expect("participant is empty after GC");
        clock.advance(Duration::from_secs(2));
        assert_eq!(d.process_events(), 0, "no linger timer was armed");
    }

    #[test]
    fn test_gc_requeues_writer_with_blocked_producer() {
        let d = domain(Arc::new(ManualClock::new(Timestamp::from_secs(1))));
        let pp = d.create_participant([3; 12], None).expect("participant");
        let guid = d
            .create_writer(pp, "T", "Ty", &Qos::new().reliable(Duration::from_millis(100)), None)
            .expect("writer");
        let wr = d.writer(guid).expect("writer");
        wr.state.lock().throttling = 1;

        d.delete_writer(guid).expect("delete");
        assert_eq!(d.process_gc(), 0, "producer still inside write");
        assert_eq!(d.gc_pending(), 1, "requeued");
        assert!(d.delete_participant(pp).is_err(), "writer not torn down yet");

        wr.state.lock().throttling = 0;
        assert_eq!(d.process_gc(), 1);
        assert_eq!(d.gc_pending(), 0);
        d.delete_participant(pp).expect("participant is empty after GC");
    }

    #[test]
    fn test_threads_start_and_stop() {
        let d = Domain::builder().build().expect("domain");
        let pp = d.create_participant([2; 12], None).expect("participant");
        assert!(d.contains(pp));
        drop(d);
    }
}
