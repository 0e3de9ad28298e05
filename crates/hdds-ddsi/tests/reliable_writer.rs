// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! Reliable writer against proxy readers: acknowledgements, retransmits,
//! heartbeat addressing and lingering deletion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_ddsi::{
    DdsiConfig, Destination, Domain, EndpointQos, Error, ManualClock, ProxyEndpointInfo, Qos, RecordingTransmitter,
    SequenceNumberSet, Submessage, Timestamp, WriterLifecycle, GUID,
};

const REMOTE: [u8; 12] = [0xaa; 12];

struct Fixture {
    domain: Domain,
    clock: Arc<ManualClock>,
    tx: Arc<RecordingTransmitter>,
    writer: GUID,
}

fn proxy_reader_guid(n: u8) -> GUID {
    GUID::new(REMOTE, [0, 0, n, 0x07])
}

fn fixture(config: DdsiConfig) -> Fixture {
    fixture_with(config, Duration::from_millis(100))
}

fn fixture_with(config: DdsiConfig, max_blocking_time: Duration) -> Fixture {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
    let tx = RecordingTransmitter::new();
    let domain = Domain::builder()
        .config(config)
        .clock(clock.clone())
        .transmitter(tx.clone())
        .threads(false)
        .build()
        .expect("domain");
    let pp = domain.create_participant([1; 12], None).expect("participant");
    let qos = Qos::new().reliable(max_blocking_time).keep_all();
    let writer = domain.create_writer(pp, "telemetry", "Frame", &qos, None).expect("writer");
    domain.new_proxy_participant(GUID::participant(REMOTE), false).expect("proxy participant");
    Fixture {
        domain,
        clock,
        tx,
        writer,
    }
}

fn add_proxy_reader(f: &Fixture, n: u8, reliable: bool) -> GUID {
    let guid = proxy_reader_guid(n);
    let mut qos = EndpointQos::reader_default();
    if reliable {
        qos = Qos::new().reliable(Duration::from_millis(100)).merge(&qos);
    }
    f.domain
        .new_proxy_reader(&ProxyEndpointInfo::new(guid, "telemetry", "Frame", qos))
        .expect("proxy reader");
    guid
}

fn ack(base: u64) -> SequenceNumberSet {
    SequenceNumberSet::new(base, 0)
}

#[test]
fn test_slowest_reader_bounds_history_and_gets_heartbeat() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    let r2 = add_proxy_reader(&f, 2, true);

    for i in 0..5u8 {
        f.domain.write(f.writer, u64::from(i), vec![i; 16]).expect("write");
    }
    assert_eq!(f.tx.count("DATA"), 5, "each sample sent once");

    f.domain.handle_acknack(r1, f.writer, &ack(6), 1, true);
    f.domain.handle_acknack(r2, f.writer, &ack(4), 1, true);

    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.max_drop_seq, 3);
    assert_eq!(stats.whc_range, Some((4, 5)), "acknowledged by all readers is dropped");
    assert_eq!(stats.num_reliable_readers, 2);

    let decision = f.domain.writer_heartbeat_decision(f.writer).expect("decision");
    assert_eq!(decision.destination, Destination::Unicast(r2), "only the lagging reader is addressed");

    f.domain.handle_acknack(r2, f.writer, &ack(6), 2, true);
    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.max_drop_seq, 5);
    assert_eq!(stats.unacked_bytes, 0);
    assert_eq!(stats.whc_len, 0);
}

#[test]
fn test_nack_triggers_retransmit() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    for i in 1..=3u8 {
        f.domain.write(f.writer, 1, vec![i; 8]).expect("write");
    }
    f.tx.take();

    let nack = SequenceNumberSet::from_numbers(2, &[2]).expect("set");
    f.domain.handle_acknack(r1, f.writer, &nack, 1, false);

    let sent = f.tx.take();
    let resent: Vec<u64> = sent
        .iter()
        .filter_map(|s| match &s.msg {
            Submessage::Data { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(resent, vec![2], "exactly the requested sample");
    assert!(
        sent.iter().any(|s| s.msg.name() == "HEARTBEAT" && s.dst == Destination::Unicast(r1)),
        "retransmit is followed by a heartbeat"
    );
    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.rexmit_count, 1);
}

#[test]
fn test_duplicate_acknack_count_is_ignored() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    f.domain.write(f.writer, 1, vec![1u8; 8]).expect("write");
    f.domain.write(f.writer, 1, vec![2u8; 8]).expect("write");
    f.tx.take();

    let nack = SequenceNumberSet::from_numbers(1, &[1]).expect("set");
    f.domain.handle_acknack(r1, f.writer, &nack, 7, false);
    let first = f.tx.count("DATA");
    f.domain.handle_acknack(r1, f.writer, &nack, 7, false);
    assert_eq!(f.tx.count("DATA"), first, "same count, no second retransmit");
}

#[test]
fn test_best_effort_reader_does_not_hold_history() {
    let f = fixture(DdsiConfig::default());
    add_proxy_reader(&f, 1, false);
    f.domain.write(f.writer, 1, vec![0u8; 32]).expect("write");

    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.num_reliable_readers, 0);
    assert_eq!(stats.whc_len, 0, "nothing kept for best-effort readers");
    assert_eq!(f.tx.count("DATA"), 1);
}

#[test]
fn test_preemptive_acknack_on_fresh_match() {
    let f = fixture(DdsiConfig::default());
    f.domain.write(f.writer, 1, vec![1u8; 8]).expect("write");
    let r1 = add_proxy_reader(&f, 1, true);
    f.tx.take();

    // base 1, no bits: the reader has nothing yet
    f.domain.handle_acknack(r1, f.writer, &ack(1), 1, false);
    let sent = f.tx.take();
    assert!(
        sent.iter()
            .any(|s| matches!(s.msg, Submessage::Heartbeat { reader: Some(r), .. } if r == r1)),
        "pre-emptive ACKNACK answered with a directed heartbeat"
    );
}

#[test]
fn test_lingering_writer_completes_on_ack() {
    let config = DdsiConfig::builder()
        .writer_linger_duration(Duration::from_secs(2))
        .build()
        .expect("config");
    let f = fixture(config);
    let r1 = add_proxy_reader(&f, 1, true);
    f.domain.write(f.writer, 1, vec![0u8; 100]).expect("write");

    f.domain.delete_writer(f.writer).expect("delete");
    let stats = f.domain.writer_stats(f.writer).expect("still indexed while lingering");
    assert_eq!(stats.state, WriterLifecycle::Lingering);
    assert!(f.domain.write(f.writer, 1, vec![1u8]).is_err(), "no writes while lingering");

    f.clock.advance(Duration::from_millis(500));
    f.domain.handle_acknack(r1, f.writer, &ack(2), 1, true);
    assert!(!f.domain.contains(f.writer), "fully acknowledged writer leaves the index");
    assert_eq!(f.domain.gc_pending(), 1);

    f.tx.take();
    f.domain.handle_acknack(r1, f.writer, &ack(2), 2, true);
    assert!(f.tx.is_empty(), "ACKNACK to a deleted writer is ignored");

    f.clock.advance(Duration::from_secs(2));
    f.domain.process_events();
    assert_eq!(f.tx.count("DATA"), 0);
    assert_eq!(f.domain.process_gc(), 1, "writer freed");
    assert_eq!(f.domain.gc_pending(), 0);
}

#[test]
fn test_linger_timeout_forces_deletion() {
    let config = DdsiConfig::builder()
        .writer_linger_duration(Duration::from_secs(2))
        .build()
        .expect("config");
    let f = fixture(config);
    add_proxy_reader(&f, 1, true);
    f.domain.write(f.writer, 1, vec![0u8; 100]).expect("write");
    f.domain.delete_writer(f.writer).expect("delete");

    f.clock.advance(Duration::from_secs(1));
    f.domain.process_events();
    assert!(f.domain.contains(f.writer), "still lingering before the deadline");

    f.clock.advance(Duration::from_secs(1));
    f.domain.process_events();
    assert!(!f.domain.contains(f.writer), "linger deadline reached");
}

#[test]
fn test_proxy_reader_delete_releases_history() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    f.domain.write(f.writer, 1, vec![0u8; 64]).expect("write");
    assert_eq!(f.domain.writer_stats(f.writer).expect("stats").whc_len, 1);

    f.domain.delete_proxy_reader(r1).expect("delete proxy reader");
    f.domain.process_gc();
    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.num_readers, 0);
    assert_eq!(stats.unacked_bytes, 0, "no reader left to wait for");
}

/// Small, fixed history limits so a handful of 1 KiB samples fill it.
fn tight_history() -> DdsiConfig {
    DdsiConfig::builder()
        .whc_marks(512, 4096, 4096)
        .whc_adaptive(false)
        .build()
        .expect("config")
}

#[test]
fn test_full_history_write_times_out() {
    let f = fixture_with(tight_history(), Duration::from_millis(30));
    let r1 = add_proxy_reader(&f, 1, true);

    let mut written = 0u64;
    let (err, blocked_for) = loop {
        let started = Instant::now();
        match f.domain.write(f.writer, 1, vec![0u8; 1024]) {
            Ok(()) => written += 1,
            Err(e) => break (e, started.elapsed()),
        }
        assert!(written < 16, "history never filled up");
    };
    assert!(matches!(err, Error::Timeout), "got {:?}", err);
    assert!(blocked_for >= Duration::from_millis(30), "blocked for {:?}", blocked_for);
    assert!(written >= 4);

    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.throttle_count, 1);
    assert_eq!(stats.seq, written, "the timed-out sample got no sequence number");
    assert!(
        f.tx.take()
            .iter()
            .any(|s| matches!(s.msg, Submessage::Heartbeat { final_flag: false, .. })),
        "blocked writer asks for acknowledgements"
    );

    f.domain.handle_acknack(r1, f.writer, &ack(written + 1), 1, true);
    f.domain.write(f.writer, 1, vec![0u8; 1024]).expect("room again after the ack");
}

#[test]
fn test_unblock_releases_blocked_producer() {
    let f = fixture_with(tight_history(), Duration::from_secs(30));
    add_proxy_reader(&f, 1, true);

    std::thread::scope(|s| {
        let producer = s.spawn(|| (0..64).find_map(|_| f.domain.write(f.writer, 1, vec![0u8; 1024]).err()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.domain.writer_stats(f.writer).expect("stats").throttle_count == 0 {
            assert!(Instant::now() < deadline, "producer never blocked");
            std::thread::sleep(Duration::from_millis(1));
        }
        f.domain.unblock_throttled_writer(f.writer).expect("unblock");

        let err = producer.join().expect("producer thread");
        assert!(matches!(err, Some(Error::PreconditionNotMet(_))), "got {:?}", err);
    });
    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.state, WriterLifecycle::Interrupt);
    assert!(f.domain.write(f.writer, 1, vec![0u8; 8]).is_err(), "interrupted writer refuses writes");
}

#[test]
fn test_idle_writer_heartbeats_new_reader() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    f.tx.take();

    let decision = f.domain.writer_heartbeat_decision(f.writer).expect("decision");
    assert!(decision.scheduled, "reader has not replied yet, nothing written");

    f.clock.advance(Duration::from_secs(1));
    f.domain.process_events();
    let hb = f
        .tx
        .take()
        .into_iter()
        .find_map(|s| match s.msg {
            Submessage::Heartbeat { first_seq, last_seq, .. } => Some((first_seq, last_seq)),
            _ => None,
        })
        .expect("heartbeat without data");
    assert_eq!(hb, (1, 0), "empty range");

    f.domain.handle_acknack(r1, f.writer, &ack(1), 1, true);
    let decision = f.domain.writer_heartbeat_decision(f.writer).expect("decision");
    assert!(!decision.scheduled, "reader replied and there is nothing to send");
}

#[test]
fn test_proxy_reader_of_other_type_is_ignored() {
    let f = fixture(DdsiConfig::default());
    let guid = proxy_reader_guid(9);
    let qos = Qos::new()
        .reliable(Duration::from_millis(100))
        .merge(&EndpointQos::reader_default());
    f.domain
        .new_proxy_reader(&ProxyEndpointInfo::new(guid, "telemetry", "OtherFrame", qos))
        .expect("proxy reader");
    assert_eq!(f.domain.writer_stats(f.writer).expect("stats").num_readers, 0);
}

#[test]
fn test_acknack_beyond_sequence_range_is_dropped() {
    let f = fixture(DdsiConfig::default());
    let r1 = add_proxy_reader(&f, 1, true);
    f.domain.write(f.writer, 1, vec![0u8; 32]).expect("write");

    f.domain.handle_acknack(r1, f.writer, &SequenceNumberSet::new(u64::MAX, 0), 1, true);
    f.domain
        .handle_nackfrag(r1, f.writer, u64::MAX, &SequenceNumberSet::new(1, 1), 2);
    let stats = f.domain.writer_stats(f.writer).expect("stats");
    assert_eq!(stats.whc_len, 1, "nothing acknowledged");
    assert_eq!(stats.max_drop_seq, 0);

    f.domain.handle_acknack(r1, f.writer, &ack(2), 3, true);
    assert_eq!(f.domain.writer_stats(f.writer).expect("stats").whc_len, 0);
}
