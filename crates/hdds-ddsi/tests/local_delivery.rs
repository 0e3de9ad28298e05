// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! Intra-process delivery between writers and readers of one domain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use hdds_ddsi::status::LivelinessTransition;
use hdds_ddsi::{
    listener, Clock, Domain, EndpointQos, InstanceState, KeyedHistory, LivelinessKind, ManualClock, Qos,
    RecordingTransmitter, StatusEvent, Timestamp, GUID,
};
use parking_lot::Mutex;

fn domain() -> (Domain, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
    let domain = Domain::builder()
        .clock(clock.clone())
        .transmitter(RecordingTransmitter::new())
        .threads(false)
        .build()
        .expect("domain");
    (domain, clock)
}

fn reader_history(qos: &Qos) -> Arc<KeyedHistory> {
    KeyedHistory::shared(&qos.merge(&EndpointQos::reader_default()))
}

#[test]
fn test_reliable_keep_all_local_roundtrip() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([1; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let wr = domain.create_writer(pp, "sensors", "Reading", &qos, None).expect("writer");
    let rhc = reader_history(&qos);
    let rd = domain
        .create_reader(pp, "sensors", "Reading", &qos, rhc.clone(), None)
        .expect("reader");
    assert_eq!(domain.reader_num_writers(rd).expect("reader"), 1, "local writer matched");

    domain.write(wr, 1, vec![1u8, 0, 0]).expect("write");

    let got = rhc.take();
    assert_eq!(got.len(), 1, "exactly one sample delivered");
    assert_eq!(got[0].key, 1);
    assert_eq!(got[0].payload.as_ref(), &[1u8, 0, 0]);
    assert!(got[0].valid_data);
    assert_eq!(got[0].writer, wr);
}

#[test]
fn test_by_source_timestamp_tie_goes_to_lower_guid() {
    let (domain, clock) = domain();
    let pp = domain.create_participant([2; 12], None).expect("participant");
    let qos = Qos::new()
        .reliable(Duration::from_millis(100))
        .keep_last(1)
        .by_source_timestamp();
    let a = domain.create_writer(pp, "ordered", "T", &qos, None).expect("writer a");
    let b = domain.create_writer(pp, "ordered", "T", &qos, None).expect("writer b");
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let rhc = reader_history(&qos);
    domain
        .create_reader(pp, "ordered", "T", &qos, rhc.clone(), None)
        .expect("reader");

    let ts = clock.advance(Duration::from_millis(10));
    domain.write_with_timestamp(high, 1, vec![1u8, 2, 0], ts).expect("write high");
    domain.write_with_timestamp(low, 1, vec![1u8, 1, 0], ts).expect("write low");
    // same timestamp from the higher GUID no longer wins
    domain.write_with_timestamp(high, 1, vec![1u8, 2, 1], ts).expect("write high again");

    let got = rhc.take();
    let last = got.last().expect("instance has a sample");
    assert_eq!(got.len(), 1, "keep-last(1) holds one sample");
    assert_eq!(last.payload.as_ref(), &[1u8, 1, 0]);
    assert_eq!(last.writer, low);
}

#[test]
fn test_older_source_timestamp_is_dropped() {
    let (domain, clock) = domain();
    let pp = domain.create_participant([3; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all().by_source_timestamp();
    let wr = domain.create_writer(pp, "ordered", "T", &qos, None).expect("writer");
    let rhc = reader_history(&qos);
    domain.create_reader(pp, "ordered", "T", &qos, rhc.clone(), None).expect("reader");

    let early = clock.now();
    let late = clock.advance(Duration::from_secs(1));
    domain.write_with_timestamp(wr, 5, vec![2u8], late).expect("write late");
    domain.write_with_timestamp(wr, 5, vec![1u8], early).expect("write early");

    let got = rhc.take();
    assert_eq!(got.len(), 1, "stale update rejected");
    assert_eq!(got[0].payload.as_ref(), &[2u8]);
}

#[test]
fn test_transient_local_history_reaches_late_reader() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([4; 12], None).expect("participant");
    let qos = Qos::new()
        .reliable(Duration::from_millis(100))
        .transient_local()
        .keep_all();
    let wr = domain.create_writer(pp, "state", "T", &qos, None).expect("writer");
    for key in 1..=3u64 {
        domain.write(wr, key, vec![key as u8]).expect("write");
    }

    let rhc = reader_history(&qos);
    domain.create_reader(pp, "state", "T", &qos, rhc.clone(), None).expect("reader");

    let keys: Vec<u64> = rhc.take().iter().map(|s| s.key).collect();
    assert_eq!(keys, vec![1, 2, 3], "retained samples delivered on match");
}

#[test]
fn test_volatile_reader_sees_only_new_data() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([5; 12], None).expect("participant");
    let wqos = Qos::new().reliable(Duration::from_millis(100)).transient_local().keep_all();
    let rqos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let wr = domain.create_writer(pp, "state", "T", &wqos, None).expect("writer");
    domain.write(wr, 1, vec![1u8]).expect("write");

    let rhc = reader_history(&rqos);
    domain.create_reader(pp, "state", "T", &rqos, rhc.clone(), None).expect("reader");
    assert!(rhc.is_empty(), "volatile reader gets no history");

    domain.write(wr, 2, vec![2u8]).expect("write");
    assert_eq!(rhc.take().len(), 1);
}

#[test]
fn test_incompatible_reliability_does_not_match() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([6; 12], None).expect("participant");
    let wqos = Qos::new().best_effort();
    let rqos = Qos::new().reliable(Duration::from_millis(100));
    let wr = domain.create_writer(pp, "topic", "T", &wqos, None).expect("writer");
    let rhc = reader_history(&rqos);
    let rd = domain.create_reader(pp, "topic", "T", &rqos, rhc.clone(), None).expect("reader");

    assert_eq!(domain.reader_num_writers(rd).expect("reader"), 0);
    domain.write(wr, 1, vec![0u8]).expect("write");
    assert!(rhc.is_empty(), "unmatched reader receives nothing");
}

#[test]
fn test_different_type_does_not_match() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([7; 12], None).expect("participant");
    let qos = Qos::new();
    domain.create_writer(pp, "topic", "A", &qos, None).expect("writer");
    let rhc = reader_history(&qos);
    let rd = domain.create_reader(pp, "topic", "B", &qos, rhc, None).expect("reader");
    assert_eq!(domain.reader_num_writers(rd).expect("reader"), 0);
}

#[test]
fn test_dispose_updates_instance_state() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([8; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let wr = domain.create_writer(pp, "lifecycle", "T", &qos, None).expect("writer");
    let rhc = reader_history(&qos);
    domain.create_reader(pp, "lifecycle", "T", &qos, rhc.clone(), None).expect("reader");

    domain.write(wr, 9, vec![1u8]).expect("write");
    assert_eq!(rhc.instance_state(9), Some(InstanceState::Alive));

    domain.dispose(wr, 9).expect("dispose");
    assert_eq!(rhc.instance_state(9), Some(InstanceState::NotAliveDisposed));

    let got = rhc.take();
    assert_eq!(got.len(), 2);
    assert!(got[0].valid_data);
    assert!(!got[1].valid_data, "dispose carries no data");
}

#[test]
fn test_deleted_reader_stops_receiving() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([9; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let wr = domain.create_writer(pp, "topic", "T", &qos, None).expect("writer");
    let rhc = reader_history(&qos);
    let rd = domain.create_reader(pp, "topic", "T", &qos, rhc.clone(), None).expect("reader");

    domain.delete_reader(rd).expect("delete reader");
    assert_eq!(domain.process_gc(), 1, "reader freed");
    domain.write(wr, 1, vec![1u8]).expect("write");
    assert!(rhc.is_empty());
    assert!(domain.delete_reader(rd).is_err(), "second delete fails");
}

type Transitions = Arc<Mutex<Vec<(GUID, LivelinessTransition)>>>;

fn record_transitions(log: &Transitions) -> hdds_ddsi::SharedListener {
    let log = Arc::clone(log);
    listener(move |rd, ev| {
        if let StatusEvent::LivelinessChanged { transition, .. } = ev {
            log.lock().push((rd, *transition));
        }
    })
}

#[test]
fn test_not_alive_writer_reaches_local_readers() {
    let (domain, _clock) = domain();
    let pp = domain.create_participant([10; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let wr = domain.create_writer(pp, "beat", "Pulse", &qos, None).expect("writer");
    let log: Transitions = Arc::default();
    let rhc = reader_history(&qos);
    let r1 = domain
        .create_reader(pp, "beat", "Pulse", &qos, rhc.clone(), Some(record_transitions(&log)))
        .expect("reader 1");
    let r2 = domain
        .create_reader(pp, "beat", "Pulse", &qos, reader_history(&qos), Some(record_transitions(&log)))
        .expect("reader 2");
    log.lock().clear();

    domain.writer_set_notalive(wr, false).expect("not alive");
    assert!(domain.writer_set_notalive(wr, false).is_err(), "already not alive");
    for rd in [r1, r2] {
        let status = domain.reader_liveliness(rd).expect("reader");
        assert_eq!((status.alive_count, status.not_alive_count), (0, 1), "reader {:?}", rd);
    }
    let stats = domain.writer_stats(wr).expect("stats");
    assert!(!stats.alive);
    assert_eq!(stats.liveliness_lost, 0, "no notification requested");
    let seen = log.lock().clone();
    assert_eq!(seen.len(), 2, "one notification per reader");
    for rd in [r1, r2] {
        assert!(seen.contains(&(rd, LivelinessTransition::AliveToNotAlive)), "reader {:?}", rd);
    }

    // writing revives it
    domain.write(wr, 1, vec![1u8]).expect("write");
    assert_eq!(domain.reader_liveliness(r1).expect("reader").alive_count, 1);
    assert_eq!(rhc.take().len(), 1);
}

#[test]
fn test_manual_lease_expiry_reports_liveliness_lost() {
    let (domain, clock) = domain();
    let pp = domain.create_participant([11; 12], None).expect("participant");
    let wqos = Qos::new()
        .reliable(Duration::from_millis(100))
        .liveliness(LivelinessKind::ManualByTopic, Duration::from_secs(1));
    let rqos = Qos::new().reliable(Duration::from_millis(100));

    let lost = Arc::new(Mutex::new(Vec::new()));
    let on_lost = {
        let lost = Arc::clone(&lost);
        listener(move |_, ev| {
            if let StatusEvent::LivelinessLost(status) = ev {
                lost.lock().push(status.total_count);
            }
        })
    };
    let wr = domain.create_writer(pp, "manual", "T", &wqos, Some(on_lost)).expect("writer");
    let rd = domain
        .create_reader(pp, "manual", "T", &rqos, reader_history(&rqos), None)
        .expect("reader");

    clock.advance(Duration::from_millis(500));
    domain.assert_writer_liveliness(wr).expect("assert");
    clock.advance(Duration::from_millis(700));
    domain.process_events();
    assert!(domain.writer_stats(wr).expect("stats").alive, "assertion pushed the lease out");
    assert!(lost.lock().is_empty());

    clock.advance(Duration::from_millis(400));
    domain.process_events();
    let stats = domain.writer_stats(wr).expect("stats");
    assert!(!stats.alive, "lease expired");
    assert_eq!(stats.liveliness_lost, 1);
    assert_eq!(*lost.lock(), vec![1]);
    assert_eq!(domain.reader_liveliness(rd).expect("reader").not_alive_count, 1);

    domain.write(wr, 1, vec![0u8]).expect("write");
    assert!(domain.writer_stats(wr).expect("stats").alive, "write asserts liveliness");
    assert_eq!(domain.reader_liveliness(rd).expect("reader").alive_count, 1);
}

#[test]
fn test_revival_during_not_alive_walk_leaves_readers_alive() {
    let (domain, _clock) = domain();
    let domain = Arc::new(domain);
    let pp = domain.create_participant([12; 12], None).expect("participant");
    let qos = Qos::new().reliable(Duration::from_millis(100));
    let wr = domain.create_writer(pp, "beat", "Pulse", &qos, None).expect("writer");

    // whichever reader hears about the not-alive transition first revives
    // the writer from inside its listener, while the walk is still running
    let handle: Arc<OnceLock<Weak<Domain>>> = Arc::default();
    let revived = Arc::new(AtomicBool::new(false));
    let log: Transitions = Arc::default();
    let on_change = {
        let handle = Arc::clone(&handle);
        let revived = Arc::clone(&revived);
        let log = Arc::clone(&log);
        listener(move |rd, ev| {
            let StatusEvent::LivelinessChanged { transition, .. } = ev else {
                return;
            };
            log.lock().push((rd, *transition));
            if *transition == LivelinessTransition::AliveToNotAlive && !revived.swap(true, Ordering::SeqCst) {
                let domain = handle.get().and_then(Weak::upgrade);
                if let Some(d) = domain {
                    d.assert_writer_liveliness(wr).expect("assert");
                }
            }
        })
    };
    let r1 = domain
        .create_reader(pp, "beat", "Pulse", &qos, reader_history(&qos), Some(on_change.clone()))
        .expect("reader 1");
    let r2 = domain
        .create_reader(pp, "beat", "Pulse", &qos, reader_history(&qos), Some(on_change))
        .expect("reader 2");
    handle.set(Arc::downgrade(&domain)).expect("handle set once");
    log.lock().clear();

    domain.writer_set_notalive(wr, false).expect("not alive");
    assert!(revived.load(Ordering::SeqCst));
    assert!(domain.writer_stats(wr).expect("stats").alive);

    let (first, second) = if r1 < r2 { (r1, r2) } else { (r2, r1) };
    for rd in [first, second] {
        let status = domain.reader_liveliness(rd).expect("reader");
        assert_eq!(status.alive_count, 1, "reader {:?} ends alive", rd);
        assert_eq!(status.not_alive_count, 0, "reader {:?}", rd);
    }
    let late: Vec<LivelinessTransition> = log
        .lock()
        .iter()
        .filter(|(rd, _)| *rd == second)
        .map(|(_, t)| *t)
        .collect();
    assert_eq!(
        late,
        vec![LivelinessTransition::AliveToNotAlive, LivelinessTransition::NotAliveToAlive],
        "the later reader only sees the newer state, as a collapsed flap"
    );
}
