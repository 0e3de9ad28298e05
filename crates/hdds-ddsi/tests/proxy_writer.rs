// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! Local readers fed by a remote writer: ordering, gaps, durability and
//! liveliness as seen through the receive path.

use std::sync::Arc;
use std::time::Duration;

use hdds_ddsi::status::LivelinessTransition;
use hdds_ddsi::{
    listener, Destination, Domain, EndpointQos, InstanceState, KeyedHistory, ManualClock, ProxyEndpointInfo, Qos,
    RecordingTransmitter, Sample, SequenceNumberSet, StatusEvent, Submessage, Timestamp, GUID,
};
use parking_lot::Mutex;

const REMOTE: [u8; 12] = [0xbb; 12];

struct Fixture {
    domain: Domain,
    tx: Arc<RecordingTransmitter>,
    rhc: Arc<KeyedHistory>,
    reader: GUID,
    pwr: GUID,
    transitions: Arc<Mutex<Vec<LivelinessTransition>>>,
}

fn fixture(qos: &Qos) -> Fixture {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
    let tx = RecordingTransmitter::new();
    let domain = Domain::builder()
        .clock(clock)
        .transmitter(tx.clone())
        .threads(false)
        .build()
        .expect("domain");
    let pp = domain.create_participant([1; 12], None).expect("participant");

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    let on_status = listener(move |_, ev| {
        if let StatusEvent::LivelinessChanged { transition, .. } = ev {
            seen.lock().push(*transition);
        }
    });
    let rhc = KeyedHistory::shared(&qos.merge(&EndpointQos::reader_default()));
    let reader = domain
        .create_reader(pp, "feed", "Tick", qos, rhc.clone(), Some(on_status))
        .expect("reader");

    domain.new_proxy_participant(GUID::participant(REMOTE), false).expect("proxy participant");
    let pwr = GUID::new(REMOTE, [0, 0, 1, 0x02]);
    let info = ProxyEndpointInfo::new(pwr, "feed", "Tick", qos.merge(&EndpointQos::writer_default()));
    domain.new_proxy_writer(&info).expect("proxy writer");

    Fixture {
        domain,
        tx,
        rhc,
        reader,
        pwr,
        transitions,
    }
}

fn reliable() -> Qos {
    Qos::new().reliable(Duration::from_millis(100)).keep_all()
}

fn sample(key: u64) -> Sample {
    Sample::new(key, vec![key as u8; 4], Timestamp::from_secs(1))
}

fn keys(rhc: &KeyedHistory) -> Vec<u64> {
    rhc.take().iter().map(|s| s.key).collect()
}

#[test]
fn test_reliable_match_sends_preemptive_acknack() {
    let f = fixture(&reliable());
    let sent = f.tx.take();
    let preemptive = sent.iter().find(|s| s.msg.name() == "ACKNACK").expect("ACKNACK on match");
    assert_eq!(preemptive.dst, Destination::Unicast(f.pwr));
    match &preemptive.msg {
        Submessage::AckNack { set, reader, .. } => {
            assert_eq!(set.base(), 1);
            assert_eq!(set.num_bits(), 0);
            assert_eq!(*reader, f.reader);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(f.domain.reader_num_writers(f.reader).expect("reader"), 1);
}

#[test]
fn test_out_of_order_data_is_delivered_in_sequence() {
    let f = fixture(&reliable());
    f.domain.handle_heartbeat(f.pwr, None, 1, 0, 1, true, false);

    f.domain.handle_data(f.pwr, 2, sample(2));
    assert!(f.rhc.is_empty(), "seq 2 waits for seq 1");
    f.domain.handle_data(f.pwr, 1, sample(1));
    f.domain.handle_data(f.pwr, 3, sample(3));
    f.domain.handle_data(f.pwr, 3, sample(3));

    assert_eq!(keys(&f.rhc), vec![1, 2, 3], "each sample once, in order");
}

#[test]
fn test_gap_releases_buffered_samples() {
    let f = fixture(&reliable());
    f.domain.handle_heartbeat(f.pwr, None, 1, 0, 1, true, false);
    f.domain.handle_data(f.pwr, 1, sample(1));
    f.domain.handle_data(f.pwr, 4, sample(4));
    assert_eq!(f.rhc.len(), 1);

    // seqs 2 and 3 will never come
    f.domain.handle_gap(f.pwr, 2, &SequenceNumberSet::new(4, 0));
    assert_eq!(keys(&f.rhc), vec![1, 4]);
}

#[test]
fn test_heartbeat_nacks_missing_samples() {
    let f = fixture(&reliable());
    f.domain.handle_heartbeat(f.pwr, None, 1, 0, 1, true, false);
    f.domain.handle_data(f.pwr, 1, sample(1));
    f.domain.handle_data(f.pwr, 3, sample(3));
    f.tx.take();

    f.domain.handle_heartbeat(f.pwr, None, 1, 3, 2, false, false);
    let sent = f.tx.take();
    let nack = sent
        .iter()
        .find_map(|s| match &s.msg {
            Submessage::AckNack { set, .. } => Some(set.clone()),
            _ => None,
        })
        .expect("heartbeat answered");
    assert_eq!(nack.base(), 2);
    assert!(nack.contains(2), "seq 2 requested");
    assert!(!nack.contains(3), "seq 3 already buffered");

    // same heartbeat count again is a duplicate
    f.domain.handle_heartbeat(f.pwr, None, 1, 3, 2, false, false);
    assert_eq!(f.tx.count("ACKNACK"), 0);
}

#[test]
fn test_volatile_reader_skips_history_on_first_heartbeat() {
    let f = fixture(&reliable());
    f.domain.handle_heartbeat(f.pwr, None, 1, 3, 1, false, false);
    for seq in 1..=3 {
        f.domain.handle_data(f.pwr, seq, sample(seq));
    }
    assert!(f.rhc.is_empty(), "history predates the match");

    f.domain.handle_data(f.pwr, 4, sample(4));
    assert_eq!(keys(&f.rhc), vec![4]);
}

#[test]
fn test_transient_local_reader_catches_up_from_first_heartbeat() {
    let qos = reliable().transient_local();
    let f = fixture(&qos);
    f.tx.take();

    f.domain.handle_heartbeat(f.pwr, None, 1, 3, 1, false, false);
    let nack = f
        .tx
        .take()
        .into_iter()
        .find_map(|s| match s.msg {
            Submessage::AckNack { set, .. } => Some(set),
            _ => None,
        })
        .expect("history requested");
    assert_eq!(nack.base(), 1);
    assert!((1..=3).all(|s| nack.contains(s)));

    for seq in 1..=3 {
        f.domain.handle_data(f.pwr, seq, sample(seq));
    }
    f.domain.handle_data(f.pwr, 4, sample(4));
    assert_eq!(keys(&f.rhc), vec![1, 2, 3, 4], "history followed by live data");
}

#[test]
fn test_liveliness_toggle_notifies_once_each() {
    let f = fixture(&reliable());
    f.transitions.lock().clear();

    f.domain.proxy_writer_set_notalive(f.pwr).expect("not alive");
    assert!(f.domain.proxy_writer_set_notalive(f.pwr).is_err(), "already not alive");
    let status = f.domain.reader_liveliness(f.reader).expect("reader");
    assert_eq!(status.alive_count, 0);
    assert_eq!(status.not_alive_count, 1);

    f.domain.proxy_writer_set_alive(f.pwr).expect("alive");
    let status = f.domain.reader_liveliness(f.reader).expect("reader");
    assert_eq!(status.alive_count, 1);
    assert_eq!(status.not_alive_count, 0);

    assert_eq!(
        *f.transitions.lock(),
        vec![LivelinessTransition::AliveToNotAlive, LivelinessTransition::NotAliveToAlive]
    );

    f.domain.handle_data(f.pwr, 1, sample(7));
    assert_eq!(keys(&f.rhc), vec![7], "data flows after revival");
}

#[test]
fn test_data_revives_not_alive_writer() {
    let f = fixture(&reliable());
    f.domain.proxy_writer_set_notalive(f.pwr).expect("not alive");
    f.domain.handle_data(f.pwr, 1, sample(1));
    let status = f.domain.reader_liveliness(f.reader).expect("reader");
    assert_eq!(status.alive_count, 1, "incoming data proves liveliness");
}

#[test]
fn test_deleting_proxy_writer_unregisters_instances() {
    let f = fixture(&reliable());
    f.domain.handle_data(f.pwr, 1, sample(5));
    assert_eq!(f.rhc.instance_state(5), Some(InstanceState::Alive));

    f.domain.delete_proxy_writer(f.pwr).expect("delete");
    f.domain.process_gc();
    assert_eq!(f.domain.reader_num_writers(f.reader).expect("reader"), 0);
    assert_ne!(f.rhc.instance_state(5), Some(InstanceState::Alive));
    assert!(f.transitions.lock().contains(&LivelinessTransition::AliveToNone));
}

#[test]
fn test_best_effort_reader_never_nacks() {
    let f = fixture(&Qos::new().keep_all());
    assert_eq!(f.tx.count("ACKNACK"), 0, "no pre-emptive ACKNACK either");
    f.domain.handle_data(f.pwr, 5, sample(5));
    f.domain.handle_heartbeat(f.pwr, None, 1, 5, 1, false, false);
    assert_eq!(f.tx.count("ACKNACK"), 0);
    assert_eq!(keys(&f.rhc), vec![5]);
}

#[test]
fn test_qos_update_to_incompatible_unmatches() {
    let f = fixture(&reliable());
    assert_eq!(f.domain.reader_num_writers(f.reader).expect("reader"), 1);

    // a best-effort writer cannot serve a reliable reader
    f.domain
        .update_proxy_writer_qos(f.pwr, EndpointQos::reader_default())
        .expect("update");
    assert_eq!(f.domain.reader_num_writers(f.reader).expect("reader"), 0);

    f.domain.handle_data(f.pwr, 1, sample(1));
    assert!(f.rhc.is_empty());
}

#[test]
fn test_heartbeat_beyond_sequence_range_is_dropped() {
    let f = fixture(&reliable());
    f.tx.take();
    f.domain.handle_heartbeat(f.pwr, None, 1, u64::MAX, 1, false, false);
    f.domain.handle_heartbeat(f.pwr, None, u64::MAX, u64::MAX, 2, false, false);
    assert!(f.tx.is_empty(), "no ACKNACK for a malformed heartbeat");

    // the proxy writer is still usable afterwards
    f.domain.handle_heartbeat(f.pwr, None, 1, 0, 3, true, false);
    f.domain.handle_data(f.pwr, 1, sample(1));
    f.tx.take();
    f.domain.handle_heartbeat(f.pwr, None, 1, 2, 4, false, false);
    assert_eq!(keys(&f.rhc), vec![1]);
    assert_eq!(f.tx.count("ACKNACK"), 1, "seq 2 is nacked");
}

#[test]
fn test_data_beyond_sequence_range_is_dropped() {
    let f = fixture(&Qos::new().keep_all());
    f.domain.handle_data(f.pwr, u64::MAX, sample(9));
    assert!(f.rhc.is_empty());
    f.domain.handle_data(f.pwr, 1, sample(1));
    assert_eq!(keys(&f.rhc), vec![1], "delivery continues from the start");
}

#[test]
fn test_gap_beyond_sequence_range_is_dropped() {
    let f = fixture(&reliable());
    f.domain.handle_heartbeat(f.pwr, None, 1, 0, 1, true, false);
    f.domain.handle_data(f.pwr, 2, sample(2));
    f.domain.handle_gap(f.pwr, u64::MAX - 1, &SequenceNumberSet::new(u64::MAX, 0));
    f.domain.handle_gap(f.pwr, 1, &SequenceNumberSet::new(u64::MAX - 4, 8));
    assert!(f.rhc.is_empty(), "seq 1 is still outstanding");

    f.domain.handle_gap(f.pwr, 1, &SequenceNumberSet::new(2, 0));
    assert_eq!(keys(&f.rhc), vec![2]);
}
