// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! Two domains wired back to back: everything one transmits is fed into
//! the other's receive path, optionally losing messages on the way.

use std::sync::Arc;
use std::time::Duration;

use hdds_ddsi::{
    DdsiConfig, Domain, EndpointQos, KeyedHistory, ManualClock, ProxyEndpointInfo, Qos, RecordingTransmitter,
    Submessage, Timestamp, GUID,
};

const PREFIX_A: [u8; 12] = [1; 12];
const PREFIX_B: [u8; 12] = [2; 12];

struct Link {
    a: Domain,
    b: Domain,
    txa: Arc<RecordingTransmitter>,
    txb: Arc<RecordingTransmitter>,
    clock: Arc<ManualClock>,
    writer: GUID,
    rhc: Arc<KeyedHistory>,
}

fn domain(config: &DdsiConfig, clock: &Arc<ManualClock>, tx: &Arc<RecordingTransmitter>) -> Domain {
    Domain::builder()
        .config(config.clone())
        .clock(clock.clone())
        .transmitter(tx.clone())
        .threads(false)
        .build()
        .expect("domain")
}

fn link(config: DdsiConfig) -> Link {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
    let (txa, txb) = (RecordingTransmitter::new(), RecordingTransmitter::new());
    let a = domain(&config, &clock, &txa);
    let b = domain(&config, &clock, &txb);

    let qos = Qos::new().reliable(Duration::from_millis(100)).keep_all();
    let ppa = a.create_participant(PREFIX_A, None).expect("participant a");
    let ppb = b.create_participant(PREFIX_B, None).expect("participant b");
    let writer = a.create_writer(ppa, "bulk", "Blob", &qos, None).expect("writer");
    let rhc = KeyedHistory::shared(&qos.merge(&EndpointQos::reader_default()));
    let reader = b
        .create_reader(ppb, "bulk", "Blob", &qos, rhc.clone(), None)
        .expect("reader");

    // discovery, by hand
    a.new_proxy_participant(GUID::participant(PREFIX_B), false).expect("pp b on a");
    b.new_proxy_participant(GUID::participant(PREFIX_A), false).expect("pp a on b");
    a.new_proxy_reader(&ProxyEndpointInfo::new(
        reader,
        "bulk",
        "Blob",
        qos.merge(&EndpointQos::reader_default()),
    ))
    .expect("proxy reader");
    b.new_proxy_writer(&ProxyEndpointInfo::new(
        writer,
        "bulk",
        "Blob",
        qos.merge(&EndpointQos::writer_default()),
    ))
    .expect("proxy writer");

    let link = Link {
        a,
        b,
        txa,
        txb,
        clock,
        writer,
        rhc,
    };
    pump(&link, |_| false);
    link
}

/// Shuttle messages both ways until the link is quiet. `lose` decides
/// which A-to-B messages vanish.
fn pump(link: &Link, mut lose: impl FnMut(&Submessage) -> bool) -> usize {
    let mut moved = 0;
    for _ in 0..20 {
        let (ab, ba) = (link.txa.take(), link.txb.take());
        if ab.is_empty() && ba.is_empty() {
            break;
        }
        for s in ab {
            moved += 1;
            if !lose(&s.msg) {
                link.b.deliver(s.src, s.dst, vec![s.msg]);
            }
        }
        for s in ba {
            moved += 1;
            link.a.deliver(s.src, s.dst, vec![s.msg]);
        }
    }
    moved
}

fn keys(rhc: &KeyedHistory) -> Vec<u64> {
    rhc.take().iter().map(|s| s.key).collect()
}

#[test]
fn test_samples_cross_the_link_and_get_acknowledged() {
    let l = link(DdsiConfig::default());
    for key in 1..=3u64 {
        l.a.write(l.writer, key, vec![key as u8; 16]).expect("write");
    }
    pump(&l, |_| false);
    assert_eq!(keys(&l.rhc), vec![1, 2, 3]);

    for _ in 0..10 {
        if l.a.writer_stats(l.writer).expect("stats").unacked_bytes == 0 {
            break;
        }
        l.clock.advance(Duration::from_millis(200));
        l.a.process_events();
        l.b.process_events();
        pump(&l, |_| false);
    }
    let stats = l.a.writer_stats(l.writer).expect("stats");
    assert_eq!(stats.unacked_bytes, 0, "reader acknowledged everything");
    assert_eq!(stats.whc_len, 0);
}

#[test]
fn test_fragmented_sample_is_reassembled() {
    let config = DdsiConfig::builder().fragment_size(64).build().expect("config");
    let l = link(config);
    let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
    l.a.write(l.writer, 9, payload.clone()).expect("write");

    let frags = l.txa.count("DATAFRAG");
    assert_eq!(frags, 4, "200 bytes in 64-byte fragments");
    pump(&l, |_| false);

    let got = l.rhc.take();
    assert_eq!(got.len(), 1, "delivered once, after the last fragment");
    assert_eq!(got[0].key, 9);
    assert_eq!(got[0].payload.as_ref(), payload.as_slice());
}

#[test]
fn test_lost_sample_is_repaired() {
    let l = link(DdsiConfig::default());
    for key in 1..=3u64 {
        l.a.write(l.writer, key, vec![key as u8; 16]).expect("write");
    }
    let mut dropped = false;
    pump(&l, |m| match m {
        Submessage::Data { seq: 2, .. } if !dropped => {
            dropped = true;
            true
        }
        _ => false,
    });
    assert!(dropped, "seq 2 went missing");

    // seq 3 waits behind the hole until the repair arrives
    let mut delivered = keys(&l.rhc);
    assert!(!delivered.contains(&3) || delivered.contains(&2), "no delivery past the hole");
    for _ in 0..10 {
        l.clock.advance(Duration::from_millis(200));
        l.a.process_events();
        l.b.process_events();
        pump(&l, |_| false);
        delivered.extend(keys(&l.rhc));
        if delivered.len() == 3 && l.a.writer_stats(l.writer).expect("stats").unacked_bytes == 0 {
            break;
        }
    }
    assert_eq!(delivered, vec![1, 2, 3], "hole repaired, then the rest in order");
    let stats = l.a.writer_stats(l.writer).expect("stats");
    assert!(stats.rexmit_count >= 1, "repair went through a retransmit");
    assert_eq!(stats.unacked_bytes, 0);
}
