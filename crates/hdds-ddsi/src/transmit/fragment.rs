// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample fragmentation and reassembly.
//!
//! Fragment numbers are 1-based, as on the wire. Only the first fragment of
//! a fresh transmission carries inline QoS.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::submsg::Submessage;
use crate::guid::GUID;
use crate::rhc::{Sample, SampleKind};
use crate::seq::{FragmentNumberSet, SeqNum};
use crate::time::Timestamp;

/// Number of fragments of a sample of `size` bytes.
pub fn fragment_count(size: usize, frag_size: u32) -> u32 {
    let fs = frag_size.max(1) as usize;
    size.div_ceil(fs).max(1) as u32
}

/// Build DATA or DATAFRAG submessages for one sample.
///
/// `frags` restricts which fragments are produced (1-based, inclusive);
/// `None` means all of them. `fresh` marks an initial transmission.
pub fn sample_submessages(
    writer: GUID,
    reader: Option<GUID>,
    seq: SeqNum,
    sample: &Sample,
    frag_size: u32,
    frags: Option<(u32, u32)>,
    fresh: bool,
) -> Vec<Submessage> {
    let size = sample.size();
    if size <= frag_size as usize {
        return vec![Submessage::Data {
            writer,
            reader,
            seq,
            key: sample.key,
            kind: sample.kind,
            timestamp: sample.timestamp,
            payload: Arc::clone(&sample.payload),
        }];
    }
    let nfrags = fragment_count(size, frag_size);
    let (lo, hi) = frags.unwrap_or((1, nfrags));
    let hi = hi.min(nfrags);
    (lo.max(1)..=hi)
        .map(|fno| {
            let start = (fno - 1) as usize * frag_size as usize;
            let end = (start + frag_size as usize).min(size);
            Submessage::DataFrag {
                writer,
                reader,
                seq,
                frag_start: fno,
                frag_size,
                sample_size: size as u32,
                key: sample.key,
                kind: sample.kind,
                timestamp: sample.timestamp,
                inline_qos: fresh && fno == 1,
                bytes: sample.payload[start..end].to_vec(),
            }
        })
        .collect()
}

/// Partially received sample.
#[derive(Debug)]
pub struct PartialSample {
    sample_size: u32,
    frag_size: u32,
    key: u64,
    kind: SampleKind,
    timestamp: Timestamp,
    frags: BTreeMap<u32, Vec<u8>>,
}

impl PartialSample {
    fn nfrags(&self) -> u32 {
        fragment_count(self.sample_size as usize, self.frag_size)
    }

    fn is_complete(&self) -> bool {
        self.frags.len() as u32 == self.nfrags()
    }

    /// Missing fragments up to and including `last_frag`.
    pub fn missing(&self, last_frag: u32) -> Vec<u32> {
        (1..=last_frag.min(self.nfrags()))
            .filter(|f| !self.frags.contains_key(f))
            .collect()
    }

    fn assemble(self) -> Sample {
        let mut payload = Vec::with_capacity(self.sample_size as usize);
        for bytes in self.frags.into_values() {
            payload.extend_from_slice(&bytes);
        }
        payload.truncate(self.sample_size as usize);
        Sample {
            key: self.key,
            payload: payload.into(),
            timestamp: self.timestamp,
            kind: self.kind,
        }
    }
}

/// Per proxy writer reassembly buffers, keyed by seq.
#[derive(Debug, Default)]
pub struct Defragmenter {
    partial: BTreeMap<SeqNum, PartialSample>,
}

/// One received fragment.
#[derive(Debug, Clone, Copy)]
pub struct FragmentIn<'a> {
    pub seq: SeqNum,
    pub frag_start: u32,
    pub frag_size: u32,
    pub sample_size: u32,
    pub key: u64,
    pub kind: SampleKind,
    pub timestamp: Timestamp,
    pub bytes: &'a [u8],
}

impl Defragmenter {
    /// Add a fragment; returns the sample once complete.
    pub fn add(&mut self, f: FragmentIn<'_>) -> Option<Sample> {
        if f.frag_start == 0 || f.frag_size == 0 {
            log::warn!("[defrag] malformed fragment {} of seq {}", f.frag_start, f.seq);
            return None;
        }
        let p = self.partial.entry(f.seq).or_insert_with(|| PartialSample {
            sample_size: f.sample_size,
            frag_size: f.frag_size,
            key: f.key,
            kind: f.kind,
            timestamp: f.timestamp,
            frags: BTreeMap::new(),
        });
        if p.sample_size != f.sample_size || p.frag_size != f.frag_size || f.frag_start > p.nfrags() {
            log::warn!("[defrag] inconsistent fragment for seq {}", f.seq);
            return None;
        }
        p.frags.entry(f.frag_start).or_insert_with(|| f.bytes.to_vec());
        if !p.is_complete() {
            return None;
        }
        self.partial.remove(&f.seq).map(PartialSample::assemble)
    }

    pub fn get(&self, seq: SeqNum) -> Option<&PartialSample> {
        self.partial.get(&seq)
    }

    /// Fragment set to NACK for `seq`, if anything is missing.
    pub fn nack_set(&self, seq: SeqNum, last_frag: u32) -> Option<FragmentNumberSet> {
        let missing = self.partial.get(&seq)?.missing(last_frag);
        let base = *missing.first()?;
        let capped: Vec<u64> = missing
            .iter()
            .map(|&f| u64::from(f))
            .take_while(|&f| f - u64::from(base) < u64::from(crate::seq::MAX_BITMAP_BITS))
            .collect();
        FragmentNumberSet::from_numbers(u64::from(base), &capped)
    }

    /// Forget partial samples below `seq` (delivered or gapped).
    pub fn drop_below(&mut self, seq: SeqNum) {
        self.partial = self.partial.split_off(&seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g() -> GUID {
        GUID::from_bytes([3; 16])
    }

    #[test]
    fn test_small_sample_is_single_data() {
        let s = Sample::new(1, vec![1, 2, 3], Timestamp::ZERO);
        let msgs = sample_submessages(g(), None, 1, &s, 1344, None, true);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].name(), "DATA");
    }

    #[test]
    fn test_fragment_and_reassemble_out_of_order() {
        let payload: Vec<u8> = (0..250u8).collect();
        let s = Sample::new(9, payload.clone(), Timestamp::from_secs(2));
        let msgs = sample_submessages(g(), None, 4, &s, 100, None, true);
        assert_eq!(msgs.len(), 3);
        let mut d = Defragmenter::default();
        let mut out = None;
        for m in msgs.iter().rev() {
            if let Submessage::DataFrag { seq, frag_start, frag_size, sample_size, key, kind, timestamp, inline_qos, bytes, .. } = m {
                assert_eq!(*inline_qos, *frag_start == 1, "inline QoS only on the first fragment");
                out = d.add(FragmentIn {
                    seq: *seq,
                    frag_start: *frag_start,
                    frag_size: *frag_size,
                    sample_size: *sample_size,
                    key: *key,
                    kind: *kind,
                    timestamp: *timestamp,
                    bytes,
                });
            }
        }
        let sample = out.expect("complete after all fragments");
        assert_eq!(&*sample.payload, &payload[..]);
        assert_eq!(sample.key, 9);
    }

    #[test]
    fn test_nack_set_lists_missing() {
        let payload = vec![0u8; 500];
        let s = Sample::new(1, payload, Timestamp::ZERO);
        let mut d = Defragmenter::default();
        if let Some(Submessage::DataFrag { bytes, .. }) = sample_submessages(g(), None, 1, &s, 100, Some((2, 2)), false).first() {
            d.add(FragmentIn {
                seq: 1,
                frag_start: 2,
                frag_size: 100,
                sample_size: 500,
                key: 1,
                kind: SampleKind::Write,
                timestamp: Timestamp::ZERO,
                bytes,
            });
        }
        let set = d.nack_set(1, 4).expect("missing fragments");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert!(d.nack_set(2, 4).is_none());
    }
}
