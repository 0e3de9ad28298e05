// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader history cache boundary.
//!
//! The protocol core hands received samples to a [`ReaderHistoryCache`]
//! together with a [`WriterInfo`] describing the writer. [`KeyedHistory`] is
//! the default implementation: per-key instances with KEEP_LAST depth,
//! destination ordering and writer registration tracking.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::guid::GUID;
use crate::qos::{DestinationOrderKind, EndpointQos, History};
use crate::time::Timestamp;

/// What a sample means for its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Write,
    Dispose,
    Unregister,
}

/// Application sample as carried through the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Instance key (already hashed by the type layer).
    pub key: u64,
    pub payload: Arc<[u8]>,
    /// Source timestamp.
    pub timestamp: Timestamp,
    pub kind: SampleKind,
}

impl Sample {
    pub fn new(key: u64, payload: impl Into<Arc<[u8]>>, timestamp: Timestamp) -> Self {
        Self {
            key,
            payload: payload.into(),
            timestamp,
            kind: SampleKind::Write,
        }
    }

    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Writer description accompanying every store/unregister call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterInfo {
    pub guid: GUID,
    pub ownership_strength: i32,
    pub auto_dispose: bool,
    /// Instance handle of the writer.
    pub iid: u64,
    /// Absolute expiry of the sample, `NEVER` if none.
    pub lifespan_exp: Timestamp,
}

impl WriterInfo {
    pub fn from_qos(guid: GUID, qos: &EndpointQos) -> Self {
        Self {
            guid,
            ownership_strength: qos.ownership_strength,
            auto_dispose: qos.autodispose_unregistered_instances,
            iid: guid.to_iid(),
            lifespan_exp: Timestamp::NEVER,
        }
    }
}

/// Sink for received samples of one reader.
pub trait ReaderHistoryCache: Send + Sync {
    /// Store a sample; false if it was rejected (stale or filtered).
    fn store(&self, writer: &WriterInfo, sample: &Sample) -> bool;

    /// Unregister every instance registered by `writer`.
    fn unregister_writer(&self, writer: &WriterInfo);
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// Sample returned by [`KeyedHistory::take`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSample {
    pub key: u64,
    pub payload: Arc<[u8]>,
    pub source_timestamp: Timestamp,
    pub writer: GUID,
    /// False for lifecycle-only notifications (dispose, unregister).
    pub valid_data: bool,
    pub instance_state: InstanceState,
}

#[derive(Debug)]
struct Instance {
    samples: VecDeque<ReceivedSample>,
    state: InstanceState,
    /// Writer that last updated the instance.
    wr_iid: u64,
    wr_guid: GUID,
    /// Whether `wr_iid` is still registered.
    wr_iid_islive: bool,
    /// Source timestamp of the last accepted update.
    tstamp: Timestamp,
    writers: BTreeSet<u64>,
}

impl Instance {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            state: InstanceState::Alive,
            wr_iid: 0,
            wr_guid: GUID::zero(),
            wr_iid_islive: false,
            tstamp: Timestamp::ZERO,
            writers: BTreeSet::new(),
        }
    }
}

/// Keyed reader history cache.
#[derive(Debug)]
pub struct KeyedHistory {
    depth: Option<usize>,
    by_source: bool,
    instances: Mutex<HashMap<u64, Instance>>,
}

impl KeyedHistory {
    pub fn new(qos: &EndpointQos) -> Self {
        Self {
            depth: match qos.history {
                History::KeepLast(n) => Some(n.max(1) as usize),
                History::KeepAll => None,
            },
            by_source: qos.destination_order == DestinationOrderKind::BySourceTimestamp,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(qos: &EndpointQos) -> Arc<Self> {
        Arc::new(Self::new(qos))
    }

    /// Remove and return all samples, ordered by key then arrival.
    pub fn take(&self) -> Vec<ReceivedSample> {
        let mut insts = self.instances.lock();
        let mut keys: Vec<u64> = insts.keys().copied().collect();
        keys.sort_unstable();
        let mut out = Vec::new();
        for k in keys {
            if let Some(inst) = insts.get_mut(&k) {
                out.extend(inst.samples.drain(..));
            }
        }
        // instances without writers and without samples are gone for good
        insts.retain(|_, i| !(i.samples.is_empty() && i.state != InstanceState::Alive && i.writers.is_empty()));
        out
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.instances.lock().values().map(|i| i.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn instance_state(&self, key: u64) -> Option<InstanceState> {
        self.instances.lock().get(&key).map(|i| i.state)
    }

    /// Whether an update from `writer` at `ts` may replace the instance's
    /// current state under by-source-timestamp ordering.
    ///
    /// Equal timestamps are accepted from the instance's current live writer,
    /// or from a writer with a lower GUID.
    fn accepts(&self, inst: &Instance, writer: &WriterInfo, ts: Timestamp) -> bool {
        if !self.by_source || inst.wr_iid == 0 {
            return true;
        }
        if ts > inst.tstamp {
            return true;
        }
        if ts < inst.tstamp {
            return false;
        }
        (inst.wr_iid_islive && inst.wr_iid == writer.iid) || writer.guid < inst.wr_guid
    }

    fn push(&self, inst: &mut Instance, s: ReceivedSample) {
        inst.samples.push_back(s);
        if let Some(depth) = self.depth {
            while inst.samples.len() > depth {
                inst.samples.pop_front();
            }
        }
    }
}

impl ReaderHistoryCache for KeyedHistory {
    fn store(&self, writer: &WriterInfo, sample: &Sample) -> bool {
        let mut insts = self.instances.lock();
        let inst = insts.entry(sample.key).or_insert_with(Instance::new);
        if !self.accepts(inst, writer, sample.timestamp) {
            log::trace!(
                "[rhc] reject key {} from {}: stale timestamp {:?}",
                sample.key,
                writer.guid,
                sample.timestamp
            );
            return false;
        }
        inst.wr_iid = writer.iid;
        inst.wr_guid = writer.guid;
        inst.tstamp = sample.timestamp;
        let (valid, state) = match sample.kind {
            SampleKind::Write => {
                inst.writers.insert(writer.iid);
                inst.wr_iid_islive = true;
                (true, InstanceState::Alive)
            }
            SampleKind::Dispose => {
                inst.writers.insert(writer.iid);
                inst.wr_iid_islive = true;
                (false, InstanceState::NotAliveDisposed)
            }
            SampleKind::Unregister => {
                inst.writers.remove(&writer.iid);
                inst.wr_iid_islive = false;
                let state = if writer.auto_dispose {
                    InstanceState::NotAliveDisposed
                } else if inst.writers.is_empty() && inst.state == InstanceState::Alive {
                    InstanceState::NotAliveNoWriters
                } else {
                    inst.state
                };
                (false, state)
            }
        };
        inst.state = state;
        let rs = ReceivedSample {
            key: sample.key,
            payload: Arc::clone(&sample.payload),
            source_timestamp: sample.timestamp,
            writer: writer.guid,
            valid_data: valid,
            instance_state: state,
        };
        self.push(inst, rs);
        true
    }

    fn unregister_writer(&self, writer: &WriterInfo) {
        let mut insts = self.instances.lock();
        for (key, inst) in insts.iter_mut() {
            if !inst.writers.remove(&writer.iid) {
                continue;
            }
            if inst.wr_iid == writer.iid {
                inst.wr_iid_islive = false;
            }
            let new_state = if writer.auto_dispose && inst.state == InstanceState::Alive {
                InstanceState::NotAliveDisposed
            } else if inst.writers.is_empty() && inst.state == InstanceState::Alive {
                InstanceState::NotAliveNoWriters
            } else {
                continue;
            };
            inst.state = new_state;
            let rs = ReceivedSample {
                key: *key,
                payload: Arc::from(Vec::<u8>::new()),
                source_timestamp: inst.tstamp,
                writer: writer.guid,
                valid_data: false,
                instance_state: new_state,
            };
            self.push(inst, rs);
        }
    }
}
