// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Garbage-collection queue.
//!
//! Phase 2 of an entity deletion removes it from the entity index and
//! enqueues a [`GcRequest`] carrying the last strong reference. The GC
//! worker finishes the teardown. A writer that still has a producer blocked
//! in throttling is requeued instead of waited for.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::entity::{ProxyParticipant, ProxyReader, ProxyWriter, Reader, Writer};

/// Deferred teardown of one entity.
#[derive(Debug)]
pub enum GcRequest {
    Writer(Arc<Writer>),
    Reader(Arc<Reader>),
    ProxyWriter(Arc<ProxyWriter>),
    ProxyReader(Arc<ProxyReader>),
    ProxyParticipant(Arc<ProxyParticipant>),
}

impl GcRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GcRequest::Writer(_) => "writer",
            GcRequest::Reader(_) => "reader",
            GcRequest::ProxyWriter(_) => "proxy writer",
            GcRequest::ProxyReader(_) => "proxy reader",
            GcRequest::ProxyParticipant(_) => "proxy participant",
        }
    }
}

/// Unbounded MPSC queue of GC requests.
#[derive(Debug)]
pub struct GcQueue {
    tx: Sender<GcRequest>,
    rx: Receiver<GcRequest>,
}

impl GcQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub fn enqueue(&self, req: GcRequest) {
        log::debug!("[gc] enqueue {}", req.kind());
        // receiver lives as long as the queue
        let _ = self.tx.send(req);
    }

    /// Take up to the number of requests queued right now, so requests that
    /// get requeued while processing are handled on the next round.
    pub fn drain_snapshot(&self) -> Vec<GcRequest> {
        let n = self.rx.len();
        (0..n).filter_map(|_| self.rx.try_recv().ok()).collect()
    }

    /// Wait for the next request up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<GcRequest> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for GcQueue {
    fn default() -> Self {
        Self::new()
    }
}
