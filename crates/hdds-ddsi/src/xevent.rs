// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed event queue.
//!
//! Events are keyed by absolute wake time. Heartbeats, writer linger,
//! leases and handshake timers all live here. Cancelling an event removes
//! it before its owner is freed, so a cancelled event never fires.
//!
//! ```text
//!   schedule(t, ev) ──▶ [ heap of (t, id) ] ──pop_due(now)──▶ handler
//!   reschedule(id, t)        │  lazy deletion: stale heap
//!   cancel(id)  ─────────────┘  entries are skipped on pop
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::time::Timestamp;

/// Identifier of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

#[derive(Debug)]
struct Scheduled<E> {
    at: Timestamp,
    event: E,
}

#[derive(Debug)]
struct QueueState<E> {
    heap: BinaryHeap<Reverse<(Timestamp, EventId)>>,
    live: HashMap<EventId, Scheduled<E>>,
    next_id: u64,
    stopped: bool,
}

/// Cancellable timed event queue.
#[derive(Debug)]
pub struct EventQueue<E> {
    state: Mutex<QueueState<E>>,
    cond: Condvar,
}

impl<E: Clone> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                live: HashMap::new(),
                next_id: 1,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Schedule `event` at `at`. Events at `NEVER` are kept but never fire
    /// until rescheduled.
    pub fn schedule(&self, at: Timestamp, event: E) -> EventId {
        let mut st = self.state.lock();
        let id = EventId(st.next_id);
        st.next_id += 1;
        st.live.insert(id, Scheduled { at, event });
        if !at.is_never() {
            st.heap.push(Reverse((at, id)));
        }
        drop(st);
        self.cond.notify_one();
        id
    }

    /// Move an event to `at`; false if it no longer exists.
    pub fn reschedule(&self, id: EventId, at: Timestamp) -> bool {
        self.resched(id, at, false)
    }

    /// Move an event to `at` only if that is earlier than its current time.
    pub fn reschedule_if_earlier(&self, id: EventId, at: Timestamp) -> bool {
        self.resched(id, at, true)
    }

    fn resched(&self, id: EventId, at: Timestamp, only_earlier: bool) -> bool {
        let mut st = self.state.lock();
        let Some(ev) = st.live.get_mut(&id) else {
            return false;
        };
        if only_earlier && at >= ev.at {
            return false;
        }
        ev.at = at;
        if !at.is_never() {
            st.heap.push(Reverse((at, id)));
        }
        drop(st);
        self.cond.notify_one();
        true
    }

    /// Remove an event; it will not fire after this returns.
    pub fn cancel(&self, id: EventId) -> bool {
        self.state.lock().live.remove(&id).is_some()
    }

    /// Scheduled time of an event.
    pub fn scheduled_at(&self, id: EventId) -> Option<Timestamp> {
        self.state.lock().live.get(&id).map(|e| e.at)
    }

    /// Earliest wake time of any live event.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        let mut st = self.state.lock();
        Self::prune(&mut st);
        st.heap.peek().map(|Reverse((t, _))| *t)
    }

    fn prune(st: &mut QueueState<E>) {
        while let Some(Reverse((t, id))) = st.heap.peek().copied() {
            match st.live.get(&id) {
                Some(ev) if ev.at == t => break,
                _ => {
                    st.heap.pop();
                }
            }
        }
    }

    /// Pop one event due at `now`. Periodic events stay registered: the
    /// handler reschedules or cancels them via the returned id.
    pub fn pop_due(&self, now: Timestamp) -> Option<(EventId, E)> {
        let mut st = self.state.lock();
        Self::prune(&mut st);
        let Reverse((t, id)) = st.heap.peek().copied()?;
        if t > now {
            return None;
        }
        st.heap.pop();
        let ev = st.live.get_mut(&id)?;
        // parked until the handler decides
        ev.at = Timestamp::NEVER;
        Some((id, ev.event.clone()))
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block the timer thread until an event may be due or `max_wait` passes.
    pub fn wait(&self, now: Timestamp, max_wait: Duration) {
        let mut st = self.state.lock();
        if st.stopped {
            return;
        }
        Self::prune(&mut st);
        let wait = match st.heap.peek() {
            Some(Reverse((t, _))) => t.saturating_duration_since(now).min(max_wait),
            None => max_wait,
        };
        if !wait.is_zero() {
            self.cond.wait_for(&mut st, wait);
        }
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl<E: Clone> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
