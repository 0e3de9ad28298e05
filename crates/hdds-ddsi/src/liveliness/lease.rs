// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveliness leases.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::guid::GUID;
use crate::time::{is_infinite, Timestamp};

/// A renewable lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    duration: Duration,
    expiry: Timestamp,
}

impl Lease {
    /// Lease of `duration` starting at `now`; `None` for an infinite lease.
    pub fn new(duration: Duration, now: Timestamp) -> Option<Self> {
        if is_infinite(duration) {
            return None;
        }
        Some(Self {
            duration,
            expiry: now + duration,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn expiry(&self) -> Timestamp {
        self.expiry
    }

    /// Push the expiry to `now + duration`; returns the new expiry.
    pub fn renew(&mut self, now: Timestamp) -> Timestamp {
        self.expiry = now + self.duration;
        self.expiry
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry
    }
}

/// Min-heap of lease durations held by a participant, one entry per alive
/// writer with a finite automatic lease.
#[derive(Debug, Default)]
pub struct LeaseHeap {
    entries: BTreeSet<(Duration, GUID)>,
}

impl LeaseHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, duration: Duration, owner: GUID) -> bool {
        self.entries.insert((duration, owner))
    }

    pub fn remove(&mut self, duration: Duration, owner: GUID) -> bool {
        self.entries.remove(&(duration, owner))
    }

    pub fn min_duration(&self) -> Option<Duration> {
        self.entries.first().map(|(d, _)| *d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_lease_is_none() {
        assert!(Lease::new(Duration::MAX, Timestamp::ZERO).is_none());
    }

    #[test]
    fn test_renew_and_expire() {
        let mut l = Lease::new(Duration::from_secs(1), Timestamp::from_secs(10)).expect("finite");
        assert!(!l.is_expired(Timestamp::from_millis(10_500)));
        assert!(l.is_expired(Timestamp::from_secs(11)));
        assert_eq!(l.renew(Timestamp::from_secs(11)), Timestamp::from_secs(12));
    }

    #[test]
    fn test_heap_min() {
        let mut h = LeaseHeap::new();
        let a = GUID::from_bytes([1; 16]);
        let b = GUID::from_bytes([2; 16]);
        h.insert(Duration::from_secs(5), a);
        h.insert(Duration::from_secs(2), b);
        assert_eq!(h.min_duration(), Some(Duration::from_secs(2)));
        assert!(h.remove(Duration::from_secs(2), b));
        assert_eq!(h.min_duration(), Some(Duration::from_secs(5)));
        assert!(!h.remove(Duration::from_secs(2), b), "already gone");
    }
}
