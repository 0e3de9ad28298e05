// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic timestamps and clocks.
//!
//! All scheduling in the core (heartbeats, linger, leases, handshake timers)
//! is expressed in [`Timestamp`]s read from a [`Clock`]. Production code uses
//! [`SystemClock`]; tests drive [`ManualClock`] explicitly.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time in nanoseconds.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Origin of the clock.
    pub const ZERO: Timestamp = Timestamp(0);
    /// "Never" sentinel: later than any real time.
    pub const NEVER: Timestamp = Timestamp(i64::MAX);

    pub const fn from_nanos(ns: i64) -> Self {
        Timestamp(ns)
    }

    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(1_000_000))
    }

    pub fn from_secs(s: i64) -> Self {
        Timestamp(s.saturating_mul(1_000_000_000))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn is_never(self) -> bool {
        self.0 == i64::MAX
    }

    /// Elapsed time since `earlier`, zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        if self.0 <= earlier.0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.0 - earlier.0) as u64)
        }
    }
}

/// Convert a duration to nanoseconds, saturating at `i64::MAX`.
pub fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Whether a QoS duration means "infinite".
pub fn is_infinite(d: Duration) -> bool {
    duration_nanos(d) == i64::MAX
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        if self.is_never() {
            return self;
        }
        Timestamp(self.0.saturating_add(duration_nanos(rhs)))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        if self.is_never() {
            return self;
        }
        Timestamp(self.0.saturating_sub(duration_nanos(rhs)))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "Timestamp(NEVER)")
        } else {
            write!(f, "Timestamp({}.{:09})", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
        }
    }
}

/// Source of monotonic time.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by `std::time::Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // +1 so that "never happened" (ZERO) is always in the past
        Timestamp(duration_nanos(self.origin.elapsed()).saturating_add(1))
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, d: Duration) -> Timestamp {
        let ns = duration_nanos(d);
        let prev = self.now.fetch_add(ns, Ordering::AcqRel);
        Timestamp(prev + ns)
    }

    pub fn set(&self, t: Timestamp) {
        self.now.store(t.as_nanos(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Acquire))
    }
}
