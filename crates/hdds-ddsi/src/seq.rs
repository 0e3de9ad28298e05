// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbers, liveliness version clocks and ACKNACK bitmaps.

/// RTPS sequence number (per writer, starts at 1).
pub type SeqNum = u64;

/// "None yet" sentinel.
pub const SEQ_NONE: SeqNum = 0;

/// "Unbounded" sentinel: a match at this value has acknowledged everything,
/// including what has not been written yet.
pub const SEQ_MAX: SeqNum = i64::MAX as u64;

/// Whether alive-state version `new` is strictly newer than `old`,
/// tolerating wrap-around.
#[inline]
pub fn vclock_newer(new: u32, old: u32) -> bool {
    (new.wrapping_sub(old) as i32) > 0
}

/// Whether a sequence number received from a peer is in range. Anything
/// beyond `SEQ_MAX` is malformed.
#[inline]
pub fn seq_valid(s: SeqNum) -> bool {
    s <= SEQ_MAX
}

/// Whether RTPS count `new` is strictly newer than `old` (serial arithmetic).
#[inline]
pub fn count_newer(new: u32, old: u32) -> bool {
    vclock_newer(new, old)
}

/// Maximum number of bitmap bits (RTPS limit).
pub const MAX_BITMAP_BITS: u32 = 256;
const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = 8;

/// Base + bitmap set used by ACKNACK, GAP and NACKFRAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberSet {
    base: u64,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
}

/// Sequence-number set of ACKNACK/GAP.
pub type SequenceNumberSet = NumberSet;
/// Fragment-number set of NACKFRAG (1-based fragment numbers).
pub type FragmentNumberSet = NumberSet;

impl NumberSet {
    /// Empty set covering `[base, base + num_bits)`.
    pub fn new(base: u64, num_bits: u32) -> Self {
        Self {
            base,
            num_bits: num_bits.min(MAX_BITMAP_BITS),
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Set covering exactly the given numbers, `None` if any is out of range.
    pub fn from_numbers(base: u64, numbers: &[u64]) -> Option<Self> {
        let max = numbers.iter().copied().max().unwrap_or(base);
        if max < base || max - base >= u64::from(MAX_BITMAP_BITS) {
            return None;
        }
        let mut set = Self::new(base, (max - base) as u32 + u32::from(!numbers.is_empty()));
        for &n in numbers {
            if !set.insert(n) {
                return None;
            }
        }
        Some(set)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Add `n` to the set; false if out of range.
    pub fn insert(&mut self, n: u64) -> bool {
        if n < self.base || n - self.base >= u64::from(self.num_bits) {
            return false;
        }
        let off = (n - self.base) as u32;
        self.bitmap[(off / WORD_BITS) as usize] |= 1 << (31 - off % WORD_BITS);
        true
    }

    /// Whether bit `i` (offset from base) is set.
    pub fn is_set(&self, i: u32) -> bool {
        if i >= self.num_bits {
            return false;
        }
        self.bitmap[(i / WORD_BITS) as usize] & (1 << (31 - i % WORD_BITS)) != 0
    }

    pub fn contains(&self, n: u64) -> bool {
        n >= self.base && n - self.base < u64::from(self.num_bits) && self.is_set((n - self.base) as u32)
    }

    /// True if any bit is set (a NACK rather than a pure ACK).
    pub fn any(&self) -> bool {
        self.bitmap.iter().any(|&w| w != 0)
    }

    /// Whether every number the set can name is at most `max`. An empty
    /// set may sit just past it.
    pub fn fits_below(&self, max: u64) -> bool {
        self.base
            .checked_add(u64::from(self.num_bits))
            .is_some_and(|end| end <= max.saturating_add(1))
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_bits)
            .filter(|&i| self.is_set(i))
            .map(move |i| self.base + u64::from(i))
    }
}
