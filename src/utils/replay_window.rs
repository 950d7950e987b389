//! Sliding receive window for duplicate and replay detection.
//!
//! The window remembers the highest sequence observed and a bitmap of which
//! of the `width` sequences at or below it have arrived. The bitmap is a ring
//! of 64-bit words indexed by `sequence % width`, so sliding the window only
//! clears the slots it passes over. Anything older than the window is treated
//! as stale and rejected, which bounds memory while still rejecting replays of
//! old traffic.
//!
//! The window also tracks the next *contiguous* sequence: the lowest sequence
//! not yet received. Ordered delivery uses it to decide when a held packet has
//! no remaining gaps in front of it.
//!
//! A lost reliable packet can only be recovered while its retransmission
//! still falls inside the window, so the width should exceed the number of
//! packets a connection sends within its retry horizon.

use tracing::trace;

/// Default number of sequences tracked below the highest one (including it).
pub const DEFAULT_WINDOW_SIZE: u32 = 1024;

/// Narrowest window; widths are rounded up to a multiple of this.
pub const MIN_WINDOW_SIZE: u32 = 64;

/// Widest window accepted by the configuration.
pub const MAX_WINDOW_SIZE: u32 = 1 << 16;

/// Outcome of checking a sequence against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    /// Not seen before. `reordered` is set when a higher sequence already arrived.
    Fresh { reordered: bool },
    /// Already marked present.
    Duplicate,
    /// Too far below the window to judge; treated as a replay.
    Stale,
}

#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    highest: Option<u32>,
    /// Bit `s % width` set means `s` has been received, for `s` inside the window.
    seen: Vec<u64>,
    width: u32,
    next_expected: u32,
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self::with_width(DEFAULT_WINDOW_SIZE)
    }

    /// A window tracking at least `width` sequences.
    pub fn with_width(width: u32) -> Self {
        let words = width
            .clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE)
            .div_ceil(MIN_WINDOW_SIZE);
        Self {
            highest: None,
            seen: vec![0; words as usize],
            width: words * MIN_WINDOW_SIZE,
            next_expected: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn slot(&self, sequence: u32) -> (usize, u64) {
        let bit = sequence % self.width;
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }

    fn is_marked(&self, sequence: u32) -> bool {
        let (word, mask) = self.slot(sequence);
        self.seen[word] & mask != 0
    }

    fn set(&mut self, sequence: u32, present: bool) {
        let (word, mask) = self.slot(sequence);
        if present {
            self.seen[word] |= mask;
        } else {
            self.seen[word] &= !mask;
        }
    }

    /// Classify `sequence` without recording it.
    pub fn check(&self, sequence: u32) -> WindowVerdict {
        let Some(highest) = self.highest else {
            return WindowVerdict::Fresh { reordered: false };
        };

        if sequence > highest {
            return WindowVerdict::Fresh { reordered: false };
        }

        if highest - sequence >= self.width {
            WindowVerdict::Stale
        } else if self.is_marked(sequence) {
            WindowVerdict::Duplicate
        } else {
            WindowVerdict::Fresh { reordered: true }
        }
    }

    /// Classify `sequence` and record it if fresh.
    pub fn accept(&mut self, sequence: u32) -> WindowVerdict {
        let verdict = self.check(sequence);
        if matches!(verdict, WindowVerdict::Fresh { .. }) {
            self.record(sequence);
        }
        verdict
    }

    fn record(&mut self, sequence: u32) {
        match self.highest {
            Some(highest) if sequence > highest => {
                if sequence - highest >= self.width {
                    self.seen.fill(0);
                } else {
                    // slots being reused for sequences the window now covers
                    for passed in highest + 1..sequence {
                        self.set(passed, false);
                    }
                }
                self.highest = Some(sequence);
            }
            Some(_) => {}
            None => {
                self.seen.fill(0);
                self.highest = Some(sequence);
            }
        }
        self.set(sequence, true);
        self.advance();
    }

    /// Whether `sequence` is settled: received, or already behind the window.
    fn is_settled(&self, sequence: u32) -> bool {
        match self.highest {
            Some(highest) if sequence <= highest => {
                highest - sequence >= self.width || self.is_marked(sequence)
            }
            _ => false,
        }
    }

    fn advance(&mut self) {
        let Some(highest) = self.highest else {
            return;
        };

        // sequences that slid out of the window can never be filled
        let lower = highest.saturating_sub(self.width - 1);
        if self.next_expected < lower {
            trace!(
                from = self.next_expected,
                to = lower,
                "Receive window passed unfilled sequences"
            );
            self.next_expected = lower;
        }

        while self.next_expected <= highest && self.is_settled(self.next_expected) {
            match self.next_expected.checked_add(1) {
                Some(next) => self.next_expected = next,
                None => break,
            }
        }
    }

    /// Give up on every sequence up to and including `sequence`.
    pub fn skip_through(&mut self, sequence: u32) {
        let next = sequence.saturating_add(1);
        if next > self.next_expected {
            self.next_expected = next;
        }
        self.advance();
    }

    /// Lowest sequence not yet received (or skipped).
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    pub fn clear(&mut self) {
        *self = Self::with_width(self.width);
    }
}
