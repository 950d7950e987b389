//! Batching of small packets into one wire packet.
//!
//! A batch body is a count followed by length-prefixed entries:
//!
//! ```text
//! [count: u8] ([len: u16 BE] [entry bytes])*
//! ```
//!
//! Each entry is itself a complete framed wire packet (header, checksum, codec
//! flags) with sequence 0. The enclosing `Batch` packet carries the sequence.

use crate::core::header::PacketFlags;
use std::time::{Duration, Instant};

/// Most entries a single batch can describe.
pub const MAX_BATCH_ENTRIES: usize = u8::MAX as usize;

/// Length prefix per entry.
const ENTRY_PREFIX: usize = 2;

/// Pending entries for one connection.
#[derive(Debug)]
pub struct BatchBuffer {
    entries: Vec<Vec<u8>>,
    /// Encoded body length so far, count byte included
    body_len: usize,
    max_batch_size: usize,
    opened_at: Option<Instant>,
    /// Union of the delivery flags of the pending entries
    flags: PacketFlags,
}

impl BatchBuffer {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            body_len: 1,
            max_batch_size,
            opened_at: None,
            flags: PacketFlags::empty(),
        }
    }

    /// Whether an entry of `entry_len` bytes could ever be batched.
    pub fn accepts(&self, entry_len: usize) -> bool {
        1 + ENTRY_PREFIX + entry_len <= self.max_batch_size && entry_len <= u16::MAX as usize
    }

    /// Whether an entry of `entry_len` bytes fits beside the current entries.
    pub fn fits(&self, entry_len: usize) -> bool {
        self.entries.len() < MAX_BATCH_ENTRIES
            && self.body_len + ENTRY_PREFIX + entry_len <= self.max_batch_size
    }

    /// Append an entry sent with `flags`.
    ///
    /// Callers check [`fits`](Self::fits) first; an entry that does not fit is still
    /// appended and the batch will report itself full.
    pub fn add(&mut self, entry: Vec<u8>, flags: PacketFlags, now: Instant) {
        if self.entries.is_empty() {
            self.opened_at = Some(now);
        }
        self.body_len += ENTRY_PREFIX + entry.len();
        let delivery = PacketFlags::RELIABLE | PacketFlags::ORDERED;
        self.flags
            .insert(PacketFlags::from_bits(flags.bits() & delivery.bits()));
        self.entries.push(entry);
    }

    /// Size or count threshold reached.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_BATCH_ENTRIES || self.body_len >= self.max_batch_size
    }

    /// `RELIABLE` and `ORDERED` if any pending entry asked for them.
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Time since the first pending entry was added.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode and clear the pending entries. `None` when empty.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.entries.is_empty() {
            return None;
        }

        let mut body = Vec::with_capacity(self.body_len);
        body.push(self.entries.len() as u8);
        for entry in self.entries.drain(..) {
            body.extend_from_slice(&(entry.len() as u16).to_be_bytes());
            body.extend_from_slice(&entry);
        }

        self.body_len = 1;
        self.opened_at = None;
        self.flags = PacketFlags::empty();
        Some(body)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.body_len = 1;
        self.opened_at = None;
        self.flags = PacketFlags::empty();
    }
}

/// Entries extracted from a batch body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unbatched {
    pub entries: Vec<Vec<u8>>,
    /// The body was cut short, overlong or carried trailing bytes.
    pub malformed: bool,
}

/// Split a batch body into its entries.
///
/// Parsing stops at the first entry that runs past the end of the body; the
/// entries before it are kept.
pub fn unbatch(body: &[u8]) -> Unbatched {
    let Some((&count, mut rest)) = body.split_first() else {
        return Unbatched {
            entries: Vec::new(),
            malformed: true,
        };
    };

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if rest.len() < ENTRY_PREFIX {
            return Unbatched {
                entries,
                malformed: true,
            };
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[ENTRY_PREFIX..];
        if rest.len() < len {
            return Unbatched {
                entries,
                malformed: true,
            };
        }
        let (entry, tail) = rest.split_at(len);
        entries.push(entry.to_vec());
        rest = tail;
    }

    Unbatched {
        entries,
        malformed: !rest.is_empty(),
    }
}
