//! Per-connection protocol statistics.
//!
//! Counters are atomics so readers never take the connection lock. Only the
//! owning connection's processing path writes them; aggregation across
//! connections happens on demand by summing snapshots.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Monotonic counters for one connection.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    /// Wire packets handed to the transport (retransmissions excluded)
    pub sent: AtomicU64,
    /// Wire packets that passed header and checksum validation
    pub received: AtomicU64,
    /// Retransmissions of reliable packets
    pub resent: AtomicU64,
    /// Reliable packets acknowledged by the peer
    pub acknowledged: AtomicU64,
    /// Incoming packets or batch entries dropped for any reason
    pub dropped: AtomicU64,
    /// Fragments produced on send
    pub fragmented: AtomicU64,
    /// Packets placed into batches on send
    pub batched: AtomicU64,
    /// Payloads actually compressed on send
    pub compressed: AtomicU64,
    /// Payloads encrypted on send
    pub encrypted: AtomicU64,
    /// Incoming packets already seen
    pub duplicate: AtomicU64,
    /// Incoming packets that arrived behind a higher sequence
    pub out_of_order: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub invalid_packets: AtomicU64,
    /// Decompression and decryption failures
    pub codec_failures: AtomicU64,
    pub fragment_timeouts: AtomicU64,
    pub retransmissions_exhausted: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl ProtocolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Record a packet handed to the transport
    pub fn packet_sent(&self, byte_count: usize) {
        Self::bump(&self.sent);
        Self::add(&self.bytes_sent, byte_count as u64);
    }

    /// Record a packet accepted off the wire
    pub fn packet_received(&self, byte_count: usize) {
        Self::bump(&self.received);
        Self::add(&self.bytes_received, byte_count as u64);
    }

    /// Record a dropped packet; `detail` is the reason-specific counter, if any
    pub fn packet_dropped(&self, detail: Option<&AtomicU64>) {
        Self::bump(&self.dropped);
        if let Some(counter) = detail {
            Self::bump(counter);
        }
    }

    /// Get current counters snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            resent: self.resent.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            fragmented: self.fragmented.load(Ordering::Relaxed),
            batched: self.batched.load(Ordering::Relaxed),
            compressed: self.compressed.load(Ordering::Relaxed),
            encrypted: self.encrypted.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
            fragment_timeouts: self.fragment_timeouts.load(Ordering::Relaxed),
            retransmissions_exhausted: self.retransmissions_exhausted.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub resent: u64,
    pub acknowledged: u64,
    pub dropped: u64,
    pub fragmented: u64,
    pub batched: u64,
    pub compressed: u64,
    pub encrypted: u64,
    pub duplicate: u64,
    pub out_of_order: u64,
    pub checksum_failures: u64,
    pub invalid_packets: u64,
    pub codec_failures: u64,
    pub fragment_timeouts: u64,
    pub retransmissions_exhausted: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl AddAssign for StatsSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        self.sent += rhs.sent;
        self.received += rhs.received;
        self.resent += rhs.resent;
        self.acknowledged += rhs.acknowledged;
        self.dropped += rhs.dropped;
        self.fragmented += rhs.fragmented;
        self.batched += rhs.batched;
        self.compressed += rhs.compressed;
        self.encrypted += rhs.encrypted;
        self.duplicate += rhs.duplicate;
        self.out_of_order += rhs.out_of_order;
        self.checksum_failures += rhs.checksum_failures;
        self.invalid_packets += rhs.invalid_packets;
        self.codec_failures += rhs.codec_failures;
        self.fragment_timeouts += rhs.fragment_timeouts;
        self.retransmissions_exhausted += rhs.retransmissions_exhausted;
        self.bytes_sent += rhs.bytes_sent;
        self.bytes_received += rhs.bytes_received;
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

impl StatsSnapshot {
    /// Log the snapshot as one structured event
    pub fn log(&self, connection: u64) {
        info!(
            connection,
            sent = self.sent,
            received = self.received,
            resent = self.resent,
            acknowledged = self.acknowledged,
            dropped = self.dropped,
            fragmented = self.fragmented,
            batched = self.batched,
            compressed = self.compressed,
            encrypted = self.encrypted,
            duplicate = self.duplicate,
            out_of_order = self.out_of_order,
            checksum_failures = self.checksum_failures,
            codec_failures = self.codec_failures,
            fragment_timeouts = self.fragment_timeouts,
            retransmissions_exhausted = self.retransmissions_exhausted,
            "Connection protocol stats"
        );
    }
}
