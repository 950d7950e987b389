//! Per-connection protocol state and the send/receive pipelines that run
//! under its lock.
//!
//! Everything here is synchronous buffer work. The manager owns the locking,
//! the connection table and callback dispatch.

use crate::config::ProtocolConfig;
use crate::core::header::{Operation, PacketFlags, HEADER_SIZE};
use crate::core::packet::WirePacket;
use crate::error::{constants, DropReason, ProtocolError, Result};
use crate::protocol::batch::{unbatch, BatchBuffer};
use crate::protocol::events::{
    Disposition, IncomingReport, ProcessedPacket, ProtocolEvent, SendOptions,
};
use crate::protocol::fragment::{fragment, Fragment, FragmentAssembler};
use crate::protocol::reliability::{OrderedBuffer, ReliabilityTracker};
use crate::utils::compression::{maybe_compress, Compressor};
use crate::utils::crypto::{Cipher, SessionKey};
use crate::utils::metrics::ProtocolStats;
use crate::utils::replay_window::{ReceiveWindow, WindowVerdict};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Largest nonce plus tag a cipher adds to a payload.
const CIPHER_OVERHEAD: usize = 64;

/// Transport-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        ConnectionId(id)
    }
}

/// Codec choices negotiated by the handshake.
#[derive(Clone, Default)]
pub struct ConnectionParams {
    /// Compression registry tag
    pub compression: Option<u8>,
    /// Cipher registry tag and session key
    pub cipher: Option<(u8, SessionKey)>,
}

impl ConnectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, tag: u8) -> Self {
        self.compression = Some(tag);
        self
    }

    pub fn with_cipher(mut self, tag: u8, key: SessionKey) -> Self {
        self.cipher = Some((tag, key));
        self
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("compression", &self.compression)
            .field("cipher", &self.cipher.as_ref().map(|(tag, _)| tag))
            .finish()
    }
}

/// Limits copied out of the configuration when the connection opens.
#[derive(Debug, Clone)]
struct PipelineSettings {
    max_fragment_size: usize,
    compression_threshold: usize,
    max_payload_size: usize,
    health_report_threshold: u64,
    batching: bool,
    flush_interval: Duration,
}

/// A live connection: state behind one lock, counters outside it.
pub struct Connection {
    pub id: ConnectionId,
    pub(crate) state: Mutex<ConnectionProtocolState>,
    pub stats: ProtocolStats,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        config: &ProtocolConfig,
        compressor: Option<Arc<dyn Compressor>>,
        cipher: Option<Box<dyn Cipher>>,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionProtocolState::new(id, config, compressor, cipher)),
            stats: ProtocolStats::new(),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ConnectionProtocolState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Everything one connection needs to sequence, reassemble and order packets.
pub struct ConnectionProtocolState {
    id: ConnectionId,
    next_sequence: u32,
    next_group_id: u32,
    window: ReceiveWindow,
    reliability: ReliabilityTracker,
    assembler: FragmentAssembler,
    batch: BatchBuffer,
    ordered: OrderedBuffer<ProcessedPacket>,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Box<dyn Cipher>>,
    settings: PipelineSettings,
}

/// Output of one maintenance pass over a connection.
#[derive(Debug, Default)]
pub(crate) struct Maintenance {
    pub outbound: Vec<Vec<u8>>,
    pub events: Vec<ProtocolEvent>,
    pub delivered: Vec<ProcessedPacket>,
}

/// Where a decoded logical packet goes next.
enum Delivery {
    Now(ProcessedPacket),
    /// Ordered; may not pass sequence `key`
    Ordered(u32, ProcessedPacket),
}

impl ConnectionProtocolState {
    fn new(
        id: ConnectionId,
        config: &ProtocolConfig,
        compressor: Option<Arc<dyn Compressor>>,
        cipher: Option<Box<dyn Cipher>>,
    ) -> Self {
        let settings = PipelineSettings {
            max_fragment_size: config.fragmentation.max_fragment_size,
            compression_threshold: config.codec.compression_threshold_bytes,
            max_payload_size: config.codec.max_payload_size,
            health_report_threshold: config.codec.health_report_threshold.max(1),
            batching: config.batching.enabled,
            flush_interval: config.batching.flush_interval,
        };

        Self {
            id,
            next_sequence: 0,
            next_group_id: 0,
            window: ReceiveWindow::with_width(config.ordering.receive_window),
            reliability: ReliabilityTracker::new(
                config.reliability.retransmit_interval,
                config.reliability.max_retries,
            ),
            assembler: FragmentAssembler::new(
                config.fragmentation.fragment_timeout,
                config.fragmentation.max_pending_groups,
                config.codec.max_payload_size + CIPHER_OVERHEAD,
            ),
            batch: BatchBuffer::new(config.batching.max_batch_size.saturating_sub(HEADER_SIZE)),
            ordered: OrderedBuffer::new(
                config.ordering.release_timeout,
                config.ordering.max_held_packets,
            ),
            compressor,
            cipher,
            settings,
        }
    }

    /// Sequence numbers are never reused within a connection's lifetime.
    fn take_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    fn take_group_id(&mut self) -> u32 {
        let group_id = self.next_group_id;
        self.next_group_id = self.next_group_id.wrapping_add(1);
        group_id
    }

    /// Sequence the next wire packet will use.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn pending_reliable(&self) -> usize {
        self.reliability.pending()
    }

    pub fn pending_fragment_groups(&self) -> usize {
        self.assembler.pending_groups()
    }

    pub fn held_ordered(&self) -> usize {
        self.ordered.len()
    }

    pub fn pending_batch(&self) -> usize {
        self.batch.len()
    }

    /// Sequence, register and serialize one wire packet.
    fn emit(
        &mut self,
        operation: Operation,
        flags: PacketFlags,
        packet_type: u16,
        payload: Vec<u8>,
        stats: &ProtocolStats,
        now: Instant,
    ) -> Result<Vec<u8>> {
        // a packet that fails to build must not leave a sequence gap
        let sequence = self.next_sequence;
        let bytes = WirePacket::new(operation, flags, packet_type, sequence, payload)?.to_bytes();
        self.take_sequence();
        if flags.is_reliable() {
            self.reliability
                .track(sequence, bytes.clone(), packet_type, flags.is_priority(), now);
        }
        stats.packet_sent(bytes.len());
        Ok(bytes)
    }

    /// Compress then encrypt, setting the codec flags actually applied.
    fn encode_payload(
        &self,
        payload: &[u8],
        options: &SendOptions,
        flags: &mut PacketFlags,
        stats: &ProtocolStats,
    ) -> Result<Vec<u8>> {
        let mut body = payload.to_vec();

        if options.compressed {
            let compressor = self
                .compressor
                .as_deref()
                .ok_or(ProtocolError::CompressionError(constants::ERR_NO_COMPRESSOR))?;
            let (out, applied) =
                maybe_compress(&body, compressor, self.settings.compression_threshold)?;
            if applied {
                flags.insert(PacketFlags::COMPRESSED);
                ProtocolStats::bump(&stats.compressed);
                body = out;
            }
        }

        if options.encrypted {
            let cipher = self
                .cipher
                .as_deref()
                .ok_or(ProtocolError::EncryptionError(constants::ERR_NO_CIPHER))?;
            body = cipher.encrypt(&body)?;
            flags.insert(PacketFlags::ENCRYPTED);
            ProtocolStats::bump(&stats.encrypted);
        }

        Ok(body)
    }

    pub(crate) fn outgoing(
        &mut self,
        payload: &[u8],
        packet_type: u16,
        options: SendOptions,
        stats: &ProtocolStats,
        now: Instant,
    ) -> Result<Vec<Vec<u8>>> {
        if payload.len() > self.settings.max_payload_size {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        let mut flags = options.delivery_flags();
        let body = self.encode_payload(payload, &options, &mut flags, stats)?;
        let mut out = Vec::new();

        if body.len() > self.settings.max_fragment_size {
            // keep submission order: anything batched earlier goes first
            out.extend(self.flush_batch(stats, now)?);

            let group_id = self.take_group_id();
            let fragments = fragment(&body, self.settings.max_fragment_size, group_id)?;
            debug!(
                connection = %self.id,
                group_id,
                count = fragments.len(),
                size = body.len(),
                "Fragmenting payload"
            );
            let fragment_flags = flags | PacketFlags::FRAGMENTED;
            for piece in &fragments {
                let bytes = self.emit(
                    Operation::Fragment,
                    fragment_flags,
                    packet_type,
                    piece.encode(),
                    stats,
                    now,
                )?;
                ProtocolStats::bump(&stats.fragmented);
                out.push(bytes);
            }
            return Ok(out);
        }

        let batchable = self.settings.batching && options.batchable && !options.priority;
        if batchable && self.batch.accepts(HEADER_SIZE + body.len()) {
            let entry = WirePacket::new(Operation::Data, flags, packet_type, 0, body)?.to_bytes();
            if !self.batch.fits(entry.len()) {
                out.extend(self.flush_batch(stats, now)?);
            }
            self.batch.add(entry, flags, now);
            ProtocolStats::bump(&stats.batched);
            if self.batch.is_full() {
                out.extend(self.flush_batch(stats, now)?);
            }
            return Ok(out);
        }

        out.extend(self.flush_batch(stats, now)?);
        out.push(self.emit(Operation::Data, flags, packet_type, body, stats, now)?);
        Ok(out)
    }

    /// Seal the pending batch into one wire packet.
    pub(crate) fn flush_batch(
        &mut self,
        stats: &ProtocolStats,
        now: Instant,
    ) -> Result<Option<Vec<u8>>> {
        let flags = self.batch.flags() | PacketFlags::BATCH;
        let entries = self.batch.len();
        let Some(body) = self.batch.flush() else {
            return Ok(None);
        };
        trace!(connection = %self.id, entries, "Flushing batch");
        self.emit(Operation::Batch, flags, 0, body, stats, now)
            .map(Some)
    }

    /// Heartbeat, Ping, Pong, Connect or Disconnect with an empty payload.
    pub(crate) fn control(
        &mut self,
        operation: Operation,
        stats: &ProtocolStats,
        now: Instant,
    ) -> Result<Vec<u8>> {
        if !operation.is_control() {
            return Err(ProtocolError::InvalidPacket(constants::ERR_NOT_CONTROL));
        }
        self.emit(operation, PacketFlags::empty(), 0, Vec::new(), stats, now)
    }

    fn ack(&mut self, acked: u32, stats: &ProtocolStats) -> Vec<u8> {
        let sequence = self.take_sequence();
        let bytes = WirePacket::ack(sequence, acked).to_bytes();
        stats.packet_sent(bytes.len());
        bytes
    }

    fn pong(&mut self, ping: u32, stats: &ProtocolStats) -> Result<Vec<u8>> {
        let mut packet = WirePacket::new(
            Operation::Pong,
            PacketFlags::empty(),
            0,
            self.next_sequence,
            Vec::new(),
        )?;
        self.take_sequence();
        packet.header.ack = ping;
        let bytes = packet.to_bytes();
        stats.packet_sent(bytes.len());
        Ok(bytes)
    }

    /// Decrypt then decompress according to `flags`.
    fn decode_payload(&self, data: Vec<u8>, flags: PacketFlags) -> Result<Vec<u8>> {
        let mut data = data;

        if flags.is_encrypted() {
            let cipher = self
                .cipher
                .as_deref()
                .ok_or(ProtocolError::DecryptionError(constants::ERR_NO_CIPHER))?;
            data = cipher.decrypt(&data, self.settings.max_payload_size)?;
        }

        if flags.is_compressed() {
            let compressor = self
                .compressor
                .as_deref()
                .ok_or(ProtocolError::CompressionError(constants::ERR_NO_COMPRESSOR))?;
            data = compressor.decompress(&data, self.settings.max_payload_size)?;
        }

        Ok(data)
    }

    /// Count a dropped packet or entry and pick the counter for `reason`.
    fn record_drop(
        &self,
        reason: DropReason,
        stats: &ProtocolStats,
        events: &mut Vec<ProtocolEvent>,
    ) {
        match reason {
            DropReason::ChecksumMismatch => stats.packet_dropped(Some(&stats.checksum_failures)),
            DropReason::InvalidPacket => stats.packet_dropped(Some(&stats.invalid_packets)),
            DropReason::Duplicate | DropReason::Stale => {
                stats.packet_dropped(Some(&stats.duplicate))
            }
            DropReason::CompressionError | DropReason::DecryptionError => {
                stats.packet_dropped(Some(&stats.codec_failures));
                let failures = stats.codec_failures.load(Ordering::Relaxed);
                if failures % self.settings.health_report_threshold == 0 {
                    warn!(
                        connection = %self.id,
                        codec_failures = failures,
                        "Connection reporting repeated decode failures"
                    );
                    events.push(ProtocolEvent::ConnectionUnhealthy {
                        connection: self.id,
                        codec_failures: failures,
                    });
                }
            }
        }
    }

    pub(crate) fn incoming(
        &mut self,
        bytes: &[u8],
        stats: &ProtocolStats,
        now: Instant,
    ) -> IncomingReport {
        let mut events = Vec::new();

        let packet = match WirePacket::from_bytes(bytes).and_then(|p| p.verify().map(|_| p)) {
            Ok(packet) => packet,
            Err(err) => {
                let reason = DropReason::from(&err);
                debug!(connection = %self.id, %reason, error = %err, "Dropping incoming packet");
                self.record_drop(reason, stats, &mut events);
                let mut report = IncomingReport::dropped(reason);
                report.events = events;
                return report;
            }
        };

        stats.packet_received(bytes.len());
        let header = packet.header;
        let mut replies = Vec::new();

        match self.window.accept(header.sequence) {
            WindowVerdict::Fresh { reordered } => {
                if reordered {
                    ProtocolStats::bump(&stats.out_of_order);
                }
            }
            verdict => {
                let reason = if verdict == WindowVerdict::Duplicate {
                    DropReason::Duplicate
                } else {
                    DropReason::Stale
                };
                trace!(connection = %self.id, sequence = header.sequence, %reason, "Dropping repeated packet");
                self.record_drop(reason, stats, &mut events);
                // the first ack may have been lost
                if reason == DropReason::Duplicate && header.flags.is_reliable() {
                    replies.push(self.ack(header.sequence, stats));
                }
                let mut report = IncomingReport::dropped(reason);
                report.replies = replies;
                report.events = events;
                return report;
            }
        }

        if header.flags.is_reliable() && header.operation != Operation::Ack {
            replies.push(self.ack(header.sequence, stats));
        }

        let mut deliveries = Vec::new();
        let mut drop_reason = None;
        let mut acknowledged = false;
        let mut buffered = false;

        match header.operation {
            Operation::Ack => {
                if self.reliability.acknowledge(header.ack) {
                    ProtocolStats::bump(&stats.acknowledged);
                }
                acknowledged = true;
            }
            Operation::Fragment => {
                let reassembled = Fragment::decode(&packet.payload).and_then(|piece| {
                    self.assembler.reassemble(
                        piece,
                        header.sequence,
                        header.flags,
                        header.packet_type,
                        now,
                    )
                });
                ProtocolStats::add(&stats.fragment_timeouts, self.assembler.take_evicted());

                match reassembled {
                    Ok(Some(done)) => match self.decode_payload(done.payload, done.flags) {
                        Ok(payload) => deliveries.push(self.route(
                            ProcessedPacket {
                                connection: self.id,
                                operation: Operation::Data,
                                packet_type: done.packet_type,
                                sequence: done.max_sequence,
                                flags: done.flags,
                                payload,
                            },
                            done.max_sequence,
                        )),
                        Err(err) => drop_reason = Some(self.reject(&err, stats, &mut events)),
                    },
                    Ok(None) => buffered = true,
                    Err(err) => drop_reason = Some(self.reject(&err, stats, &mut events)),
                }
            }
            Operation::Batch => {
                let unbatched = unbatch(&packet.payload);
                if unbatched.malformed {
                    let err = ProtocolError::InvalidPacket(constants::ERR_BATCH_ENTRY);
                    drop_reason = Some(self.reject(&err, stats, &mut events));
                }
                for entry in unbatched.entries {
                    match self.open_batch_entry(&entry, header.sequence) {
                        Ok(delivery) => deliveries.push(delivery),
                        Err(err) => drop_reason = Some(self.reject(&err, stats, &mut events)),
                    }
                }
            }
            operation => {
                if operation == Operation::Ping {
                    match self.pong(header.sequence, stats) {
                        Ok(pong) => replies.push(pong),
                        Err(err) => warn!(connection = %self.id, error = %err, "Failed to build pong"),
                    }
                }
                match self.decode_payload(packet.payload, header.flags) {
                    Ok(payload) => deliveries.push(self.route(
                        ProcessedPacket {
                            connection: self.id,
                            operation,
                            packet_type: header.packet_type,
                            sequence: header.sequence,
                            flags: header.flags,
                            payload,
                        },
                        header.sequence,
                    )),
                    Err(err) => drop_reason = Some(self.reject(&err, stats, &mut events)),
                }
            }
        }

        let mut delivered = Vec::new();
        for delivery in deliveries {
            match delivery {
                Delivery::Now(packet) => delivered.push(packet),
                Delivery::Ordered(key, packet) => {
                    if key < self.window.next_expected() {
                        delivered.push(packet);
                    } else {
                        trace!(connection = %self.id, key, "Holding ordered packet");
                        self.ordered.hold(key, vec![packet], now);
                        buffered = true;
                    }
                }
            }
        }
        delivered.extend(self.ordered.release_ready(self.window.next_expected()));

        let disposition = if !delivered.is_empty() {
            Disposition::Delivered
        } else if let Some(reason) = drop_reason {
            Disposition::Dropped(reason)
        } else if acknowledged {
            Disposition::Acknowledged
        } else if buffered {
            Disposition::Buffered
        } else {
            Disposition::Delivered
        };

        IncomingReport {
            disposition,
            delivered,
            replies,
            events,
        }
    }

    fn route(&self, packet: ProcessedPacket, key: u32) -> Delivery {
        if packet.flags.is_ordered() {
            Delivery::Ordered(key, packet)
        } else {
            Delivery::Now(packet)
        }
    }

    fn reject(
        &self,
        err: &ProtocolError,
        stats: &ProtocolStats,
        events: &mut Vec<ProtocolEvent>,
    ) -> DropReason {
        let reason = DropReason::from(err);
        debug!(connection = %self.id, %reason, error = %err, "Dropping undecodable payload");
        self.record_drop(reason, stats, events);
        reason
    }

    /// Verify and decode one batch entry carried by wire packet `sequence`.
    fn open_batch_entry(&self, entry: &[u8], sequence: u32) -> Result<Delivery> {
        let inner = WirePacket::decode(entry)?;
        let operation = inner.header.operation;
        if matches!(
            operation,
            Operation::Batch | Operation::Fragment | Operation::Ack
        ) {
            return Err(ProtocolError::InvalidPacket(constants::ERR_BATCH_NESTED));
        }

        let payload = self.decode_payload(inner.payload, inner.header.flags)?;
        Ok(self.route(
            ProcessedPacket {
                connection: self.id,
                operation,
                packet_type: inner.header.packet_type,
                sequence,
                flags: inner.header.flags,
                payload,
            },
            sequence,
        ))
    }

    pub(crate) fn maintain(&mut self, stats: &ProtocolStats, now: Instant) -> Result<Maintenance> {
        let mut report = Maintenance::default();

        let poll = self.reliability.poll_retransmits(now);
        for resend in poll.resend {
            trace!(
                connection = %self.id,
                sequence = resend.sequence,
                retries = resend.retries,
                "Retransmitting reliable packet"
            );
            ProtocolStats::bump(&stats.resent);
            ProtocolStats::add(&stats.bytes_sent, resend.bytes.len() as u64);
            report.outbound.push(resend.bytes);
        }
        for gone in poll.exhausted {
            ProtocolStats::bump(&stats.retransmissions_exhausted);
            report.events.push(ProtocolEvent::RetransmissionExhausted {
                connection: self.id,
                sequence: gone.sequence,
                packet_type: gone.packet_type,
            });
        }

        let expired = self.assembler.expire(now) as u64 + self.assembler.take_evicted();
        ProtocolStats::add(&stats.fragment_timeouts, expired);

        let batch_due = self
            .batch
            .age(now)
            .is_some_and(|age| age >= self.settings.flush_interval);
        if batch_due {
            report.outbound.extend(self.flush_batch(stats, now)?);
        }

        while let Some(key) = self.ordered.overdue_key(now) {
            debug!(
                connection = %self.id,
                through = key,
                waiting_for = self.window.next_expected(),
                "Releasing ordered packets past a lost gap"
            );
            self.window.skip_through(key);
            report.delivered.extend(self.ordered.release_through(key));
            report
                .delivered
                .extend(self.ordered.release_ready(self.window.next_expected()));
        }

        Ok(report)
    }
}

impl fmt::Debug for ConnectionProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProtocolState")
            .field("id", &self.id)
            .field("next_sequence", &self.next_sequence)
            .field("window", &self.window)
            .field("pending_reliable", &self.reliability.pending())
            .field("pending_fragment_groups", &self.assembler.pending_groups())
            .field("pending_batch", &self.batch.len())
            .field("held_ordered", &self.ordered.len())
            .field("compressor", &self.compressor.as_ref().map(|c| c.name()))
            .field("cipher", &self.cipher.as_ref().map(|c| c.name()))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::utils::compression::Lz4Compressor;
    use crate::utils::crypto::XChaCha20Poly1305Cipher;

    fn state(config: &ProtocolConfig) -> ConnectionProtocolState {
        ConnectionProtocolState::new(
            ConnectionId(1),
            config,
            Some(Arc::new(Lz4Compressor)),
            Some(Box::new(XChaCha20Poly1305Cipher::new(&[9u8; 32]))),
        )
    }

    #[test]
    fn test_sequences_cover_every_wire_packet() {
        let config = ProtocolConfig::default();
        let stats = ProtocolStats::new();
        let mut sender = state(&config);
        let now = Instant::now();

        let first = sender
            .outgoing(b"a", 1, SendOptions::unreliable(), &stats, now)
            .unwrap();
        let control = sender.control(Operation::Heartbeat, &stats, now).unwrap();
        let second = sender
            .outgoing(b"b", 1, SendOptions::reliable(), &stats, now)
            .unwrap();

        let sequences: Vec<u32> = [&first[0], &control, &second[0]]
            .iter()
            .map(|b| WirePacket::from_bytes(b).unwrap().header.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(sender.pending_reliable(), 1);
        assert_eq!(stats.snapshot().sent, 3);
    }

    #[test]
    fn test_codec_flags_reflect_applied_transforms() {
        let config = ProtocolConfig::default();
        let stats = ProtocolStats::new();
        let mut sender = state(&config);
        let now = Instant::now();

        // too small to compress; the flag must be cleared
        let options = SendOptions::unreliable().with_compression().with_encryption();
        let bytes = sender.outgoing(b"tiny", 2, options, &stats, now).unwrap();
        let flags = WirePacket::from_bytes(&bytes[0]).unwrap().header.flags;
        assert!(!flags.is_compressed());
        assert!(flags.is_encrypted());

        let bytes = sender
            .outgoing(&[0u8; 1000], 2, options, &stats, now)
            .unwrap();
        let flags = WirePacket::from_bytes(&bytes[0]).unwrap().header.flags;
        assert!(flags.is_compressed());
        assert!(flags.is_encrypted());
    }

    #[test]
    fn test_missing_codec_is_an_error() {
        let config = ProtocolConfig::default();
        let stats = ProtocolStats::new();
        let mut sender = ConnectionProtocolState::new(ConnectionId(2), &config, None, None);
        let now = Instant::now();

        let result = sender.outgoing(
            b"x",
            1,
            SendOptions::unreliable().with_encryption(),
            &stats,
            now,
        );
        assert!(matches!(result, Err(ProtocolError::EncryptionError(_))));
        let result = sender.outgoing(
            b"x",
            1,
            SendOptions::unreliable().with_compression(),
            &stats,
            now,
        );
        assert!(matches!(result, Err(ProtocolError::CompressionError(_))));
    }

    #[test]
    fn test_control_rejects_data_operations() {
        let config = ProtocolConfig::default();
        let stats = ProtocolStats::new();
        let mut sender = state(&config);
        assert!(sender
            .control(Operation::Data, &stats, Instant::now())
            .is_err());
        assert_eq!(sender.next_sequence(), 0);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let config = ProtocolConfig::default();
        let (a_stats, b_stats) = (ProtocolStats::new(), ProtocolStats::new());
        let mut a = state(&config);
        let mut b = state(&config);
        let now = Instant::now();

        let ping = a.control(Operation::Ping, &a_stats, now).unwrap();
        let report = b.incoming(&ping, &b_stats, now);
        assert_eq!(report.delivered[0].operation, Operation::Ping);
        assert_eq!(report.replies.len(), 1);

        let pong = WirePacket::decode(&report.replies[0]).unwrap();
        assert_eq!(pong.header.operation, Operation::Pong);
        assert_eq!(pong.header.ack, 0);
    }

    #[test]
    fn test_ordered_gap_released_by_timeout() {
        let config = ProtocolConfig::default();
        let (a_stats, b_stats) = (ProtocolStats::new(), ProtocolStats::new());
        let mut a = state(&config);
        let mut b = state(&config);
        let start = Instant::now();

        let ordered = SendOptions {
            ordered: true,
            ..SendOptions::default()
        };
        let _lost = a.outgoing(b"one", 1, ordered, &a_stats, start).unwrap();
        let kept = a.outgoing(b"two", 1, ordered, &a_stats, start).unwrap();

        let report = b.incoming(&kept[0], &b_stats, start);
        assert_eq!(report.disposition, Disposition::Buffered);
        assert_eq!(b.held_ordered(), 1);

        let early = b.maintain(&b_stats, start + Duration::from_millis(500)).unwrap();
        assert!(early.delivered.is_empty());

        let late = b.maintain(&b_stats, start + config.ordering.release_timeout).unwrap();
        assert_eq!(late.delivered.len(), 1);
        assert_eq!(late.delivered[0].payload, b"two");
        assert_eq!(b.held_ordered(), 0);
    }
}
