//! Values exchanged with the caller of the manager.

use crate::core::header::{Operation, PacketFlags};
use crate::error::DropReason;
use crate::protocol::connection::ConnectionId;

/// Per-send delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Track and retransmit until acknowledged
    pub reliable: bool,
    /// Compress with the connection's negotiated compressor when it pays off
    pub compressed: bool,
    /// Encrypt with the connection's cipher
    pub encrypted: bool,
    /// Deliver in sequence order relative to other ordered packets
    pub ordered: bool,
    /// Never batched and resent before other retransmissions
    pub priority: bool,
    /// May be held briefly and combined with other small packets
    pub batchable: bool,
}

impl SendOptions {
    /// Fire-and-forget.
    pub fn unreliable() -> Self {
        Self::default()
    }

    pub fn reliable() -> Self {
        Self {
            reliable: true,
            ..Self::default()
        }
    }

    pub fn reliable_ordered() -> Self {
        Self {
            reliable: true,
            ordered: true,
            ..Self::default()
        }
    }

    pub fn with_compression(mut self) -> Self {
        self.compressed = true;
        self
    }

    pub fn with_encryption(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn with_priority(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn batchable(mut self) -> Self {
        self.batchable = true;
        self
    }

    /// Header flags implied by the delivery options. Codec flags are set by the
    /// pipeline once it knows whether the transform was applied.
    pub fn delivery_flags(&self) -> PacketFlags {
        let mut flags = PacketFlags::empty();
        flags.set(PacketFlags::RELIABLE, self.reliable);
        flags.set(PacketFlags::ORDERED, self.ordered);
        flags.set(PacketFlags::PRIORITY, self.priority);
        flags
    }
}

/// A logical packet ready for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedPacket {
    pub connection: ConnectionId,
    pub operation: Operation,
    pub packet_type: u16,
    /// Wire sequence that completed this packet (batch or last fragment)
    pub sequence: u32,
    /// Flags as sent, minus `FRAGMENTED`
    pub flags: PacketFlags,
    pub payload: Vec<u8>,
}

/// Conditions the caller should act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A reliable packet was never acknowledged; the entry is gone.
    RetransmissionExhausted {
        connection: ConnectionId,
        sequence: u32,
        packet_type: u16,
    },
    /// Decode failures reached another multiple of the health threshold.
    ConnectionUnhealthy {
        connection: ConnectionId,
        codec_failures: u64,
    },
}

/// What happened to one incoming wire packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// At least one logical packet was delivered.
    Delivered,
    /// Kept for later: an incomplete fragment group or a gap in an ordered stream.
    Buffered,
    /// An acknowledgment was consumed.
    Acknowledged,
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReport {
    pub disposition: Disposition,
    /// Packets handed to the registered callbacks, in delivery order
    pub delivered: Vec<ProcessedPacket>,
    /// Wire packets to send back (acks, pongs)
    pub replies: Vec<Vec<u8>>,
    pub events: Vec<ProtocolEvent>,
}

impl IncomingReport {
    pub(crate) fn dropped(reason: DropReason) -> Self {
        Self {
            disposition: Disposition::Dropped(reason),
            delivered: Vec::new(),
            replies: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// A wire packet the transport should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub connection: ConnectionId,
    pub bytes: Vec<u8>,
}

/// Output of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Retransmissions and timer-flushed batches
    pub outbound: Vec<Outbound>,
    pub events: Vec<ProtocolEvent>,
    /// Ordered packets released because their gap was declared lost
    pub delivered: Vec<ProcessedPacket>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty() && self.delivered.is_empty()
    }
}
