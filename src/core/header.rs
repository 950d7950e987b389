//! Fixed-size protocol header.

use crate::error::{constants, ProtocolError, Result};
use std::fmt;

/// Encoded header length in bytes.
pub const HEADER_SIZE: usize = 18;

/// What a wire packet is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Data = 0,
    Ack = 1,
    Fragment = 2,
    Batch = 3,
    Heartbeat = 4,
    Connect = 5,
    Disconnect = 6,
    Ping = 7,
    Pong = 8,
}

impl Operation {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Operation::Data),
            1 => Some(Operation::Ack),
            2 => Some(Operation::Fragment),
            3 => Some(Operation::Batch),
            4 => Some(Operation::Heartbeat),
            5 => Some(Operation::Connect),
            6 => Some(Operation::Disconnect),
            7 => Some(Operation::Ping),
            8 => Some(Operation::Pong),
            _ => None,
        }
    }

    /// Control operations carry no application payload.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Operation::Heartbeat
                | Operation::Connect
                | Operation::Disconnect
                | Operation::Ping
                | Operation::Pong
        )
    }
}

/// Header flag bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const RELIABLE: PacketFlags = PacketFlags(0x01);
    pub const FRAGMENTED: PacketFlags = PacketFlags(0x02);
    pub const COMPRESSED: PacketFlags = PacketFlags(0x04);
    pub const ENCRYPTED: PacketFlags = PacketFlags(0x08);
    pub const BATCH: PacketFlags = PacketFlags(0x10);
    pub const ORDERED: PacketFlags = PacketFlags(0x20);
    pub const PRIORITY: PacketFlags = PacketFlags(0x40);
    pub const CUSTOM: PacketFlags = PacketFlags(0x80);

    pub const fn empty() -> Self {
        PacketFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        PacketFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PacketFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: PacketFlags, enabled: bool) {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub fn is_reliable(self) -> bool {
        self.contains(Self::RELIABLE)
    }

    pub fn is_fragmented(self) -> bool {
        self.contains(Self::FRAGMENTED)
    }

    pub fn is_compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn is_encrypted(self) -> bool {
        self.contains(Self::ENCRYPTED)
    }

    pub fn is_batch(self) -> bool {
        self.contains(Self::BATCH)
    }

    pub fn is_ordered(self) -> bool {
        self.contains(Self::ORDERED)
    }

    pub fn is_priority(self) -> bool {
        self.contains(Self::PRIORITY)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PacketFlags, &str); 8] = [
            (PacketFlags::RELIABLE, "RELIABLE"),
            (PacketFlags::FRAGMENTED, "FRAGMENTED"),
            (PacketFlags::COMPRESSED, "COMPRESSED"),
            (PacketFlags::ENCRYPTED, "ENCRYPTED"),
            (PacketFlags::BATCH, "BATCH"),
            (PacketFlags::ORDERED, "ORDERED"),
            (PacketFlags::PRIORITY, "PRIORITY"),
            (PacketFlags::CUSTOM, "CUSTOM"),
        ];
        let mut list = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

/// Decoded wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub operation: Operation,
    pub flags: PacketFlags,
    /// Total wire length including this header.
    pub size: u16,
    pub packet_type: u16,
    pub sequence: u32,
    /// Sequence being acknowledged; only meaningful for Ack and Pong.
    pub ack: u32,
    /// CRC-32 of the payload.
    pub checksum: u32,
}

impl ProtocolHeader {
    pub fn new(operation: Operation, flags: PacketFlags, packet_type: u16) -> Self {
        Self {
            operation,
            flags,
            size: HEADER_SIZE as u16,
            packet_type,
            sequence: 0,
            ack: 0,
            checksum: 0,
        }
    }

    /// Encode into the fixed big-endian layout.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.operation as u8;
        out[1] = self.flags.bits();
        out[2..4].copy_from_slice(&self.size.to_be_bytes());
        out[4..6].copy_from_slice(&self.packet_type.to_be_bytes());
        out[6..10].copy_from_slice(&self.sequence.to_be_bytes());
        out[10..14].copy_from_slice(&self.ack.to_be_bytes());
        out[14..18].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }

    /// Decode a header from the front of `bytes`.
    ///
    /// Returns the header and the number of bytes consumed.
    ///
    /// # Errors
    /// `ProtocolError::InvalidPacket` if fewer than [`HEADER_SIZE`] bytes are
    /// available or the operation byte is unknown.
    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(constants::ERR_SHORT_HEADER));
        }

        let operation = Operation::from_byte(bytes[0])
            .ok_or(ProtocolError::InvalidPacket(constants::ERR_UNKNOWN_OPERATION))?;

        let header = Self {
            operation,
            flags: PacketFlags::from_bits(bytes[1]),
            size: u16::from_be_bytes([bytes[2], bytes[3]]),
            packet_type: u16::from_be_bytes([bytes[4], bytes[5]]),
            sequence: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            ack: u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
            checksum: u32::from_be_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]),
        };

        Ok((header, HEADER_SIZE))
    }

    /// Payload length implied by the size field.
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}
