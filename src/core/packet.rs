use crate::config::MAX_WIRE_PACKET_SIZE;
use crate::core::checksum::{compute_checksum, verify_checksum};
use crate::core::header::{Operation, PacketFlags, ProtocolHeader, HEADER_SIZE};
use crate::error::{constants, ProtocolError, Result};

/// A framed packet: header plus payload, the unit exchanged with the transport.
///
/// `header.size` always equals `HEADER_SIZE + payload.len()` and
/// `header.checksum` is the checksum of `payload` for packets built with
/// [`WirePacket::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    pub header: ProtocolHeader,
    pub payload: Vec<u8>,
}

impl WirePacket {
    /// Build a packet, stamping size and checksum.
    ///
    /// # Errors
    /// `ProtocolError::OversizedPacket` if the packet does not fit the 16-bit size field.
    pub fn new(
        operation: Operation,
        flags: PacketFlags,
        packet_type: u16,
        sequence: u32,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let total = HEADER_SIZE + payload.len();
        if total > MAX_WIRE_PACKET_SIZE {
            return Err(ProtocolError::OversizedPacket(total));
        }

        let mut header = ProtocolHeader::new(operation, flags, packet_type);
        header.size = total as u16;
        header.sequence = sequence;
        header.checksum = compute_checksum(&payload);

        Ok(Self { header, payload })
    }

    /// Acknowledgment for `acked` sent with our own `sequence`.
    pub fn ack(sequence: u32, acked: u32) -> Self {
        let mut header = ProtocolHeader::new(Operation::Ack, PacketFlags::empty(), 0);
        header.sequence = sequence;
        header.ack = acked;
        header.checksum = compute_checksum(&[]);
        Self {
            header,
            payload: Vec::new(),
        }
    }

    /// Serialize header and payload into one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.serialize());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a complete wire packet. The checksum is not verified here.
    ///
    /// # Errors
    /// `ProtocolError::InvalidPacket` for a short header, unknown operation, or
    /// a size field that disagrees with the buffer length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, consumed) = ProtocolHeader::deserialize(bytes)?;

        if header.size as usize != bytes.len() {
            return Err(ProtocolError::InvalidPacket(constants::ERR_SIZE_MISMATCH));
        }

        Ok(Self {
            header,
            payload: bytes[consumed..].to_vec(),
        })
    }

    /// Parse and verify the payload checksum.
    ///
    /// # Errors
    /// As [`WirePacket::from_bytes`], plus `ProtocolError::ChecksumMismatch`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let packet = Self::from_bytes(bytes)?;
        packet.verify()?;
        Ok(packet)
    }

    /// Check the payload against the header checksum.
    pub fn verify(&self) -> Result<()> {
        if verify_checksum(&self.payload, self.header.checksum) {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch {
                expected: self.header.checksum,
                actual: compute_checksum(&self.payload),
            })
        }
    }

    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
