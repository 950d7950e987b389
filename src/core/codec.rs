//! Stream framing for wire packets.
//!
//! Datagram transports hand whole packets to the manager directly. Stream
//! transports (TCP, pipes) use [`WireCodec`] with `tokio_util::codec::Framed`
//! to cut the byte stream at header `size` boundaries.

use crate::core::header::HEADER_SIZE;
use crate::error::{constants, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Offset and width of the `size` field inside the header.
const SIZE_OFFSET: usize = 2;
const SIZE_END: usize = 4;

/// Length-delimited framing driven by the header `size` field.
///
/// Decoded frames are complete raw wire packets, checksum not yet verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SIZE_END {
            return Ok(None);
        }

        let size = u16::from_be_bytes([src[SIZE_OFFSET], src[SIZE_END - 1]]) as usize;
        if size < HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(constants::ERR_SIZE_MISMATCH));
        }

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(size).freeze()))
    }
}

impl Encoder<Vec<u8>> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(constants::ERR_SHORT_HEADER));
        }
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
