//! # Core Protocol Components
//!
//! Low-level packet framing: header layout, checksums, wire packets and
//! the stream codec.
//!
//! ## Wire Format
//! ```text
//! [Op(1)] [Flags(1)] [Size(2)] [Type(2)] [Seq(4)] [Ack(4)] [Checksum(4)] [Payload(N)]
//! ```
//!
//! All integers are big-endian. `Size` covers the whole packet including the
//! header, so a packet can be framed from a byte stream without any other
//! delimiter. The checksum covers the payload only.

pub mod checksum;
pub mod codec;
pub mod header;
pub mod packet;
