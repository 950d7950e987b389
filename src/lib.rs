//! # game-protocol
//!
//! Packet processing pipeline for persistent client/server game connections.
//!
//! The crate sits between the transport and the application. It turns
//! application payloads into wire packets and back, handling:
//!
//! - fixed 18-byte header framing with a CRC-32 payload checksum
//! - fragmentation and reassembly of payloads larger than one packet
//! - pluggable compression (LZ4, Zstd) and encryption (ChaCha20-Poly1305)
//! - reliable delivery with acknowledgments and retransmission
//! - duplicate and replay rejection with a sliding receive window
//! - ordered delivery with a bounded hold-back buffer
//! - batching of small packets
//!
//! Sockets, TLS and key exchange are left to the caller. The pipeline only
//! transforms byte buffers, so it works over UDP, TCP (see
//! [`WireCodec`](crate::core::codec::WireCodec)) or anything else.
//!
//! ## Quick start
//! ```rust
//! use game_protocol::{ConnectionId, ConnectionParams, ProtocolConfig, ProtocolManager, SendOptions};
//!
//! let manager = ProtocolManager::new(ProtocolConfig::default())?;
//! manager.open_connection(ConnectionId(1), ConnectionParams::new())?;
//! let wire = manager.process_outgoing(ConnectionId(1), b"hi", 1, SendOptions::reliable())?;
//! assert_eq!(wire.len(), 1);
//! # Ok::<(), game_protocol::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::ProtocolConfig;
pub use error::{DropReason, ProtocolError, Result};
pub use protocol::{
    ConnectionId, ConnectionParams, Disposition, IncomingReport, Outbound, ProcessedPacket,
    ProtocolEvent, ProtocolManager, SendOptions, TickReport,
};
pub use utils::metrics::StatsSnapshot;
