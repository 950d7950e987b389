//! # Packet Pipeline
//!
//! Stages between raw wire packets and application payloads.
//!
//! ## Send path
//! compress → encrypt → fragment or batch → sequence → track if reliable → serialize
//!
//! ## Receive path
//! parse → checksum → receive window → ack / reassemble / unbatch → decrypt →
//! decompress → ordered hold-back → callbacks
//!
//! ## Components
//! - **Fragment**: splitting and reassembly of oversized payloads
//! - **Batch**: coalescing small packets into one wire packet
//! - **Reliability**: retransmission tracking and the ordered hold-back buffer
//! - **Connection**: per-connection state and the pipelines above
//! - **Dispatcher**: processed-packet callbacks
//! - **Manager**: the shared entry point and maintenance task

pub mod batch;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod fragment;
pub mod manager;
pub mod reliability;

pub use connection::{ConnectionId, ConnectionParams};
pub use events::{
    Disposition, IncomingReport, Outbound, ProcessedPacket, ProtocolEvent, SendOptions,
    TickReport,
};
pub use manager::ProtocolManager;
