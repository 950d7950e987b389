//! # Utility Modules
//!
//! Supporting pieces shared by the pipeline stages.
//!
//! ## Components
//! - **Compression**: `Compressor` trait, LZ4 and Zstd, tag registry, adaptive decision
//! - **Crypto**: `Cipher` trait, ChaCha20-Poly1305 variants, tag registry
//! - **Logging**: `tracing-subscriber` setup
//! - **Metrics**: per-connection atomic counters and snapshots
//! - **Replay Window**: sliding duplicate/stale detection and contiguous tracking
//!
//! ## Security
//! - Random nonces from the OS source (getrandom)
//! - Decompression bomb protection via an output limit
//! - Session keys zeroed on drop (zeroize)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod replay_window;

pub use compression::{CompressionRegistry, Compressor};
pub use crypto::{Cipher, CipherRegistry, SessionKey};
pub use metrics::{ProtocolStats, StatsSnapshot};
pub use replay_window::{ReceiveWindow, WindowVerdict};
