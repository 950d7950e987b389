//! # Error Types
//!
//! Error handling for the packet pipeline.
//!
//! Every failure the pipeline can observe is a variant of [`ProtocolError`].
//! Receive-path failures caused by the remote peer (bad checksum, malformed
//! header, undecodable payload) are never fatal: the manager turns them into a
//! dropped packet plus a counter, and reports the reason through
//! [`DropReason`]. `Err` values are reserved for caller mistakes (unknown
//! connection, oversized payload, unsupported algorithm) and internal faults.
//!
//! ## Error Categories
//! - **Framing Errors**: short or malformed headers, bad batch entries
//! - **Integrity Errors**: checksum mismatch
//! - **Codec Errors**: compression, encryption and decryption failures
//! - **Connection Errors**: unknown or duplicate connection ids
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use game_protocol::core::header::ProtocolHeader;
//! use game_protocol::error::ProtocolError;
//!
//! let result = ProtocolHeader::deserialize(&[0u8; 3]);
//! assert!(matches!(result, Err(ProtocolError::InvalidPacket(_))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_SHORT_HEADER: &str = "buffer shorter than protocol header";
    pub const ERR_UNKNOWN_OPERATION: &str = "unknown operation byte";
    pub const ERR_SIZE_MISMATCH: &str = "header size does not match buffer length";
    pub const ERR_SHORT_FRAGMENT: &str = "fragment payload shorter than fragment header";
    pub const ERR_FRAGMENT_INDEX: &str = "fragment index outside fragment count";
    pub const ERR_FRAGMENT_COUNT: &str = "fragment count disagrees with group";
    pub const ERR_BATCH_ENTRY: &str = "batch entry length exceeds remaining buffer";
    pub const ERR_BATCH_NESTED: &str = "batch entries may not be batches";
    pub const ERR_NOT_CONTROL: &str = "operation is not a control operation";

    /// Codec errors
    pub const ERR_COMPRESSION_FAILED: &str = "compression failed";
    pub const ERR_DECOMPRESSION_FAILED: &str = "decompression failed";
    pub const ERR_DECOMPRESSION_LIMIT: &str = "decompressed size exceeds limit";
    pub const ERR_NO_COMPRESSOR: &str = "no compressor negotiated for connection";
    pub const ERR_ENCRYPTION_FAILED: &str = "encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "decryption failed";
    pub const ERR_CIPHERTEXT_SHORT: &str = "ciphertext shorter than nonce and tag";
    pub const ERR_NO_CIPHER: &str = "no cipher negotiated for connection";
    pub const ERR_RANDOM_SOURCE: &str = "system random source unavailable";

    /// Synchronization
    pub const ERR_LOCK_POISONED: &str = "synchronization primitive poisoned";
}

/// ProtocolError is the primary error type for all pipeline operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid packet: {0}")]
    InvalidPacket(&'static str),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Compression error: {0}")]
    CompressionError(&'static str),

    #[error("Encryption error: {0}")]
    EncryptionError(&'static str),

    #[error("Decryption error: {0}")]
    DecryptionError(&'static str),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unsupported {family} algorithm tag: {tag}")]
    UnsupportedAlgorithm { family: &'static str, tag: u8 },

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),

    #[error("Connection already open: {0}")]
    DuplicateConnection(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why an incoming wire packet (or part of one) was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    InvalidPacket,
    ChecksumMismatch,
    Duplicate,
    Stale,
    CompressionError,
    DecryptionError,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::InvalidPacket => "invalid_packet",
            DropReason::ChecksumMismatch => "checksum_mismatch",
            DropReason::Duplicate => "duplicate",
            DropReason::Stale => "stale",
            DropReason::CompressionError => "compression_error",
            DropReason::DecryptionError => "decryption_error",
        }
    }
}

impl From<&ProtocolError> for DropReason {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::ChecksumMismatch { .. } => DropReason::ChecksumMismatch,
            ProtocolError::CompressionError(_) => DropReason::CompressionError,
            ProtocolError::DecryptionError(_) | ProtocolError::EncryptionError(_) => {
                DropReason::DecryptionError
            }
            _ => DropReason::InvalidPacket,
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_reason_mapping() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(DropReason::from(&err), DropReason::ChecksumMismatch);
        assert_eq!(
            DropReason::from(&ProtocolError::DecryptionError("x")),
            DropReason::DecryptionError
        );
        assert_eq!(
            DropReason::from(&ProtocolError::OversizedPacket(9)),
            DropReason::InvalidPacket
        );
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnsupportedAlgorithm {
            family: "cipher",
            tag: 9,
        };
        assert_eq!(err.to_string(), "Unsupported cipher algorithm tag: 9");
    }
}
