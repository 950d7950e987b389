//! Pluggable payload compression.
//!
//! Algorithms implement [`Compressor`] and are registered under a one-byte tag
//! in a [`CompressionRegistry`]. Both peers agree on the tag during the
//! handshake; the header only says *whether* a payload is compressed.

use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// Tag of the built-in LZ4 compressor.
pub const LZ4_TAG: u8 = 1;
/// Tag of the built-in Zstd compressor.
pub const ZSTD_TAG: u8 = 2;

/// Minimum entropy threshold for compression (0.0-8.0 bits per byte)
/// Data above this threshold is unlikely to compress well
const MIN_ENTROPY_THRESHOLD: f64 = 7.0;

/// A payload compression algorithm.
pub trait Compressor: Send + Sync {
    /// Human-readable algorithm name for logs.
    fn name(&self) -> &'static str;

    /// Compress `data`.
    ///
    /// # Errors
    /// `ProtocolError::CompressionError` if the encoder fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress `data`, refusing to produce more than `expected_size` bytes.
    ///
    /// # Errors
    /// `ProtocolError::CompressionError` on malformed input or when the output
    /// would exceed `expected_size`.
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}

/// LZ4 block compression with the uncompressed size prepended.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(ProtocolError::CompressionError(
                constants::ERR_DECOMPRESSION_FAILED,
            ));
        }

        // lz4_flex prepends the size as 4-byte little-endian; reject before it allocates
        let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if claimed_size > expected_size {
            return Err(ProtocolError::CompressionError(
                constants::ERR_DECOMPRESSION_LIMIT,
            ));
        }

        lz4_flex::decompress_size_prepended(data)
            .map_err(|_| ProtocolError::CompressionError(constants::ERR_DECOMPRESSION_FAILED))
    }
}

/// Zstd stream compression.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        zstd::stream::copy_encode(data, &mut out, self.level)
            .map_err(|_| ProtocolError::CompressionError(constants::ERR_COMPRESSION_FAILED))?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut reader = zstd::stream::Decoder::new(data)
            .map_err(|_| ProtocolError::CompressionError(constants::ERR_DECOMPRESSION_FAILED))?;

        // Read in chunks to enforce the size limit
        let mut out = Vec::new();
        let mut buffer = [0u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buffer[..n]);
                    if out.len() > expected_size {
                        return Err(ProtocolError::CompressionError(
                            constants::ERR_DECOMPRESSION_LIMIT,
                        ));
                    }
                }
                Err(_) => {
                    return Err(ProtocolError::CompressionError(
                        constants::ERR_DECOMPRESSION_FAILED,
                    ))
                }
            }
        }
        Ok(out)
    }
}

/// Tag → compressor lookup shared by all connections.
#[derive(Clone, Default)]
pub struct CompressionRegistry {
    algorithms: HashMap<u8, Arc<dyn Compressor>>,
}

impl CompressionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with LZ4 and Zstd (at `zstd_level`) installed.
    pub fn with_defaults(zstd_level: i32) -> Self {
        let mut registry = Self::new();
        registry.register(LZ4_TAG, Arc::new(Lz4Compressor));
        registry.register(ZSTD_TAG, Arc::new(ZstdCompressor::new(zstd_level)));
        registry
    }

    /// Install or replace the compressor for `tag`.
    pub fn register(&mut self, tag: u8, compressor: Arc<dyn Compressor>) {
        self.algorithms.insert(tag, compressor);
    }

    /// Look up a compressor.
    ///
    /// # Errors
    /// `ProtocolError::UnsupportedAlgorithm` if nothing is registered under `tag`.
    pub fn get(&self, tag: u8) -> Result<Arc<dyn Compressor>> {
        self.algorithms
            .get(&tag)
            .cloned()
            .ok_or(ProtocolError::UnsupportedAlgorithm {
                family: "compression",
                tag,
            })
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.algorithms.contains_key(&tag)
    }
}

impl std::fmt::Debug for CompressionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.algorithms.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("CompressionRegistry")
            .field("tags", &tags)
            .finish()
    }
}

/// Calculate Shannon entropy of data (bits per byte)
/// Returns a value between 0.0 (all identical) and 8.0 (perfectly random)
fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in &freq {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }

    entropy
}

/// Adaptive compression decision based on size and entropy
fn should_compress(data: &[u8], threshold_bytes: usize) -> bool {
    if data.len() < threshold_bytes {
        return false;
    }

    if data.len() < 1024 {
        return true;
    }

    // Sample the first 512 bytes; encrypted or already-compressed data sits near 8 bits/byte
    let sample_size = data.len().min(512);
    calculate_entropy(&data[..sample_size]) < MIN_ENTROPY_THRESHOLD
}

/// Compress when it is likely to pay off and the result is actually smaller.
///
/// Returns the output bytes and whether compression was applied.
pub fn maybe_compress(
    data: &[u8],
    compressor: &dyn Compressor,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if should_compress(data, threshold_bytes) {
        let compressed = compressor.compress(data)?;
        if compressed.len() < data.len() {
            return Ok((compressed, true));
        }
    }
    Ok((data.to_vec(), false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_compression_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = Lz4Compressor.compress(original).unwrap();
        let decompressed = Lz4Compressor.decompress(&compressed, 1024).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_compression_roundtrip() {
        let zstd = ZstdCompressor::default();
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = zstd.compress(original).unwrap();
        let decompressed = zstd.decompress(&compressed, 1024).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_lz4_claimed_size_over_limit() {
        // claims ~3 GB of output
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];
        let result = Lz4Compressor.decompress(&malicious_payload, 1 << 20);
        assert!(matches!(result, Err(ProtocolError::CompressionError(_))));
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let result = Lz4Compressor.decompress(&[0x2b, 0x60], 1024);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_output_limit() {
        let zstd = ZstdCompressor::default();
        let compressed = zstd.compress(&vec![0u8; 100_000]).unwrap();
        assert!(zstd.decompress(&compressed, 10_000).is_err());
        assert_eq!(zstd.decompress(&compressed, 100_000).unwrap().len(), 100_000);
    }

    #[test]
    fn test_malformed_compressed_data() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        assert!(Lz4Compressor.decompress(&malformed, 1024).is_err());
        assert!(ZstdCompressor::default().decompress(&malformed, 1024).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CompressionRegistry::with_defaults(3);
        assert!(registry.contains(LZ4_TAG));
        assert!(registry.contains(ZSTD_TAG));
        assert!(matches!(
            registry.get(42),
            Err(ProtocolError::UnsupportedAlgorithm { tag: 42, .. })
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_below_threshold() {
        let (out, compressed) = maybe_compress(b"tiny", &Lz4Compressor, 64).unwrap();
        assert!(!compressed);
        assert_eq!(out, b"tiny");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_low_entropy() {
        let data = vec![0u8; 2048];
        let (out, compressed) = maybe_compress(&data, &Lz4Compressor, 64).unwrap();
        assert!(compressed);
        assert!(out.len() < data.len());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_high_entropy_skipped() {
        let data: Vec<u8> = (0..=255).cycle().take(2048).collect();
        let (out, compressed) = maybe_compress(&data, &Lz4Compressor, 64).unwrap();
        assert!(!compressed);
        assert_eq!(out, data);
    }

    #[test]
    fn test_entropy_calculation() {
        assert!(calculate_entropy(&[0u8; 100]) < 0.1);
        let spread: Vec<u8> = (0..=255).cycle().take(1000).collect();
        assert!(calculate_entropy(&spread) > 7.0);
    }
}
