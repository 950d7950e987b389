//! Payload checksum (CRC-32, IEEE polynomial).

/// Calculate the checksum of a packet payload.
#[inline]
pub fn compute_checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Check a payload against the checksum carried in its header.
#[inline]
pub fn verify_checksum(payload: &[u8], expected: u32) -> bool {
    compute_checksum(payload) == expected
}
