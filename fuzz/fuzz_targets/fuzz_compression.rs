#![no_main]

use game_protocol::utils::compression::{Compressor, Lz4Compressor, ZstdCompressor};
use libfuzzer_sys::fuzz_target;

const LIMIT: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let zstd = ZstdCompressor::new(3);
    let compressors: [&dyn Compressor; 2] = [&Lz4Compressor, &zstd];

    for compressor in compressors {
        // Round trip must be lossless
        if let Ok(compressed) = compressor.compress(data) {
            if let Ok(out) = compressor.decompress(&compressed, data.len().max(1)) {
                assert_eq!(out, data);
            }
        }

        // Malformed input must respect the size limit
        if let Ok(out) = compressor.decompress(data, LIMIT) {
            assert!(out.len() <= LIMIT);
        }
    }
});
