#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use game_protocol::utils::compression::{Compressor, Lz4Compressor, ZstdCompressor};

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let sizes = [128usize, 1400, 16 * 1024, 256 * 1024];
    let compressors: [(&str, Box<dyn Compressor>); 2] = [
        ("lz4", Box::new(Lz4Compressor)),
        ("zstd", Box::new(ZstdCompressor::new(3))),
    ];

    for &size in &sizes {
        // game state: repetitive but not constant
        let data: Vec<u8> = (0..size).map(|i| ((i / 16) % 32) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        for (name, compressor) in &compressors {
            group.bench_function(format!("{}_compress_{}b", name, size), |b| {
                b.iter_batched(
                    || data.clone(),
                    |d| {
                        let _ = compressor.compress(&d).unwrap();
                    },
                    BatchSize::SmallInput,
                )
            });
            group.bench_function(format!("{}_decompress_{}b", name, size), |b| {
                let compressed = compressor.compress(&data).unwrap();
                b.iter(|| {
                    let out = compressor.decompress(&compressed, size).unwrap();
                    assert_eq!(out.len(), data.len());
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
