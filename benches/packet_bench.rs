use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use game_protocol::core::header::{Operation, PacketFlags};
use game_protocol::core::packet::WirePacket;
use game_protocol::utils::compression::LZ4_TAG;
use game_protocol::utils::crypto::XCHACHA20_POLY1305_TAG;
use game_protocol::{ConnectionId, ConnectionParams, ProtocolConfig, ProtocolManager, SendOptions};
use zeroize::Zeroizing;

#[allow(clippy::unwrap_used)]
fn bench_wire_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_packet");
    let payload_sizes = [0usize, 64, 512, 1400, 16 * 1024];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || vec![0x5Au8; size],
                |payload| {
                    WirePacket::new(Operation::Data, PacketFlags::RELIABLE, 1, 42, payload)
                        .unwrap()
                        .to_bytes()
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let bytes = WirePacket::new(
                Operation::Data,
                PacketFlags::RELIABLE,
                1,
                42,
                vec![0x5Au8; size],
            )
            .unwrap()
            .to_bytes();
            b.iter(|| {
                let decoded = WirePacket::decode(&bytes);
                assert!(decoded.is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_roundtrip");
    let id = ConnectionId(1);
    let params = ConnectionParams::new()
        .with_compression(LZ4_TAG)
        .with_cipher(XCHACHA20_POLY1305_TAG, Zeroizing::new([7u8; 32]));

    let cases = [
        ("plain", SendOptions::unreliable()),
        ("reliable", SendOptions::reliable()),
        (
            "compressed_encrypted",
            SendOptions::reliable().with_compression().with_encryption(),
        ),
    ];

    for &size in &[128usize, 1024, 8 * 1024] {
        for (name, options) in cases {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{name}_{size}b"), |b| {
                let sender = ProtocolManager::new(ProtocolConfig::default()).unwrap();
                let receiver = ProtocolManager::new(ProtocolConfig::default()).unwrap();
                sender.open_connection(id, params.clone()).unwrap();
                receiver.open_connection(id, params.clone()).unwrap();
                let payload: Vec<u8> = (0..size).map(|i| (i % 64) as u8).collect();

                b.iter(|| {
                    let wire = sender.process_outgoing(id, &payload, 1, options).unwrap();
                    for bytes in &wire {
                        let report = receiver.process_incoming(id, bytes).unwrap();
                        for ack in &report.replies {
                            sender.process_incoming(id, ack).unwrap();
                        }
                    }
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_wire_packet, bench_pipeline);
criterion_main!(benches);
