#![no_main]

use game_protocol::core::header::{Operation, PacketFlags};
use game_protocol::core::packet::WirePacket;
use game_protocol::utils::compression::LZ4_TAG;
use game_protocol::{ConnectionId, ConnectionParams, ProtocolConfig, ProtocolManager};
use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};

fuzz_target!(|data: &[u8]| {
    let id = ConnectionId(1);
    let Ok(manager) = ProtocolManager::new(ProtocolConfig::default()) else {
        return;
    };
    if manager
        .open_connection(id, ConnectionParams::new().with_compression(LZ4_TAG))
        .is_err()
    {
        return;
    }

    // Raw bytes, then the same bytes behind a valid header so the checksum
    // passes and the payload stages see them
    // The first bytes pick the flags and a base sequence anywhere in u32,
    // including the top of the range
    let flags = PacketFlags::from_bits(data.first().copied().unwrap_or(0));
    let base = data
        .get(1..5)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0);

    let start = Instant::now();
    let _ = manager.process_incoming_at(id, data, start);
    for (offset, operation) in [Operation::Fragment, Operation::Batch, Operation::Data]
        .into_iter()
        .enumerate()
    {
        let sequence = base.wrapping_add(offset as u32);
        if let Ok(packet) = WirePacket::new(operation, flags, 1, sequence, data.to_vec()) {
            let _ = manager.process_incoming_at(id, &packet.to_bytes(), start);
        }
    }

    let _ = manager.tick(start + Duration::from_secs(10));
});
