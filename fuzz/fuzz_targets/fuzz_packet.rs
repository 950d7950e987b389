#![no_main]

use game_protocol::core::packet::WirePacket;
use game_protocol::protocol::batch::unbatch;
use game_protocol::protocol::fragment::Fragment;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Framing parsers must reject, never panic
    if let Ok(packet) = WirePacket::from_bytes(data) {
        let _ = packet.verify();
        assert_eq!(packet.wire_len(), data.len());
    }
    let _ = Fragment::decode(data);

    let out = unbatch(data);
    assert!(out.entries.iter().map(Vec::len).sum::<usize>() <= data.len());
});
