//! Wire packets carried over a byte stream with `Framed<_, WireCodec>`.
//!
//! `tokio::io::duplex` stands in for a TCP socket.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use game_protocol::core::codec::WireCodec;
use game_protocol::core::header::HEADER_SIZE;
use game_protocol::{
    ConnectionId, ConnectionParams, Disposition, ProtocolConfig, ProtocolError, ProtocolManager,
    SendOptions,
};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Framed, FramedRead};

const ID: ConnectionId = ConnectionId(11);

fn manager() -> ProtocolManager {
    let manager = ProtocolManager::new(ProtocolConfig::default()).unwrap();
    manager.open_connection(ID, ConnectionParams::new()).unwrap();
    manager
}

#[tokio::test]
async fn test_framed_stream_roundtrip() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let mut client = Framed::new(client_io, WireCodec);
    let mut server = Framed::new(server_io, WireCodec);

    let sender = manager();
    let receiver = manager();

    // one fragmented payload, one reliable message and one plain update
    let messages: Vec<(Vec<u8>, SendOptions)> = vec![
        (vec![7u8; 3000], SendOptions::reliable_ordered()),
        (b"chat: hi".to_vec(), SendOptions::reliable()),
        (b"pos 1 2 3".to_vec(), SendOptions::unreliable()),
    ];

    let mut frames = Vec::new();
    for (payload, options) in &messages {
        frames.extend(sender.process_outgoing(ID, payload, 1, *options).unwrap());
    }
    let frame_count = frames.len();

    let writer = tokio::spawn(async move {
        for frame in frames {
            client.send(frame).await.unwrap();
        }
        client
    });

    let mut delivered = Vec::new();
    let mut acks = Vec::new();
    for _ in 0..frame_count {
        let frame = server.next().await.expect("stream open").unwrap();
        let report = receiver.process_incoming(ID, &frame).unwrap();
        delivered.extend(report.delivered.into_iter().map(|p| p.payload));
        acks.extend(report.replies);
    }

    let expected: Vec<Vec<u8>> = messages.into_iter().map(|(p, _)| p).collect();
    assert_eq!(delivered, expected);

    // three fragments and the chat message were reliable
    assert_eq!(acks.len(), 4);
    let ack_count = acks.len();

    // acks travel back over the same stream
    for ack in acks {
        server.send(ack).await.unwrap();
    }
    let mut client = writer.await.unwrap();
    for _ in 0..ack_count {
        let frame = client.next().await.expect("stream open").unwrap();
        let report = sender.process_incoming(ID, &frame).unwrap();
        assert_eq!(report.disposition, Disposition::Acknowledged);
    }
    assert_eq!(
        sender
            .with_connection_state(ID, |s| s.pending_reliable())
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_frames_split_across_writes() {
    let (mut raw, server_io) = tokio::io::duplex(64);
    let mut reader = FramedRead::new(server_io, WireCodec);

    let sender = manager();
    let wire = sender
        .process_outgoing(ID, &[0xAA; 200], 4, SendOptions::unreliable())
        .unwrap();
    let bytes = wire[0].clone();

    tokio::spawn(async move {
        for chunk in bytes.chunks(7) {
            raw.write_all(chunk).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    let frame = reader.next().await.expect("stream open").unwrap();
    assert_eq!(&frame[..], &wire[0][..]);
    assert!(reader.next().await.is_none());
}

#[test]
fn test_back_to_back_frames_in_one_buffer() {
    let sender = manager();
    let mut buffer = BytesMut::new();
    let mut expected = Vec::new();
    for i in 0..5u8 {
        let wire = sender
            .process_outgoing(ID, &vec![i; i as usize * 10], 1, SendOptions::unreliable())
            .unwrap();
        buffer.extend_from_slice(&wire[0]);
        expected.push(wire[0].clone());
    }

    let mut codec = WireCodec;
    for frame in expected {
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&decoded[..], &frame[..]);
    }
    assert!(codec.decode(&mut buffer).unwrap().is_none());
}

#[test]
fn test_size_field_below_header_rejected() {
    let mut buffer = BytesMut::from(&[0u8, 0, 0, 4, 0, 0][..]);
    let mut codec = WireCodec;
    let err = codec.decode(&mut buffer).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidPacket(_)));

    let mut short = BytesMut::from(&[0u8; HEADER_SIZE - 1][..]);
    short[3] = HEADER_SIZE as u8;
    assert!(codec.decode(&mut short).unwrap().is_none());
}
