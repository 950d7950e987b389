//! Concurrency tests: many tasks driving one shared manager, plus the
//! background maintenance task.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use game_protocol::core::packet::WirePacket;
use game_protocol::{
    ConnectionId, ConnectionParams, ProtocolConfig, ProtocolManager, SendOptions,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_connections_roundtrip() {
    let connections = 64u64;
    let messages = 100usize;

    let sender = Arc::new(ProtocolManager::new(ProtocolConfig::default()).unwrap());
    let receiver = Arc::new(ProtocolManager::new(ProtocolConfig::default()).unwrap());
    for id in 0..connections {
        sender
            .open_connection(ConnectionId(id), ConnectionParams::new())
            .unwrap();
        receiver
            .open_connection(ConnectionId(id), ConnectionParams::new())
            .unwrap();
    }

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    receiver
        .register_processed_packet_callback(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    let mut tasks = JoinSet::new();
    for id in 0..connections {
        let sender = Arc::clone(&sender);
        let receiver = Arc::clone(&receiver);
        tasks.spawn(async move {
            let id = ConnectionId(id);
            for i in 0..messages {
                let payload = format!("conn {id} message {i}").into_bytes();
                let wire = sender
                    .process_outgoing(id, &payload, 1, SendOptions::reliable_ordered())
                    .unwrap();
                for bytes in wire {
                    let report = receiver.process_incoming(id, &bytes).unwrap();
                    assert_eq!(report.delivered.len(), 1);
                    assert_eq!(report.delivered[0].payload, payload);
                    for ack in report.replies {
                        sender.process_incoming(id, &ack).unwrap();
                    }
                }
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            assert_eq!(
                sender
                    .with_connection_state(id, |s| s.pending_reliable())
                    .unwrap(),
                0
            );
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let expected = connections as usize * messages;
    assert_eq!(delivered.load(Ordering::Relaxed), expected);
    let totals = sender.total_stats().unwrap();
    assert_eq!(totals.acknowledged, expected as u64);
    assert_eq!(receiver.total_stats().unwrap().received, expected as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_senders_share_one_sequence_space() {
    let manager = Arc::new(ProtocolManager::new(ProtocolConfig::default()).unwrap());
    let id = ConnectionId(1);
    manager.open_connection(id, ConnectionParams::new()).unwrap();

    let mut tasks = JoinSet::new();
    for task in 0..8u8 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let mut sequences = Vec::new();
            for _ in 0..200 {
                let wire = manager
                    .process_outgoing(id, &[task; 32], 1, SendOptions::unreliable())
                    .unwrap();
                sequences.push(WirePacket::decode(&wire[0]).unwrap().header.sequence);
            }
            sequences
        });
    }

    let mut seen = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        for sequence in res.unwrap() {
            assert!(seen.insert(sequence), "sequence {sequence} issued twice");
        }
    }
    assert_eq!(seen.len(), 1600);
    assert_eq!(seen.iter().max(), Some(&1599));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn maintenance_task_resends_and_shuts_down() {
    let config =
        ProtocolConfig::default_with_overrides(|c| c.reliability.retransmit_interval = Duration::from_millis(20));
    let manager = Arc::new(ProtocolManager::new(config).unwrap());
    let id = ConnectionId(3);
    manager.open_connection(id, ConnectionParams::new()).unwrap();

    let wire = manager
        .process_outgoing(id, b"door opened", 2, SendOptions::reliable())
        .unwrap();

    let (report_tx, mut report_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let handle = manager.spawn_maintenance(Duration::from_millis(5), report_tx, shutdown_rx);

    let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
        .await
        .expect("maintenance should report a resend")
        .expect("report channel open");
    assert_eq!(report.outbound.len(), 1);
    assert_eq!(report.outbound[0].connection, id);
    assert_eq!(report.outbound[0].bytes, wire[0]);

    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("maintenance should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn maintenance_task_stops_when_reports_dropped() {
    let config =
        ProtocolConfig::default_with_overrides(|c| c.reliability.retransmit_interval = Duration::from_millis(10));
    let manager = Arc::new(ProtocolManager::new(config).unwrap());
    let id = ConnectionId(4);
    manager.open_connection(id, ConnectionParams::new()).unwrap();
    manager
        .process_outgoing(id, b"x", 1, SendOptions::reliable())
        .unwrap();

    let (report_tx, report_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    drop(report_rx);

    let handle = manager.spawn_maintenance(Duration::from_millis(5), report_tx, shutdown_rx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("maintenance should stop without a report receiver")
        .unwrap();
}
