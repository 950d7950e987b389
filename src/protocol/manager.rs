//! # Protocol Manager
//!
//! Entry point of the pipeline. One manager is shared through `Arc` by every
//! connection task; each connection's state sits behind its own lock, so
//! traffic on different connections never contends.
//!
//! ## Example
//! ```rust
//! use game_protocol::config::ProtocolConfig;
//! use game_protocol::protocol::{ConnectionId, ConnectionParams, ProtocolManager, SendOptions};
//!
//! let client = ProtocolManager::new(ProtocolConfig::default()).unwrap();
//! let server = ProtocolManager::new(ProtocolConfig::default()).unwrap();
//! let id = ConnectionId(1);
//! client.open_connection(id, ConnectionParams::new()).unwrap();
//! server.open_connection(id, ConnectionParams::new()).unwrap();
//!
//! let wire = client
//!     .process_outgoing(id, b"hello", 7, SendOptions::reliable())
//!     .unwrap();
//! let report = server.process_incoming(id, &wire[0]).unwrap();
//! assert_eq!(report.delivered[0].payload, b"hello");
//!
//! // the server's ack clears the client's retransmission entry
//! client.process_incoming(id, &report.replies[0]).unwrap();
//! assert_eq!(client.get_protocol_stats(id).unwrap().acknowledged, 1);
//! ```

use crate::config::ProtocolConfig;
use crate::core::header::Operation;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::{Connection, ConnectionId, ConnectionParams, ConnectionProtocolState};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::events::{
    IncomingReport, Outbound, ProcessedPacket, SendOptions, TickReport,
};
use crate::utils::compression::CompressionRegistry;
use crate::utils::crypto::CipherRegistry;
use crate::utils::metrics::StatsSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Shared packet pipeline for all connections.
pub struct ProtocolManager {
    config: ProtocolConfig,
    compression: CompressionRegistry,
    ciphers: CipherRegistry,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    dispatcher: Dispatcher,
}

impl ProtocolManager {
    /// Manager with the built-in compressors and ciphers.
    ///
    /// # Errors
    /// `ProtocolError::ConfigError` if the configuration does not validate.
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        let compression = CompressionRegistry::with_defaults(config.codec.compression_level);
        Self::with_registries(config, compression, CipherRegistry::with_defaults())
    }

    /// Manager with caller-supplied algorithm registries.
    pub fn with_registries(
        config: ProtocolConfig,
        compression: CompressionRegistry,
        ciphers: CipherRegistry,
    ) -> Result<Self> {
        config.validate_strict()?;
        Ok(Self {
            config,
            compression,
            ciphers,
            connections: RwLock::new(HashMap::new()),
            dispatcher: Dispatcher::new(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn table(&self) -> Result<RwLockReadGuard<'_, HashMap<ConnectionId, Arc<Connection>>>> {
        self.connections
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))
    }

    fn table_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<Connection>>>> {
        self.connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))
    }

    fn connection(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.table()?
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::UnknownConnection(id.0))
    }

    fn dispatch(&self, delivered: &[ProcessedPacket]) {
        for packet in delivered {
            if let Err(e) = self.dispatcher.dispatch(packet) {
                warn!(connection = %packet.connection, error = %e, "Packet callback dispatch failed");
            }
        }
    }

    /// Create state for a connection whose handshake has completed.
    ///
    /// # Errors
    /// - `ProtocolError::UnsupportedAlgorithm` for an unregistered tag
    /// - `ProtocolError::DuplicateConnection` if `id` is already open
    #[instrument(skip(self, params), fields(connection = %id))]
    pub fn open_connection(&self, id: ConnectionId, params: ConnectionParams) -> Result<()> {
        let compressor = params
            .compression
            .map(|tag| self.compression.get(tag))
            .transpose()?;
        let cipher = params
            .cipher
            .as_ref()
            .map(|(tag, key)| self.ciphers.build(*tag, key))
            .transpose()?;

        let mut table = self.table_mut()?;
        if table.contains_key(&id) {
            return Err(ProtocolError::DuplicateConnection(id.0));
        }
        table.insert(
            id,
            Arc::new(Connection::new(id, &self.config, compressor, cipher)),
        );
        info!(
            compression = ?params.compression,
            cipher = ?params.cipher.as_ref().map(|(tag, _)| *tag),
            "Connection opened"
        );
        Ok(())
    }

    /// Turn one application payload into wire packets.
    ///
    /// The result may be empty (the payload joined a pending batch) or hold
    /// several packets (fragments, or a flushed batch followed by this packet).
    ///
    /// # Errors
    /// `UnknownConnection`, `OversizedPacket`, or a codec error when the
    /// requested transform is unavailable or fails.
    pub fn process_outgoing(
        &self,
        id: ConnectionId,
        payload: &[u8],
        packet_type: u16,
        options: SendOptions,
    ) -> Result<Vec<Vec<u8>>> {
        self.process_outgoing_at(id, payload, packet_type, options, Instant::now())
    }

    /// [`process_outgoing`](Self::process_outgoing) with an explicit clock.
    #[instrument(level = "trace", skip(self, payload, now), fields(connection = %id, size = payload.len()))]
    pub fn process_outgoing_at(
        &self,
        id: ConnectionId,
        payload: &[u8],
        packet_type: u16,
        options: SendOptions,
        now: Instant,
    ) -> Result<Vec<Vec<u8>>> {
        let connection = self.connection(id)?;
        let mut state = connection.lock()?;
        state.outgoing(payload, packet_type, options, &connection.stats, now)
    }

    /// Validate, decode and deliver one wire packet.
    ///
    /// Peer-caused failures are reported in the returned disposition, not as
    /// `Err`. Delivered packets are passed to the registered callbacks after
    /// the connection lock is released.
    ///
    /// # Errors
    /// `UnknownConnection` or `LockPoisoned`.
    pub fn process_incoming(&self, id: ConnectionId, bytes: &[u8]) -> Result<IncomingReport> {
        self.process_incoming_at(id, bytes, Instant::now())
    }

    /// [`process_incoming`](Self::process_incoming) with an explicit clock.
    #[instrument(level = "trace", skip(self, bytes, now), fields(connection = %id, size = bytes.len()))]
    pub fn process_incoming_at(
        &self,
        id: ConnectionId,
        bytes: &[u8],
        now: Instant,
    ) -> Result<IncomingReport> {
        let connection = self.connection(id)?;
        let report = {
            let mut state = connection.lock()?;
            state.incoming(bytes, &connection.stats, now)
        };
        self.dispatch(&report.delivered);
        Ok(report)
    }

    /// Seal the connection's pending batch now.
    pub fn flush_batch(&self, id: ConnectionId) -> Result<Option<Vec<u8>>> {
        let connection = self.connection(id)?;
        let mut state = connection.lock()?;
        state.flush_batch(&connection.stats, Instant::now())
    }

    /// Build a Heartbeat, Ping, Pong, Connect or Disconnect packet.
    ///
    /// # Errors
    /// `ProtocolError::InvalidPacket` for a non-control operation.
    pub fn build_control(&self, id: ConnectionId, operation: Operation) -> Result<Vec<u8>> {
        let connection = self.connection(id)?;
        let mut state = connection.lock()?;
        state.control(operation, &connection.stats, Instant::now())
    }

    /// One maintenance pass over every connection.
    ///
    /// Each connection is locked on its own; the table lock is held only to
    /// copy the connection list. A connection whose maintenance fails is
    /// logged and skipped so the others are still serviced.
    #[instrument(level = "trace", skip(self, now))]
    pub fn tick(&self, now: Instant) -> Result<TickReport> {
        let connections: Vec<Arc<Connection>> = self.table()?.values().cloned().collect();
        let mut report = TickReport::default();

        for connection in connections {
            let maintenance = match connection
                .lock()
                .and_then(|mut state| state.maintain(&connection.stats, now))
            {
                Ok(maintenance) => maintenance,
                Err(err) => {
                    error!(connection = %connection.id, error = %err, "Skipping connection maintenance");
                    continue;
                }
            };
            report
                .outbound
                .extend(maintenance.outbound.into_iter().map(|bytes| Outbound {
                    connection: connection.id,
                    bytes,
                }));
            report.events.extend(maintenance.events);
            report.delivered.extend(maintenance.delivered);
        }

        for event in &report.events {
            warn!(?event, "Protocol event");
        }
        self.dispatch(&report.delivered);
        Ok(report)
    }

    /// Forget everything about a connection and return its final counters.
    #[instrument(skip(self), fields(connection = %id))]
    pub fn clear_connection_state(&self, id: ConnectionId) -> Result<StatsSnapshot> {
        let connection = self
            .table_mut()?
            .remove(&id)
            .ok_or(ProtocolError::UnknownConnection(id.0))?;
        let snapshot = connection.stats.snapshot();
        snapshot.log(id.0);
        info!("Connection state cleared");
        Ok(snapshot)
    }

    pub fn get_protocol_stats(&self, id: ConnectionId) -> Result<StatsSnapshot> {
        Ok(self.connection(id)?.stats.snapshot())
    }

    /// Counters summed over every open connection.
    pub fn total_stats(&self) -> Result<StatsSnapshot> {
        Ok(self
            .table()?
            .values()
            .map(|connection| connection.stats.snapshot())
            .sum())
    }

    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.table()?.len())
    }

    pub fn is_open(&self, id: ConnectionId) -> Result<bool> {
        Ok(self.table()?.contains_key(&id))
    }

    /// Run `inspect` against a connection's state under its lock.
    pub fn with_connection_state<R>(
        &self,
        id: ConnectionId,
        inspect: impl FnOnce(&ConnectionProtocolState) -> R,
    ) -> Result<R> {
        let connection = self.connection(id)?;
        let state = connection.lock()?;
        Ok(inspect(&state))
    }

    /// Callback for every delivered packet on every connection.
    pub fn register_processed_packet_callback<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ProcessedPacket) + Send + Sync + 'static,
    {
        self.dispatcher.register(handler)
    }

    /// Callback for delivered packets of one application type.
    pub fn register_packet_type_callback<F>(&self, packet_type: u16, handler: F) -> Result<()>
    where
        F: Fn(&ProcessedPacket) + Send + Sync + 'static,
    {
        self.dispatcher.register_for_type(packet_type, handler)
    }

    /// Drive [`tick`](Self::tick) every `interval` on the tokio runtime.
    ///
    /// Non-empty reports go to `report_tx`. The task stops when `shutdown_rx`
    /// fires or closes, or when the report receiver is dropped.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        report_tx: mpsc::Sender<TickReport>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Maintenance task started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Maintenance task shutting down");
                        break;
                    }
                    instant = ticker.tick() => {
                        match manager.tick(instant.into_std()) {
                            Ok(report) if report.is_empty() => {}
                            Ok(report) => {
                                if report_tx.send(report).await.is_err() {
                                    debug!("Tick report receiver dropped, stopping maintenance");
                                    break;
                                }
                            }
                            Err(e) => error!(error = %e, "Maintenance tick failed"),
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ProtocolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connections = self.connections.read().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("ProtocolManager")
            .field("connections", &connections)
            .field("compression", &self.compression)
            .field("ciphers", &self.ciphers)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
