//! Process-wide sync context.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::bus::{EventBus, SubscriberTable};
use super::transport::{ConnectionState, TransportChannel};

/// Environment variable that overrides the configured endpoint URL.
pub const WS_URL_ENV: &str = "HANAXIA_WS_URL";

/// Sync endpoint settings (`[sync]` in the config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket URL of the rebroadcasting endpoint.
    pub url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Frames the writer may hold before further sends are dropped.
    pub outbound_buffer: usize,
}

impl SyncConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            reconnect_interval_ms: 3000,
            outbound_buffer: 64,
        }
    }
}

/// Owner of the one shared connection and its subscriber table.
///
/// Construct once at startup, hand [`SyncContext::bus`] to feature modules,
/// and call [`SyncContext::shutdown`] on exit.
#[derive(Debug, Clone)]
pub struct SyncContext {
    transport: TransportChannel,
    bus: EventBus,
}

impl SyncContext {
    pub fn new(config: SyncConfig) -> Self {
        let table = Arc::new(SubscriberTable::new());
        let transport = TransportChannel::new(&config, table.clone());
        let bus = EventBus::new(table, transport.clone());
        Self { transport, bus }
    }

    /// Begin connecting. Safe to call repeatedly.
    pub fn start(&self) {
        info!("Starting sync layer against {}", self.transport.url());
        self.transport.connect();
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn transport(&self) -> &TransportChannel {
        &self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Close the connection and stop reconnecting.
    pub async fn shutdown(&self) {
        info!("Shutting down sync layer");
        self.transport.shutdown().await;
    }
}
