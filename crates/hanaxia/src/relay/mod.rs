//! Development relay: a WebSocket endpoint that rebroadcasts sync frames.
//!
//! Every client connects to `/`. A text frame that parses as an envelope
//! (`type` string, `payload` object) is forwarded unchanged to every other
//! client, and to the sender as well when `echo` is enabled. Anything else
//! is dropped. The relay holds no state beyond the live connections.

mod handler;
mod hub;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use hub::{ClientId, RelayHub};

/// Relay settings (`[relay]` in the config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Also deliver each frame back to its sender.
    pub echo: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            echo: false,
        }
    }
}

/// Build the relay router over a hub.
pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/", get(handler::ws_handler))
        .route("/health", get(handler::health))
        .with_state(hub)
}

/// A bound relay, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<RelayHub>,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            listener,
            hub: Arc::new(RelayHub::new(config.echo)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<RelayHub> {
        Arc::clone(&self.hub)
    }

    /// Serve until `shutdown` is cancelled; open sockets are closed first.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, echo = self.hub.echo(), "relay listening");

        let hub = Arc::clone(&self.hub);
        let app = router(Arc::clone(&self.hub));
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                hub.close();
            })
            .await?;

        info!("relay stopped");
        Ok(())
    }
}
