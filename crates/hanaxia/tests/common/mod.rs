//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hanaxia::relay::{RelayConfig, RelayHub, RelayServer};
use hanaxia::sync::{ConnectionState, SyncConfig, SyncContext};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect interval used by test clients.
pub const RETRY_MS: u64 = 200;

#[derive(Debug, Clone)]
enum Control {
    Frame(String),
    Disconnect,
}

/// A scriptable WebSocket endpoint.
///
/// Records every text frame clients send, pushes frames to all connected
/// clients on demand, and can drop every connection without a close frame.
pub struct MockEndpoint {
    addr: SocketAddr,
    control: broadcast::Sender<Control>,
    received: Mutex<mpsc::UnboundedReceiver<String>>,
    accepted: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl MockEndpoint {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = watch::channel(0usize);

        let control_tx = control.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let control_rx = control_tx.subscribe();
                let received = received_tx.clone();
                let accepted = accepted_tx.clone();
                tokio::spawn(serve_connection(stream, control_rx, received, accepted));
            }
        });

        Self {
            addr,
            control,
            received: Mutex::new(received_rx),
            accepted: accepted_rx,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push a raw text frame to every connected client.
    pub fn push(&self, frame: &str) {
        let _ = self.control.send(Control::Frame(frame.to_string()));
    }

    /// Drop every live connection abruptly.
    pub fn disconnect_all(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Wait until at least `count` handshakes have completed in total.
    pub async fn wait_for_accepted(&self, count: usize) {
        let mut accepted = self.accepted.clone();
        tokio::time::timeout(WAIT, accepted.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for connections")
            .unwrap();
    }

    /// Next frame received from any client.
    pub async fn next_received(&self) -> String {
        let mut received = self.received.lock().await;
        tokio::time::timeout(WAIT, received.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("endpoint stopped")
    }

    /// Whether a frame arrives within `window`.
    pub async fn received_within(&self, window: Duration) -> Option<String> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(window, received.recv()).await.ok().flatten()
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    mut control: broadcast::Receiver<Control>,
    received: mpsc::UnboundedSender<String>,
    accepted: watch::Sender<usize>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    accepted.send_modify(|n| *n += 1);
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = received.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = control.recv() => match command {
                Ok(Control::Frame(frame)) => {
                    if writer.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Disconnect) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

pub fn client_config(url: &str) -> SyncConfig {
    SyncConfig {
        url: url.to_string(),
        reconnect_interval_ms: RETRY_MS,
        outbound_buffer: 16,
    }
}

/// Start a sync context and wait until it is connected.
pub async fn connected_client(url: &str) -> SyncContext {
    let sync = SyncContext::new(client_config(url));
    sync.start();
    wait_for_state(&sync, ConnectionState::Open).await;
    sync
}

pub async fn wait_for_state(sync: &SyncContext, state: ConnectionState) {
    tokio::time::timeout(WAIT, sync.transport().wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"));
}

/// Wait until a revision counter reaches `target`.
pub async fn wait_for_revision(mut rx: watch::Receiver<u64>, target: u64) {
    tokio::time::timeout(WAIT, rx.wait_for(|r| *r >= target))
        .await
        .expect("timed out waiting for state change")
        .unwrap();
}

pub struct TestRelay {
    pub url: String,
    pub http_url: String,
    pub hub: Arc<RelayHub>,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestRelay {
    pub async fn start(echo: bool) -> Self {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            echo,
        };
        let server = RelayServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));
        Self {
            url: format!("ws://{addr}"),
            http_url: format!("http://{addr}"),
            hub,
            shutdown,
            task,
        }
    }

    /// Wait until the relay has registered `count` clients.
    pub async fn wait_for_clients(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.hub.connection_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for relay clients");
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap();
    }
}
