//! WebSocket transport with a fixed-delay reconnect loop.
//!
//! The channel owns at most one physical connection. Once [`connect`] has
//! been called, a supervisor task keeps trying to hold that connection open
//! until shutdown: after every failed attempt or dropped session it waits
//! `reconnect_interval` and tries again, with no backoff and no retry limit.
//!
//! [`connect`]: TransportChannel::connect

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hanaxia_protocol::SyncEvent;
use log::{debug, info, trace, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::context::SyncConfig;

/// Lifecycle of the single physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

/// Receiver of decoded inbound frames.
pub trait InboundSink: Send + Sync + 'static {
    fn dispatch(&self, event: &SyncEvent);
}

/// Failures inside one connection attempt. Logged, never surfaced to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

struct Inner {
    url: String,
    reconnect_interval: Duration,
    outbound_buffer: usize,
    sink: Arc<dyn InboundSink>,
    state: watch::Sender<ConnectionState>,
    /// Writer queue of the open connection, if any
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    supervising: AtomicBool,
    /// Cuts a pending retry delay short
    wake: Notify,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the process-wide sync connection. Cheap to clone.
#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<Inner>,
}

impl TransportChannel {
    /// Create a channel in the `Disconnected` state. Nothing is spawned until
    /// [`TransportChannel::connect`] is called.
    pub fn new(config: &SyncConfig, sink: Arc<dyn InboundSink>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: config.url.clone(),
                reconnect_interval: config.reconnect_interval(),
                outbound_buffer: config.outbound_buffer.max(1),
                sink,
                state,
                outbound: Mutex::new(None),
                supervising: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Start connecting. No-op while `Connecting` or `Open`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }

        let requested = inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !requested {
            trace!("connect() ignored, connection is {}", self.state());
            return;
        }

        if inner.supervising.swap(true, Ordering::AcqRel) {
            inner.wake.notify_one();
            return;
        }

        let task = tokio::spawn(supervise(Arc::clone(inner)));
        *lock(&inner.task) = Some(task);
    }

    /// Write one event to the connection.
    ///
    /// Dropped without error when the connection is not `Open` or the writer
    /// queue is full. Never blocks and never queues for a later connection.
    pub fn send(&self, event: &SyncEvent) {
        let kind = event.kind();
        let state = self.state();
        if state != ConnectionState::Open {
            debug!("Dropping outbound {} while {}", kind, state);
            return;
        }

        let text = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize outbound {}: {}", kind, e);
                return;
            }
        };

        let outbound = lock(&self.inner.outbound);
        let Some(tx) = outbound.as_ref() else {
            debug!("Dropping outbound {}: no writer", kind);
            return;
        };
        match tx.try_send(Message::Text(text.into())) {
            Ok(()) => trace!("Queued outbound {}", kind),
            Err(TrySendError::Full(_)) => warn!("Outbound queue full, dropping {}", kind),
            Err(TrySendError::Closed(_)) => debug!("Dropping outbound {}: writer closed", kind),
        }
    }

    /// Stop the reconnect loop and close the connection.
    ///
    /// Frames already queued for the writer are flushed before the close
    /// frame. The channel cannot be reconnected afterwards.
    pub(crate) async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.wake.notify_one();

        let task = lock(&self.inner.task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Sync transport task ended abnormally: {}", e);
        }
        self.inner.mark_disconnected();
    }
}

impl fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChannel")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn mark_disconnected(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        *lock(&self.outbound) = None;
    }

    fn handle_frame(&self, text: &str) {
        match SyncEvent::decode(text) {
            Ok(event) => {
                trace!("Inbound {}", event.kind());
                self.sink.dispatch(&event);
            }
            Err(e) => debug!("Discarding malformed frame: {}", e),
        }
    }
}

async fn supervise(inner: Arc<Inner>) {
    loop {
        inner.state.send_replace(ConnectionState::Connecting);
        debug!("Connecting to sync endpoint {}", inner.url);

        match run_connection(&inner).await {
            Ok(()) => info!("Sync connection to {} closed", inner.url),
            Err(e) => debug!("Sync connection to {} failed: {}", inner.url, e),
        }
        inner.mark_disconnected();

        if inner.shutdown.is_cancelled() {
            break;
        }

        debug!("Retrying sync connection in {:?}", inner.reconnect_interval);
        tokio::select! {
            _ = tokio::time::sleep(inner.reconnect_interval) => {}
            _ = inner.wake.notified() => debug!("Reconnect requested before retry delay elapsed"),
            _ = inner.shutdown.cancelled() => break,
        }
    }

    inner.mark_disconnected();
    inner.supervising.store(false, Ordering::Release);
}

async fn run_connection(inner: &Inner) -> Result<(), TransportError> {
    let (stream, _) = tokio::select! {
        result = connect_async(inner.url.as_str()) => result?,
        _ = inner.shutdown.cancelled() => return Ok(()),
    };
    let (mut writer, mut reader) = stream.split();

    let (tx, mut rx) = mpsc::channel::<Message>(inner.outbound_buffer);
    *lock(&inner.outbound) = Some(tx);
    inner.state.send_replace(ConnectionState::Open);
    info!("Sync connection open: {}", inner.url);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                while let Ok(message) = rx.try_recv() {
                    writer.send(message).await?;
                }
                let _ = writer.send(Message::Close(None)).await;
                break;
            }
            Some(message) = rx.recv() => writer.send(message).await?,
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.handle_frame(text.as_str()),
                Some(Ok(Message::Binary(_))) => trace!("Discarding binary frame"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hanaxia_protocol::DocUpdatePayload;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        count: AtomicUsize,
    }

    impl InboundSink for CountingSink {
        fn dispatch(&self, _event: &SyncEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unreachable_config() -> SyncConfig {
        // Bind and release a port so nothing is listening on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        SyncConfig {
            url: format!("ws://127.0.0.1:{port}"),
            reconnect_interval_ms: 200,
            outbound_buffer: 4,
        }
    }

    #[test]
    fn test_new_channel_is_disconnected() {
        let sink = Arc::new(CountingSink::default());
        let channel = TransportChannel::new(&unreachable_config(), sink);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_malformed_frames_never_reach_sink() {
        let sink = Arc::new(CountingSink::default());
        let channel = TransportChannel::new(&unreachable_config(), sink.clone());

        channel.inner.handle_frame("{not json");
        channel.inner.handle_frame(r#"{"type":"DOC_UPDATE"}"#);
        channel.inner.handle_frame(r#"{"type":"DOC_UPDATE","payload":{"text":"ok"}}"#);

        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_retrying_and_send_is_dropped() {
        let sink = Arc::new(CountingSink::default());
        let channel = TransportChannel::new(&unreachable_config(), sink);
        let mut states = channel.watch_state();

        channel.connect();
        assert_eq!(channel.state(), ConnectionState::Connecting);

        // A failed attempt followed by a fresh attempt proves the retry loop.
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .expect("first attempt fails")
        .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Connecting),
        )
        .await
        .expect("retry scheduled")
        .unwrap();

        channel.send(&SyncEvent::DocUpdate(DocUpdatePayload {
            text: "dropped".to_string(),
        }));

        channel.shutdown().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_connecting() {
        let sink = Arc::new(CountingSink::default());
        let channel = TransportChannel::new(&unreachable_config(), sink);

        channel.connect();
        channel.connect();
        channel.connect();

        assert!(channel.inner.supervising.load(Ordering::SeqCst));
        channel.shutdown().await;
        assert!(!channel.inner.supervising.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_is_ignored() {
        let sink = Arc::new(CountingSink::default());
        let channel = TransportChannel::new(&unreachable_config(), sink);

        channel.shutdown().await;
        channel.connect();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
