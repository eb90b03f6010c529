//! Connection registry and fan-out.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hanaxia_protocol::Envelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

pub type ClientId = u64;

pub struct RelayHub {
    /// Client ID -> outbound frame queue
    clients: DashMap<ClientId, mpsc::Sender<String>>,
    next_id: AtomicU64,
    echo: bool,
    closed: CancellationToken,
}

impl RelayHub {
    pub fn new(echo: bool) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            echo,
            closed: CancellationToken::new(),
        }
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Register a connection. Returns its id and the queue of frames to write.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(id, tx);
        info!(client = id, connections = self.clients.len(), "client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        if self.clients.remove(&id).is_some() {
            info!(client = id, connections = self.clients.len(), "client disconnected");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Validate a frame and fan it out. Returns the number of clients it was
    /// queued for; `None` when the frame was rejected.
    pub fn relay(&self, from: ClientId, frame: &str) -> Option<usize> {
        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(client = from, error = %e, "dropping invalid frame");
                return None;
            }
        };

        let mut queued = 0;
        for entry in self.clients.iter() {
            if *entry.key() == from && !self.echo {
                continue;
            }
            match entry.value().try_send(frame.to_string()) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        client = *entry.key(),
                        kind = %envelope.kind,
                        "client buffer full, dropping frame"
                    );
                }
                // Receiver gone; the connection is being torn down.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        debug!(client = from, kind = %envelope.kind, queued, "relayed frame");
        Some(queued)
    }

    /// Signal every connection handler to close its socket.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub(crate) fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"type":"DOC_UPDATE","payload":{"text":"hi"}}"#;

    #[test]
    fn test_relay_skips_sender_without_echo() {
        let hub = RelayHub::new(false);
        let (a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        assert_eq!(hub.relay(a, FRAME), Some(1));
        assert_eq!(rx_b.try_recv().unwrap(), FRAME);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_relay_echoes_when_enabled() {
        let hub = RelayHub::new(true);
        let (a, mut rx_a) = hub.register();

        assert_eq!(hub.relay(a, FRAME), Some(1));
        assert_eq!(rx_a.try_recv().unwrap(), FRAME);
    }

    #[test]
    fn test_invalid_frames_are_rejected() {
        let hub = RelayHub::new(true);
        let (a, mut rx_a) = hub.register();

        assert_eq!(hub.relay(a, "not json"), None);
        assert_eq!(hub.relay(a, r#"{"type":"DOC_UPDATE"}"#), None);
        assert_eq!(hub.relay(a, r#"{"type":"","payload":{}}"#), None);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_unregister() {
        let hub = RelayHub::new(false);
        let (a, _rx_a) = hub.register();
        let (b, _rx_b) = hub.register();
        assert_eq!(hub.connection_count(), 2);

        hub.unregister(a);
        hub.unregister(a);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.relay(b, FRAME), Some(0));
    }
}
