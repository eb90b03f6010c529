//! Event bus: named channels with independent subscribers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use hanaxia_protocol::{EventKind, EventPayload, SyncEvent};
use log::{debug, trace, warn};

use super::transport::{ConnectionState, InboundSink, TransportChannel};

/// Identifier of one subscriber record. Never reused within a table.
pub type SubscriberId = u64;

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    handler: Handler,
}

/// Subscriber records indexed by channel.
///
/// Channels are created on first subscribe and never removed; a channel whose
/// subscriber list is empty simply delivers to nobody.
pub struct SubscriberTable {
    /// Channel -> subscribers in registration order
    channels: DashMap<EventKind, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn insert(&self, kind: EventKind, handler: Handler) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(kind)
            .or_default()
            .push(Subscriber { id, handler });
        debug!("Subscriber {} registered on {}", id, kind);
        id
    }

    /// Remove exactly one subscriber record. Returns whether it was present.
    pub fn remove(&self, kind: EventKind, id: SubscriberId) -> bool {
        let Some(mut subscribers) = self.channels.get_mut(&kind) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!("Subscriber {} removed from {}", id, kind);
        }
        removed
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.channels.get(&kind).map(|s| s.len()).unwrap_or(0)
    }

    /// Invoke every subscriber of the event's channel, in registration order.
    ///
    /// Handlers run outside the table lock, so a handler may subscribe or
    /// unsubscribe. A handler that panics is logged and skipped; the rest
    /// still receive the event. Returns the number of handlers that completed.
    pub fn deliver(&self, event: &SyncEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<(SubscriberId, Handler)> = match self.channels.get(&kind) {
            Some(subscribers) => subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect(),
            None => {
                trace!("No subscribers for {}, dropping event", kind);
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!("Subscriber {} on {} panicked: {}", id, kind, reason);
                }
            }
        }
        delivered
    }
}

impl Default for SubscriberTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.channels.iter() {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}

impl InboundSink for SubscriberTable {
    fn dispatch(&self, event: &SyncEvent) {
        self.deliver(event);
    }
}

/// Cancellation handle for one subscription.
///
/// Calling [`Subscription::unsubscribe`] or dropping the handle removes
/// exactly this subscriber; other subscribers on the same channel are
/// unaffected.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    table: Weak<SubscriberTable>,
    kind: EventKind,
    id: SubscriberId,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(table) = self.table.upgrade() {
            table.remove(self.kind, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// Typed publish/subscribe surface handed to feature modules.
///
/// Cloning is cheap; all clones share one subscriber table and one transport.
#[derive(Clone)]
pub struct EventBus {
    table: Arc<SubscriberTable>,
    transport: TransportChannel,
}

impl EventBus {
    pub fn new(table: Arc<SubscriberTable>, transport: TransportChannel) -> Self {
        Self { table, transport }
    }

    /// Subscribe to the channel that carries `P`.
    pub fn subscribe<P, F>(&self, handler: F) -> Subscription
    where
        P: EventPayload,
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.subscribe_kind(P::KIND, move |event| {
            if let Some(payload) = P::from_event(event) {
                handler(payload);
            }
        })
    }

    /// Subscribe to a channel by key and receive the whole event.
    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.table.insert(kind, Arc::new(handler));
        Subscription {
            table: Arc::downgrade(&self.table),
            kind,
            id,
            active: true,
        }
    }

    /// Publish an event to the remote endpoint.
    ///
    /// Fire-and-forget: dropped silently when the transport is not open, and
    /// never delivered to local subscribers.
    pub fn send(&self, event: impl Into<SyncEvent>) {
        self.transport.send(&event.into());
    }

    /// Deliver an event to local subscribers, as if it had arrived from the
    /// remote endpoint.
    pub fn deliver(&self, event: &SyncEvent) -> usize {
        self.table.deliver(event)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.table.subscriber_count(kind)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("table", &self.table)
            .field("state", &self.transport.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SyncConfig, SyncContext};
    use hanaxia_protocol::{AgentDeletePayload, DocUpdatePayload};
    use std::sync::Mutex;

    fn offline_bus() -> EventBus {
        SyncContext::new(SyncConfig::default()).bus().clone()
    }

    fn doc(text: &str) -> SyncEvent {
        SyncEvent::DocUpdate(DocUpdatePayload {
            text: text.to_string(),
        })
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = offline_bus();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = (0..3)
            .map(|n| {
                let seen = Arc::clone(&seen);
                bus.subscribe::<DocUpdatePayload, _>(move |_| seen.lock().unwrap().push(n))
            })
            .collect();

        assert_eq!(bus.deliver(&doc("x")), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_subscriber() {
        let bus = offline_bus();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));

        let a_clone = Arc::clone(&a);
        let sub_a = bus.subscribe::<DocUpdatePayload, _>(move |p| {
            a_clone.lock().unwrap().push(p.text.clone())
        });
        let b_clone = Arc::clone(&b);
        let _sub_b = bus.subscribe::<DocUpdatePayload, _>(move |p| {
            b_clone.lock().unwrap().push(p.text.clone())
        });

        bus.deliver(&doc("one"));
        sub_a.unsubscribe();
        bus.deliver(&doc("two"));

        assert_eq!(*a.lock().unwrap(), vec!["one"]);
        assert_eq!(*b.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(bus.subscriber_count(EventKind::DocUpdate), 1);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = offline_bus();
        {
            let _sub = bus.subscribe_kind(EventKind::AgentDelete, |_| {});
            assert_eq!(bus.subscriber_count(EventKind::AgentDelete), 1);
        }
        assert_eq!(bus.subscriber_count(EventKind::AgentDelete), 0);
    }

    #[test]
    fn test_same_handler_registered_twice_is_invoked_twice() {
        let bus = offline_bus();
        let count = Arc::new(AtomicU64::new(0));
        let handler = {
            let count = Arc::clone(&count);
            move |_: &DocUpdatePayload| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };

        let _first = bus.subscribe::<DocUpdatePayload, _>(handler.clone());
        let _second = bus.subscribe::<DocUpdatePayload, _>(handler);
        bus.deliver(&doc("x"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_without_subscribers_is_noop() {
        let bus = offline_bus();
        let event = SyncEvent::AgentDelete(AgentDeletePayload {
            id: "g1".to_string(),
        });
        assert_eq!(bus.deliver(&event), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let bus = offline_bus();
        let reached = Arc::new(AtomicU64::new(0));

        let _bad = bus.subscribe::<DocUpdatePayload, _>(|_| panic!("subscriber bug"));
        let reached_clone = Arc::clone(&reached);
        let _good = bus.subscribe::<DocUpdatePayload, _>(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.deliver(&doc("x")), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_subscriber_ignores_other_channels() {
        let bus = offline_bus();
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = bus.subscribe::<DocUpdatePayload, _>(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.deliver(&SyncEvent::AgentDelete(AgentDeletePayload {
            id: "g1".to_string(),
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_dispatch() {
        let bus = offline_bus();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU64::new(0));

        let slot_clone = Arc::clone(&slot);
        let count_clone = Arc::clone(&count);
        let sub = bus.subscribe::<DocUpdatePayload, _>(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(own) = slot_clone.lock().unwrap().take() {
                own.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.deliver(&doc("first"));
        bus.deliver(&doc("second"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventKind::DocUpdate), 0);
    }

    #[test]
    fn test_send_while_disconnected_is_silent() {
        let bus = offline_bus();
        assert_eq!(bus.connection_state(), ConnectionState::Disconnected);
        bus.send(DocUpdatePayload {
            text: "lost".to_string(),
        });
    }
}
