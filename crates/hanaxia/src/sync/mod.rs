//! Real-time synchronization layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                Feature modules (chat, doc, agent, ...)             │
//! │   subscribe(kind) -> Subscription            send(event)           │
//! └───────────────▲───────────────────────────────────┬────────────────┘
//!                 │ payload                           │
//! ┌───────────────┴───────────────────────────────────▼────────────────┐
//! │                              EventBus                              │
//! │   SubscriberTable: kind -> [(id, handler)] in registration order   │
//! └───────────────▲───────────────────────────────────┬────────────────┘
//!                 │ SyncEvent (decoded)               │ SyncEvent
//! ┌───────────────┴───────────────────────────────────▼────────────────┐
//! │                          TransportChannel                          │
//! │   one WebSocket, DISCONNECTED -> CONNECTING -> OPEN, fixed retry   │
//! └────────────────────────────────┬───────────────────────────────────┘
//!                                  │ {type, payload}
//!                           sync endpoint
//! ```
//!
//! Nothing here returns errors to feature modules. Transport failures turn
//! into the reconnect loop, malformed frames are discarded, sends while not
//! connected are dropped, and a panicking subscriber is isolated from the
//! others.

mod bus;
mod context;
mod transport;

pub use bus::{EventBus, SubscriberId, SubscriberTable, Subscription};
pub use context::{SyncConfig, SyncContext, WS_URL_ENV};
pub use transport::{ConnectionState, InboundSink, TransportChannel, TransportError};
