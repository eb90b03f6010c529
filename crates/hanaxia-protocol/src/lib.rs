//! Wire types for the Hanaxia real-time sync channel.
//!
//! Every frame exchanged with the sync endpoint is a JSON envelope:
//!
//! ```text
//! { "type": "CHAT_MESSAGE", "payload": { "conversationId": "...", "message": { ... } } }
//! ```
//!
//! `type` selects one of a fixed set of channels ([`EventKind`]) and `payload`
//! carries the structure that belongs to that channel. [`SyncEvent`] is the
//! closed, strongly typed view of a frame; [`Envelope`] is the untyped view
//! used where frames are only relayed.
//!
//! The entity types in [`entities`] are owned by the console's feature
//! modules. This crate only describes their serialized form.

pub mod entities;
pub mod events;

pub use entities::{
    AgentTemplate, Attachment, AttachmentKind, CalendarEvent, Conversation, Goal, Message, Role,
};
pub use events::{
    AgentDeletePayload, AgentUpdatePayload, ChatMessagePayload, DecodeError, DocUpdatePayload,
    Envelope, EventKind, EventPayload, InputCursorPayload, InputUpdatePayload, SyncEvent,
};
