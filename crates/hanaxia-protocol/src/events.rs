//! Sync channel events.
//!
//! Frames form a closed set: each [`EventKind`] has exactly one payload shape.
//! Decoding is all-or-nothing. A frame that is not JSON, lacks `type` or
//! `payload`, names an unknown channel, or carries a payload of the wrong
//! shape is rejected as a whole with a [`DecodeError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entities::{Goal, Message};

// ============================================================================
// Channel keys
// ============================================================================

/// Stable channel key carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ChatMessage,
    DocUpdate,
    AgentUpdate,
    AgentDelete,
    InputUpdate,
    InputCursor,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ChatMessage,
        EventKind::DocUpdate,
        EventKind::AgentUpdate,
        EventKind::AgentDelete,
        EventKind::InputUpdate,
        EventKind::InputCursor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChatMessage => "CHAT_MESSAGE",
            EventKind::DocUpdate => "DOC_UPDATE",
            EventKind::AgentUpdate => "AGENT_UPDATE",
            EventKind::AgentDelete => "AGENT_DELETE",
            EventKind::InputUpdate => "INPUT_UPDATE",
            EventKind::InputCursor => "INPUT_CURSOR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// A chat message appended to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub conversation_id: String,
    /// Used to create the conversation on receivers that do not know it yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_title: Option<String>,
    pub message: Message,
}

/// Latest document analysis text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocUpdatePayload {
    pub text: String,
}

/// Whole-goal replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdatePayload {
    pub goal: Goal,
}

/// Goal removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDeletePayload {
    pub id: String,
}

/// A remote participant's in-progress chat input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputUpdatePayload {
    pub conversation_id: String,
    pub text: String,
    pub sender_id: String,
}

/// A remote participant's caret/selection in the chat input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCursorPayload {
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub selection_start: u64,
    pub selection_end: u64,
}

// ============================================================================
// Typed frame
// ============================================================================

/// A decoded sync frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    ChatMessage(ChatMessagePayload),
    DocUpdate(DocUpdatePayload),
    AgentUpdate(AgentUpdatePayload),
    AgentDelete(AgentDeletePayload),
    InputUpdate(InputUpdatePayload),
    InputCursor(InputCursorPayload),
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::ChatMessage(_) => EventKind::ChatMessage,
            SyncEvent::DocUpdate(_) => EventKind::DocUpdate,
            SyncEvent::AgentUpdate(_) => EventKind::AgentUpdate,
            SyncEvent::AgentDelete(_) => EventKind::AgentDelete,
            SyncEvent::InputUpdate(_) => EventKind::InputUpdate,
            SyncEvent::InputCursor(_) => EventKind::InputCursor,
        }
    }

    /// Serialize to the wire envelope.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Envelope::parse(text)?.try_into()
    }
}

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Untyped envelope
// ============================================================================

/// The raw `{type, payload}` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    /// Parse a text frame, requiring a non-empty `type` and an object `payload`.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = match value.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
            _ => return Err(DecodeError::MissingField("type")),
        };
        let payload = match value.get("payload") {
            Some(payload @ Value::Object(_)) => payload.clone(),
            _ => return Err(DecodeError::MissingField("payload")),
        };
        Ok(Self { kind, payload })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl TryFrom<Envelope> for SyncEvent {
    type Error = DecodeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        // Exact match only; the case-insensitive FromStr is for CLI input.
        let kind = EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == envelope.kind)
            .ok_or(DecodeError::UnknownType(envelope.kind))?;
        let invalid = |source| DecodeError::InvalidPayload { kind, source };
        let payload = envelope.payload;

        Ok(match kind {
            EventKind::ChatMessage => {
                SyncEvent::ChatMessage(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::DocUpdate => {
                SyncEvent::DocUpdate(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::AgentUpdate => {
                SyncEvent::AgentUpdate(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::AgentDelete => {
                SyncEvent::AgentDelete(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::InputUpdate => {
                SyncEvent::InputUpdate(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::InputCursor => {
                SyncEvent::InputCursor(serde_json::from_value(payload).map_err(invalid)?)
            }
        })
    }
}

impl TryFrom<&SyncEvent> for Envelope {
    type Error = serde_json::Error;

    fn try_from(event: &SyncEvent) -> Result<Self, Self::Error> {
        serde_json::from_value(serde_json::to_value(event)?)
    }
}

// ============================================================================
// Typed projection
// ============================================================================

/// A payload type bound to exactly one channel.
///
/// Lets subscribers name the payload they want instead of matching on
/// [`SyncEvent`] themselves.
pub trait EventPayload: Clone + Send + Sync + 'static {
    const KIND: EventKind;

    fn from_event(event: &SyncEvent) -> Option<&Self>;

    fn into_event(self) -> SyncEvent;
}

macro_rules! event_payload {
    ($payload:ty => $variant:ident) => {
        impl EventPayload for $payload {
            const KIND: EventKind = EventKind::$variant;

            fn from_event(event: &SyncEvent) -> Option<&Self> {
                match event {
                    SyncEvent::$variant(payload) => Some(payload),
                    _ => None,
                }
            }

            fn into_event(self) -> SyncEvent {
                SyncEvent::$variant(self)
            }
        }

        impl From<$payload> for SyncEvent {
            fn from(payload: $payload) -> Self {
                SyncEvent::$variant(payload)
            }
        }
    };
}

event_payload!(ChatMessagePayload => ChatMessage);
event_payload!(DocUpdatePayload => DocUpdate);
event_payload!(AgentUpdatePayload => AgentUpdate);
event_payload!(AgentDeletePayload => AgentDelete);
event_payload!(InputUpdatePayload => InputUpdate);
event_payload!(InputCursorPayload => InputCursor);
