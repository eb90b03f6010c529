//! Application entities relayed over the sync channel.
//!
//! Field names follow the console's JSON shape (camelCase) so that frames
//! produced by any client round-trip unchanged.

use serde::{Deserialize, Serialize};

/// Kind of media carried by an [`Attachment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    File,
}

/// A file attached to a chat message. `data` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub data: String,
    pub name: String,
    pub size: u64,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single chat message. `time` is Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>, time: i64) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.into(),
            time,
            attachments: None,
        }
    }
}

/// An ordered chat thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
        }
    }

    /// Whether a message with this id is already part of the thread.
    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }
}

/// An agent goal and, once executed, its generated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub text: String,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// Reusable goal template. Local to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTemplate {
    pub id: String,
    pub name: String,
    pub title: String,
    pub text: String,
}

/// Calendar entry. `date` is an ISO-8601 date string and sorts lexically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_uses_camel_case_and_omits_missing_attachments() {
        let msg = Message::new("m1", Role::Assistant, "hi", 1_700_000_000_000);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["time"], 1_700_000_000_000_i64);
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn test_attachment_kind_serializes_as_type() {
        let att = Attachment {
            id: "a1".to_string(),
            kind: AttachmentKind::Image,
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
            name: "pic.png".to_string(),
            size: 3,
        };

        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["mimeType"], "image/png");
    }

    #[test]
    fn test_conversation_messages_default_to_empty() {
        let conv: Conversation =
            serde_json::from_str(r#"{"id":"c1","title":"New Chat"}"#).unwrap();
        assert!(conv.messages.is_empty());
    }

    #[test]
    fn test_goal_plan_is_optional() {
        let goal: Goal =
            serde_json::from_str(r#"{"id":"g1","title":"T","text":"x","created":1}"#).unwrap();
        assert_eq!(goal.plan, None);

        let json = serde_json::to_string(&goal).unwrap();
        assert!(!json.contains("plan"));
    }
}
