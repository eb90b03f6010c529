//! Live presence in the chat input: remote drafts and caret positions.

use std::collections::BTreeMap;

use hanaxia_protocol::{InputCursorPayload, InputUpdatePayload};
use log::trace;
use rand::Rng;

use super::{SharedState, generate_id};
use crate::sync::{EventBus, Subscription};

/// Colors assigned to session identities.
pub const PRESENCE_COLORS: [&str; 8] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#06b6d4", "#3b82f6", "#d946ef", "#f43f5e",
];

/// Who this client is for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
}

impl SessionIdentity {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let number: u32 = rng.random_range(0..1000);
        let color = PRESENCE_COLORS[rng.random_range(0..PRESENCE_COLORS.len())];
        Self {
            user_id: generate_id(),
            user_name: format!("User {}", number),
            color: color.to_string(),
        }
    }
}

/// A remote participant's caret/selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub selection_start: u64,
    pub selection_end: u64,
}

/// Drafts and cursors keyed by (conversation, participant).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceState {
    drafts: BTreeMap<(String, String), String>,
    cursors: BTreeMap<(String, String), RemoteCursor>,
}

impl PresenceState {
    /// Store or clear a remote draft. Returns whether anything changed.
    pub fn apply_draft(&mut self, payload: &InputUpdatePayload) -> bool {
        let key = (payload.conversation_id.clone(), payload.sender_id.clone());
        if payload.text.is_empty() {
            return self.drafts.remove(&key).is_some();
        }
        self.drafts.insert(key, payload.text.clone()).as_deref() != Some(payload.text.as_str())
    }

    pub fn apply_cursor(&mut self, payload: &InputCursorPayload) -> bool {
        let key = (payload.conversation_id.clone(), payload.user_id.clone());
        let cursor = RemoteCursor {
            user_id: payload.user_id.clone(),
            user_name: payload.user_name.clone(),
            color: payload.color.clone(),
            selection_start: payload.selection_start,
            selection_end: payload.selection_end,
        };
        self.cursors.insert(key, cursor.clone()) != Some(cursor)
    }

    /// Drafts in a conversation as (sender, text), ordered by sender.
    pub fn drafts(&self, conversation_id: &str) -> Vec<(String, String)> {
        self.drafts
            .iter()
            .filter(|((conversation, _), _)| conversation == conversation_id)
            .map(|((_, sender), text)| (sender.clone(), text.clone()))
            .collect()
    }

    pub fn cursors(&self, conversation_id: &str) -> Vec<RemoteCursor> {
        self.cursors
            .iter()
            .filter(|((conversation, _), _)| conversation == conversation_id)
            .map(|(_, cursor)| cursor.clone())
            .collect()
    }
}

pub struct PresenceFeature {
    identity: SessionIdentity,
    state: SharedState<PresenceState>,
    bus: EventBus,
    _subscriptions: [Subscription; 2],
}

impl PresenceFeature {
    pub fn mount(bus: &EventBus, identity: SessionIdentity) -> Self {
        let state = SharedState::new(PresenceState::default());

        let own_id = identity.user_id.clone();
        let drafts = state.clone();
        let on_draft = bus.subscribe::<InputUpdatePayload, _>(move |payload| {
            if payload.sender_id == own_id {
                trace!("Ignoring own draft echo");
                return;
            }
            drafts.update_with(|s| ((), s.apply_draft(payload)));
        });

        let own_id = identity.user_id.clone();
        let cursors = state.clone();
        let on_cursor = bus.subscribe::<InputCursorPayload, _>(move |payload| {
            if payload.user_id == own_id {
                return;
            }
            cursors.update_with(|s| ((), s.apply_cursor(payload)));
        });

        Self {
            identity,
            state,
            bus: bus.clone(),
            _subscriptions: [on_draft, on_cursor],
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn state(&self) -> &SharedState<PresenceState> {
        &self.state
    }

    /// Share the current contents of the local input. Empty text clears the
    /// draft on peers.
    pub fn publish_draft(&self, conversation_id: &str, text: &str) {
        self.bus.send(InputUpdatePayload {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            sender_id: self.identity.user_id.clone(),
        });
    }

    pub fn publish_cursor(&self, conversation_id: &str, selection_start: u64, selection_end: u64) {
        self.bus.send(InputCursorPayload {
            conversation_id: conversation_id.to_string(),
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.user_name.clone(),
            color: self.identity.color.clone(),
            selection_start,
            selection_end,
        });
    }
}
