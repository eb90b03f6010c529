//! Chat conversations: local sessions, streamed assistant replies, and
//! merging of messages relayed from other clients.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use hanaxia_protocol::{Attachment, ChatMessagePayload, Conversation, Message, Role};
use log::{debug, info, warn};
use thiserror::Error;

use super::{SharedState, generate_id, now_millis};
use crate::genai::{Assistant, ChatTurn, GenAiError};
use crate::storage::{self, BlobStore, StorageResult};
use crate::sync::{EventBus, Subscription};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const REMOTE_TITLE: &str = "Remote Chat";
pub const INITIAL_CONVERSATION_ID: &str = "init-chat";
pub const APOLOGY_TEXT: &str =
    "I apologize, but I encountered an error connecting to the service.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a reply is already streaming")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    GenAi(#[from] GenAiError),
}

/// What [`ConversationStore::merge_remote`] did with a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended to an existing conversation.
    Appended,
    /// The conversation already held a message with that id.
    Duplicate,
    /// A new conversation was created at the front of the list.
    Created,
}

/// Ordered conversation list plus the active selection.
///
/// Never empty: removing the last conversation replaces it with a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_id: String,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ConversationStore {
    /// Store over a persisted list; the first conversation becomes active.
    pub fn new(conversations: Vec<Conversation>) -> Self {
        let conversations = if conversations.is_empty() {
            vec![Conversation::new(INITIAL_CONVERSATION_ID, DEFAULT_TITLE)]
        } else {
            conversations
        };
        let active_id = conversations[0].id.clone();
        Self {
            conversations,
            active_id,
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    /// The active conversation, or the first one if the selection is stale.
    pub fn active(&self) -> &Conversation {
        self.get(&self.active_id).unwrap_or(&self.conversations[0])
    }

    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active_id = id.to_string();
        true
    }

    /// Apply a relayed message: append unless already present, or create the
    /// conversation at the front when unknown.
    pub fn merge_remote(&mut self, payload: &ChatMessagePayload) -> MergeOutcome {
        if let Some(conversation) = self.get_mut(&payload.conversation_id) {
            if conversation.contains_message(&payload.message.id) {
                return MergeOutcome::Duplicate;
            }
            conversation.messages.push(payload.message.clone());
            return MergeOutcome::Appended;
        }

        let title = payload
            .conversation_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(REMOTE_TITLE);
        let mut conversation = Conversation::new(payload.conversation_id.clone(), title);
        conversation.messages.push(payload.message.clone());
        self.conversations.insert(0, conversation);
        MergeOutcome::Created
    }

    /// Start an empty conversation at the front and make it active.
    pub fn create_session(&mut self) -> String {
        let id = generate_id();
        self.conversations.insert(0, Conversation::new(id.clone(), DEFAULT_TITLE));
        self.active_id = id.clone();
        id
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }
        if self.conversations.is_empty() {
            self.conversations.push(Conversation::new(generate_id(), DEFAULT_TITLE));
        }
        self.repair_active();
        true
    }

    pub fn rename(&mut self, id: &str, title: &str) -> bool {
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop every conversation and start over with one empty session.
    pub fn clear(&mut self) -> String {
        let id = generate_id();
        self.conversations = vec![Conversation::new(id.clone(), DEFAULT_TITLE)];
        self.active_id = id.clone();
        id
    }

    /// Replace a conversation wholesale by id.
    pub fn replace(&mut self, conversation: Conversation) -> bool {
        match self.get_mut(&conversation.id) {
            Some(existing) => {
                *existing = conversation;
                true
            }
            None => false,
        }
    }

    pub fn append_message(&mut self, conversation_id: &str, message: Message) -> bool {
        match self.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.messages.push(message);
                true
            }
            None => false,
        }
    }

    pub fn set_message_text(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> bool {
        let Some(message) = self
            .get_mut(conversation_id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        message.text = text.to_string();
        true
    }

    fn repair_active(&mut self) {
        if self.get(&self.active_id).is_none() {
            self.active_id = self.conversations[0].id.clone();
        }
    }
}

/// Resets the streaming flag when a reply finishes, however it finishes.
struct StreamingGuard<'a>(&'a AtomicBool);

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Chat feature mounted on the bus.
pub struct ChatFeature {
    state: SharedState<ConversationStore>,
    bus: EventBus,
    streaming: AtomicBool,
    _subscription: Subscription,
}

impl ChatFeature {
    pub fn mount(bus: &EventBus, store: ConversationStore) -> Self {
        let state = SharedState::new(store);
        let remote = state.clone();
        let subscription = bus.subscribe::<ChatMessagePayload, _>(move |payload| {
            let outcome = remote.update_with(|store| {
                let outcome = store.merge_remote(payload);
                (outcome, outcome != MergeOutcome::Duplicate)
            });
            debug!(
                "Remote chat message {} for {}: {:?}",
                payload.message.id, payload.conversation_id, outcome
            );
        });

        Self {
            state,
            bus: bus.clone(),
            streaming: AtomicBool::new(false),
            _subscription: subscription,
        }
    }

    /// Load the persisted conversation list.
    pub async fn load(storage: &dyn BlobStore) -> StorageResult<ConversationStore> {
        let conversations: Option<Vec<Conversation>> =
            storage::load_json(storage, storage::CHATS_KEY).await?;
        Ok(ConversationStore::new(conversations.unwrap_or_default()))
    }

    pub async fn persist(&self, storage: &dyn BlobStore) -> StorageResult<()> {
        let conversations = self.state.read(|s| s.conversations().to_vec());
        storage::save_json(storage, storage::CHATS_KEY, &conversations).await
    }

    pub fn state(&self) -> &SharedState<ConversationStore> {
        &self.state
    }

    pub fn snapshot(&self) -> ConversationStore {
        self.state.snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn create_session(&self) -> String {
        self.state.update(|s| s.create_session())
    }

    pub fn select(&self, id: &str) -> bool {
        self.state.update_with(|s| {
            let changed = s.set_active(id);
            (changed, changed)
        })
    }

    pub fn delete(&self, id: &str) -> bool {
        self.state.update_with(|s| {
            let changed = s.delete(id);
            (changed, changed)
        })
    }

    pub fn rename(&self, id: &str, title: &str) -> bool {
        self.state.update_with(|s| {
            let changed = s.rename(id, title);
            (changed, changed)
        })
    }

    pub fn clear_history(&self) -> String {
        self.state.update(|s| s.clear())
    }

    /// Send a user message in the active conversation and stream the reply.
    ///
    /// The user message is appended and published before the assistant is
    /// called. Each chunk is passed to `on_chunk` and written into the
    /// assistant message in place; the finished message is published once.
    /// On failure an apology is appended locally and nothing more is sent.
    pub async fn send_message<F>(
        &self,
        assistant: &Assistant,
        text: &str,
        attachments: Vec<Attachment>,
        mut on_chunk: F,
    ) -> Result<Message, ChatError>
    where
        F: FnMut(&str),
    {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChatError::Busy);
        }
        let _guard = StreamingGuard(&self.streaming);

        let (conversation_id, title, history) = self.state.read(|s| {
            let active = s.active();
            let history: Vec<ChatTurn> = active.messages.iter().map(ChatTurn::from).collect();
            (active.id.clone(), active.title.clone(), history)
        });

        let mut user_message = Message::new(generate_id(), Role::User, text, now_millis());
        if !attachments.is_empty() {
            user_message.attachments = Some(attachments.clone());
        }
        self.state.update(|s| s.append_message(&conversation_id, user_message.clone()));
        self.bus.send(ChatMessagePayload {
            conversation_id: conversation_id.clone(),
            conversation_title: Some(title.clone()),
            message: user_message,
        });

        match self
            .stream_reply(
                assistant,
                &conversation_id,
                &history,
                text,
                &attachments,
                &mut on_chunk,
            )
            .await
        {
            Ok(reply) => {
                info!(
                    "Assistant replied in {} ({} chars)",
                    conversation_id,
                    reply.text.len()
                );
                self.bus.send(ChatMessagePayload {
                    conversation_id,
                    conversation_title: Some(title),
                    message: reply.clone(),
                });
                Ok(reply)
            }
            Err(e) => {
                warn!("Chat reply failed: {}", e);
                let apology =
                    Message::new(generate_id(), Role::Assistant, APOLOGY_TEXT, now_millis());
                self.state.update(|s| s.append_message(&conversation_id, apology));
                Err(e.into())
            }
        }
    }

    async fn stream_reply<F>(
        &self,
        assistant: &Assistant,
        conversation_id: &str,
        history: &[ChatTurn],
        text: &str,
        attachments: &[Attachment],
        on_chunk: &mut F,
    ) -> Result<Message, GenAiError>
    where
        F: FnMut(&str),
    {
        let mut stream = assistant.stream_chat(history, text, attachments).await?;

        let mut reply = Message::new(generate_id(), Role::Assistant, "", now_millis());
        self.state.update(|s| s.append_message(conversation_id, reply.clone()));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            reply.text.push_str(&chunk);
            on_chunk(&chunk);
            self.state.update(|s| s.set_message_text(conversation_id, &reply.id, &reply.text));
        }
        Ok(reply)
    }
}
