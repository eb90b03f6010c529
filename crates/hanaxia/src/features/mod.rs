//! Feature state driven by the event bus.
//!
//! Each feature owns its state behind a [`SharedState`], mutates it in
//! response to local actions and remote events, and publishes its own changes
//! through the [`EventBus`](crate::sync::EventBus). Remote events are applied
//! locally and never re-published.
//!
//! | Feature  | Channels                      | Persisted under      |
//! |----------|-------------------------------|----------------------|
//! | chat     | `CHAT_MESSAGE`                | `hanaxia-chats`      |
//! | doc      | `DOC_UPDATE`                  | -                    |
//! | agent    | `AGENT_UPDATE`, `AGENT_DELETE`| `hanaxia-agent-*`    |
//! | presence | `INPUT_UPDATE`, `INPUT_CURSOR`| -                    |
//! | calendar | -                             | `hanaxia-events`     |

pub mod agent;
pub mod calendar;
pub mod chat;
pub mod doc;
pub mod presence;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use uuid::Uuid;

pub use agent::{AgentError, AgentFeature, GoalStore, TemplateStore};
pub use calendar::{CalendarFeature, CalendarStore};
pub use chat::{ChatError, ChatFeature, ConversationStore, MergeOutcome};
pub use doc::DocFeature;
pub use presence::{PresenceFeature, PresenceState, SessionIdentity};

/// State shared between a feature and its bus subscribers.
///
/// Every mutation that changes the state bumps a revision counter, which
/// observers can await through [`SharedState::watch`].
pub struct SharedState<T> {
    value: Arc<Mutex<T>>,
    revision: Arc<watch::Sender<u64>>,
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            revision: Arc::clone(&self.revision),
        }
    }
}

impl<T> SharedState<T> {
    pub fn new(value: T) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            value: Arc::new(Mutex::new(value)),
            revision: Arc::new(revision),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.lock();
        f(&*guard)
    }

    /// Mutate and bump the revision.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.lock();
            f(&mut *guard)
        };
        self.bump();
        result
    }

    /// Mutate; bump the revision only when `f` reports a change.
    pub fn update_with<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> R {
        let (result, changed) = {
            let mut guard = self.lock();
            f(&mut *guard)
        };
        if changed {
            self.bump();
        }
        result
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl<T: Clone> SharedState<T> {
    pub fn snapshot(&self) -> T {
        self.lock().clone()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Time-prefixed unique identifier.
pub fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_millis(), &suffix[..9])
}
