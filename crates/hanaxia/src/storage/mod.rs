//! Local key/value blob storage for feature state.
//!
//! Provides a trait-based abstraction with implementations for:
//! - Local filesystem storage (one file per key)
//! - In-memory storage (tests and ephemeral sessions)
//!
//! There are no transactions or migrations: a key holds the latest blob
//! written to it, or nothing.

mod error;
mod local;
mod memory;
mod traits;

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::BlobStore;

/// Storage key for the chat conversation list.
pub const CHATS_KEY: &str = "hanaxia-chats";
/// Storage key for agent goals.
pub const GOALS_KEY: &str = "hanaxia-agent-goals";
/// Storage key for agent templates.
pub const TEMPLATES_KEY: &str = "hanaxia-agent-templates";
/// Storage key for calendar events.
pub const EVENTS_KEY: &str = "hanaxia-events";

/// Create storage based on configuration.
pub fn create_storage(config: StorageConfig) -> Box<dyn BlobStore> {
    match config {
        StorageConfig::Local(path) => Box::new(LocalStorage::new(path)),
        StorageConfig::Memory => Box::new(MemoryStorage::new()),
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Files under a directory.
    Local(PathBuf),
    /// Process memory only.
    Memory,
}

/// Load and deserialize a JSON blob. `Ok(None)` when the key is absent.
pub async fn load_json<T>(store: &dyn BlobStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match store.load(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize a value as JSON and store it.
pub async fn save_json<T>(store: &dyn BlobStore, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.save(key, &bytes).await
}
