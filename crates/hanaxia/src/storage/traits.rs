//! Storage trait definitions.

use async_trait::async_trait;

use super::{StorageError, StorageResult};

/// Key/value blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`, if any.
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the blob stored under `key`.
    async fn save(&self, key: &str, blob: &[u8]) -> StorageResult<()>;
}

/// Keys are limited to `[A-Za-z0-9_.-]`, non-empty, and may not start with a dot.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("hanaxia-chats").is_ok());
        assert!(validate_key("v2.goals_backup").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("a/b").is_err());
    }
}
