//! In-memory storage implementation.

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::validate_key;
use super::{BlobStore, StorageResult};

/// Blobs kept in process memory. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.get(key).map(|blob| blob.value().clone()))
    }

    async fn save(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs.insert(key.to_string(), blob.to_vec());
        Ok(())
    }
}
