//! Local filesystem storage implementation.

use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::traits::validate_key;
use super::{BlobStore, StorageError, StorageResult};

/// One `<key>.json` file per key under a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Base directory for storage.
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the full path for a key.
    fn full_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(format!("{key}.json")))
    }

    /// Ensure the base directory exists.
    async fn ensure_base_dir(&self) -> StorageResult<()> {
        if !fs::try_exists(&self.base_path).await? {
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let full_path = self.full_path(key)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn save(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        let full_path = self.full_path(key)?;
        self.ensure_base_dir().await?;

        // Write-then-rename so readers never observe a torn blob.
        let tmp_path = full_path.with_extension("json.tmp");
        fs::write(&tmp_path, blob).await?;
        fs::rename(&tmp_path, &full_path).await?;
        debug!("Saved {} bytes to {}", blob.len(), full_path.display());
        Ok(())
    }
}
