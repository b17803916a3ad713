//! File-backed cache store.
//!
//! Stores the whole cache as one JSON object under
//! `~/.devops-promote/job-cache.json`:
//!
//! ```text
//! {
//!   "0Af5g00000XyZAbCDE": { "timestamp": 1700000000000, "payload": {} }
//! }
//! ```

use crate::cache::{CacheContents, CacheStore};
use crate::error::PromoteError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File name of the cache inside the state directory.
pub const CACHE_FILE_NAME: &str = "job-cache.json";

/// File-backed implementation of [`CacheStore`].
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    /// Default location: `~/.devops-promote/job-cache.json`.
    pub fn default_path() -> Result<PathBuf, PromoteError> {
        let home = dirs::home_dir()
            .ok_or_else(|| PromoteError::Storage("could not determine home directory".into()))?;
        Ok(home.join(".devops-promote").join(CACHE_FILE_NAME))
    }

    /// Create a store at the default location.
    pub fn new_default() -> Result<Self, PromoteError> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Create a store at a custom file path. Nothing is touched on disk
    /// until the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self) -> Result<CacheContents, PromoteError> {
        if tokio::fs::metadata(&self.path).await.is_err() {
            return Ok(CacheContents::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PromoteError::Storage(format!("failed to read job cache: {}", e)))?;

        if content.trim().is_empty() {
            return Ok(CacheContents::new());
        }

        serde_json::from_str(&content)
            .map_err(|e| PromoteError::Storage(format!("failed to parse job cache: {}", e)))
    }

    async fn save(&self, contents: &CacheContents) -> Result<(), PromoteError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PromoteError::Storage(format!("failed to create cache dir: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(contents)
            .map_err(|e| PromoteError::Storage(format!("failed to serialize job cache: {}", e)))?;

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| PromoteError::Storage(format!("failed to write job cache: {}", e)))?;

        Ok(())
    }
}
