//! In-memory cache store.
//!
//! Nothing survives the process. Used when no cache directory is available
//! and as the swappable store in tests.

use crate::cache::{CacheContents, CacheStore};
use crate::error::PromoteError;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    contents: Mutex<CacheContents>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with pre-existing contents.
    pub fn with_contents(contents: CacheContents) -> Self {
        Self {
            contents: Mutex::new(contents),
        }
    }

    /// Snapshot of what is currently stored.
    pub fn snapshot(&self) -> CacheContents {
        self.contents
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self) -> Result<CacheContents, PromoteError> {
        self.contents
            .lock()
            .map(|c| c.clone())
            .map_err(|_| PromoteError::Storage("memory cache lock poisoned".into()))
    }

    async fn save(&self, contents: &CacheContents) -> Result<(), PromoteError> {
        let mut guard = self
            .contents
            .lock()
            .map_err(|_| PromoteError::Storage("memory cache lock poisoned".into()))?;
        *guard = contents.clone();
        Ok(())
    }
}
