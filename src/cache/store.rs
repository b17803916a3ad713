//! [`CacheStore`] trait definition.

use crate::cache::CacheContents;
use crate::error::PromoteError;
use async_trait::async_trait;

/// Backing store for the job cache.
///
/// The cache is always read and written as a whole. Two processes racing
/// on the same store can lose an update; the last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load every entry. A store that was never written loads as empty.
    async fn load(&self) -> Result<CacheContents, PromoteError>;

    /// Replace the stored contents. Must be durable when this returns.
    async fn save(&self, contents: &CacheContents) -> Result<(), PromoteError>;
}
