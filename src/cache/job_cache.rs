//! TTL-bounded job cache over a [`CacheStore`].

use crate::cache::{CacheContents, CacheEntry, CachePayload, CacheStore};
use crate::error::PromoteError;
use crate::types::{LONG_ID_LEN, SHORT_ID_LEN};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Entries older than this are never reported as the latest job.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Source of "now" in unix milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Job id cache shared by every command of one process.
///
/// Each mutating call loads the whole store, applies the change, drops
/// expired entries and writes everything back before returning.
pub struct JobCache<S: CacheStore> {
    store: S,
    ttl: Duration,
    clock: Clock,
}

impl<S: CacheStore> JobCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            clock: Arc::new(current_unix_millis),
        }
    }

    /// Replace the clock. Tests use this to age entries.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert or overwrite `job_id` with a fresh timestamp.
    pub async fn set(&self, job_id: &str, data: CachePayload) -> Result<(), PromoteError> {
        let now = self.now();
        let mut contents = self.store.load().await?;
        contents.insert(job_id.to_string(), CacheEntry::new(now, data));
        self.write(contents, now).await?;
        debug!(job_id, "cached job");
        Ok(())
    }

    /// Remove `job_id`. Fails with [`PromoteError::CacheKeyNotFound`] when
    /// absent; callers that don't care may ignore it.
    pub async fn unset(&self, job_id: &str) -> Result<(), PromoteError> {
        let now = self.now();
        let mut contents = self.store.load().await?;
        if contents.remove(job_id).is_none() {
            return Err(PromoteError::CacheKeyNotFound(job_id.to_string()));
        }
        self.write(contents, now).await
    }

    /// Merge `partial` into an existing entry and refresh its timestamp.
    pub async fn update(&self, job_id: &str, partial: CachePayload) -> Result<(), PromoteError> {
        let now = self.now();
        let mut contents = self.store.load().await?;
        let entry = contents
            .get_mut(job_id)
            .filter(|e| !e.is_expired(now, self.ttl_ms()))
            .ok_or_else(|| PromoteError::CacheKeyNotFound(job_id.to_string()))?;
        entry.merge(partial, now);
        self.write(contents, now).await
    }

    /// Live entry for `job_id`, if any.
    pub async fn get(&self, job_id: &str) -> Result<Option<CacheEntry>, PromoteError> {
        let now = self.now();
        let contents = self.store.load().await?;
        Ok(contents
            .get(job_id)
            .filter(|e| !e.is_expired(now, self.ttl_ms()))
            .cloned())
    }

    /// Keys of every live entry.
    pub async fn keys(&self) -> Result<Vec<String>, PromoteError> {
        let now = self.now();
        let contents = self.store.load().await?;
        Ok(live_entries(&contents, now, self.ttl_ms())
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Key of the most recently written live entry.
    pub async fn latest_key(&self) -> Result<String, PromoteError> {
        let now = self.now();
        let contents = self.store.load().await?;
        live_entries(&contents, now, self.ttl_ms())
            // BTreeMap iterates keys in order, so max_by_key keeps the
            // greater key on equal timestamps.
            .max_by_key(|(_, e)| e.timestamp)
            .map(|(k, _)| k.clone())
            .ok_or(PromoteError::NoRecentJob)
    }

    /// Pick the job a resume/report command targets.
    pub async fn resolve_latest(
        &self,
        use_latest: bool,
        explicit_id: Option<&str>,
    ) -> Result<String, PromoteError> {
        if use_latest {
            return self.latest_key().await;
        }
        let id = explicit_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PromoteError::InvalidJobId("no job id provided".into()))?;
        self.resolve_long_id(id).await
    }

    /// Expand a 15-character id to the 18-character form found in the cache.
    ///
    /// Resolution is cache-scoped: a short id for a job this machine never
    /// cached cannot be expanded, even though the remote would know it.
    pub async fn resolve_long_id(&self, id: &str) -> Result<String, PromoteError> {
        match id.len() {
            LONG_ID_LEN => Ok(id.to_string()),
            SHORT_ID_LEN => self
                .keys()
                .await?
                .into_iter()
                .find(|key| key.starts_with(id))
                .ok_or_else(|| PromoteError::InvalidJobId(id.to_string())),
            _ => Err(PromoteError::InvalidJobId(id.to_string())),
        }
    }

    async fn write(&self, mut contents: CacheContents, now: u64) -> Result<(), PromoteError> {
        let ttl_ms = self.ttl_ms();
        contents.retain(|_, e| !e.is_expired(now, ttl_ms));
        self.store.save(&contents).await
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }
}

fn live_entries(
    contents: &CacheContents,
    now: u64,
    ttl_ms: u64,
) -> impl Iterator<Item = (&String, &CacheEntry)> {
    contents
        .iter()
        .filter(move |(_, e)| !e.is_expired(now, ttl_ms))
}

fn current_unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
