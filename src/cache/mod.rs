//! Job cache: the local record of promotion jobs started from this machine.
//!
//! This module contains:
//! - [`CacheStore`] trait + [`FileCacheStore`] / [`MemoryCacheStore`] - whole-map persistence
//! - [`JobCache`] - TTL-bounded key operations and job id resolution on top of a store
//! - [`CacheEntry`] - on-disk representation of one job

mod entry;
mod job_cache;
mod memory;
mod store;

#[cfg(feature = "file-storage")]
pub mod file_backed;

pub use entry::{CacheContents, CacheEntry, CachePayload};
pub use job_cache::{Clock, JobCache, DEFAULT_TTL};
pub use memory::MemoryCacheStore;
pub use store::CacheStore;

#[cfg(feature = "file-storage")]
pub use file_backed::FileCacheStore;

#[cfg(test)]
mod tests;
