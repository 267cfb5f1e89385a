//! Persistence backends for the evidence cache
//!
//! A backend is a keyed table with a uniqueness constraint on
//! `(story_id, commit_sha)`. It knows nothing about cache semantics beyond
//! "insert if absent"; ordering of candidate commits is the store's job.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::CacheResult;
use crate::model::CacheEntry;
use async_trait::async_trait;
use std::sync::Arc;

/// Keyed storage for cache rows
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Insert `entry` unless a row for its key exists
    ///
    /// Returns `true` if the row was written.
    async fn insert_if_absent(&self, entry: CacheEntry) -> CacheResult<bool>;

    /// All rows for `story_id` whose commit is in `commit_shas`, any order
    async fn select_many(&self, story_id: &str, commit_shas: &[String])
        -> CacheResult<Vec<CacheEntry>>;

    /// Delete one row, returning whether it existed
    async fn delete(&self, story_id: &str, commit_sha: &str) -> CacheResult<bool>;

    /// Delete every row for a story, returning how many were removed
    async fn delete_story(&self, story_id: &str) -> CacheResult<u64>;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn insert_if_absent(&self, entry: CacheEntry) -> CacheResult<bool> {
        (**self).insert_if_absent(entry).await
    }

    async fn select_many(
        &self,
        story_id: &str,
        commit_shas: &[String],
    ) -> CacheResult<Vec<CacheEntry>> {
        (**self).select_many(story_id, commit_shas).await
    }

    async fn delete(&self, story_id: &str, commit_sha: &str) -> CacheResult<bool> {
        (**self).delete(story_id, commit_sha).await
    }

    async fn delete_story(&self, story_id: &str) -> CacheResult<u64> {
        (**self).delete_story(story_id).await
    }
}
