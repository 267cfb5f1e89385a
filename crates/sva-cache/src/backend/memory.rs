//! In-process backend

use super::CacheBackend;
use crate::error::CacheResult;
use crate::model::CacheEntry;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

type Key = (String, String);

/// Cache rows held in a concurrent map
///
/// The vacant-entry check and the insert happen under one shard lock, so
/// concurrent writers of the same key cannot both win.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: DashMap<Key, CacheEntry>,
}

impl MemoryBackend {
    /// Empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn insert_if_absent(&self, entry: CacheEntry) -> CacheResult<bool> {
        let key = (entry.story_id.clone(), entry.commit_sha.clone());
        match self.rows.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    async fn select_many(
        &self,
        story_id: &str,
        commit_shas: &[String],
    ) -> CacheResult<Vec<CacheEntry>> {
        Ok(commit_shas
            .iter()
            .filter_map(|sha| {
                self.rows
                    .get(&(story_id.to_string(), sha.clone()))
                    .map(|row| row.value().clone())
            })
            .collect())
    }

    async fn delete(&self, story_id: &str, commit_sha: &str) -> CacheResult<bool> {
        Ok(self
            .rows
            .remove(&(story_id.to_string(), commit_sha.to_string()))
            .is_some())
    }

    async fn delete_story(&self, story_id: &str) -> CacheResult<u64> {
        let mut removed = 0_u64;
        self.rows.retain(|(story, _), _| {
            let keep = story != story_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
