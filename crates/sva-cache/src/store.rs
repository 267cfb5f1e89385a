//! Evidence cache store
//!
//! Rows are keyed by `(story_id, commit_sha)` and written at most once.
//! Lookups accept either one commit or a newest-first list of candidate
//! commits, in which case the earliest listed commit with a row wins.

use crate::backend::CacheBackend;
use crate::error::CacheResult;
use crate::model::{CacheData, CacheEntry};
use std::collections::HashSet;
use std::sync::Arc;

/// Commit(s) to probe in [`EvidenceCacheStore::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitLookup {
    /// Exact key lookup
    Exact(String),
    /// Newest-first candidates; the first one with a row wins
    Candidates(Vec<String>),
}

impl CommitLookup {
    /// Candidates in probe order, duplicates removed
    fn ordered(&self) -> Vec<String> {
        match self {
            Self::Exact(sha) => vec![sha.clone()],
            Self::Candidates(shas) => {
                let mut seen = HashSet::with_capacity(shas.len());
                shas.iter()
                    .filter(|sha| seen.insert(sha.as_str()))
                    .cloned()
                    .collect()
            }
        }
    }
}

impl From<&str> for CommitLookup {
    fn from(sha: &str) -> Self {
        Self::Exact(sha.to_string())
    }
}

impl From<String> for CommitLookup {
    fn from(sha: String) -> Self {
        Self::Exact(sha)
    }
}

impl From<Vec<String>> for CommitLookup {
    fn from(shas: Vec<String>) -> Self {
        Self::Candidates(shas)
    }
}

impl From<&[&str]> for CommitLookup {
    fn from(shas: &[&str]) -> Self {
        Self::Candidates(shas.iter().map(|s| (*s).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommitLookup {
    fn from(shas: [&str; N]) -> Self {
        Self::Candidates(shas.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Outcome of [`EvidenceCacheStore::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This call wrote the row
    Inserted,
    /// A row for the key already existed; nothing was written
    AlreadyCached,
}

/// Per-commit evidence cache over a pluggable backend
#[derive(Clone)]
pub struct EvidenceCacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for EvidenceCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceCacheStore").finish_non_exhaustive()
    }
}

impl EvidenceCacheStore {
    /// Create store over `backend`
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Create store sharing an existing backend handle
    #[must_use]
    pub fn from_shared(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Fetch the cache entry for a story at one commit, or at the first
    /// listed commit that has one
    ///
    /// # Errors
    /// Fails only on backend errors; a missing row is `Ok(None)`.
    #[tracing::instrument(skip_all, fields(story_id = %story_id))]
    pub async fn get(
        &self,
        story_id: &str,
        commits: impl Into<CommitLookup>,
    ) -> CacheResult<Option<CacheEntry>> {
        let candidates = commits.into().ordered();
        if candidates.is_empty() {
            return Ok(None);
        }

        let rows = self.backend.select_many(story_id, &candidates).await?;
        let hit = candidates
            .iter()
            .find_map(|sha| rows.iter().find(|row| &row.commit_sha == sha))
            .cloned();

        match &hit {
            Some(entry) => tracing::debug!(commit_sha = %entry.commit_sha, "cache hit"),
            None => tracing::debug!(candidates = candidates.len(), "cache miss"),
        }
        Ok(hit)
    }

    /// Persist cache data for `(story_id, commit_sha)` unless a row exists
    ///
    /// Losing a race to another writer is not an error: the outcome is
    /// [`SaveOutcome::AlreadyCached`].
    ///
    /// # Errors
    /// Fails on encoding or backend errors.
    #[tracing::instrument(skip_all, fields(story_id = %story_id, commit_sha = %commit_sha))]
    pub async fn save(
        &self,
        branch_name: &str,
        story_id: &str,
        commit_sha: &str,
        cache_data: &CacheData,
        run_id: &str,
    ) -> CacheResult<SaveOutcome> {
        let entry = CacheEntry::new(
            branch_name,
            story_id,
            commit_sha,
            cache_data.to_value()?,
            run_id,
        );
        let outcome = if self.backend.insert_if_absent(entry).await? {
            SaveOutcome::Inserted
        } else {
            SaveOutcome::AlreadyCached
        };
        tracing::debug!(?outcome, steps = cache_data.len(), "cache save");
        Ok(outcome)
    }

    /// Delete the row for one commit
    ///
    /// # Errors
    /// Fails on backend errors.
    pub async fn invalidate(&self, story_id: &str, commit_sha: &str) -> CacheResult<()> {
        let removed = self.backend.delete(story_id, commit_sha).await?;
        tracing::debug!(story_id, commit_sha, removed, "invalidated cache entry");
        Ok(())
    }

    /// Delete every row for a story across all branches and commits
    ///
    /// # Errors
    /// Fails on backend errors.
    pub async fn invalidate_all_for_story(&self, story_id: &str) -> CacheResult<()> {
        let removed = self.backend.delete_story(story_id).await?;
        tracing::info!(story_id, removed, "invalidated all cache entries for story");
        Ok(())
    }
}
