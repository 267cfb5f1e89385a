//! SQLite backend
//!
//! One table, `story_evidence_cache`, with a uniqueness constraint on
//! `(story_id, commit_sha)`. `rusqlite` is synchronous, so every call runs
//! on the blocking pool.

use super::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::model::CacheEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS story_evidence_cache (
      id TEXT PRIMARY KEY,
      branch_name TEXT NOT NULL,
      story_id TEXT NOT NULL,
      commit_sha TEXT NOT NULL,
      cache_data TEXT NOT NULL,
      run_id TEXT NOT NULL,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL,
      UNIQUE(story_id, commit_sha)
    );

    CREATE INDEX IF NOT EXISTS idx_story_evidence_cache_story
      ON story_evidence_cache(story_id);
"#;

const COLUMNS: &str =
    "id, branch_name, story_id, commit_sha, cache_data, run_id, created_at, updated_at";

/// Cache rows in a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// Fails when the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database
    ///
    /// # Errors
    /// Fails when the schema cannot be created.
    pub fn open_in_memory() -> CacheResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock())).await?
    }
}

/// Column values as read, before decoding
struct RawRow {
    id: String,
    branch_name: String,
    story_id: String,
    commit_sha: String,
    cache_data: String,
    run_id: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            branch_name: row.get(1)?,
            story_id: row.get(2)?,
            commit_sha: row.get(3)?,
            cache_data: row.get(4)?,
            run_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn decode(self) -> CacheResult<CacheEntry> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| CacheError::InvalidData(format!("row id '{}': {e}", self.id)))?;

        // A blob that is not JSON is handed on as an opaque string; the
        // validator rejects it like any other malformed payload.
        let cache_data = serde_json::from_str(&self.cache_data).unwrap_or_else(|_| {
            tracing::warn!(
                story_id = %self.story_id,
                commit_sha = %self.commit_sha,
                "cache_data column is not JSON"
            );
            serde_json::Value::String(self.cache_data.clone())
        });

        Ok(CacheEntry {
            id,
            branch_name: self.branch_name,
            story_id: self.story_id,
            commit_sha: self.commit_sha,
            cache_data,
            run_id: self.run_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> CacheResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CacheError::InvalidData(format!("timestamp '{raw}': {e}")))
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn insert_if_absent(&self, entry: CacheEntry) -> CacheResult<bool> {
        let blob = serde_json::to_string(&entry.cache_data)?;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                r#"
                INSERT INTO story_evidence_cache(
                  id, branch_name, story_id, commit_sha, cache_data, run_id, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(story_id, commit_sha) DO NOTHING
                "#,
                params![
                    entry.id.to_string(),
                    entry.branch_name,
                    entry.story_id,
                    entry.commit_sha,
                    blob,
                    entry.run_id,
                    entry.created_at.to_rfc3339(),
                    entry.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn select_many(
        &self,
        story_id: &str,
        commit_shas: &[String],
    ) -> CacheResult<Vec<CacheEntry>> {
        if commit_shas.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..commit_shas.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM story_evidence_cache \
             WHERE story_id = ?1 AND commit_sha IN ({placeholders})"
        );
        let mut bind = Vec::with_capacity(commit_shas.len() + 1);
        bind.push(story_id.to_string());
        bind.extend(commit_shas.iter().cloned());

        let raw = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(bind.iter()), RawRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        // A row whose columns do not decode is treated as a miss so the
        // pair is re-verified.
        Ok(raw
            .into_iter()
            .filter_map(|row| {
                let (story_id, commit_sha) = (row.story_id.clone(), row.commit_sha.clone());
                row.decode()
                    .map_err(|e| {
                        tracing::warn!(%story_id, %commit_sha, error = %e, "skipping undecodable cache row");
                    })
                    .ok()
            })
            .collect())
    }

    async fn delete(&self, story_id: &str, commit_sha: &str) -> CacheResult<bool> {
        let story_id = story_id.to_string();
        let commit_sha = commit_sha.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM story_evidence_cache WHERE story_id = ?1 AND commit_sha = ?2",
                params![story_id, commit_sha],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_story(&self, story_id: &str) -> CacheResult<u64> {
        let story_id = story_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM story_evidence_cache WHERE story_id = ?1",
                params![story_id],
            )?;
            Ok(deleted as u64)
        })
        .await
    }
}
