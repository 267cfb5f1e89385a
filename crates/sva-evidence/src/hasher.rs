//! File-hashing capability
//!
//! [`FileHasher`] is scoped to one repository checkout: given a
//! checkout-relative path it returns the current content hash, or fails
//! distinctly when the file cannot be read. Callers treat a failure as
//! "evidence can no longer be trusted", so implementations must never
//! substitute a sentinel hash.

use crate::hash::ContentHash;
use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Hash a file inside one checkout
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileHasher: Send + Sync {
    /// Current content hash of `path`
    ///
    /// # Errors
    /// Fails when the path does not exist or cannot be read.
    async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError>;
}

#[async_trait]
impl<T: FileHasher + ?Sized> FileHasher for Arc<T> {
    async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError> {
        (**self).hash_file(path).await
    }
}

/// Reasons a file could not be hashed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileHashError {
    /// Path does not exist in the checkout
    #[error("file not found: {0}")]
    NotFound(String),

    /// Path escapes the checkout root
    #[error("path outside checkout: {0}")]
    OutsideCheckout(String),

    /// Read failed for another reason
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },

    /// Sandbox or remote reader unavailable
    #[error("file reader unavailable for {path}: {reason}")]
    Unavailable { path: String, reason: String },
}

impl FileHashError {
    /// Path the failure refers to
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound(path) | Self::OutsideCheckout(path) => path,
            Self::Io { path, .. } | Self::Unavailable { path, .. } => path,
        }
    }
}

/// Hashes files of a checkout on the local filesystem
#[derive(Debug, Clone)]
pub struct CheckoutHasher {
    root: PathBuf,
}

impl CheckoutHasher {
    /// Create hasher rooted at a checkout directory
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Checkout root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FileHashError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(FileHashError::OutsideCheckout(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileHasher for CheckoutHasher {
    async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(ContentHash::compute(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileHashError::NotFound(path.to_string()))
            }
            Err(e) => Err(FileHashError::Io {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Memoizes another hasher's answers, failures included
///
/// One instance should live for a single validation or build pass: a file
/// referenced by many assertions is read once, and a failed read is not
/// retried within the pass.
#[derive(Clone)]
pub struct MemoizedHasher<H> {
    inner: H,
    memo: Cache<String, Result<ContentHash, FileHashError>>,
}

impl<H: FileHasher> MemoizedHasher<H> {
    /// Wrap `inner`, remembering up to `capacity` paths
    #[must_use]
    pub fn new(inner: H, capacity: u64) -> Self {
        Self {
            inner,
            memo: Cache::new(capacity),
        }
    }

    /// Number of memoized paths
    #[must_use]
    pub fn memoized(&self) -> u64 {
        self.memo.entry_count()
    }
}

impl<H> std::fmt::Debug for MemoizedHasher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizedHasher")
            .field("memoized", &self.memo.entry_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<H: FileHasher> FileHasher for MemoizedHasher<H> {
    async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError> {
        self.memo
            .get_with(path.to_string(), self.inner.hash_file(path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn checkout_hasher_reads_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/auth")).unwrap();
        std::fs::write(dir.path().join("src/auth/reset.ts"), b"export function reset() {}").unwrap();

        let hasher = CheckoutHasher::new(dir.path());
        let hash = hasher.hash_file("src/auth/reset.ts").await.unwrap();
        assert_eq!(hash, ContentHash::compute(b"export function reset() {}"));
    }

    #[tokio::test]
    async fn checkout_hasher_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = CheckoutHasher::new(dir.path());
        let err = hasher.hash_file("missing.ts").await.unwrap_err();
        assert_eq!(err, FileHashError::NotFound("missing.ts".to_string()));
    }

    #[tokio::test]
    async fn checkout_hasher_refuses_to_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = CheckoutHasher::new(dir.path());
        assert!(matches!(
            hasher.hash_file("../etc/passwd").await,
            Err(FileHashError::OutsideCheckout(_))
        ));
        assert!(matches!(
            hasher.hash_file("/etc/passwd").await,
            Err(FileHashError::OutsideCheckout(_))
        ));
    }

    #[tokio::test]
    async fn memoized_hasher_reads_each_path_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockFileHasher::new();
        mock.expect_hash_file().returning(move |path| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ContentHash::compute(path.as_bytes()))
        });

        let hasher = MemoizedHasher::new(mock, 16);
        let first = hasher.hash_file("a.ts").await.unwrap();
        let second = hasher.hash_file("a.ts").await.unwrap();
        hasher.hash_file("b.ts").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn memoized_hasher_remembers_failures() {
        let mut mock = MockFileHasher::new();
        mock.expect_hash_file()
            .times(1)
            .returning(|path| Err(FileHashError::NotFound(path.to_string())));

        let hasher = MemoizedHasher::new(mock, 16);
        assert!(hasher.hash_file("gone.ts").await.is_err());
        assert!(hasher.hash_file("gone.ts").await.is_err());
    }
}
