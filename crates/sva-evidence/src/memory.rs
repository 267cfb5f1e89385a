//! In-memory checkout for tests and dry runs

use crate::hash::ContentHash;
use crate::hasher::{FileHashError, FileHasher};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A checkout whose files live in a map
///
/// Files can be edited between calls to simulate new commits.
#[derive(Debug, Default)]
pub struct MemoryFileHasher {
    files: RwLock<HashMap<String, Vec<u8>>>,
    unavailable: RwLock<Vec<String>>,
}

impl MemoryFileHasher {
    /// Empty checkout
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style file insert
    #[must_use]
    pub fn with_file(self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.write(path, content);
        self
    }

    /// Create or overwrite a file
    pub fn write(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Delete a file
    pub fn remove(&self, path: &str) {
        self.files.write().remove(path);
    }

    /// Make reads of `path` fail as if the sandbox were down
    pub fn fail_reads(&self, path: impl Into<String>) {
        self.unavailable.write().push(path.into());
    }
}

#[async_trait]
impl FileHasher for MemoryFileHasher {
    async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError> {
        if self.unavailable.read().iter().any(|p| p == path) {
            return Err(FileHashError::Unavailable {
                path: path.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        self.files
            .read()
            .get(path)
            .map(|bytes| ContentHash::compute(bytes))
            .ok_or_else(|| FileHashError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn edits_change_the_hash() {
        let checkout = MemoryFileHasher::new().with_file("a.ts", "v1");
        let before = checkout.hash_file("a.ts").await.unwrap();
        checkout.write("a.ts", "v2");
        let after = checkout.hash_file("a.ts").await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn removed_and_failing_files_error() {
        let checkout = MemoryFileHasher::new().with_file("a.ts", "v1").with_file("b.ts", "x");
        checkout.remove("a.ts");
        checkout.fail_reads("b.ts");
        assert!(matches!(
            checkout.hash_file("a.ts").await,
            Err(FileHashError::NotFound(_))
        ));
        assert!(matches!(
            checkout.hash_file("b.ts").await,
            Err(FileHashError::Unavailable { .. })
        ));
    }
}
