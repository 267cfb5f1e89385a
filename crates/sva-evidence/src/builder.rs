//! Evidence hash builder
//!
//! Turns a list of evidence reference strings into a per-file map of
//! content hash and referenced line ranges. Distinct files are hashed
//! concurrently; a failure on one path is reported for that path only.

use crate::hash::ContentHash;
use crate::hasher::{FileHashError, FileHasher};
use crate::reference::group_by_path;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hash and referenced ranges of one file at evaluation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileEvidenceEntry {
    /// Content hash of the whole file
    #[schemars(with = "String")]
    pub hash: ContentHash,
    /// Sorted, unique raw range strings (empty for bare-path evidence)
    pub line_ranges: Vec<String>,
}

/// Result of hashing the files behind a set of evidence references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceHashes {
    /// Successfully hashed files
    pub files: BTreeMap<String, FileEvidenceEntry>,
    /// Files that could not be hashed
    pub failures: BTreeMap<String, FileHashError>,
}

impl EvidenceHashes {
    /// True when every referenced file was hashed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when no file was referenced at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.failures.is_empty()
    }
}

/// Hash every file referenced by `references`
pub async fn build_evidence_hashes<S, H>(references: &[S], hasher: &H) -> EvidenceHashes
where
    S: AsRef<str>,
    H: FileHasher + ?Sized,
{
    let grouped = group_by_path(references);

    let hashed = join_all(grouped.into_iter().map(|(path, ranges)| async move {
        let result = hasher.hash_file(&path).await;
        (path, ranges, result)
    }))
    .await;

    let mut out = EvidenceHashes::default();
    for (path, ranges, result) in hashed {
        match result {
            Ok(hash) => {
                tracing::debug!(path = %path, hash = %hash.short(), "hashed evidence file");
                out.files.insert(
                    path,
                    FileEvidenceEntry {
                        hash,
                        line_ranges: ranges.into_iter().collect(),
                    },
                );
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "could not hash evidence file");
                out.failures.insert(path, e);
            }
        }
    }
    out
}
