//! Cache validator
//!
//! Re-hashes the files behind every cached assertion and reports which
//! steps and assertions no longer hold. Read-only: the entry is never
//! modified and nothing is written back.

use crate::model::{AssertionIndex, CacheEntry, InvalidationStrategy, StepIndex};
use crate::schema::{decode_assertion, stored_step, stored_steps};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sva_evidence::FileHasher;

/// One stale or unreadable assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidAssertion {
    pub step_index: StepIndex,
    pub assertion_index: AssertionIndex,
}

/// Outcome of validating one cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Steps invalidated by a stale assertion (`step` strategy only)
    pub invalid_steps: Vec<StepIndex>,
    pub invalid_assertions: Vec<InvalidAssertion>,
    /// Steps whose envelope could not be read at all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrupt_steps: Vec<StepIndex>,
    /// The blob as a whole could not be read
    #[serde(default)]
    pub corrupt: bool,
}

impl ValidationResult {
    fn finish(mut self) -> Self {
        self.invalid_steps.sort_unstable();
        self.invalid_steps.dedup();
        self.invalid_assertions.sort_unstable();
        self.corrupt_steps.sort_unstable();
        self.is_valid = !self.corrupt
            && self.invalid_steps.is_empty()
            && self.invalid_assertions.is_empty()
            && self.corrupt_steps.is_empty();
        self
    }

    fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::default()
        }
        .finish()
    }

    /// True when nothing recorded against `step` prevents reusing it
    #[must_use]
    pub fn step_is_clean(&self, step: StepIndex) -> bool {
        !self.corrupt
            && !self.invalid_steps.contains(&step)
            && !self.corrupt_steps.contains(&step)
            && !self.invalid_assertions.iter().any(|a| a.step_index == step)
    }
}

/// Validate `entry` against the live checkout
#[tracing::instrument(
    skip_all,
    fields(story_id = %entry.story_id, commit_sha = %entry.commit_sha, strategy = %strategy)
)]
pub async fn validate<H>(
    entry: &CacheEntry,
    hasher: &H,
    strategy: InvalidationStrategy,
) -> ValidationResult
where
    H: FileHasher + ?Sized,
{
    let steps = match stored_steps(&entry.cache_data) {
        Ok(steps) => steps,
        Err(e) => {
            tracing::warn!(error = %e, "cache entry is unreadable");
            return ValidationResult::corrupt();
        }
    };

    let mut result = ValidationResult::default();
    let mut checks = Vec::new();
    for (step_index, payload) in steps {
        match stored_step(payload) {
            Ok(step) => {
                for (assertion_index, assertion) in step.assertions {
                    checks.push(check_assertion(step_index, assertion_index, assertion, hasher));
                }
            }
            Err(e) => {
                tracing::warn!(step_index, error = %e, "cached step is unreadable");
                result.corrupt_steps.push(step_index);
            }
        }
    }

    for stale in join_all(checks).await.into_iter().flatten() {
        result.invalid_assertions.push(stale);
        if strategy == InvalidationStrategy::Step {
            result.invalid_steps.push(stale.step_index);
        }
    }

    let result = result.finish();
    tracing::debug!(
        is_valid = result.is_valid,
        invalid_steps = result.invalid_steps.len(),
        invalid_assertions = result.invalid_assertions.len(),
        "validated cache entry"
    );
    result
}

/// `Some` when the assertion must be re-verified
async fn check_assertion<H>(
    step_index: StepIndex,
    assertion_index: AssertionIndex,
    payload: &serde_json::Value,
    hasher: &H,
) -> Option<InvalidAssertion>
where
    H: FileHasher + ?Sized,
{
    let stale = Some(InvalidAssertion {
        step_index,
        assertion_index,
    });

    let assertion = match decode_assertion(payload) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(step_index, assertion_index, error = %e, "malformed cached assertion");
            return stale;
        }
    };

    let Some(evidence) = assertion.evidence else {
        return None;
    };

    for (path, recorded) in &evidence {
        match hasher.hash_file(path).await {
            Ok(current) if current == recorded.hash => {}
            Ok(current) => {
                tracing::debug!(
                    step_index,
                    assertion_index,
                    path = %path,
                    cached = %recorded.hash.short(),
                    current = %current.short(),
                    "evidence file changed"
                );
                return stale;
            }
            Err(e) => {
                tracing::debug!(step_index, assertion_index, error = %e, "evidence file unreadable");
                return stale;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use sva_evidence::{ContentHash, FileHashError, MemoryFileHasher};

    fn hex(content: &str) -> String {
        ContentHash::compute(content.as_bytes()).to_string()
    }

    fn entry(data: Value) -> CacheEntry {
        CacheEntry::new("main", "story", "c1", data, "run")
    }

    /// Step 0 with one fresh and one stale assertion
    fn mixed_entry() -> CacheEntry {
        entry(json!({"steps": {"0": {
            "conclusion": "pass",
            "assertions": {
                "0": {"evidence": {"a.ts": {"hash": hex("a"), "lineRanges": ["1-2"]}}},
                "1": {"evidence": {"b.ts": {"hash": hex("old b"), "lineRanges": []}}}
            }
        }}}))
    }

    fn checkout() -> MemoryFileHasher {
        MemoryFileHasher::new().with_file("a.ts", "a").with_file("b.ts", "new b")
    }

    #[tokio::test]
    async fn step_strategy_invalidates_the_step() {
        let result = validate(&mixed_entry(), &checkout(), InvalidationStrategy::Step).await;
        assert!(!result.is_valid);
        assert_eq!(result.invalid_steps, vec![0]);
        assert_eq!(
            result.invalid_assertions,
            vec![InvalidAssertion { step_index: 0, assertion_index: 1 }]
        );
    }

    #[tokio::test]
    async fn assertion_strategy_flags_only_the_assertion() {
        let result = validate(&mixed_entry(), &checkout(), InvalidationStrategy::Assertion).await;
        assert!(!result.is_valid);
        assert!(result.invalid_steps.is_empty());
        assert_eq!(
            result.invalid_assertions,
            vec![InvalidAssertion { step_index: 0, assertion_index: 1 }]
        );
        assert!(!result.step_is_clean(0));
    }

    #[tokio::test]
    async fn unchanged_checkout_is_valid() {
        let checkout = checkout();
        checkout.write("b.ts", "old b");
        let result = validate(&mixed_entry(), &checkout, InvalidationStrategy::Step).await;
        assert!(result.is_valid);
        assert!(result.step_is_clean(0));
    }

    #[tokio::test]
    async fn reason_only_assertions_are_valid() {
        let data = json!({"steps": {"3": {"conclusion": "fail", "assertions": {
            "0": {"reason": "no reset endpoint exists"}
        }}}});
        let result = validate(&entry(data), &MemoryFileHasher::new(), InvalidationStrategy::Step).await;
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn missing_file_invalidates() {
        let checkout = MemoryFileHasher::new().with_file("a.ts", "a");
        let result = validate(&mixed_entry(), &checkout, InvalidationStrategy::Step).await;
        assert_eq!(result.invalid_assertions.len(), 1);
        assert_eq!(result.invalid_assertions[0].assertion_index, 1);
    }

    #[tokio::test]
    async fn malformed_assertion_is_invalid_not_fatal() {
        let data = json!({"steps": {"0": {"conclusion": "pass", "assertions": {
            "0": {"evidence": "src/a.ts"},
            "1": {"reason": "fine"}
        }}}});
        let result = validate(&entry(data), &MemoryFileHasher::new(), InvalidationStrategy::Assertion).await;
        assert_eq!(
            result.invalid_assertions,
            vec![InvalidAssertion { step_index: 0, assertion_index: 0 }]
        );
    }

    #[tokio::test]
    async fn unreadable_blob_is_corrupt() {
        let result = validate(&entry(json!("not json{")), &MemoryFileHasher::new(), InvalidationStrategy::Step).await;
        assert!(result.corrupt);
        assert!(!result.is_valid);
        assert!(!result.step_is_clean(0));
    }

    #[tokio::test]
    async fn unreadable_step_is_isolated() {
        let data = json!({"steps": {
            "0": {"conclusion": "maybe", "assertions": {}},
            "1": {"conclusion": "pass", "assertions": {"0": {"reason": "ok"}}}
        }});
        let result = validate(&entry(data), &MemoryFileHasher::new(), InvalidationStrategy::Step).await;
        assert_eq!(result.corrupt_steps, vec![0]);
        assert!(!result.step_is_clean(0));
        assert!(result.step_is_clean(1));
    }

    /// Records every path it is asked for
    #[derive(Default)]
    struct RecordingHasher {
        inner: MemoryFileHasher,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FileHasher for RecordingHasher {
        async fn hash_file(&self, path: &str) -> Result<ContentHash, FileHashError> {
            self.seen.lock().push(path.to_string());
            self.inner.hash_file(path).await
        }
    }

    #[tokio::test]
    async fn first_mismatch_stops_the_assertion() {
        let data = json!({"steps": {"0": {"conclusion": "pass", "assertions": {"0": {"evidence": {
            "a.ts": {"hash": hex("stale"), "lineRanges": []},
            "z.ts": {"hash": hex("z"), "lineRanges": []}
        }}}}}});
        let hasher = RecordingHasher::default();
        hasher.inner.write("a.ts", "fresh");
        hasher.inner.write("z.ts", "z");

        let result = validate(&entry(data), &hasher, InvalidationStrategy::Step).await;
        assert!(!result.is_valid);
        assert_eq!(*hasher.seen.lock(), vec!["a.ts".to_string()]);
    }
}
