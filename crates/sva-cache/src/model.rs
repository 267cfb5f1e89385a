//! Cache data model
//!
//! `CacheData` is the evidence snapshot for one story at one commit:
//!
//! ```text
//! steps
//!  └─ "<stepIndex>" → { conclusion: pass|fail, stepId?, assertions }
//!                                                   └─ "<assertionIndex>" → { evidence?, reason? }
//!                                                                              └─ path → { hash, lineRanges }
//! ```
//!
//! Indices are serialized as decimal strings (JSON object keys) and ordered
//! numerically in memory.

use crate::error::{CacheError, UnknownStrategy};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use sva_evidence::FileEvidenceEntry;
use uuid::Uuid;

/// 0-based step position in a plan
pub type StepIndex = u32;

/// 0-based assertion position within a step
pub type AssertionIndex = u32;

/// Terminal step outcome; the only conclusions ever cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepConclusion {
    Pass,
    Fail,
}

impl StepConclusion {
    /// Parse a conclusion label, `None` for anything non-terminal
    #[must_use]
    pub fn from_terminal(label: &str) -> Option<Self> {
        match label {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }

    /// Wire label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for StepConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence and/or reasoning backing one assertion
///
/// At least one of `evidence` or `reason` is present and non-empty in any
/// persisted assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssertionCacheEntry {
    /// Per-file hash + ranges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<BTreeMap<String, FileEvidenceEntry>>,
    /// Free-text justification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AssertionCacheEntry {
    /// True if the assertion carries anything worth persisting
    #[must_use]
    pub fn is_persistable(&self) -> bool {
        self.has_evidence() || self.reason.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    /// True if there are file hashes to re-check
    #[must_use]
    pub fn has_evidence(&self) -> bool {
        self.evidence.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// Cached verdict and assertions for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepCacheEntry {
    pub conclusion: StepConclusion,
    /// Slug of the planned step this entry was produced for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub assertions: BTreeMap<AssertionIndex, AssertionCacheEntry>,
}

/// Evidence snapshot for one story at one commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheData {
    pub steps: BTreeMap<StepIndex, StepCacheEntry>,
}

impl CacheData {
    /// Encode as the opaque JSON blob the store persists
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_value(&self) -> Result<serde_json::Value, CacheError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Strictly decode a stored blob
    ///
    /// # Errors
    /// Fails on any structural problem or on an assertion that carries
    /// neither evidence nor reason.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CacheError> {
        let data: Self = serde::Deserialize::deserialize(value)?;
        for (step, entry) in &data.steps {
            for (assertion, payload) in &entry.assertions {
                if !payload.is_persistable() {
                    return Err(CacheError::InvalidData(format!(
                        "assertion {step}.{assertion} has neither evidence nor reason"
                    )));
                }
            }
        }
        Ok(data)
    }

    /// Number of cached steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if nothing was cached
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One persisted row: the cache data for `(story_id, commit_sha)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: Uuid,
    pub branch_name: String,
    pub story_id: String,
    pub commit_sha: String,
    /// Opaque blob; validated on every read
    pub cache_data: serde_json::Value,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a fresh row
    #[must_use]
    pub fn new(
        branch_name: impl Into<String>,
        story_id: impl Into<String>,
        commit_sha: impl Into<String>,
        cache_data: serde_json::Value,
        run_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            branch_name: branch_name.into(),
            story_id: story_id.into(),
            commit_sha: commit_sha.into(),
            cache_data,
            run_id: run_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Strictly decode the stored blob
    ///
    /// # Errors
    /// See [`CacheData::from_value`].
    pub fn decode_data(&self) -> Result<CacheData, CacheError> {
        CacheData::from_value(&self.cache_data)
    }

    /// Every step that decodes on its own, skipping malformed ones
    ///
    /// Unlike [`decode_data`](Self::decode_data), one bad step does not hide
    /// the rest of the snapshot.
    #[must_use]
    pub fn readable_steps(&self) -> BTreeMap<StepIndex, StepCacheEntry> {
        let Ok(steps) = crate::schema::stored_steps(&self.cache_data) else {
            return BTreeMap::new();
        };
        steps
            .into_iter()
            .filter_map(|(index, payload)| match crate::schema::decode_step(payload) {
                Ok(step) => Some((index, step)),
                Err(e) => {
                    tracing::debug!(step_index = index, error = %e, "skipping unreadable cached step");
                    None
                }
            })
            .collect()
    }
}

/// Granularity at which stale evidence forces re-verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Any stale assertion invalidates its whole step
    #[default]
    Step,
    /// Only the stale assertions are flagged
    Assertion,
}

impl FromStr for InvalidationStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step" => Ok(Self::Step),
            "assertion" => Ok(Self::Assertion),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Step => "step",
            Self::Assertion => "assertion",
        })
    }
}
