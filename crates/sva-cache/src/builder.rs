//! Cache builder
//!
//! Turns a finished evaluation into [`CacheData`]. Only terminal steps
//! (`pass`/`fail`) are kept. A step is dropped entirely when any of its
//! evidence files could not be hashed, since a partially hashed step would
//! look valid on the next run without backing the verdict.

use crate::model::{AssertionCacheEntry, CacheData, StepCacheEntry, StepConclusion, StepIndex};
use futures::future::join_all;
use std::collections::BTreeMap;
use sva_evidence::{build_evidence_hashes, FileHasher};

/// One assertion made while evaluating a step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluatedAssertion {
    /// `path[:start-end]` references
    pub evidence: Vec<String>,
    pub reason: Option<String>,
}

impl EvaluatedAssertion {
    /// Assertion backed by evidence references
    #[must_use]
    pub fn with_evidence<I, S>(evidence: I, reason: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            evidence: evidence.into_iter().map(Into::into).collect(),
            reason,
        }
    }

    /// Assertion carrying only a justification
    #[must_use]
    pub fn reason_only(reason: impl Into<String>) -> Self {
        Self {
            evidence: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// One evaluated step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedStep {
    pub index: StepIndex,
    pub step_id: Option<String>,
    /// Result label as produced by the reviewer (`pass`, `fail`, ...)
    pub conclusion: String,
    pub assertions: Vec<EvaluatedAssertion>,
}

/// A finished evaluation, ready to be cached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedEvaluation {
    pub steps: Vec<EvaluatedStep>,
}

/// Build cache data from a finished evaluation
#[tracing::instrument(skip_all, fields(steps = evaluation.steps.len()))]
pub async fn build_cache_data<H>(evaluation: &CompletedEvaluation, hasher: &H) -> CacheData
where
    H: FileHasher + ?Sized,
{
    let mut ordered: Vec<&EvaluatedStep> = evaluation.steps.iter().collect();
    ordered.sort_by_key(|step| step.index);

    let mut data = CacheData::default();
    for step in ordered {
        let Some(conclusion) = StepConclusion::from_terminal(&step.conclusion) else {
            tracing::debug!(
                step_index = step.index,
                conclusion = %step.conclusion,
                "not caching non-terminal step"
            );
            continue;
        };

        if let Some(entry) = build_step(step, conclusion, hasher).await {
            data.steps.insert(step.index, entry);
        }
    }
    data
}

async fn build_step<H>(
    step: &EvaluatedStep,
    conclusion: StepConclusion,
    hasher: &H,
) -> Option<StepCacheEntry>
where
    H: FileHasher + ?Sized,
{
    let hashed = join_all(
        step.assertions
            .iter()
            .map(|assertion| build_evidence_hashes(assertion.evidence.as_slice(), hasher)),
    )
    .await;

    let mut assertions = BTreeMap::new();
    for (position, (assertion, hashes)) in step.assertions.iter().zip(hashed).enumerate() {
        if !hashes.is_complete() {
            tracing::warn!(
                step_index = step.index,
                assertion_index = position,
                failed = hashes.failures.len(),
                "evidence could not be hashed, step not cached"
            );
            return None;
        }

        let entry = AssertionCacheEntry {
            evidence: (!hashes.files.is_empty()).then_some(hashes.files),
            reason: assertion
                .reason
                .as_ref()
                .filter(|r| !r.trim().is_empty())
                .cloned(),
        };
        if entry.is_persistable() {
            // position keeps the reviewer's numbering even when earlier
            // assertions are dropped
            let index = u32::try_from(position).ok()?;
            assertions.insert(index, entry);
        }
    }

    Some(StepCacheEntry {
        conclusion,
        step_id: step.step_id.clone(),
        assertions,
    })
}
