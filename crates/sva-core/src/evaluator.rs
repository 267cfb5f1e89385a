//! Cache-aware story evaluation
//!
//! Wraps the [`StoryAggregator`] with the evidence cache:
//!
//! ```text
//! probe store [commit, ancestors..] ──► validate hit against checkout
//!                                              │
//! plan ──► per step: clean cached step with same id? ── yes ──► reuse
//!                                              │
//!                                              no ──► reviewer
//!                                              │
//!            build cache data ◄── story output ┘
//!                   │
//!                   └──► save (storyId, commit), first writer wins
//! ```

use crate::aggregator::{AggregatedRun, StoryAggregator};
use crate::config::{CacheConfig, SvaConfig};
use crate::director::StoryDirector;
use crate::error::EvaluationError;
use crate::generation::StructuredGenerator;
use crate::reviewer::StepReviewer;
use crate::telemetry;
use crate::tools::ToolRegistry;
use crate::types::{CodeSnippet, RunMetrics, StepResult, StepReviewerOutput, Story, StoryDirectorOutput, StoryStep, Trace};
use std::collections::BTreeMap;
use std::sync::Arc;
use sva_cache::{
    build_cache_data, validate, CacheEntry, CompletedEvaluation, EvaluatedAssertion, EvaluatedStep,
    EvidenceCacheStore, SaveOutcome, StepCacheEntry, StepConclusion, StepIndex, ValidationResult,
};
use sva_evidence::{FileHasher, LineRange, MemoizedHasher};
use uuid::Uuid;

/// One evaluation of a story at a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub story: Story,
    pub branch_name: String,
    pub commit_sha: String,
    /// Ancestors of `commit_sha`, newest first
    pub ancestor_commits: Vec<String>,
    pub run_id: String,
}

impl EvaluationRequest {
    /// Request for `story` at `commit_sha` with a fresh run id
    #[must_use]
    pub fn new(story: Story, branch_name: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            story,
            branch_name: branch_name.into(),
            commit_sha: commit_sha.into(),
            ancestor_commits: Vec::new(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Also probe these ancestors, newest first
    #[must_use]
    pub fn with_ancestors<I, S>(mut self, commits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ancestor_commits = commits.into_iter().map(Into::into).collect();
        self
    }

    /// Override the run id
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    fn candidates(&self) -> Vec<String> {
        std::iter::once(self.commit_sha.clone())
            .chain(self.ancestor_commits.iter().cloned())
            .collect()
    }
}

/// What the cache contributed to a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Commit of the entry that was found, if any
    pub hit_commit: Option<String>,
    pub validation: Option<ValidationResult>,
    pub reused_steps: Vec<u32>,
    /// `None` when caching is disabled
    pub saved: Option<SaveOutcome>,
}

/// Result of [`StoryEvaluator::evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    pub output: StoryDirectorOutput,
    pub metrics: RunMetrics,
    pub cache: CacheOutcome,
}

/// Aggregator plus evidence cache
#[derive(Debug, Clone)]
pub struct StoryEvaluator {
    aggregator: StoryAggregator,
    store: Option<EvidenceCacheStore>,
    config: CacheConfig,
}

impl StoryEvaluator {
    /// Create evaluator; `store` of `None` disables caching
    #[must_use]
    pub fn new(aggregator: StoryAggregator, store: Option<EvidenceCacheStore>, config: CacheConfig) -> Self {
        Self {
            aggregator,
            store,
            config,
        }
    }

    /// Wire director, reviewer and cache from configuration
    ///
    /// Both agents share `generator`; only the reviewer gets `tools`.
    #[must_use]
    pub fn from_config(
        config: &SvaConfig,
        generator: Arc<dyn StructuredGenerator>,
        tools: ToolRegistry,
        store: Option<EvidenceCacheStore>,
    ) -> Self {
        let director = StoryDirector::new(Arc::clone(&generator), config.director.max_steps);
        let reviewer = StepReviewer::new(generator, tools, config.reviewer.max_steps);
        Self::new(StoryAggregator::new(director, reviewer), store, config.cache)
    }

    fn store(&self) -> Option<&EvidenceCacheStore> {
        self.store.as_ref().filter(|_| self.config.enabled)
    }

    /// Evaluate a story, reusing still-valid cached steps
    ///
    /// `hasher` must read the checkout of `request.commit_sha`.
    ///
    /// # Errors
    /// Decomposition and reviewer failures, and cache backend errors.
    #[tracing::instrument(
        skip_all,
        fields(story_id = %request.story.id, commit_sha = %request.commit_sha, run_id = %request.run_id)
    )]
    pub async fn evaluate(
        &self,
        request: &EvaluationRequest,
        hasher: Arc<dyn FileHasher>,
    ) -> Result<EvaluationReport, EvaluationError> {
        let hasher = MemoizedHasher::new(hasher, self.config.hash_memo_capacity);
        let mut cache = CacheOutcome::default();

        let hit = match self.store() {
            Some(store) => store.get(&request.story.id, request.candidates()).await?,
            None => None,
        };

        let mut reusable = BTreeMap::new();
        let mut cached_results = BTreeMap::new();
        if let Some(entry) = &hit {
            let validation = validate(entry, &hasher, self.config.strategy).await;
            cached_results = entry
                .readable_steps()
                .into_iter()
                .map(|(index, step)| (index, cached_result(step.conclusion)))
                .collect();
            reusable = clean_steps(entry, &validation);
            tracing::info!(
                hit_commit = %entry.commit_sha,
                valid = validation.is_valid,
                reusable = reusable.len(),
                "cache entry validated"
            );
            cache.hit_commit = Some(entry.commit_sha.clone());
            cache.validation = Some(validation);
        }

        let directed = self.aggregator.plan(&request.story).await?;
        let hit_commit = cache.hit_commit.clone().unwrap_or_default();
        let AggregatedRun {
            output,
            metrics,
            reused_steps,
        } = self
            .aggregator
            .review_plan(&request.story, &directed, |step, prior| {
                if !prior_matches_cache(&directed.plan.steps, prior, &cached_results) {
                    return None;
                }
                reusable
                    .get(&step.index)
                    .filter(|cached| cached.step_id.as_deref() == Some(step.id.as_str()))
                    .map(|cached| reconstruct(step, cached, &hit_commit))
            })
            .await?;
        cache.reused_steps = reused_steps;

        if let Some(store) = self.store() {
            let data = build_cache_data(&completed_evaluation(&directed.plan.steps, &output), &hasher).await;
            let outcome = store
                .save(
                    &request.branch_name,
                    &request.story.id,
                    &request.commit_sha,
                    &data,
                    &request.run_id,
                )
                .await?;
            cache.saved = Some(outcome);
        }

        telemetry::record_run(&metrics, output.result);
        Ok(EvaluationReport {
            output,
            metrics,
            cache,
        })
    }

    /// Drop every cached entry for a story whose text or composition changed
    ///
    /// # Errors
    /// Cache backend errors.
    pub async fn story_changed(&self, story_id: &str) -> Result<(), EvaluationError> {
        if let Some(store) = &self.store {
            store.invalidate_all_for_story(story_id).await?;
        }
        Ok(())
    }
}

/// Cached steps nothing in `validation` speaks against
fn clean_steps(entry: &CacheEntry, validation: &ValidationResult) -> BTreeMap<StepIndex, StepCacheEntry> {
    let mut steps = entry.readable_steps();
    steps.retain(|index, _| validation.step_is_clean(*index));
    steps
}

/// True while every earlier verdict of this run equals the cached one
///
/// A later step was reviewed against the cached outcomes of its
/// predecessors; once one of them differs the cached verdict no longer
/// applies.
fn prior_matches_cache(
    plan: &[StoryStep],
    prior: &[StepReviewerOutput],
    cached: &BTreeMap<StepIndex, StepResult>,
) -> bool {
    plan.iter()
        .zip(prior)
        .all(|(step, output)| cached.get(&step.index) == Some(&output.result))
}

fn cached_result(conclusion: StepConclusion) -> StepResult {
    match conclusion {
        StepConclusion::Pass => StepResult::Pass,
        StepConclusion::Fail => StepResult::Fail,
    }
}

/// Rebuild a reviewer verdict from a cached step
fn reconstruct(step: &StoryStep, cached: &StepCacheEntry, hit_commit: &str) -> StepReviewerOutput {
    let mut code = Vec::new();
    let mut reasons = Vec::new();
    for assertion in cached.assertions.values() {
        let reason = assertion.reason.clone().unwrap_or_default();
        match &assertion.evidence {
            Some(files) if !files.is_empty() => {
                for (path, file) in files {
                    for range in &file.line_ranges {
                        if let Ok(lines) = range.parse::<LineRange>() {
                            code.push(CodeSnippet {
                                path: path.clone(),
                                start_line: lines.start,
                                end_line: lines.end,
                                explanation: reason.clone(),
                            });
                        }
                    }
                }
            }
            _ => reasons.push(reason),
        }
    }

    let result = cached_result(cached.conclusion);
    let description = if reasons.is_empty() {
        format!("{} (evidence unchanged since {hit_commit})", step.description)
    } else {
        reasons.join("\n")
    };

    StepReviewerOutput {
        result,
        description,
        trace: Trace {
            summary: format!("reused {result} verdict cached at {hit_commit}"),
            reasoning: code.iter().map(|c| c.explanation.clone()).filter(|e| !e.is_empty()).collect(),
            search_queries: Vec::new(),
        },
        code,
    }
}

/// Cache builder input from a finished story output
///
/// Each snippet is one assertion; a step without snippets keeps its
/// description as a reason-only assertion.
fn completed_evaluation(plan: &[StoryStep], output: &StoryDirectorOutput) -> CompletedEvaluation {
    let steps = plan
        .iter()
        .zip(&output.steps)
        .map(|(step, verdict)| {
            let assertions = if verdict.code.is_empty() {
                vec![EvaluatedAssertion::reason_only(verdict.description.clone())]
            } else {
                verdict
                    .code
                    .iter()
                    .map(|snippet| {
                        let reason = Some(snippet.explanation.clone()).filter(|r| !r.trim().is_empty());
                        EvaluatedAssertion::with_evidence([snippet.evidence_ref()], reason)
                    })
                    .collect()
            };
            EvaluatedStep {
                index: step.index,
                step_id: Some(step.id.clone()),
                conclusion: verdict.result.label().to_string(),
                assertions,
            }
        })
        .collect();
    CompletedEvaluation { steps }
}
