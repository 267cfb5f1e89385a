//! Story aggregator
//!
//! Runs the director once, then the reviewer over every planned step in plan
//! order, and reduces the step verdicts to one story verdict.
//!
//! Steps are reviewed strictly one after another: reviewing step `n` needs
//! the finished outputs of steps `0..n`.

use crate::director::{DirectedPlan, StoryDirector};
use crate::error::EvaluationError;
use crate::reviewer::{ReviewContext, StepReviewer};
use crate::types::{RunMetrics, StepResult, StepReviewerOutput, Story, StoryDirectorOutput, StoryStep, Trace};
use indexmap::IndexSet;

/// Aggregated verdict plus run counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedRun {
    pub output: StoryDirectorOutput,
    pub metrics: RunMetrics,
    /// Indices of steps answered without the reviewer
    pub reused_steps: Vec<u32>,
}

/// Director plus reviewer, driven in order
#[derive(Debug, Clone)]
pub struct StoryAggregator {
    director: StoryDirector,
    reviewer: StepReviewer,
}

impl StoryAggregator {
    /// Create aggregator
    #[must_use]
    pub fn new(director: StoryDirector, reviewer: StepReviewer) -> Self {
        Self { director, reviewer }
    }

    /// Decompose the story
    ///
    /// # Errors
    /// [`EvaluationError::Decomposition`] on any director failure.
    pub async fn plan(&self, story: &Story) -> Result<DirectedPlan, EvaluationError> {
        self.director.plan(story).await.map_err(|e| {
            tracing::error!(story_id = %story.id, error = %e, "story decomposition failed");
            EvaluationError::Decomposition(e)
        })
    }

    /// Plan and review a story with no reuse
    ///
    /// # Errors
    /// Decomposition failures, or [`EvaluationError::Incomplete`] carrying
    /// every step that finished before the reviewer failed.
    pub async fn run(&self, story: &Story) -> Result<AggregatedRun, EvaluationError> {
        let directed = self.plan(story).await?;
        self.review_plan(story, &directed, |_, _| None).await
    }

    /// Review every step of `directed` in order
    ///
    /// `reuse` may answer a step without the reviewer. It sees the step and
    /// the outputs of every earlier step; whatever it returns is treated
    /// exactly like a reviewer verdict, including as prior context for
    /// later steps.
    ///
    /// # Errors
    /// [`EvaluationError::Incomplete`] on the first reviewer failure.
    #[tracing::instrument(skip_all, fields(story_id = %story.id, steps = directed.plan.steps.len()))]
    pub async fn review_plan<F>(
        &self,
        story: &Story,
        directed: &DirectedPlan,
        mut reuse: F,
    ) -> Result<AggregatedRun, EvaluationError>
    where
        F: FnMut(&StoryStep, &[StepReviewerOutput]) -> Option<StepReviewerOutput>,
    {
        let mut metrics = RunMetrics {
            director_iterations: directed.iterations,
            ..RunMetrics::default()
        };
        let mut completed: Vec<StepReviewerOutput> = Vec::with_capacity(directed.plan.steps.len());
        let mut reused_steps = Vec::new();

        for step in &directed.plan.steps {
            if let Some(output) = reuse(step, &completed) {
                tracing::debug!(step_index = step.index, result = %output.result, "step reused");
                metrics.steps_reused += 1;
                reused_steps.push(step.index);
                completed.push(output);
                continue;
            }

            let ctx = ReviewContext {
                story,
                step,
                prior: &completed,
            };
            let reviewed = self.reviewer.review(ctx).await;
            match reviewed {
                Ok(reviewed) => {
                    metrics.reviewer_tool_calls += reviewed.tool_calls;
                    metrics.reviewer_iterations += reviewed.iterations;
                    completed.push(reviewed.output);
                }
                Err(source) => {
                    tracing::error!(
                        step_index = step.index,
                        completed = completed.len(),
                        error = %source,
                        "story evaluation incomplete"
                    );
                    return Err(EvaluationError::Incomplete {
                        completed,
                        failed_step: step.clone(),
                        source,
                    });
                }
            }
        }

        let result = StepResult::aggregate(completed.iter().map(|s| s.result));
        tracing::info!(%result, reused = metrics.steps_reused, "story evaluated");

        Ok(AggregatedRun {
            output: StoryDirectorOutput {
                result,
                story: directed.plan.story.clone(),
                trace: story_trace(&completed),
                steps: completed,
            },
            metrics,
            reused_steps,
        })
    }
}

/// Story-level trace from step traces
fn story_trace(steps: &[StepReviewerOutput]) -> Trace {
    let summary = steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Step {} ({}): {}", i + 1, s.result, s.trace.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let queries: IndexSet<&String> = steps
        .iter()
        .flat_map(|s| s.trace.search_queries.iter())
        .collect();

    Trace {
        summary,
        reasoning: steps.iter().map(|s| s.description.clone()).collect(),
        search_queries: queries.into_iter().cloned().collect(),
    }
}
