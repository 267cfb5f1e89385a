//! Step reviewer
//!
//! Verifies one planned step against the repository with the search tools,
//! conditioned on the outcomes of every earlier step.

use crate::error::ReviewerError;
use crate::generation::{GenerationRequest, StructuredGenerator, ToolLoop};
use crate::tools::ToolRegistry;
use crate::types::{CodeSnippet, StepReviewerOutput, Story, StoryStep};
use std::fmt::Write as _;
use std::path::{Component, Path};
use std::sync::Arc;

const INSTRUCTIONS: &str = "\
You verify one step of a user story against a code repository using the search tools.
Conclude with exactly one result:
- pass: repository evidence supports the step
- fail: repository evidence contradicts the step
- not-implemented: no supporting implementation was found
- blocked: the step cannot be evaluated because a prerequisite step did not hold
Every code reference must name a real file path relative to the repository root and a line range you have seen in tool output.
Never invent paths or line numbers.";

/// Inputs of one review
#[derive(Debug, Clone, Copy)]
pub struct ReviewContext<'a> {
    pub story: &'a Story,
    pub step: &'a StoryStep,
    /// Outputs of steps `0..step.index`, in order
    pub prior: &'a [StepReviewerOutput],
}

/// A validated verdict plus loop counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewedStep {
    pub output: StepReviewerOutput,
    pub tool_calls: u32,
    pub iterations: u32,
}

/// Step verification agent
#[derive(Clone)]
pub struct StepReviewer {
    generator: Arc<dyn StructuredGenerator>,
    tools: ToolRegistry,
    max_steps: u32,
}

impl std::fmt::Debug for StepReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepReviewer")
            .field("tools", &self.tools)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl StepReviewer {
    /// Agent name on generation requests
    pub const AGENT: &'static str = "step-reviewer";

    /// Create reviewer with its tool set
    #[must_use]
    pub fn new(generator: Arc<dyn StructuredGenerator>, tools: ToolRegistry, max_steps: u32) -> Self {
        Self {
            generator,
            tools,
            max_steps,
        }
    }

    /// Review one step
    ///
    /// # Errors
    /// Generation failures and verdicts with unusable code references.
    #[tracing::instrument(
        skip_all,
        fields(story_id = %ctx.story.id, step_index = ctx.step.index, step_id = %ctx.step.id)
    )]
    pub async fn review(&self, ctx: ReviewContext<'_>) -> Result<ReviewedStep, ReviewerError> {
        let request = GenerationRequest::for_output::<StepReviewerOutput>(
            Self::AGENT,
            INSTRUCTIONS,
            render_prompt(&ctx),
            self.max_steps,
        )?
        .with_tools(self.tools.definitions());

        let generated = ToolLoop::new(self.generator.as_ref(), &self.tools)
            .run::<StepReviewerOutput>(&request)
            .await?;

        let mut output = generated.value;
        for snippet in &output.code {
            check_snippet(snippet)?;
        }

        for query in self.tools.queries(&generated.executed) {
            if !output.trace.search_queries.contains(&query) {
                output.trace.search_queries.push(query);
            }
        }

        tracing::info!(
            result = %output.result,
            tool_calls = generated.tool_calls,
            iterations = generated.iterations,
            "step reviewed"
        );

        Ok(ReviewedStep {
            output,
            tool_calls: generated.tool_calls,
            iterations: generated.iterations,
        })
    }
}

fn render_prompt(ctx: &ReviewContext<'_>) -> String {
    let mut prompt = format!("User story:\n{}\n\n", ctx.story.text);
    if !ctx.prior.is_empty() {
        prompt.push_str("Earlier steps:\n");
        for (position, prior) in ctx.prior.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. [{}] {}",
                position + 1,
                prior.result,
                prior.description
            );
        }
        prompt.push('\n');
    }
    let _ = write!(
        prompt,
        "Step {} ({}):\n{}",
        ctx.step.index + 1,
        ctx.step.id,
        ctx.step.description
    );
    prompt
}

fn check_snippet(snippet: &CodeSnippet) -> Result<(), ReviewerError> {
    let invalid = |why: &str| {
        Err(ReviewerError::InvalidOutput(format!(
            "code reference '{}': {why}",
            snippet.evidence_ref()
        )))
    };

    if snippet.path.trim().is_empty() {
        return invalid("empty path");
    }
    if snippet.path.contains(':') {
        return invalid("path contains ':'");
    }
    let relative = Path::new(&snippet.path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !relative {
        return invalid("path is not relative to the repository root");
    }
    if snippet.start_line < 1 || snippet.start_line > snippet.end_line {
        return invalid("line range must satisfy 1 <= start <= end");
    }
    Ok(())
}
