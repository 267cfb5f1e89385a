//! Story director
//!
//! Decomposes a story into ordered, atomic, independently verifiable steps.
//! The director never sees the repository: it runs without tools and works
//! from the story text alone.

use crate::error::DirectorError;
use crate::generation::{GenerationRequest, StructuredGenerator, ToolLoop};
use crate::tools::ToolRegistry;
use crate::types::{Story, StoryDirectorPlan, StoryStep, Trace};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

const INSTRUCTIONS: &str = "\
You decompose a user story into the smallest ordered list of steps that together establish the story.
Each step must be atomic and independently verifiable against a codebase.
Give every step a short, stable kebab-case id (for example `open-reset-form`) and a one-sentence description.
Do not speculate about the implementation; describe observable behavior only.";

static KEBAB_CASE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").ok());

/// One step as the model emits it; indices are assigned by position
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PlannedStep {
    /// Stable kebab-case slug
    id: String,
    /// What must hold, in one sentence
    description: String,
}

/// Director output schema
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PlanDraft {
    #[schemars(length(min = 1))]
    steps: Vec<PlannedStep>,
    trace: Trace,
}

/// A validated plan plus the turns it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedPlan {
    pub plan: StoryDirectorPlan,
    pub iterations: u32,
}

/// Story decomposition agent
#[derive(Clone)]
pub struct StoryDirector {
    generator: Arc<dyn StructuredGenerator>,
    max_steps: u32,
}

impl std::fmt::Debug for StoryDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryDirector")
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl StoryDirector {
    /// Agent name on generation requests
    pub const AGENT: &'static str = "story-director";

    /// Create director
    #[must_use]
    pub fn new(generator: Arc<dyn StructuredGenerator>, max_steps: u32) -> Self {
        Self {
            generator,
            max_steps,
        }
    }

    /// Decompose `story` into a plan
    ///
    /// # Errors
    /// Generation failures and plans that break the plan rules. There is
    /// no partial-plan fallback.
    #[tracing::instrument(skip_all, fields(story_id = %story.id))]
    pub async fn plan(&self, story: &Story) -> Result<DirectedPlan, DirectorError> {
        let request = GenerationRequest::for_output::<PlanDraft>(
            Self::AGENT,
            INSTRUCTIONS,
            format!("User story:\n{}", story.text),
            self.max_steps,
        )?;

        let no_tools = ToolRegistry::new();
        let generated = ToolLoop::new(self.generator.as_ref(), &no_tools)
            .run::<PlanDraft>(&request)
            .await?;

        let steps = validate_steps(generated.value.steps)?;
        tracing::info!(steps = steps.len(), iterations = generated.iterations, "story decomposed");

        Ok(DirectedPlan {
            plan: StoryDirectorPlan {
                story: story.text.clone(),
                steps,
                trace: generated.value.trace,
            },
            iterations: generated.iterations,
        })
    }
}

fn is_kebab_case(id: &str) -> bool {
    match KEBAB_CASE.as_ref() {
        Some(re) => re.is_match(id),
        None => false,
    }
}

fn validate_steps(planned: Vec<PlannedStep>) -> Result<Vec<StoryStep>, DirectorError> {
    if planned.is_empty() {
        return Err(DirectorError::InvalidPlan("plan has no steps".to_string()));
    }

    let mut seen = HashSet::with_capacity(planned.len());
    let mut steps = Vec::with_capacity(planned.len());
    for (position, step) in planned.into_iter().enumerate() {
        if !is_kebab_case(&step.id) {
            return Err(DirectorError::InvalidPlan(format!(
                "step id '{}' is not kebab-case",
                step.id
            )));
        }
        if !seen.insert(step.id.clone()) {
            return Err(DirectorError::InvalidPlan(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
        if step.description.trim().is_empty() {
            return Err(DirectorError::InvalidPlan(format!(
                "step '{}' has no description",
                step.id
            )));
        }
        let index = u32::try_from(position)
            .map_err(|_| DirectorError::InvalidPlan("too many steps".to_string()))?;
        steps.push(StoryStep {
            id: step.id,
            index,
            description: step.description,
        });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generation::{MockStructuredGenerator, ModelTurn};
    use serde_json::json;

    fn director_answering(answer: serde_json::Value) -> StoryDirector {
        let mut generator = MockStructuredGenerator::new();
        generator.expect_next_turn().returning(move |request, _| {
            assert!(request.tools.is_empty());
            Ok(ModelTurn::Final(answer.clone()))
        });
        StoryDirector::new(Arc::new(generator), 8)
    }

    fn story() -> Story {
        Story::new("story-1", "user can reset password")
    }

    #[tokio::test]
    async fn plans_are_indexed_by_position() {
        let director = director_answering(json!({
            "steps": [
                {"id": "request-reset-link", "description": "User requests a reset link"},
                {"id": "set-new-password", "description": "User sets a new password"}
            ],
            "trace": {"summary": "two steps"}
        }));

        let directed = director.plan(&story()).await.unwrap();
        assert_eq!(directed.iterations, 1);
        assert_eq!(directed.plan.story, "user can reset password");
        let ids: Vec<_> = directed.plan.steps.iter().map(|s| (s.index, s.id.as_str())).collect();
        assert_eq!(ids, vec![(0, "request-reset-link"), (1, "set-new-password")]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let director = director_answering(json!({
            "steps": [
                {"id": "reset", "description": "a"},
                {"id": "reset", "description": "b"}
            ],
            "trace": {"summary": ""}
        }));
        assert!(matches!(
            director.plan(&story()).await,
            Err(DirectorError::InvalidPlan(msg)) if msg.contains("duplicate")
        ));
    }

    #[tokio::test]
    async fn non_kebab_ids_are_rejected() {
        let director = director_answering(json!({
            "steps": [{"id": "Reset Password", "description": "a"}],
            "trace": {"summary": ""}
        }));
        assert!(matches!(director.plan(&story()).await, Err(DirectorError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn blank_descriptions_are_rejected() {
        let director = director_answering(json!({
            "steps": [{"id": "reset", "description": "  "}],
            "trace": {"summary": ""}
        }));
        assert!(matches!(director.plan(&story()).await, Err(DirectorError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn empty_plan_fails_schema() {
        let director = director_answering(json!({"steps": [], "trace": {"summary": ""}}));
        assert!(matches!(
            director.plan(&story()).await,
            Err(DirectorError::Generation(GenerationError::SchemaViolation { .. }))
        ));
    }

    #[test]
    fn kebab_case() {
        assert!(is_kebab_case("open-reset-form"));
        assert!(is_kebab_case("step2"));
        assert!(!is_kebab_case("-leading"));
        assert!(!is_kebab_case("double--dash"));
        assert!(!is_kebab_case("snake_case"));
        assert!(!is_kebab_case(""));
    }
}
