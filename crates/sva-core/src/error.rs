//! Error types for SVA Core
//!
//! Provides error handling for:
//! - Structured generation (model turns, step budget, output schema)
//! - Tool dispatch
//! - Story decomposition (director)
//! - Step review (reviewer)
//! - Whole-story evaluation, including partial results on mid-run failure
//! - Configuration loading

use crate::types::{StepReviewerOutput, StoryStep};
use sva_cache::CacheError;

/// Structured-generation failures
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Model provider call failed
    #[error("model provider error: {0}")]
    Provider(String),

    /// Loop cap reached without a final answer
    #[error("step budget exhausted after {turns} turns")]
    StepBudgetExhausted { turns: u32 },

    /// Final value does not conform to the output schema
    #[error("output does not match schema: {}", .errors.join("; "))]
    SchemaViolation { errors: Vec<String> },

    /// Output schema itself could not be compiled
    #[error("invalid output schema: {0}")]
    InvalidSchema(String),
}

impl GenerationError {
    /// Create provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Check if retrying the whole generation may help
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_))
    }
}

/// Tool invocation failures
///
/// Inside the tool loop these are reported back to the model as error
/// results rather than aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments did not match the tool's parameters
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// Tool backend failed
    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

/// Director failures
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    /// Generation failed or produced an off-schema plan
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Plan matched the schema but breaks a plan rule
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// Reviewer failures
#[derive(Debug, thiserror::Error)]
pub enum ReviewerError {
    /// Generation failed or produced an off-schema verdict
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Verdict matched the schema but a code reference is unusable
    #[error("invalid reviewer output: {0}")]
    InvalidOutput(String),
}

/// Whole-story evaluation failures
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// Director stage failed; no step was reviewed
    #[error("could not decompose story: {0}")]
    Decomposition(#[source] DirectorError),

    /// Reviewer failed mid-run; earlier step results are preserved
    #[error(
        "story evaluation incomplete: step {} ('{}') failed after {} completed step(s): {source}",
        .failed_step.index,
        .failed_step.id,
        .completed.len()
    )]
    Incomplete {
        completed: Vec<StepReviewerOutput>,
        failed_step: StoryStep,
        #[source]
        source: ReviewerError,
    },

    /// Evidence cache failed
    #[error("evidence cache error: {0}")]
    Cache(#[from] CacheError),
}

impl EvaluationError {
    /// Step results that completed before the failure
    #[must_use]
    pub fn completed_steps(&self) -> &[StepReviewerOutput] {
        match self {
            Self::Incomplete { completed, .. } => completed,
            _ => &[],
        }
    }

    /// Check if retrying the whole run may help
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Decomposition(DirectorError::Generation(e))
            | Self::Incomplete {
                source: ReviewerError::Generation(e),
                ..
            } => e.is_retryable(),
            Self::Cache(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML is malformed or has unknown keys
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Telemetry initialisation failures
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Filter directive did not parse
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("tracing subscriber already initialised: {0}")]
    AlreadyInitialised(String),
}
