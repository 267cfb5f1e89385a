//! Core types for story verification
//!
//! Stories go in, plans and verdicts come out:
//!
//! ```text
//! Story ─► StoryDirectorPlan { steps: [StoryStep] }
//!                  │
//!                  └─► per step: StepReviewerOutput { result, code, trace }
//!                                      │
//!                                      └─► StoryDirectorOutput { result, steps, trace }
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user story: expected behavior in plain language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    /// Stable identifier
    pub id: String,
    /// Story text
    pub text: String,
}

impl Story {
    /// Create new story
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One atomic, independently verifiable sub-claim of a story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoryStep {
    /// Stable kebab-case slug
    pub id: String,
    /// 0-based execution and aggregation order
    pub index: u32,
    pub description: String,
}

/// Step or story verdict
///
/// Aggregation priority is `fail > blocked > not-implemented > pass`, see
/// [`StepResult::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StepResult {
    /// Repository evidence supports the step
    Pass,
    /// Repository evidence contradicts the step
    Fail,
    /// No supporting implementation found
    NotImplemented,
    /// A prerequisite did not hold
    Blocked,
}

impl StepResult {
    /// All results, in declaration order
    pub const ALL: [StepResult; 4] = [
        StepResult::Pass,
        StepResult::Fail,
        StepResult::NotImplemented,
        StepResult::Blocked,
    ];

    /// Aggregation priority; the highest rank among steps decides the story
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            StepResult::Pass => 0,
            StepResult::NotImplemented => 1,
            StepResult::Blocked => 2,
            StepResult::Fail => 3,
        }
    }

    /// Wire label
    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            StepResult::Pass => "pass",
            StepResult::Fail => "fail",
            StepResult::NotImplemented => "not-implemented",
            StepResult::Blocked => "blocked",
        }
    }

    /// Reduce step results to a story result
    ///
    /// Independent of order; an empty input is `Pass`.
    #[must_use]
    pub fn aggregate(results: impl IntoIterator<Item = StepResult>) -> StepResult {
        results
            .into_iter()
            .max_by_key(|r| r.rank())
            .unwrap_or(StepResult::Pass)
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StepResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepResult::ALL
            .into_iter()
            .find(|r| r.label() == s)
            .ok_or_else(|| format!("unknown step result '{s}'"))
    }
}

/// A code reference backing a reviewer verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeSnippet {
    /// Checkout-relative path
    pub path: String,
    /// First line, 1-based
    pub start_line: u32,
    /// Last line, inclusive
    pub end_line: u32,
    /// What this code shows about the step
    pub explanation: String,
}

impl CodeSnippet {
    /// `path:start-end` evidence reference
    #[must_use]
    pub fn evidence_ref(&self) -> String {
        format!("{}:{}-{}", self.path, self.start_line, self.end_line)
    }
}

/// Reasoning record of one agent run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub summary: String,
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

/// Reviewer verdict for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepReviewerOutput {
    pub result: StepResult,
    pub description: String,
    #[serde(default)]
    pub code: Vec<CodeSnippet>,
    pub trace: Trace,
}

/// Director decomposition of a story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDirectorPlan {
    pub story: String,
    pub steps: Vec<StoryStep>,
    pub trace: Trace,
}

/// Final aggregated verdict with full step detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDirectorOutput {
    pub result: StepResult,
    pub story: String,
    pub steps: Vec<StepReviewerOutput>,
    pub trace: Trace,
}

/// Counters for one evaluation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Tool calls made by the reviewer, summed across steps
    pub reviewer_tool_calls: u32,
    /// Model turns taken by the reviewer, summed across steps
    pub reviewer_iterations: u32,
    /// Model turns taken by the director
    pub director_iterations: u32,
    /// Steps answered from the evidence cache
    pub steps_reused: u32,
}
