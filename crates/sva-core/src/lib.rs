//! SVA Core - story verification agents
//!
//! Verifies natural-language user stories against a repository:
//! - The director decomposes a story into ordered, atomic steps
//! - The reviewer verifies each step with code search, in order
//! - The aggregator reduces step verdicts to one story verdict
//! - The evaluator reuses cached verdicts whose evidence is unchanged
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sva_cache::{EvidenceCacheStore, SqliteBackend};
//! use sva_core::prelude::*;
//! use sva_evidence::CheckoutHasher;
//!
//! # async fn example(generator: Arc<dyn StructuredGenerator>, tools: ToolRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SvaConfig::load("sva.toml").await?;
//! init_tracing(&config.telemetry)?;
//!
//! let store = EvidenceCacheStore::new(SqliteBackend::open("evidence.db")?);
//! let evaluator = StoryEvaluator::from_config(&config, generator, tools, Some(store));
//!
//! let request = EvaluationRequest::new(Story::new("reset", "user can reset password"), "main", "c3")
//!     .with_ancestors(["c2", "c1"]);
//! let report = evaluator.evaluate(&request, Arc::new(CheckoutHasher::new("/work/checkout"))).await?;
//!
//! println!("{}: {} step(s) reused", report.output.result, report.cache.reused_steps.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregator;
pub mod config;
pub mod director;
pub mod error;
pub mod evaluator;
pub mod generation;
pub mod reviewer;
pub mod telemetry;
pub mod tools;
pub mod types;

pub use aggregator::{AggregatedRun, StoryAggregator};
pub use config::{AgentConfig, CacheConfig, SvaConfig, TelemetryConfig};
pub use director::{DirectedPlan, StoryDirector};
pub use error::{
    ConfigError, DirectorError, EvaluationError, GenerationError, ReviewerError, TelemetryError,
    ToolError,
};
pub use evaluator::{CacheOutcome, EvaluationReport, EvaluationRequest, StoryEvaluator};
pub use generation::{
    loop_cap, GenerationRequest, Generated, ModelTurn, StructuredGenerator, ToolCall, ToolLoop,
    ToolResult, TranscriptEntry,
};
pub use reviewer::{ReviewContext, ReviewedStep, StepReviewer};
pub use telemetry::{init_tracing, record_run};
pub use tools::{
    reviewer_tools, CodeSearch, FindSymbolTool, SearchCodeTool, SearchHit, SymbolLocation,
    SymbolLookup, Tool, ToolDefinition, ToolRegistry,
};
pub use types::{
    CodeSnippet, RunMetrics, StepResult, StepReviewerOutput, Story, StoryDirectorOutput,
    StoryDirectorPlan, StoryStep, Trace,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for evaluating stories
    pub use crate::{
        init_tracing, reviewer_tools, EvaluationError, EvaluationReport, EvaluationRequest,
        StepResult, Story, StoryEvaluator, StructuredGenerator, SvaConfig, ToolRegistry,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
