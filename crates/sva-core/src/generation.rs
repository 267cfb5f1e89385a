//! Structured generation
//!
//! The model layer is consumed one turn at a time through
//! [`StructuredGenerator`]. [`ToolLoop`] drives the turns: it dispatches tool
//! calls, feeds results back, enforces the step budget and validates the
//! final value against the output schema before deserializing it.
//!
//! ```text
//! request ─► next_turn ─► ToolCalls ─► registry.dispatch ─► transcript ─┐
//!               ▲                                                      │
//!               └──────────────────────────────────────────────────────┘
//!            next_turn ─► Final(json) ─► schema check ─► T
//! ```

use crate::error::GenerationError;
use crate::tools::{ToolDefinition, ToolRegistry};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turn cap for an agent configured with `max_steps`
#[inline]
#[must_use]
pub fn loop_cap(max_steps: u32) -> u32 {
    max_steps.saturating_add(1).max(4)
}

/// JSON schema of `T`, as sent to the model and used to check its answer
///
/// # Errors
/// Fails if the derived schema cannot be encoded.
pub fn output_schema<T: JsonSchema>() -> Result<Value, GenerationError> {
    serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| GenerationError::InvalidSchema(e.to_string()))
}

/// Everything the model needs for one agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Agent name, for logs and providers that route per agent
    pub agent: String,
    /// System instructions
    pub instructions: String,
    /// User prompt
    pub prompt: String,
    /// Tools the model may call; empty for tool-less agents
    pub tools: Vec<ToolDefinition>,
    /// Schema the final value must satisfy
    pub output_schema: Value,
    /// Configured step budget (the loop cap is derived from it)
    pub max_steps: u32,
}

impl GenerationRequest {
    /// Create request whose output schema is derived from `T`
    ///
    /// # Errors
    /// Fails if the schema cannot be derived.
    pub fn for_output<T: JsonSchema>(
        agent: impl Into<String>,
        instructions: impl Into<String>,
        prompt: impl Into<String>,
        max_steps: u32,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            agent: agent.into(),
            instructions: instructions.into(),
            prompt: prompt.into(),
            tools: Vec::new(),
            output_schema: output_schema::<T>()?,
            max_steps,
        })
    }

    /// With tool definitions
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Create tool call
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool call, as fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: Value,
    pub is_error: bool,
}

/// What the model produced in one turn
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Call these tools, then ask again
    ToolCalls(Vec<ToolCall>),
    /// Final answer
    Final(Value),
}

/// Conversation so far, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TranscriptEntry {
    /// The model asked for tools
    ToolCalls { calls: Vec<ToolCall> },
    /// Results of those calls
    ToolResults { results: Vec<ToolResult> },
    /// A final value was rejected and the model may retry
    Rejected { errors: Vec<String> },
}

/// One model turn at a time
///
/// Implementations own prompt rendering, provider calls and retries; the
/// loop only sees turns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Produce the next turn for `request` given the transcript so far
    ///
    /// # Errors
    /// Provider failures.
    async fn next_turn(
        &self,
        request: &GenerationRequest,
        transcript: &[TranscriptEntry],
    ) -> Result<ModelTurn, GenerationError>;
}

/// Result of a finished loop
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    /// Model turns taken
    pub iterations: u32,
    /// Tool calls dispatched
    pub tool_calls: u32,
    /// Tool calls that returned without error, in call order
    pub executed: Vec<ToolCall>,
}

/// Bounded generation loop
pub struct ToolLoop<'a> {
    generator: &'a dyn StructuredGenerator,
    tools: &'a ToolRegistry,
}

impl<'a> ToolLoop<'a> {
    /// Create loop over a generator and tool set
    #[must_use]
    pub fn new(generator: &'a dyn StructuredGenerator, tools: &'a ToolRegistry) -> Self {
        Self { generator, tools }
    }

    /// Run until the model returns a conforming final value
    ///
    /// An off-schema final value is recorded in the transcript and the model
    /// gets another turn while budget remains; the last violation is
    /// returned if the budget runs out on one.
    ///
    /// # Errors
    /// Provider failures, budget exhaustion or schema violations.
    #[tracing::instrument(skip_all, fields(agent = %request.agent))]
    pub async fn run<T: DeserializeOwned>(
        &self,
        request: &GenerationRequest,
    ) -> Result<Generated<T>, GenerationError> {
        let schema = JSONSchema::compile(&request.output_schema)
            .map_err(|e| GenerationError::InvalidSchema(e.to_string()))?;

        let cap = loop_cap(request.max_steps);
        let mut transcript = Vec::new();
        let mut tool_calls = 0u32;
        let mut executed = Vec::new();
        let mut last_violation = None;

        for turn in 1..=cap {
            match self.generator.next_turn(request, &transcript).await? {
                ModelTurn::ToolCalls(calls) => {
                    tracing::debug!(turn, calls = calls.len(), "model requested tools");
                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        tool_calls += 1;
                        let result = self.tools.dispatch(call).await;
                        if !result.is_error {
                            executed.push(call.clone());
                        }
                        results.push(result);
                    }
                    transcript.push(TranscriptEntry::ToolCalls { calls });
                    transcript.push(TranscriptEntry::ToolResults { results });
                }
                ModelTurn::Final(value) => match conform::<T>(&schema, value) {
                    Ok(value) => {
                        tracing::debug!(turn, tool_calls, "generation finished");
                        return Ok(Generated {
                            value,
                            iterations: turn,
                            tool_calls,
                            executed,
                        });
                    }
                    Err(errors) => {
                        tracing::warn!(turn, errors = errors.len(), "final value rejected");
                        transcript.push(TranscriptEntry::Rejected {
                            errors: errors.clone(),
                        });
                        last_violation = Some(errors);
                    }
                },
            }
        }

        Err(match last_violation {
            Some(errors) => GenerationError::SchemaViolation { errors },
            None => GenerationError::StepBudgetExhausted { turns: cap },
        })
    }
}

fn conform<T: DeserializeOwned>(schema: &JSONSchema, value: Value) -> Result<T, Vec<String>> {
    if let Err(errors) = schema.validate(&value) {
        return Err(errors
            .map(|e| format!("{}: {e}", e.instance_path))
            .collect());
    }
    serde_json::from_value(value).map_err(|e| vec![e.to_string()])
}
