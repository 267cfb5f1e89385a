//! Testing utilities for SVA workspace
//!
//! A scripted model, canned search backends and story fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use sva_core::{
    reviewer_tools, CodeSearch, GenerationError, GenerationRequest, ModelTurn, SearchHit,
    StepReviewer, Story, StoryDirector, StructuredGenerator, SymbolLocation, SymbolLookup,
    ToolCall, ToolRegistry, TranscriptEntry,
};
use sva_evidence::MemoryFileHasher;

/// Model that replays queued turns per agent
///
/// Running out of turns for an agent is a provider error, so an unexpected
/// extra call fails the run instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    turns: Mutex<HashMap<String, VecDeque<Result<ModelTurn, GenerationError>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one turn for `agent`
    pub fn push(&self, agent: &str, turn: Result<ModelTurn, GenerationError>) -> &Self {
        self.turns
            .lock()
            .entry(agent.to_string())
            .or_default()
            .push_back(turn);
        self
    }

    /// Queue a director plan of `(id, description)` steps
    pub fn plan(&self, steps: &[(&str, &str)]) -> &Self {
        let steps: Vec<Value> = steps
            .iter()
            .map(|(id, description)| json!({"id": id, "description": description}))
            .collect();
        self.push(
            StoryDirector::AGENT,
            Ok(ModelTurn::Final(json!({
                "steps": steps,
                "trace": {"summary": format!("{} step(s)", steps.len())}
            }))),
        )
    }

    /// Queue a reviewer search turn
    pub fn search(&self, query: &str) -> &Self {
        self.push(
            StepReviewer::AGENT,
            Ok(ModelTurn::ToolCalls(vec![ToolCall::new(
                format!("call-{query}"),
                "search_code",
                json!({"query": query}),
            )])),
        )
    }

    /// Queue a reviewer verdict
    pub fn verdict(&self, verdict: Value) -> &Self {
        self.push(StepReviewer::AGENT, Ok(ModelTurn::Final(verdict)))
    }

    /// Queue a provider failure for `agent`
    pub fn fail(&self, agent: &str, message: &str) -> &Self {
        self.push(agent, Err(GenerationError::provider(message)))
    }

    /// Turns still queued for `agent`
    pub fn remaining(&self, agent: &str) -> usize {
        self.turns.lock().get(agent).map_or(0, VecDeque::len)
    }

    /// Every request seen, in call order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Requests seen for `agent`
    pub fn requests_for(&self, agent: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn next_turn(
        &self,
        request: &GenerationRequest,
        _transcript: &[TranscriptEntry],
    ) -> Result<ModelTurn, GenerationError> {
        self.requests.lock().push(request.clone());
        self.turns
            .lock()
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(GenerationError::provider(format!(
                    "script exhausted for {}",
                    request.agent
                )))
            })
    }
}

/// Search backend that answers every query with the same hits
#[derive(Debug, Clone, Default)]
pub struct CannedSearch {
    pub hits: Vec<SearchHit>,
}

#[async_trait]
impl CodeSearch for CannedSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, String> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Symbol backend over a fixed list
#[derive(Debug, Clone, Default)]
pub struct CannedSymbols {
    pub symbols: Vec<SymbolLocation>,
}

#[async_trait]
impl SymbolLookup for CannedSymbols {
    async fn find(&self, name: &str) -> Result<Vec<SymbolLocation>, String> {
        Ok(self
            .symbols
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect())
    }
}

/// Reviewer tools over canned backends
pub fn canned_tools() -> ToolRegistry {
    let search = CannedSearch {
        hits: vec![SearchHit {
            path: RESET_HANDLER.to_string(),
            start_line: 10,
            end_line: 40,
            snippet: "export async function resetPassword(token, password) {".to_string(),
        }],
    };
    let symbols = CannedSymbols {
        symbols: vec![SymbolLocation {
            name: "resetPassword".to_string(),
            kind: "function".to_string(),
            path: RESET_HANDLER.to_string(),
            line: 10,
        }],
    };
    reviewer_tools(Arc::new(search), Arc::new(symbols))
}

pub const RESET_HANDLER: &str = "src/auth/reset.ts";
pub const RESET_MAILER: &str = "src/auth/mailer.ts";

pub fn reset_password_story() -> Story {
    Story::new("reset-password", "user can reset password")
}

/// The two steps of [`reset_password_story`]
pub fn reset_password_steps() -> [(&'static str, &'static str); 2] {
    [
        ("request-reset-link", "User requests a password reset link by email"),
        ("set-new-password", "User sets a new password from the link"),
    ]
}

/// Checkout containing the reset handler and mailer
pub fn reset_password_checkout() -> MemoryFileHasher {
    MemoryFileHasher::new()
        .with_file(RESET_HANDLER, "export async function resetPassword(token, password) {}")
        .with_file(RESET_MAILER, "export function sendResetLink(email) {}")
}

/// Reviewer verdict JSON with `(path, start, end, explanation)` snippets
pub fn verdict_json(result: &str, description: &str, code: &[(&str, u32, u32, &str)]) -> Value {
    let code: Vec<Value> = code
        .iter()
        .map(|(path, start, end, explanation)| {
            json!({"path": path, "startLine": start, "endLine": end, "explanation": explanation})
        })
        .collect();
    json!({
        "result": result,
        "description": description,
        "code": code,
        "trace": {"summary": format!("{result}: {description}")}
    })
}
