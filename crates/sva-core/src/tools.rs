//! Reviewer tools
//!
//! Two search capabilities are exposed to the reviewer model:
//!
//! - `search_code`: broad fuzzy/semantic search, backed by [`CodeSearch`]
//! - `find_symbol`: exact symbol lookup, backed by [`SymbolLookup`]
//!
//! Both backends are external collaborators; this module only adapts them
//! to the tool-call protocol of the generation loop.

use crate::error::ToolError;
use crate::generation::{ToolCall, ToolResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Name, purpose and JSON-schema parameters of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create definition
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model
    fn definition(&self) -> ToolDefinition;

    /// Execute with model-supplied arguments
    ///
    /// # Errors
    /// Invalid arguments or backend failure.
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;

    /// The search query these arguments represent, if any
    fn query(&self, _arguments: &Value) -> Option<String> {
        None
    }
}

/// Tools by name, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition name, replacing any previous one
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Builder-style register
    #[must_use]
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Definitions of all tools
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Number of registered tools
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True if no tools are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call; failures become error results for the model
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let outcome = match self.tools.get(&call.name) {
            Some(tool) => tool.call(call.arguments.clone()).await,
            None => Err(ToolError::UnknownTool(call.name.clone())),
        };

        match outcome {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
            },
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool call failed");
                ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: json!({ "error": e.to_string() }),
                    is_error: true,
                }
            }
        }
    }

    /// Search queries behind `calls`, deduplicated, first occurrence first
    #[must_use]
    pub fn queries(&self, calls: &[ToolCall]) -> Vec<String> {
        let mut seen = indexmap::IndexSet::new();
        for call in calls {
            if let Some(query) = self
                .tools
                .get(&call.name)
                .and_then(|tool| tool.query(&call.arguments))
            {
                seen.insert(query);
            }
        }
        seen.into_iter().collect()
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn parameters<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

/// A code search match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
}

/// A symbol definition site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolLocation {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub line: u32,
}

/// Fuzzy/semantic search over one checkout
#[async_trait]
pub trait CodeSearch: Send + Sync {
    /// Best matches for `query`, at most `limit`
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, String>;
}

/// Exact symbol lookup over one checkout
#[async_trait]
pub trait SymbolLookup: Send + Sync {
    /// Definition sites of `name`
    async fn find(&self, name: &str) -> Result<Vec<SymbolLocation>, String>;
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    /// What to look for, in natural language or code fragments
    query: String,
    /// Maximum matches to return
    #[serde(default)]
    limit: Option<usize>,
}

/// `search_code` tool
pub struct SearchCodeTool {
    backend: Arc<dyn CodeSearch>,
    default_limit: usize,
}

impl SearchCodeTool {
    pub const NAME: &'static str = "search_code";

    /// Wrap a search backend
    #[must_use]
    pub fn new(backend: Arc<dyn CodeSearch>) -> Self {
        Self {
            backend,
            default_limit: 10,
        }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            Self::NAME,
            "Fuzzy search of the repository. Returns file paths with line ranges and snippets.",
            parameters::<SearchArgs>(),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(Self::NAME, arguments)?;
        let limit = args.limit.unwrap_or(self.default_limit).max(1);
        let hits = self
            .backend
            .search(&args.query, limit)
            .await
            .map_err(|message| ToolError::Failed {
                tool: Self::NAME.to_string(),
                message,
            })?;
        Ok(json!({ "hits": hits }))
    }

    fn query(&self, arguments: &Value) -> Option<String> {
        arguments.get("query").and_then(Value::as_str).map(str::to_string)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SymbolArgs {
    /// Exact identifier, e.g. `resetPassword`
    name: String,
}

/// `find_symbol` tool
pub struct FindSymbolTool {
    backend: Arc<dyn SymbolLookup>,
}

impl FindSymbolTool {
    pub const NAME: &'static str = "find_symbol";

    /// Wrap a symbol backend
    #[must_use]
    pub fn new(backend: Arc<dyn SymbolLookup>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FindSymbolTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            Self::NAME,
            "Exact lookup of a function, type or constant by name. Returns definition sites.",
            parameters::<SymbolArgs>(),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SymbolArgs = parse_args(Self::NAME, arguments)?;
        let found = self
            .backend
            .find(&args.name)
            .await
            .map_err(|message| ToolError::Failed {
                tool: Self::NAME.to_string(),
                message,
            })?;
        Ok(json!({ "symbols": found }))
    }

    fn query(&self, arguments: &Value) -> Option<String> {
        arguments
            .get("name")
            .and_then(Value::as_str)
            .map(|name| format!("symbol:{name}"))
    }
}

/// Registry with both reviewer tools
#[must_use]
pub fn reviewer_tools(search: Arc<dyn CodeSearch>, symbols: Arc<dyn SymbolLookup>) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(SearchCodeTool::new(search)))
        .with(Arc::new(FindSymbolTool::new(symbols)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct OneHit;

    #[async_trait]
    impl CodeSearch for OneHit {
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, String> {
            if query == "boom" {
                return Err("index offline".to_string());
            }
            Ok(vec![SearchHit {
                path: "src/auth/reset.ts".to_string(),
                start_line: 10,
                end_line: 40,
                snippet: format!("{query} x{limit}"),
            }])
        }
    }

    struct NoSymbols;

    #[async_trait]
    impl SymbolLookup for NoSymbols {
        async fn find(&self, _name: &str) -> Result<Vec<SymbolLocation>, String> {
            Ok(Vec::new())
        }
    }

    fn tools() -> ToolRegistry {
        reviewer_tools(Arc::new(OneHit), Arc::new(NoSymbols))
    }

    #[test]
    fn definitions_in_registration_order() {
        let names: Vec<_> = tools().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["search_code", "find_symbol"]);
        let params = &tools().definitions()[0].parameters;
        assert!(params["properties"].get("query").is_some());
    }

    #[tokio::test]
    async fn search_dispatch() {
        let result = tools()
            .dispatch(&ToolCall::new("1", "search_code", json!({"query": "reset password", "limit": 3})))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.call_id, "1");
        assert_eq!(result.content["hits"][0]["path"], "src/auth/reset.ts");
        assert_eq!(result.content["hits"][0]["snippet"], "reset password x3");
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let registry = tools();
        let unknown = registry.dispatch(&ToolCall::new("1", "grep", json!({}))).await;
        assert!(unknown.is_error);
        assert!(unknown.content["error"].as_str().unwrap().contains("unknown tool"));

        let bad_args = registry.dispatch(&ToolCall::new("2", "find_symbol", json!({"symbol": 1}))).await;
        assert!(bad_args.is_error);

        let backend = registry.dispatch(&ToolCall::new("3", "search_code", json!({"query": "boom"}))).await;
        assert!(backend.is_error);
        assert!(backend.content["error"].as_str().unwrap().contains("index offline"));
    }

    #[test]
    fn queries_are_deduplicated() {
        let calls = vec![
            ToolCall::new("1", "search_code", json!({"query": "reset"})),
            ToolCall::new("2", "find_symbol", json!({"name": "resetPassword"})),
            ToolCall::new("3", "search_code", json!({"query": "reset"})),
            ToolCall::new("4", "unknown", json!({"query": "ignored"})),
        ];
        assert_eq!(tools().queries(&calls), vec!["reset", "symbol:resetPassword"]);
    }
}
