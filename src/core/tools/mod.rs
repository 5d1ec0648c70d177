//! Tools the model can call, and the registry that dispatches them.
//!
//! Every failure inside a tool comes back to the model as text starting with
//! `Error:` so the conversation can always continue.

mod commands;
mod composite;
mod edits;
mod fs_tools;
mod grep;
mod search;
mod think;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FinderError, Result};
use super::index::{IndexBuilder, IndexCache};
use super::paths::PathResolver;

pub use commands::{discover_commands, GetProjectCommandsTool, ProjectCommand};
pub use composite::{CompositeStep, CompositeTool, CreateCompositeTool, COMPOSABLE_TOOLS, MAX_COMPOSITE_DEPTH};
pub use edits::{DiffPayload, FileDiff, ProposeEditsTool};
pub use fs_tools::{ListDirTool, ReadFileTool};
pub use grep::GrepTool;
pub use search::{rank_files, SearchAndReadTool, SearchFilesTool, SearchHit};
pub use think::{extract_thinking, CreatePlanTool, ThinkTool};

/// Schema advertised to the model for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Chat-completions `tools` entry
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as sent by the model
    pub arguments: String,
}

/// Result text plus an optional diff to surface to the user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub result: String,
    pub diff: Option<DiffPayload>,
}

impl ToolOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            diff: None,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::text(format!("Error: {}", message))
    }

    pub fn is_error(&self) -> bool {
        self.result.starts_with("Error:")
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Everything a tool may touch during one agent loop
#[derive(Clone)]
pub struct ToolContext {
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    /// Validation attempts per edit proposal, shared across the loop
    pub attempts: Arc<Mutex<HashMap<String, u32>>>,
    /// Composite nesting level of the current call
    pub depth: usize,
}

impl ToolContext {
    pub fn new(root: &Path, config: Arc<Config>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            registry,
            attempts: Arc::new(Mutex::new(HashMap::new())),
            depth: 0,
        }
    }

    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    /// Load the project index, building it on first use
    pub fn index(&self) -> Result<IndexCache> {
        IndexBuilder::new(&self.config.project).get_or_build_index(&self.root)
    }

    pub fn path_resolver(&self) -> PathResolver {
        PathResolver::new(&self.config.tools.deprioritized_segments)
    }

    /// Increment and return the attempt counter for `key`
    pub fn next_attempt(&self, key: &str) -> u32 {
        let mut attempts = match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Name-keyed tool table; insertion order is the advertised order
#[derive(Default)]
pub struct ToolRegistry {
    handlers: RwLock<Vec<Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool
    pub fn with_builtin_tools() -> Self {
        let registry = Self::new();
        let builtins: Vec<Arc<dyn ToolHandler>> = vec![
            Arc::new(ListDirTool),
            Arc::new(SearchFilesTool),
            Arc::new(ReadFileTool),
            Arc::new(GrepTool),
            Arc::new(GetProjectCommandsTool),
            Arc::new(ProposeEditsTool),
            Arc::new(ThinkTool),
            Arc::new(CreatePlanTool),
            Arc::new(SearchAndReadTool),
            Arc::new(CreateCompositeTool),
        ];
        for handler in builtins {
            // names are distinct
            let _ = registry.register(handler);
        }
        registry
    }

    /// Add a handler. Names are unique; an existing tool is never replaced.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| FinderError::Tool("tool registry lock poisoned".to_string()))?;
        if handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(FinderError::Tool(format!(
                "A tool named '{}' is already registered",
                handler.name()
            )));
        }
        debug!("Registered tool {}", handler.name());
        handlers.push(handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        let handlers = self.handlers.read().ok()?;
        handlers.iter().find(|h| h.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        match self.handlers.read() {
            Ok(handlers) => handlers.iter().map(|h| h.name().to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        match self.handlers.read() {
            Ok(handlers) => handlers.iter().map(|h| h.definition()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Dispatch a call by exact name. Never fails: problems become `Error:` text.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(handler) = self.get(&call.name) else {
            warn!("Unknown tool requested: {}", call.name);
            return ToolOutput::error(format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.names().join(", ")
            ));
        };

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutput::error(format!("Invalid JSON arguments for '{}': {}", call.name, e))
            }
        };

        let started = Instant::now();
        let output = match handler.execute(args, ctx).await {
            Ok(output) => output,
            Err(FinderError::Tool(message)) => ToolOutput::error(message),
            Err(e) => ToolOutput::error(e),
        };
        info!(
            "🔧 {} finished in {}ms{}",
            call.name,
            started.elapsed().as_millis(),
            if output.is_error() { " (error)" } else { "" }
        );
        output
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    let value: Value = serde_json::from_str(raw)?;
    // some providers double-encode the arguments object
    if let Value::String(inner) = &value {
        if let Ok(decoded @ Value::Object(_)) = serde_json::from_str::<Value>(inner) {
            return Ok(decoded);
        }
    }
    Ok(value)
}

/// Required string argument
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| FinderError::Tool(format!("Missing required argument '{}'", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

/// Accepts numbers and numeric strings
pub(crate) fn optional_usize(args: &Value, key: &str) -> Option<usize> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_definitions_in_order() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(
            registry.names(),
            vec![
                "list_dir",
                "search_files",
                "read_file",
                "grep",
                "get_project_commands",
                "propose_edits",
                "think",
                "create_plan",
                "search_and_read",
                "create_composite_tool",
            ]
        );
        for definition in registry.get_definitions() {
            assert_eq!(definition.parameters["type"], "object");
            assert_eq!(definition.to_function_schema()["function"]["name"], definition.name);
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ToolRegistry::with_builtin_tools();
        assert!(registry.register(Arc::new(ThinkTool)).is_err());
        assert_eq!(registry.names().len(), 10);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_are_text() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let unknown = run(&ctx, "delete_everything", json!({})).await;
        assert!(unknown.result.starts_with("Error: Unknown tool 'delete_everything'"));

        let bad = ctx
            .registry
            .execute(
                &ToolCall {
                    id: "1".into(),
                    name: "read_file".into(),
                    arguments: "{not json".into(),
                },
                &ctx,
            )
            .await;
        assert!(bad.result.starts_with("Error: Invalid JSON arguments for 'read_file'"));

        let missing = run(&ctx, "read_file", json!({})).await;
        assert_eq!(missing.result, "Error: Missing required argument 'path'");
    }

    #[test]
    fn test_parse_arguments_variants() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments("\"{\\\"a\\\":1}\"").unwrap(), json!({"a": 1}));
        assert!(parse_arguments("[1,").is_err());
    }

    #[test]
    fn test_attempt_counter_is_shared() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let nested = ctx.nested();
        assert_eq!(ctx.next_attempt("a.ts"), 1);
        assert_eq!(nested.next_attempt("a.ts"), 2);
        assert_eq!(nested.depth, 1);
    }
}
