use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{FinderError, Result};
use super::{optional_str, require_str, ToolCall, ToolContext, ToolHandler, ToolOutput};

/// Read-only tools a composite may chain
pub const COMPOSABLE_TOOLS: &[&str] = &[
    "list_dir",
    "search_files",
    "read_file",
    "grep",
    "get_project_commands",
    "search_and_read",
    "think",
];

pub const MAX_COMPOSITE_DEPTH: usize = 3;
const MAX_STEPS: usize = 8;

/// One call in a composite pipeline. String arguments may contain
/// `${query}`, `${prev_result}` and `${prev_path}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeStep {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// A tool registered at runtime that replays a fixed chain of built-in calls
pub struct CompositeTool {
    name: String,
    description: String,
    steps: Vec<CompositeStep>,
    path_like: Regex,
}

impl CompositeTool {
    pub fn new(name: &str, description: &str, steps: Vec<CompositeStep>) -> Result<Self> {
        validate_name(name)?;
        if steps.is_empty() || steps.len() > MAX_STEPS {
            return Err(FinderError::Tool(format!(
                "A composite tool needs between 1 and {} steps",
                MAX_STEPS
            )));
        }
        for step in &steps {
            if !COMPOSABLE_TOOLS.contains(&step.tool.as_str()) {
                return Err(FinderError::Tool(format!(
                    "Tool '{}' cannot be used in a composite. Allowed: {}",
                    step.tool,
                    COMPOSABLE_TOOLS.join(", ")
                )));
            }
            if !(step.args.is_object() || step.args.is_null()) {
                return Err(FinderError::Tool(format!("Arguments for step '{}' must be an object", step.tool)));
            }
        }
        Ok(Self {
            name: name.to_string(),
            description: description.trim().to_string(),
            steps,
            path_like: Regex::new(r"(?:[\w@.-]+/)*[\w@-]+(?:\.[\w-]+)*\.(?:tsx?|jsx?|vue|go|py|mjs|cjs)\b")?,
        })
    }

    pub fn steps(&self) -> &[CompositeStep] {
        &self.steps
    }

    /// First path-looking token of a previous step's output
    fn first_path(&self, text: &str) -> String {
        self.path_like
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = (3..=40).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(FinderError::Tool(format!(
            "Invalid tool name '{}': use 3-40 lowercase letters, digits or underscores",
            name
        )))
    }
}

/// Replace placeholders in every string of `value`
fn substitute(value: &Value, vars: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for (key, replacement) in vars {
                out = out.replace(key, replacement);
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl ToolHandler for CompositeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Value substituted for ${query}" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        if ctx.depth >= MAX_COMPOSITE_DEPTH {
            return Err(FinderError::Tool(format!(
                "Composite nesting limit ({}) reached",
                MAX_COMPOSITE_DEPTH
            )));
        }
        let query = optional_str(&args, "query").unwrap_or_default().to_string();
        let nested = ctx.nested();

        let mut sections = Vec::new();
        let mut prev_result = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            let prev_path = self.first_path(&prev_result);
            let step_args = if step.args.is_null() { json!({}) } else { step.args.clone() };
            let step_args = substitute(
                &step_args,
                &[
                    ("${query}", &query),
                    ("${prev_path}", &prev_path),
                    ("${prev_result}", &prev_result),
                ],
            );
            let call = ToolCall {
                id: format!("{}_{}", self.name, i + 1),
                name: step.tool.clone(),
                arguments: step_args.to_string(),
            };
            let output = ctx.registry.execute(&call, &nested).await;
            sections.push(format!("### Step {}: {}\n{}", i + 1, step.tool, output.result.trim_end()));
            if output.is_error() {
                sections.push(format!("Stopped after step {} failed.", i + 1));
                break;
            }
            prev_result = output.result;
        }
        Ok(ToolOutput::text(sections.join("\n\n")))
    }
}

pub struct CreateCompositeTool;

#[async_trait]
impl ToolHandler for CreateCompositeTool {
    fn name(&self) -> &str {
        "create_composite_tool"
    }

    fn description(&self) -> &str {
        "Register a new tool that runs a fixed sequence of read-only tools. String arguments of a \
         step may use ${query} (the new tool's query argument), ${prev_result} and ${prev_path} \
         (the previous step's output and the first file path in it)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "New tool name (lowercase, underscores)" },
                "description": { "type": "string", "description": "What the new tool does" },
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool": { "type": "string", "enum": COMPOSABLE_TOOLS },
                            "args": { "type": "object" }
                        },
                        "required": ["tool"]
                    }
                }
            },
            "required": ["name", "description", "steps"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let name = require_str(&args, "name")?;
        let description = require_str(&args, "description")?;
        let steps = match args.get("steps") {
            // some models send the array as a JSON string
            Some(Value::String(text)) => serde_json::from_str::<Vec<CompositeStep>>(text),
            Some(value) => serde_json::from_value::<Vec<CompositeStep>>(value.clone()),
            None => return Err(FinderError::Tool("Missing required argument 'steps'".to_string())),
        }
        .map_err(|e| FinderError::Tool(format!("Invalid steps: {}", e)))?;

        let tool = CompositeTool::new(name, description, steps)?;
        let summary: Vec<String> = tool.steps().iter().map(|s| s.tool.clone()).collect();
        ctx.registry.register(Arc::new(tool))?;
        info!("🧩 Registered composite tool {} ({})", name, summary.join(" → "));

        Ok(ToolOutput::text(format!(
            "Registered tool '{}' with {} step(s): {}. It is available from the next round.",
            name,
            summary.len(),
            summary.join(" -> ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "src/services/login.ts",
            "export async function login() {\n  return fetch('/login')\n}\n",
        );
        dir
    }

    #[tokio::test]
    async fn test_register_and_run_pipeline() {
        let dir = project();
        let ctx = context(&dir);

        let created = run(
            &ctx,
            "create_composite_tool",
            json!({
                "name": "find_and_read",
                "description": "Search then read the top hit",
                "steps": [
                    {"tool": "search_files", "args": {"query": "${query}"}},
                    {"tool": "read_file", "args": {"path": "${prev_path}"}}
                ]
            }),
        )
        .await;
        assert!(!created.is_error(), "{}", created.result);
        assert!(ctx.registry.contains("find_and_read"));

        let out = run(&ctx, "find_and_read", json!({"query": "login"})).await.result;
        assert!(out.starts_with("### Step 1: search_files\nFound 1 file(s)"), "{}", out);
        assert!(out.contains("### Step 2: read_file\nFile: src/services/login.ts (lines 1-3 of 3)"));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_definitions() {
        let dir = project();
        let ctx = context(&dir);

        let write_step = run(
            &ctx,
            "create_composite_tool",
            json!({"name": "sneaky", "description": "x", "steps": [{"tool": "propose_edits", "args": {}}]}),
        )
        .await;
        assert!(write_step.result.starts_with("Error: Tool 'propose_edits' cannot be used in a composite"));

        let shadow = run(
            &ctx,
            "create_composite_tool",
            json!({"name": "grep", "description": "x", "steps": [{"tool": "list_dir"}]}),
        )
        .await;
        assert_eq!(shadow.result, "Error: A tool named 'grep' is already registered");

        let bad_name = run(
            &ctx,
            "create_composite_tool",
            json!({"name": "Bad Name", "description": "x", "steps": [{"tool": "list_dir"}]}),
        )
        .await;
        assert!(bad_name.result.starts_with("Error: Invalid tool name"));
        assert_eq!(ctx.registry.names().len(), 10);
    }

    #[tokio::test]
    async fn test_depth_guard_and_failed_step() {
        let dir = project();
        let mut ctx = context(&dir);
        let tool = CompositeTool::new(
            "read_missing",
            "x",
            vec![
                CompositeStep { tool: "read_file".into(), args: json!({"path": "nope/missing.ts"}) },
                CompositeStep { tool: "list_dir".into(), args: Value::Null },
            ],
        )
        .unwrap();

        let out = tool.execute(json!({}), &ctx).await.unwrap().result;
        assert!(out.contains("Error: File not found: nope/missing.ts"));
        assert!(out.ends_with("Stopped after step 1 failed."));
        assert!(!out.contains("Step 2"));

        ctx.depth = MAX_COMPOSITE_DEPTH;
        assert!(tool.execute(json!({}), &ctx).await.is_err());
    }

    #[test]
    fn test_substitute_and_first_path() {
        let value = json!({"a": "${query}!", "b": ["${prev_path}"], "n": 3});
        let out = substitute(&value, &[("${query}", "q"), ("${prev_path}", "src/a.ts")]);
        assert_eq!(out, json!({"a": "q!", "b": ["src/a.ts"], "n": 3}));

        let tool = CompositeTool::new("abc", "d", vec![CompositeStep { tool: "think".into(), args: json!({}) }]).unwrap();
        assert_eq!(tool.first_path("1. src/pages/Home.vue [page]\n2. x.ts"), "src/pages/Home.vue");
        assert_eq!(tool.first_path("nothing here"), "");
    }
}
