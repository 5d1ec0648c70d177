use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FinderError, Result};
use super::{optional_str, require_str, ToolContext, ToolHandler, ToolOutput};

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";

/// Body of the first `<thinking>` block in `text`
pub fn extract_thinking(text: &str) -> Option<&str> {
    let start = text.find(THINKING_OPEN)? + THINKING_OPEN.len();
    let end = text[start..].find(THINKING_CLOSE)? + start;
    let body = text[start..end].trim();
    (!body.is_empty()).then_some(body)
}

/// Scratchpad: echoes the reasoning back so it stays in the transcript
pub struct ThinkTool;

#[async_trait]
impl ToolHandler for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Write down reasoning before acting. Nothing is read or changed; the thought is shown to the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": { "type": "string", "description": "Your reasoning" }
            },
            "required": ["reasoning"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let thought = match optional_str(&args, "thought") {
            Some(thought) => thought,
            None => require_str(&args, "reasoning")?,
        };
        Ok(ToolOutput::text(format!("{}\n{}\n{}", THINKING_OPEN, thought.trim(), THINKING_CLOSE)))
    }
}

pub struct CreatePlanTool;

#[async_trait]
impl ToolHandler for CreatePlanTool {
    fn name(&self) -> &str {
        "create_plan"
    }

    fn description(&self) -> &str {
        "Record a numbered plan for a multi-step change before starting it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "What the plan achieves" },
                "steps": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ordered steps"
                }
            },
            "required": ["title", "steps"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let title = require_str(&args, "title")?;
        let steps: Vec<&str> = match args.get("steps") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|s| s.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect(),
            // a single newline-separated string is accepted too
            Some(Value::String(text)) => text.lines().map(str::trim).filter(|s| !s.is_empty()).collect(),
            _ => Vec::new(),
        };
        if steps.is_empty() {
            return Err(FinderError::Tool("A plan needs at least one step".to_string()));
        }

        let mut plan = format!("## Plan: {}\n\n", title.trim());
        for (i, step) in steps.iter().enumerate() {
            plan.push_str(&format!("{}. {}\n", i + 1, step));
        }
        Ok(ToolOutput::text(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_think_wraps_thought() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let out = run(&ctx, "think", json!({"reasoning": "  check the router first "})).await;
        assert_eq!(out.result, "<thinking>\ncheck the router first\n</thinking>");
        assert_eq!(extract_thinking(&out.result), Some("check the router first"));
    }

    #[test]
    fn test_extract_thinking_edge_cases() {
        assert_eq!(extract_thinking("no tags"), None);
        assert_eq!(extract_thinking("<thinking>  </thinking>"), None);
        assert_eq!(extract_thinking("<thinking>open only"), None);
        assert_eq!(extract_thinking("a <thinking>x</thinking> <thinking>y</thinking>"), Some("x"));
    }

    #[tokio::test]
    async fn test_create_plan() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let out = run(
            &ctx,
            "create_plan",
            json!({"title": "Add logout", "steps": ["Add service call", "", "Wire button"]}),
        )
        .await;
        assert_eq!(out.result, "## Plan: Add logout\n\n1. Add service call\n2. Wire button\n");

        let from_text = run(&ctx, "create_plan", json!({"title": "T", "steps": "a\nb"})).await;
        assert!(from_text.result.ends_with("1. a\n2. b\n"));

        let empty = run(&ctx, "create_plan", json!({"title": "T", "steps": []})).await;
        assert_eq!(empty.result, "Error: A plan needs at least one step");
    }
}
