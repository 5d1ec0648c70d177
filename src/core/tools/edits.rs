use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{FinderError, Result};
use super::super::context_composer::truncate_chars;
use super::super::mistakes::KnownMistakes;
use super::super::paths::normalize;
use super::super::validation::{resolve_inside, CommandOutcome, FileEdit, ValidationRunner};
use super::{ToolContext, ToolHandler, ToolOutput};

const PROPOSED_CONTENT_ECHO_CHARS: usize = 4000;
const ERROR_SUMMARY_CHARS: usize = 2000;

/// Before/after content of one proposed file change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub path: String,
    /// `None` when the proposal creates the file
    pub original: Option<String>,
    pub proposed: String,
    /// First failing validation output, when validation failed
    pub validation_error: Option<String>,
}

/// Proposed changes awaiting the user's decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffPayload {
    pub files: Vec<FileDiff>,
}

impl DiffPayload {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Collapse per-path proposals, keeping the last one for each path
    pub fn from_latest(latest: BTreeMap<String, FileDiff>) -> Self {
        Self {
            files: latest.into_values().collect(),
        }
    }

    /// Write every proposed file to disk. Returns the paths written.
    pub fn apply(&self, root: &Path) -> Result<Vec<String>> {
        let mut written = Vec::new();
        for diff in &self.files {
            let path = resolve_inside(root, &diff.path)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &diff.proposed)?;
            info!("✍️  Applied {}", diff.path);
            written.push(diff.path.clone());
        }
        Ok(written)
    }
}

#[derive(Debug, Deserialize)]
struct EditArgs {
    edits: Vec<FileEdit>,
    #[serde(default, alias = "validationCommands")]
    validation_commands: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandSummary<'a> {
    command: &'a str,
    success: bool,
    exit_code: Option<i32>,
    timed_out: bool,
    output: &'a str,
}

impl<'a> From<&'a CommandOutcome> for CommandSummary<'a> {
    fn from(outcome: &'a CommandOutcome) -> Self {
        Self {
            command: &outcome.command,
            success: outcome.success,
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            output: &outcome.output,
        }
    }
}

pub struct ProposeEditsTool;

impl ProposeEditsTool {
    /// Map bare file names that do not exist to a unique indexed file of that name
    fn resolve_edit_paths(&self, edits: &mut [FileEdit], ctx: &ToolContext) -> Result<Vec<Value>> {
        let mut substitutions = Vec::new();
        for edit in edits.iter_mut() {
            edit.path = normalize(&edit.path);
            let on_disk = resolve_inside(&ctx.root, &edit.path)?;
            if on_disk.exists() || edit.path.contains('/') {
                continue;
            }
            let Ok(index) = ctx.index() else { continue };
            let best = ctx
                .path_resolver()
                .best_match(&edit.path, index.files.keys().map(|k| k.as_str()));
            if let Some(resolved) = best {
                substitutions.push(json!({ "requested": edit.path, "resolved": resolved }));
                edit.path = resolved;
            }
        }
        Ok(substitutions)
    }
}

#[async_trait]
impl ToolHandler for ProposeEditsTool {
    fn name(&self) -> &str {
        "propose_edits"
    }

    fn description(&self) -> &str {
        "Propose complete new contents for one or more files. The edits are validated by temporarily \
         applying them and running the validation commands; the workspace is restored afterwards and \
         the user decides whether to accept. Always send the full file content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string", "description": "File path relative to the workspace root" },
                            "content": { "type": "string", "description": "Complete new file content" }
                        },
                        "required": ["path", "content"]
                    }
                },
                "validation_commands": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Shell commands that must succeed, e.g. from get_project_commands"
                }
            },
            "required": ["edits"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let EditArgs {
            mut edits,
            validation_commands,
        } = serde_json::from_value(args)
            .map_err(|e| FinderError::Tool(format!("Invalid propose_edits arguments: {}", e)))?;
        if edits.is_empty() {
            return Err(FinderError::Tool("No edits were provided".to_string()));
        }

        let substitutions = self.resolve_edit_paths(&mut edits, ctx)?;
        let commands = validation_commands.unwrap_or_else(|| ctx.config.validation.commands.clone());

        let mut paths: Vec<&str> = edits.iter().map(|e| e.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        let key = paths.join(",");
        let attempt = ctx.next_attempt(&key);
        let max_attempts = ctx.config.agent.max_edit_attempts;

        let originals: BTreeMap<String, Option<String>> = edits
            .iter()
            .map(|e| (e.path.clone(), std::fs::read_to_string(ctx.root.join(&e.path)).ok()))
            .collect();

        let (validated, outcomes, message) = if attempt > max_attempts {
            warn!("Edit attempt cap reached for {}", key);
            (
                false,
                Vec::new(),
                format!(
                    "Validation attempt limit ({}) reached for these files. The edits are handed to the user as-is; do not propose them again.",
                    max_attempts
                ),
            )
        } else if commands.iter().all(|c| c.trim().is_empty()) {
            (
                false,
                Vec::new(),
                "No validation commands configured. The edits are shown to the user for review without validation.".to_string(),
            )
        } else {
            let report = ValidationRunner::new(&ctx.config.validation)
                .validate(&ctx.root, &edits, &commands)
                .await?;
            let message = if report.has_errors() {
                format!(
                    "Validation failed (attempt {} of {}). Fix the errors and call propose_edits again with the complete corrected content.",
                    attempt, max_attempts
                )
            } else {
                "All validation commands passed. The edits are shown to the user for review; they are not applied yet.".to_string()
            };
            (true, report.outcomes, message)
        };

        let failure = outcomes.iter().find(|o| !o.success);
        let has_errors = failure.is_some();

        if let Some(failure) = failure {
            if attempt >= 2 {
                let mistakes = KnownMistakes::new(&ctx.root, &ctx.config.project.state_dir);
                if let Err(e) = mistakes.record(&failure.output) {
                    warn!("Could not record known mistake: {}", e);
                }
            }
        }

        // last proposal per path wins
        let mut latest: BTreeMap<String, FileDiff> = BTreeMap::new();
        for edit in &edits {
            latest.insert(
                edit.path.clone(),
                FileDiff {
                    path: edit.path.clone(),
                    original: originals.get(&edit.path).cloned().flatten(),
                    proposed: edit.content.clone(),
                    validation_error: failure.map(|f| truncate_chars(&f.output, ERROR_SUMMARY_CHARS)),
                },
            );
        }

        let mut report = json!({
            "hasErrors": has_errors,
            "validated": validated,
            "attempt": attempt,
            "maxAttempts": max_attempts,
            "files": latest.keys().collect::<Vec<_>>(),
            "results": outcomes.iter().map(CommandSummary::from).collect::<Vec<_>>(),
            "message": message,
        });
        if !substitutions.is_empty() {
            report["substitutions"] = json!(substitutions);
        }
        if has_errors {
            let echoed: BTreeMap<&str, String> = latest
                .values()
                .map(|d| (d.path.as_str(), truncate_chars(&d.proposed, PROPOSED_CONTENT_ECHO_CHARS)))
                .collect();
            report["proposedContent"] = json!(echoed);
        }

        Ok(ToolOutput {
            result: serde_json::to_string_pretty(&report)?,
            diff: Some(DiffPayload::from_latest(latest)),
        })
    }
}
