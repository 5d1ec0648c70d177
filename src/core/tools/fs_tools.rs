use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{FinderError, Result};
use super::super::paths::normalize;
use super::super::validation::resolve_inside;
use super::{optional_str, optional_usize, require_str, ToolContext, ToolHandler, ToolOutput};

const MAX_DIR_ENTRIES: usize = 300;

pub struct ListDirTool;

#[async_trait]
impl ToolHandler for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the workspace. Directories end with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the workspace root; '.' or empty for the root"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let requested = optional_str(&args, "path").map(normalize).unwrap_or_default();
        let dir = if requested.is_empty() || requested == "." {
            ctx.root.clone()
        } else {
            resolve_inside(&ctx.root, &requested)?
        };
        if !dir.is_dir() {
            return Err(FinderError::Tool(format!("Not a directory: {}", display(&requested))));
        }

        let excluded = &ctx.config.project.exclude_dirs;
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if !excluded.contains(&name) {
                    dirs.push(format!("{}/", name));
                }
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();

        let total = dirs.len() + files.len();
        let mut out = format!("Contents of {} ({} entries):\n", display(&requested), total);
        for entry in dirs.iter().chain(files.iter()).take(MAX_DIR_ENTRIES) {
            out.push_str(entry);
            out.push('\n');
        }
        if total > MAX_DIR_ENTRIES {
            out.push_str(&format!("… {} more entries not shown\n", total - MAX_DIR_ENTRIES));
        }
        Ok(ToolOutput::text(out))
    }
}

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace, optionally a 1-based inclusive line range. \
         If the path does not exist, a file with the same name elsewhere in the project is used when unambiguous."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to the workspace root" },
                "startLine": { "type": "integer", "description": "First line to return (1-based)" },
                "endLine": { "type": "integer", "description": "Last line to return (inclusive)" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let requested = normalize(require_str(&args, "path")?);
        let start = optional_usize(&args, "startLine").or_else(|| optional_usize(&args, "start_line"));
        let end = optional_usize(&args, "endLine").or_else(|| optional_usize(&args, "end_line"));

        let direct = resolve_inside(&ctx.root, &requested)?;
        if direct.is_file() {
            let content = std::fs::read_to_string(&direct)?;
            return Ok(ToolOutput::text(render_slice(
                &requested,
                &content,
                start,
                end,
                ctx.config.tools.read_max_lines,
            )));
        }

        let index = ctx.index()?;
        let resolver = ctx.path_resolver();
        let paths = || index.files.keys().map(|k| k.as_str());

        if let Some(substitute) = resolver.best_match(&requested, paths()) {
            debug!("read_file: {} resolved to {}", requested, substitute);
            let content = std::fs::read_to_string(ctx.root.join(&substitute))?;
            let body = render_slice(&substitute, &content, start, end, ctx.config.tools.read_max_lines);
            return Ok(ToolOutput::text(format!(
                "Note: '{}' was not found; showing '{}' instead.\n{}",
                requested, substitute, body
            )));
        }

        let candidates = resolver.resolve_candidates(&requested, paths());
        if candidates.is_empty() {
            return Err(FinderError::Tool(format!("File not found: {}", requested)));
        }
        let shown: Vec<&str> = candidates.iter().take(5).map(|s| s.as_str()).collect();
        Err(FinderError::Tool(format!(
            "File not found: {}. Did you mean one of: {}",
            requested,
            shown.join(", ")
        )))
    }
}

/// Header plus the requested line window of `content`
pub(crate) fn render_slice(
    path: &str,
    content: &str,
    start: Option<usize>,
    end: Option<usize>,
    max_lines: usize,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return format!("File: {} (empty)\n", path);
    }

    let first = start.unwrap_or(1).clamp(1, total);
    let default_last = first.saturating_add(max_lines.max(1)).saturating_sub(1);
    let last = end.unwrap_or(default_last).clamp(first, total).min(default_last.max(first));

    let mut out = format!("File: {} (lines {}-{} of {})\n", path, first, last, total);
    out.push_str(&lines[first - 1..last].join("\n"));
    out.push('\n');
    if last < total && end.is_none() {
        out.push_str(&format!(
            "… {} more lines; pass startLine={} to continue\n",
            total - last,
            last + 1
        ));
    }
    out
}

fn display(requested: &str) -> &str {
    if requested.is_empty() {
        "."
    } else {
        requested
    }
}
