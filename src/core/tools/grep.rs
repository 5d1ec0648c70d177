use std::collections::HashSet;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::{FinderError, Result};
use super::super::scanner::relative_path;
use super::{optional_str, optional_usize, require_str, ToolContext, ToolHandler, ToolOutput};

const MAX_CONTEXT_LINES: usize = 10;
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const MAX_LINE_CHARS: usize = 300;

pub struct GrepTool;

#[async_trait]
impl ToolHandler for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Optionally restrict files with a glob \
         (e.g. 'src/**/*.ts' or '*.vue') and include surrounding context lines."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "glob": { "type": "string", "description": "Glob filter on workspace-relative paths" },
                "contextLines": { "type": "integer", "description": "Lines of context around each match (0-10)" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let pattern = require_str(&args, "pattern")?;
        let regex = Regex::new(pattern)?;
        let matcher = optional_str(&args, "glob").map(compile_glob).transpose()?;
        let context_lines = optional_usize(&args, "contextLines")
            .or_else(|| optional_usize(&args, "context_lines"))
            .unwrap_or(0)
            .min(MAX_CONTEXT_LINES);
        let max_results = ctx.config.tools.grep_max_results.max(1);

        let excluded: HashSet<String> = ctx.config.project.exclude_dirs.iter().cloned().collect();
        let walker = WalkBuilder::new(&ctx.root)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                entry.depth() == 0 || !is_dir || !excluded.contains(entry.file_name().to_string_lossy().as_ref())
            })
            .build();

        let mut files: Vec<(String, std::path::PathBuf)> = walker
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false))
            .filter_map(|e| {
                let rel = relative_path(&ctx.root, e.path())?;
                Some((rel, e.path().to_path_buf()))
            })
            .filter(|(rel, _)| matcher.as_ref().map_or(true, |m| m.is_match(rel)))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        let mut matches = 0usize;
        let mut matched_files = 0usize;
        let mut truncated = false;

        'files: for (rel, path) in &files {
            let Ok(content) = std::fs::read_to_string(path) else { continue };
            let lines: Vec<&str> = content.lines().collect();
            let hits: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| regex.is_match(line))
                .map(|(i, _)| i)
                .collect();
            if hits.is_empty() {
                continue;
            }
            matched_files += 1;

            for (start, end) in merge_windows(&hits, context_lines, lines.len()) {
                if context_lines > 0 && !out.is_empty() {
                    out.push_str("--\n");
                }
                for i in start..=end {
                    let is_match = hits.binary_search(&i).is_ok();
                    if is_match {
                        if matches == max_results {
                            truncated = true;
                            break 'files;
                        }
                        matches += 1;
                    }
                    let sep = if is_match { ':' } else { '-' };
                    out.push_str(&format!("{}{}{}{} {}\n", rel, sep, i + 1, sep, clip(lines[i])));
                }
            }
        }

        if matches == 0 {
            return Ok(ToolOutput::text(format!("No matches for /{}/ in {} file(s).", pattern, files.len())));
        }
        let mut summary = format!("{} match(es) in {} file(s)", matches, matched_files);
        if truncated {
            summary.push_str(&format!(", stopped at the {} match limit", max_results));
        }
        out.push_str(&format!("[{}]\n", summary));
        Ok(ToolOutput::text(out))
    }
}

/// Globs without a slash match at any depth
fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    let pattern = pattern.trim();
    let pattern = if pattern.contains('/') {
        pattern.to_string()
    } else {
        format!("**/{}", pattern)
    };
    Glob::new(&pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| FinderError::Tool(format!("Invalid glob '{}': {}", pattern, e)))
}

/// Merge overlapping or adjacent `[hit - n, hit + n]` windows
fn merge_windows(hits: &[usize], context: usize, len: usize) -> Vec<(usize, usize)> {
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for &hit in hits {
        let start = hit.saturating_sub(context);
        let end = (hit + context).min(len.saturating_sub(1));
        match windows.last_mut() {
            Some(last) if start <= last.1 + 1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }
    windows
}

fn clip(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.ts", "const a = 1\n// TODO fix a\nconst b = 2\nconst c = 3\n");
        write(dir.path(), "src/b.vue", "<script>\n// TODO vue\n</script>\n");
        write(dir.path(), "node_modules/x/index.js", "// TODO hidden\n");
        dir
    }

    #[tokio::test]
    async fn test_grep_with_glob_and_context() {
        let dir = project();
        let ctx = context(&dir);

        let all = run(&ctx, "grep", json!({"pattern": "TODO"})).await.result;
        assert_eq!(all, "src/a.ts:2: // TODO fix a\nsrc/b.vue:2: // TODO vue\n[2 match(es) in 2 file(s)]\n");

        let vue = run(&ctx, "grep", json!({"pattern": "TODO", "glob": "*.vue"})).await.result;
        assert!(vue.starts_with("src/b.vue:2:"));
        assert!(!vue.contains("a.ts"));

        let ctx_out = run(&ctx, "grep", json!({"pattern": "TODO", "glob": "src/*.ts", "contextLines": 1})).await.result;
        assert_eq!(
            ctx_out,
            "src/a.ts-1- const a = 1\nsrc/a.ts:2: // TODO fix a\nsrc/a.ts-3- const b = 2\n[1 match(es) in 1 file(s)]\n"
        );
    }

    #[tokio::test]
    async fn test_grep_limits_and_errors() {
        let dir = project();
        let mut config = Config::default();
        config.tools.grep_max_results = 1;
        let mut ctx = context(&dir);
        ctx.config = Arc::new(config);

        let capped = run(&ctx, "grep", json!({"pattern": "const"})).await.result;
        assert!(capped.ends_with("[1 match(es) in 1 file(s), stopped at the 1 match limit]\n"));

        let bad = run(&ctx, "grep", json!({"pattern": "(unclosed"})).await;
        assert!(bad.result.starts_with("Error: Invalid pattern"));
    }

    #[test]
    fn test_merge_windows() {
        assert_eq!(merge_windows(&[1, 3, 10], 1, 12), vec![(0, 4), (9, 11)]);
        assert_eq!(merge_windows(&[0], 2, 1), vec![(0, 0)]);
    }
}
