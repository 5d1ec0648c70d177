use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FinderError, Result};
use super::super::context_composer::{path_score, tokenize};
use super::super::index::{FileIndexEntry, IndexCache};
use super::super::paths::PathResolver;
use super::fs_tools::render_slice;
use super::{optional_usize, require_str, ToolContext, ToolHandler, ToolOutput};

const SEARCH_AND_READ_DEFAULT: usize = 3;
const SEARCH_AND_READ_MAX: usize = 5;
const SEARCH_AND_READ_LINES: usize = 150;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub score: f64,
    pub pattern: String,
}

/// Token-overlap ranking over the index.
///
/// Path hits count double, symbol-name hits once. Each deprioritized segment in
/// a path halves its score. Ties keep index order.
pub fn rank_files(index: &IndexCache, query: &str, resolver: &PathResolver, limit: usize) -> Vec<SearchHit> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<(SearchHit, usize)> = index
        .entries()
        .filter_map(|entry| {
            let raw = 2 * path_score(&tokens, &entry.relative_path) + symbol_score(&tokens, entry);
            if raw == 0 {
                return None;
            }
            let penalty = resolver.penalty(&entry.relative_path);
            let score = raw as f64 * 0.5_f64.powi(penalty as i32);
            Some((
                SearchHit {
                    path: entry.relative_path.clone(),
                    score,
                    pattern: entry.pattern.clone(),
                },
                penalty,
            ))
        })
        .collect();

    hits.sort_by(|(a, pa), (b, pb)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(pa.cmp(pb))
    });
    hits.into_iter().take(limit).map(|(hit, _)| hit).collect()
}

fn symbol_score(tokens: &[String], entry: &FileIndexEntry) -> usize {
    let names: Vec<String> = entry
        .exports
        .iter()
        .chain(entry.functions.iter())
        .chain(entry.classes.iter())
        .chain(entry.hooks.iter())
        .map(|n| n.to_lowercase())
        .collect();
    tokens
        .iter()
        .filter(|t| names.iter().any(|n| n.contains(t.as_str())))
        .count()
}

pub struct SearchFilesTool;

#[async_trait]
impl ToolHandler for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find project files relevant to a free-text query, ranked by overlap with paths and symbol names."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Words describing what to find, e.g. 'login service'" },
                "limit": { "type": "integer", "description": "Maximum number of results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = require_str(&args, "query")?;
        let limit = optional_usize(&args, "limit")
            .unwrap_or(ctx.config.tools.search_limit)
            .clamp(1, 100);

        let index = ctx.index()?;
        let hits = rank_files(&index, query, &ctx.path_resolver(), limit);
        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("No files matched '{}'.", query)));
        }

        let mut out = format!("Found {} file(s) for '{}':\n", hits.len(), query);
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!("{}. {} [{}]", i + 1, hit.path, hit.pattern));
            if let Some(entry) = index.get(&hit.path) {
                if !entry.exports.is_empty() {
                    let shown: Vec<&str> = entry.exports.iter().take(5).map(|s| s.as_str()).collect();
                    out.push_str(&format!(" exports: {}", shown.join(", ")));
                }
            }
            out.push('\n');
        }
        Ok(ToolOutput::text(out))
    }
}

pub struct SearchAndReadTool;

#[async_trait]
impl ToolHandler for SearchAndReadTool {
    fn name(&self) -> &str {
        "search_and_read"
    }

    fn description(&self) -> &str {
        "Search for files matching a query and return the contents of the best matches in one step."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Words describing what to find" },
                "maxFiles": { "type": "integer", "description": "How many of the top matches to read (1-5, default 3)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = require_str(&args, "query")?;
        let max_files = optional_usize(&args, "maxFiles")
            .unwrap_or(SEARCH_AND_READ_DEFAULT)
            .clamp(1, SEARCH_AND_READ_MAX);

        let index = ctx.index()?;
        let hits = rank_files(&index, query, &ctx.path_resolver(), max_files);
        if hits.is_empty() {
            return Err(FinderError::Tool(format!("No files matched '{}'", query)));
        }

        let mut sections = Vec::new();
        for hit in &hits {
            let Ok(content) = std::fs::read_to_string(ctx.root.join(&hit.path)) else { continue };
            sections.push(render_slice(&hit.path, &content, None, None, SEARCH_AND_READ_LINES));
        }
        if sections.is_empty() {
            return Err(FinderError::Tool(format!(
                "Matches for '{}' could not be read; the index may be stale",
                query
            )));
        }
        Ok(ToolOutput::text(sections.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::core::index::{sample_entry, sample_index};
    use tempfile::TempDir;

    fn resolver() -> PathResolver {
        PathResolver::new(&["legacy".to_string(), "static".to_string()])
    }

    #[test]
    fn test_legacy_paths_rank_last() {
        let index = sample_index(vec![
            sample_entry("src/legacy/static/login.ts", "service", "login", &[]),
            sample_entry("src/services/login.ts", "service", "login", &[]),
            sample_entry("src/services/orders.ts", "service", "orders", &[]),
        ]);
        let hits = rank_files(&index, "login", &resolver(), 10);
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["src/services/login.ts", "src/legacy/static/login.ts"]);
        assert_eq!(hits[0].score, 2.0);
        assert_eq!(hits[1].score, 0.5);
    }

    #[test]
    fn test_symbol_names_contribute() {
        let mut entry = sample_entry("src/api/client.ts", "api", "global", &[]);
        entry.functions = vec!["fetchInvoices".to_string()];
        let index = sample_index(vec![entry, sample_entry("src/api/other.ts", "api", "global", &[])]);
        let hits = rank_files(&index, "invoices", &resolver(), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/api/client.ts");
        assert!(rank_files(&index, "a ?", &resolver(), 10).is_empty());
    }

    #[tokio::test]
    async fn test_search_tools_against_project() {
        let dir = TempDir::new().unwrap();
        let body = "export async function login() {\n  return fetch('/login')\n}\n";
        write(dir.path(), "src/services/login.ts", body);
        write(dir.path(), "src/legacy/static/login.ts", body);
        let ctx = context(&dir);

        let out = run(&ctx, "search_files", json!({"query": "login"})).await.result;
        let first = out.lines().nth(1).unwrap();
        assert!(first.starts_with("1. src/services/login.ts [service]"), "{}", out);

        let read = run(&ctx, "search_and_read", json!({"query": "login", "maxFiles": 1})).await.result;
        assert!(read.starts_with("File: src/services/login.ts (lines 1-3 of 3)"));
        assert!(!read.contains("legacy"));

        let none = run(&ctx, "search_files", json!({"query": "zzz"})).await.result;
        assert_eq!(none, "No files matched 'zzz'.");
    }
}
