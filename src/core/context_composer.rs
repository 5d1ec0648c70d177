use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Config, ContextConfig};
use super::classifier::describe_pattern;
use super::index::{IndexCache, INDEX_FILE};
use super::pattern_graph::{PatternGraphBuilder, PatternGraphData};
use super::storage::load_json;
use super::validation::resolve_inside;

/// Appended when text is cut to fit a budget
pub const TRUNCATION_MARKER: &str = "\n…[truncated]";

/// Assembles a bounded project-awareness block for the system prompt
pub struct ContextComposer {
    config: ContextConfig,
    state_dir: PathBuf,
}

impl ContextComposer {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.context.clone(),
            state_dir: config.project.state_dir.clone(),
        }
    }

    /// Compose context for an optional active file and free-text query.
    ///
    /// `None` means no context is available: there is no graph yet or no section
    /// had anything to say. The result never exceeds `max_chars` characters.
    pub fn get_finder_project_context(
        &self,
        root: &Path,
        active_file: Option<&str>,
        query: Option<&str>,
    ) -> Option<String> {
        let graph = PatternGraphBuilder::new(&self.state_dir).load_graph(root)?;
        let index: Option<IndexCache> = load_json(&root.join(&self.state_dir).join(INDEX_FILE));

        let mut sections = Vec::new();
        if let Some(active) = active_file {
            if let Some(section) = self.active_section(root, active, &graph, index.as_ref()) {
                sections.push(section);
            }
        }
        if let (Some(query), Some(index)) = (query, index.as_ref()) {
            if let Some(section) = self.query_section(query, index) {
                sections.push(section);
            }
        }
        if let Some(section) = self.catalogue_section(&graph) {
            sections.push(section);
        }

        if sections.is_empty() {
            debug!("No project context qualified");
            return None;
        }
        Some(truncate_chars(&sections.join("\n\n"), self.config.max_chars))
    }

    fn active_section(
        &self,
        root: &Path,
        active: &str,
        graph: &PatternGraphData,
        index: Option<&IndexCache>,
    ) -> Option<String> {
        let active = super::paths::normalize(active);
        let path = resolve_inside(root, &active).ok()?;
        let content = std::fs::read_to_string(path).ok()?;
        let pattern = index.and_then(|i| i.get(&active)).map(|e| e.pattern.as_str());

        let mut out = String::new();
        out.push_str(&format!("## Active file: {}", active));
        if let Some(pattern) = pattern {
            out.push_str(&format!(" ({})", pattern));
        }
        out.push_str("\n```\n");
        out.push_str(&truncate_chars(&content, self.config.active_file_chars));
        out.push_str("\n```");

        let mut neighbors: Vec<String> = graph
            .relations(&active)
            .map(|r| r.related_files.clone())
            .unwrap_or_default();
        let mut heading = "Related files (imports)";
        if neighbors.is_empty() {
            if let Some(siblings) = pattern.and_then(|p| graph.files_by_pattern.get(p)) {
                neighbors = siblings.iter().filter(|p| **p != active).cloned().collect();
                heading = "Files with the same pattern";
            }
        }

        let mut listed = 0;
        for neighbor in neighbors.iter() {
            if listed == self.config.max_neighbors {
                break;
            }
            let Ok(text) = std::fs::read_to_string(root.join(neighbor)) else { continue };
            if listed == 0 {
                out.push_str(&format!("\n\n## {}", heading));
            }
            let pattern = index
                .and_then(|i| i.get(neighbor))
                .map(|e| format!(" ({})", e.pattern))
                .unwrap_or_default();
            out.push_str(&format!("\n### {}{}\n```\n", neighbor, pattern));
            out.push_str(&truncate_chars(&text, self.config.neighbor_chars));
            out.push_str("\n```");
            listed += 1;
        }

        Some(out)
    }

    fn query_section(&self, query: &str, index: &IndexCache) -> Option<String> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return None;
        }

        let mut scored: Vec<(usize, &str)> = index
            .entries()
            .map(|e| (path_score(&tokens, &e.relative_path), e.relative_path.as_str()))
            .filter(|(score, _)| *score > 0)
            .collect();
        // stable: ties keep index order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        if scored.is_empty() {
            return None;
        }

        let mut out = String::from("## Files matching the request");
        for (_, path) in scored.into_iter().take(self.config.max_query_matches) {
            out.push_str(&format!("\n- {}", path));
            let Some(entry) = index.get(path) else { continue };
            out.push_str(&format!(" [{}]", entry.pattern));
            if !entry.exports.is_empty() {
                out.push_str(&format!(" exports: {}", preview_list(&entry.exports)));
            }
            if !entry.functions.is_empty() {
                out.push_str(&format!(" functions: {}", preview_list(&entry.functions)));
            }
        }
        Some(out)
    }

    fn catalogue_section(&self, graph: &PatternGraphData) -> Option<String> {
        if graph.files_by_pattern.is_empty() {
            return None;
        }
        let mut out = String::from("## Project patterns");
        for (pattern, files) in &graph.files_by_pattern {
            let description = graph
                .examples
                .get(pattern)
                .map(|s| s.as_str())
                .unwrap_or_else(|| describe_pattern(pattern));
            out.push_str(&format!("\n- {} ({} files): {}", pattern, files.len(), description));
            let related = graph.related_patterns(pattern);
            if !related.is_empty() {
                let names: Vec<&str> = related.iter().take(3).map(|(p, _)| *p).collect();
                out.push_str(&format!("; related: {}", names.join(", ")));
            }
        }
        Some(out)
    }
}

/// Lowercased query tokens of two or more characters, split on anything
/// that is not a letter or digit. Order of first appearance is kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if token.chars().count() >= 2 && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Number of tokens appearing in the lowercased path
pub fn path_score(tokens: &[String], path: &str) -> usize {
    let lower = path.to_lowercase();
    tokens.iter().filter(|t| lower.contains(t.as_str())).count()
}

/// Cut `text` to at most `limit` characters, marker included, preferring a line break.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }
    let kept: String = text.chars().take(limit - marker_len).collect();
    let cut = match kept.rfind('\n') {
        Some(pos) if pos >= kept.len() / 2 => &kept[..pos],
        _ => kept.as_str(),
    };
    format!("{}{}", cut, TRUNCATION_MARKER)
}

fn preview_list(items: &[String]) -> String {
    let shown: Vec<&str> = items.iter().take(6).map(|s| s.as_str()).collect();
    if items.len() > shown.len() {
        format!("{}, …", shown.join(", "))
    } else {
        shown.join(", ")
    }
}
