//! Relationship graph derived from the index.
//!
//! Two layers: a weighted, mirrored and per-source normalized graph over pattern
//! tags, and per-file neighbour lists built from resolved imports.

mod builder;
mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use builder::PatternGraphBuilder;
pub use resolver::ImportResolver;

pub const GRAPH_FILE: &str = "pattern-graph.json";
pub const GRAPH_VERSION: u32 = 1;

/// Weight added per import between files of different patterns
pub const IMPORT_WEIGHT: f64 = 1.0;
/// Weight added per same-domain pair of different patterns
pub const DOMAIN_WEIGHT: f64 = 0.3;
/// Same-domain peers examined per file
pub const DOMAIN_PEER_CAP: usize = 10;
/// Strength of the reverse edge relative to the forward one
pub const MIRROR_FACTOR: f64 = 0.8;
/// Normalized weights at or below this are pruned
pub const WEIGHT_FLOOR: f64 = 0.05;
pub const RELATED_FILES_CAP: usize = 15;
pub const FILES_PER_PATTERN_CAP: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternGraphData {
    pub meta: GraphMeta,
    /// pattern -> related pattern -> weight in (0.05, 1.0]
    pub patterns: BTreeMap<String, BTreeMap<String, f64>>,
    pub files_by_pattern: BTreeMap<String, Vec<String>>,
    /// pattern -> one-line description
    pub examples: BTreeMap<String, String>,
    pub files: BTreeMap<String, FileRelations>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMeta {
    pub project_root: String,
    pub generated_at: String,
    pub version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRelations {
    pub related_files: Vec<String>,
    pub related_patterns: Vec<String>,
}

impl PatternGraphData {
    pub fn relations(&self, relative_path: &str) -> Option<&FileRelations> {
        self.files.get(relative_path)
    }

    /// Patterns most strongly related to `pattern`, strongest first
    pub fn related_patterns(&self, pattern: &str) -> Vec<(&str, f64)> {
        let mut related: Vec<(&str, f64)> = self
            .patterns
            .get(pattern)
            .map(|edges| edges.iter().map(|(p, w)| (p.as_str(), *w)).collect())
            .unwrap_or_default();
        related.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
        related
    }
}
