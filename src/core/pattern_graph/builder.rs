use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use super::super::classifier::{describe_pattern, GLOBAL_DOMAIN};
use super::super::index::{FileIndexEntry, IndexCache};
use super::super::scanner::is_generated_file;
use super::super::storage::{load_json, save_json};
use super::{
    FileRelations, GraphMeta, ImportResolver, PatternGraphData, DOMAIN_PEER_CAP, DOMAIN_WEIGHT,
    FILES_PER_PATTERN_CAP, GRAPH_FILE, GRAPH_VERSION, IMPORT_WEIGHT, MIRROR_FACTOR,
    RELATED_FILES_CAP, WEIGHT_FLOOR,
};

type WeightMap = BTreeMap<String, BTreeMap<String, f64>>;

/// Builds and incrementally patches the persisted pattern graph
pub struct PatternGraphBuilder {
    state_dir: PathBuf,
}

impl PatternGraphBuilder {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
        }
    }

    pub fn graph_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir).join(GRAPH_FILE)
    }

    pub fn load_graph(&self, root: &Path) -> Option<PatternGraphData> {
        let graph: PatternGraphData = load_json(&self.graph_path(root))?;
        (graph.meta.version == GRAPH_VERSION).then_some(graph)
    }

    /// Derive the whole graph from an index. Pure; nothing is written.
    pub fn build_graph_from_index(&self, index: &IndexCache, root: &Path) -> PatternGraphData {
        let nodes = graph_nodes(index);
        let resolver = ImportResolver::new(nodes.iter().map(|e| e.relative_path.as_str()));

        let mut resolved: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for entry in &nodes {
            resolved.insert(entry.relative_path.as_str(), resolve_imports(&resolver, entry));
        }

        let files = resolved
            .iter()
            .map(|(path, targets)| (path.to_string(), file_relations(index, targets)))
            .collect();

        PatternGraphData {
            meta: graph_meta(root),
            patterns: pattern_weights(index, &nodes, &resolved),
            files_by_pattern: files_by_pattern(&nodes),
            examples: pattern_examples(&nodes),
            files,
        }
    }

    pub fn build_and_save_graph(&self, index: &IndexCache, root: &Path) -> Result<PatternGraphData> {
        let graph = self.build_graph_from_index(index, root);
        save_json(&self.graph_path(root), &graph)?;
        info!(
            "🕸️  Pattern graph rebuilt: {} patterns, {} files",
            graph.patterns.len(),
            graph.files.len()
        );
        Ok(graph)
    }

    /// Patch the persisted graph for a set of changed or deleted relative paths.
    ///
    /// File relations are recomputed for the changed files and their direct
    /// importers only. Pattern weights are recomputed only when the set of
    /// pattern tags in the project moved.
    pub fn update_graph_for_files(
        &self,
        root: &Path,
        index: &IndexCache,
        changed: &[String],
    ) -> Result<PatternGraphData> {
        let Some(mut graph) = self.load_graph(root) else {
            debug!("No usable pattern graph on disk, rebuilding");
            return self.build_and_save_graph(index, root);
        };

        let nodes = graph_nodes(index);
        let resolver = ImportResolver::new(nodes.iter().map(|e| e.relative_path.as_str()));
        let changed_set: BTreeSet<&str> = changed.iter().map(|s| s.as_str()).collect();
        let changed_stems: BTreeSet<String> = changed
            .iter()
            .filter_map(|path| ImportResolver::specifier_stem(path))
            .collect();

        let mut affected: BTreeSet<String> = changed.iter().cloned().collect();

        // previous referrers still point at deleted or renamed targets
        for (path, relations) in &graph.files {
            if relations.related_files.iter().any(|f| changed_set.contains(f.as_str())) {
                affected.insert(path.clone());
            }
        }

        // new referrers: cheap stem prefilter, then real resolution
        for entry in &nodes {
            let candidate = entry.imports.iter().any(|spec| {
                ImportResolver::specifier_stem(spec).is_some_and(|stem| changed_stems.contains(&stem))
            });
            if candidate
                && resolve_imports(&resolver, entry)
                    .iter()
                    .any(|target| changed_set.contains(target.as_str()))
            {
                affected.insert(entry.relative_path.clone());
            }
        }

        for path in &affected {
            match index.get(path).filter(|e| !is_generated_file(&e.relative_path)) {
                Some(entry) => {
                    let targets = resolve_imports(&resolver, entry);
                    graph.files.insert(path.clone(), file_relations(index, &targets));
                }
                None => {
                    graph.files.remove(path);
                }
            }
        }

        let previous_patterns: BTreeSet<String> = graph.files_by_pattern.keys().cloned().collect();
        graph.files_by_pattern = files_by_pattern(&nodes);
        graph.examples = pattern_examples(&nodes);
        let current_patterns: BTreeSet<String> = graph.files_by_pattern.keys().cloned().collect();

        if previous_patterns != current_patterns {
            debug!("Pattern tag set changed, recomputing pattern weights");
            let mut resolved: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for entry in &nodes {
                resolved.insert(entry.relative_path.as_str(), resolve_imports(&resolver, entry));
            }
            graph.patterns = pattern_weights(index, &nodes, &resolved);
        }

        graph.meta = graph_meta(root);
        save_json(&self.graph_path(root), &graph)?;
        info!(
            "🕸️  Pattern graph patched: {} changed, {} affected",
            changed.len(),
            affected.len()
        );
        Ok(graph)
    }
}

fn graph_meta(root: &Path) -> GraphMeta {
    GraphMeta {
        project_root: root.to_string_lossy().replace('\\', "/"),
        generated_at: chrono::Utc::now().to_rfc3339(),
        version: GRAPH_VERSION,
    }
}

/// Index entries that participate in the graph, in index order
fn graph_nodes(index: &IndexCache) -> Vec<&FileIndexEntry> {
    index
        .entries()
        .filter(|entry| !is_generated_file(&entry.relative_path))
        .collect()
}

fn resolve_imports(resolver: &ImportResolver, entry: &FileIndexEntry) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for spec in &entry.imports {
        if let Some(target) = resolver.resolve(&entry.relative_path, spec) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn file_relations(index: &IndexCache, targets: &[String]) -> FileRelations {
    let related_files: Vec<String> = targets.iter().take(RELATED_FILES_CAP).cloned().collect();
    let related_patterns: BTreeSet<String> = related_files
        .iter()
        .filter_map(|path| index.get(path).map(|e| e.pattern.clone()))
        .collect();
    FileRelations {
        related_files,
        related_patterns: related_patterns.into_iter().collect(),
    }
}

fn pattern_weights(
    index: &IndexCache,
    nodes: &[&FileIndexEntry],
    resolved: &BTreeMap<&str, Vec<String>>,
) -> WeightMap {
    let mut raw: WeightMap = BTreeMap::new();

    for entry in nodes {
        let Some(targets) = resolved.get(entry.relative_path.as_str()) else { continue };
        for target in targets {
            let Some(other) = index.get(target) else { continue };
            if other.pattern != entry.pattern {
                add_weight(&mut raw, &entry.pattern, &other.pattern, IMPORT_WEIGHT);
            }
        }
    }

    let mut by_domain: HashMap<&str, Vec<&FileIndexEntry>> = HashMap::new();
    for entry in nodes {
        if entry.domain != GLOBAL_DOMAIN {
            by_domain.entry(entry.domain.as_str()).or_default().push(entry);
        }
    }
    for entry in nodes {
        let Some(peers) = by_domain.get(entry.domain.as_str()) else { continue };
        let examined = peers
            .iter()
            .filter(|peer| peer.relative_path != entry.relative_path)
            .take(DOMAIN_PEER_CAP);
        for peer in examined {
            if peer.pattern != entry.pattern {
                add_weight(&mut raw, &entry.pattern, &peer.pattern, DOMAIN_WEIGHT);
            }
        }
    }

    normalize(mirror(&raw))
}

fn add_weight(map: &mut WeightMap, from: &str, to: &str, weight: f64) {
    *map.entry(from.to_string())
        .or_default()
        .entry(to.to_string())
        .or_insert(0.0) += weight;
}

fn mirror(raw: &WeightMap) -> WeightMap {
    let mut symmetric: WeightMap = BTreeMap::new();
    for (from, edges) in raw {
        for (to, weight) in edges {
            add_weight(&mut symmetric, from, to, *weight);
            add_weight(&mut symmetric, to, from, weight * MIRROR_FACTOR);
        }
    }
    symmetric
}

/// Scale each source's edges by its own maximum, round to 2 places, prune the floor
fn normalize(weights: WeightMap) -> WeightMap {
    let mut normalized = BTreeMap::new();
    for (from, edges) in weights {
        let max = edges.values().cloned().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            continue;
        }
        let kept: BTreeMap<String, f64> = edges
            .into_iter()
            .map(|(to, w)| (to, ((w / max) * 100.0).round() / 100.0))
            .filter(|(_, w)| *w > WEIGHT_FLOOR)
            .collect();
        if !kept.is_empty() {
            normalized.insert(from, kept);
        }
    }
    normalized
}

/// Most structured files first, capped per pattern
fn files_by_pattern(nodes: &[&FileIndexEntry]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<&FileIndexEntry>> = BTreeMap::new();
    for entry in nodes {
        grouped.entry(entry.pattern.clone()).or_default().push(entry);
    }
    grouped
        .into_iter()
        .map(|(pattern, mut entries)| {
            entries.sort_by(|a, b| {
                b.metadata
                    .complexity
                    .partial_cmp(&a.metadata.complexity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.relative_path.cmp(&b.relative_path))
            });
            let paths = entries
                .into_iter()
                .take(FILES_PER_PATTERN_CAP)
                .map(|e| e.relative_path.clone())
                .collect();
            (pattern, paths)
        })
        .collect()
}

fn pattern_examples(nodes: &[&FileIndexEntry]) -> BTreeMap<String, String> {
    nodes
        .iter()
        .map(|e| (e.pattern.clone(), describe_pattern(&e.pattern).to_string()))
        .collect()
}
