use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::error::Result;
use super::classifier::DEFAULT_PATTERN;
use super::extractor::Extractor;
use super::pattern_graph::PatternGraphBuilder;
use super::scanner::{self, compute_project_hash, scan_project_hash, Scanner};
use super::storage::{load_json, save_json};

pub const INDEX_VERSION: u32 = 1;
pub const INDEX_FILE: &str = "index.json";

/// One indexed source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIndexEntry {
    /// Path on disk when the entry was built
    pub file: String,
    pub relative_path: String,
    pub pattern: String,
    pub domain: String,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub interfaces: Vec<String>,
    pub types: Vec<String>,
    pub hooks: Vec<String>,
    pub tags: Vec<String>,
    pub content_hash: String,
    pub metadata: EntryMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub lines: usize,
    pub complexity: f64,
    pub last_modified: u64,
}

impl FileIndexEntry {
    pub fn has_symbols(&self) -> bool {
        !(self.imports.is_empty()
            && self.exports.is_empty()
            && self.functions.is_empty()
            && self.classes.is_empty()
            && self.hooks.is_empty())
    }
}

/// Persisted snapshot of the whole project, keyed by relative path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCache {
    pub version: u32,
    pub timestamp: String,
    pub files: BTreeMap<String, FileIndexEntry>,
    pub metadata: IndexMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub project_hash: String,
    pub last_scan: String,
    pub file_count: usize,
}

impl IndexCache {
    fn new(files: BTreeMap<String, FileIndexEntry>, project_hash: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let file_count = files.len();
        Self {
            version: INDEX_VERSION,
            timestamp: now.clone(),
            files,
            metadata: IndexMetadata {
                project_hash,
                last_scan: now,
                file_count,
            },
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileIndexEntry> {
        self.files.get(relative_path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileIndexEntry> {
        self.files.values()
    }

    /// Fingerprint of the index contents themselves
    pub fn entries_hash(&self) -> String {
        compute_project_hash(self.files.values().map(|e| {
            (
                e.relative_path.as_str(),
                e.content_hash.as_str(),
                e.metadata.last_modified,
            )
        }))
    }

    fn touch(&mut self, project_hash: String) {
        let now = chrono::Utc::now().to_rfc3339();
        self.timestamp = now.clone();
        self.metadata.last_scan = now;
        self.metadata.project_hash = project_hash;
        self.metadata.file_count = self.files.len();
    }
}

/// Whether an entry earns a place in the index.
///
/// Unclassified files without any extracted symbols are dropped at every size;
/// short ones (under 15 lines) are the common case.
pub fn is_useful(entry: &FileIndexEntry) -> bool {
    if entry.metadata.lines < 3 {
        return false;
    }
    if entry.pattern == "test" {
        return false;
    }
    if entry.pattern == DEFAULT_PATTERN && !entry.has_symbols() {
        return false;
    }
    true
}

/// Result of an incremental update
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub index: IndexCache,
    /// Relative paths whose entries were inserted, replaced or removed
    pub changed: Vec<String>,
}

/// Orchestrates scanner, extractor and graph builder over the persisted index
pub struct IndexBuilder {
    scanner: Scanner,
    extractor: Extractor,
    graph: PatternGraphBuilder,
    state_dir: PathBuf,
}

impl IndexBuilder {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            scanner: Scanner::new(config),
            extractor: Extractor::new(),
            graph: PatternGraphBuilder::new(&config.state_dir),
            state_dir: config.state_dir.clone(),
        }
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn graph_builder(&self) -> &PatternGraphBuilder {
        &self.graph
    }

    pub fn index_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir).join(INDEX_FILE)
    }

    /// Full rebuild from a fresh scan; persists the index and the graph.
    pub fn build_index(&self, root: &Path) -> Result<IndexCache> {
        info!("🔍 Building index for {}", root.display());
        let scanned = self.scanner.scan(root);

        let mut files = BTreeMap::new();
        for file in &scanned {
            let entry = self.extractor.extract_entry(file);
            if is_useful(&entry) {
                files.insert(entry.relative_path.clone(), entry);
            }
        }

        let index = IndexCache::new(files, scan_project_hash(&scanned));
        save_json(&self.index_path(root), &index)?;
        info!(
            "✅ Indexed {} of {} scanned files",
            index.metadata.file_count,
            scanned.len()
        );

        self.graph.build_and_save_graph(&index, root)?;
        Ok(index)
    }

    /// Load the persisted index, if present and parsable
    pub fn get_index(&self, root: &Path) -> Option<IndexCache> {
        let index: IndexCache = load_json(&self.index_path(root))?;
        if index.version != INDEX_VERSION {
            debug!("Index version {} is stale, ignoring", index.version);
            return None;
        }
        Some(index)
    }

    pub fn get_or_build_index(&self, root: &Path) -> Result<IndexCache> {
        match self.get_index(root) {
            Some(index) => Ok(index),
            None => self.build_index(root),
        }
    }

    /// Re-scan the whole tree and reconcile against the stored index.
    pub fn update_index(&self, root: &Path) -> Result<IndexCache> {
        let Some(mut index) = self.get_index(root) else {
            return self.build_index(root);
        };

        let scanned = self.scanner.scan(root);
        let project_hash = scan_project_hash(&scanned);
        if project_hash == index.metadata.project_hash {
            debug!("Project hash unchanged, index is current");
            return Ok(index);
        }

        let present: HashSet<&str> = scanned.iter().map(|f| f.relative_path.as_str()).collect();
        let before = index.files.len();
        index.files.retain(|path, _| present.contains(path.as_str()));
        let removed = before - index.files.len();

        let mut updated = 0usize;
        for file in &scanned {
            if let Some(existing) = index.files.get(&file.relative_path) {
                if existing.content_hash == file.content_hash {
                    continue;
                }
            }
            let entry = self.extractor.extract_entry(file);
            if is_useful(&entry) {
                index.files.insert(entry.relative_path.clone(), entry);
                updated += 1;
            } else if index.files.remove(&file.relative_path).is_some() {
                updated += 1;
            }
        }

        index.touch(project_hash);
        save_json(&self.index_path(root), &index)?;
        info!("🔄 Index updated: {} changed, {} removed, {} total", updated, removed, index.files.len());

        self.graph.build_and_save_graph(&index, root)?;
        Ok(index)
    }

    /// Targeted update for a known set of changed and deleted paths.
    ///
    /// Content hashes gate re-extraction; if nothing actually changed the stored
    /// index is returned untouched and nothing is written.
    pub fn update_index_for_files(
        &self,
        root: &Path,
        changed: &[PathBuf],
        deleted: &[PathBuf],
    ) -> Result<IndexUpdate> {
        let Some(mut index) = self.get_index(root) else {
            let index = self.build_index(root)?;
            let changed = index.files.keys().cloned().collect();
            return Ok(IndexUpdate { index, changed });
        };

        let mut changed_paths: BTreeSet<String> = BTreeSet::new();

        for path in deleted {
            let Some(rel) = scanner::relative_path(root, path) else { continue };
            if index.files.remove(&rel).is_some() {
                changed_paths.insert(rel);
            }
        }

        for path in changed {
            let abs = if path.is_absolute() { path.clone() } else { root.join(path) };
            if !self.scanner.is_indexed_file(root, &abs) {
                continue;
            }
            let Some(rel) = scanner::relative_path(root, &abs) else { continue };

            let Some(file) = self.scanner.scan_file(root, &abs) else {
                // gone or unreadable since the event fired
                if index.files.remove(&rel).is_some() {
                    changed_paths.insert(rel);
                }
                continue;
            };

            if let Some(existing) = index.files.get(&rel) {
                if existing.content_hash == file.content_hash {
                    debug!("Skipping {}: content unchanged", rel);
                    continue;
                }
            }

            let entry = self.extractor.extract_entry(&file);
            if is_useful(&entry) {
                index.files.insert(rel.clone(), entry);
                changed_paths.insert(rel);
            } else if index.files.remove(&rel).is_some() {
                changed_paths.insert(rel);
            }
        }

        if changed_paths.is_empty() {
            debug!("Incremental update found no effective changes");
            return Ok(IndexUpdate { index, changed: Vec::new() });
        }

        let project_hash = index.entries_hash();
        index.touch(project_hash);
        save_json(&self.index_path(root), &index)?;

        let changed: Vec<String> = changed_paths.into_iter().collect();
        info!("🔄 Incremental index update: {} path(s) changed", changed.len());
        self.graph.update_graph_for_files(root, &index, &changed)?;

        Ok(IndexUpdate { index, changed })
    }
}

/// Hand-built entry for tests that do not need a scan
#[cfg(test)]
pub(crate) fn sample_entry(rel: &str, pattern: &str, domain: &str, imports: &[&str]) -> FileIndexEntry {
    FileIndexEntry {
        file: rel.to_string(),
        relative_path: rel.to_string(),
        pattern: pattern.to_string(),
        domain: domain.to_string(),
        imports: imports.iter().map(|s| s.to_string()).collect(),
        exports: Vec::new(),
        functions: Vec::new(),
        classes: Vec::new(),
        interfaces: Vec::new(),
        types: Vec::new(),
        hooks: Vec::new(),
        tags: Vec::new(),
        content_hash: super::scanner::calculate_hash(rel),
        metadata: EntryMetadata {
            lines: 10,
            complexity: 1.0,
            last_modified: 0,
        },
    }
}

#[cfg(test)]
pub(crate) fn sample_index(entries: Vec<FileIndexEntry>) -> IndexCache {
    let files: BTreeMap<String, FileIndexEntry> = entries
        .into_iter()
        .map(|e| (e.relative_path.clone(), e))
        .collect();
    let mut index = IndexCache::new(files, String::new());
    index.metadata.project_hash = index.entries_hash();
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn builder() -> IndexBuilder {
        IndexBuilder::new(&ProjectConfig::default())
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("// line {}\n", i)).collect()
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "src/services/login.ts",
            "import { http } from '../utils/http'\nexport async function login() {\n  return http('/login')\n}\n",
        );
        write(
            dir.path(),
            "src/utils/http.ts",
            "export function http(url: string) {\n  return fetch(url)\n}\n",
        );
        dir
    }

    #[test]
    fn test_usefulness_filter() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/tiny.ts", "export const a = 1;\nexport const b = 2;\n");
        write(dir.path(), "src/short.ts", &lines(10));
        write(dir.path(), "src/plain.ts", &lines(20));
        let mut with_export = lines(19);
        with_export.push_str("export const value = 1;\n");
        write(dir.path(), "src/exported.ts", &with_export);
        write(dir.path(), "src/login.test.ts", &format!("describe('x', () => {{}})\n{}", lines(10)));

        let index = builder().build_index(dir.path()).unwrap();
        assert!(index.get("src/tiny.ts").is_none());
        assert!(index.get("src/short.ts").is_none());
        assert!(index.get("src/plain.ts").is_none());
        assert!(index.get("src/exported.ts").is_some());
        assert!(index.get("src/login.test.ts").is_none());
    }

    #[test]
    fn test_build_persists_index_and_graph() {
        let dir = project();
        let b = builder();
        let index = b.build_index(dir.path()).unwrap();
        assert_eq!(index.metadata.file_count, 2);
        assert!(b.index_path(dir.path()).exists());
        assert!(dir.path().join(".codefinder/pattern-graph.json").exists());

        let loaded = b.get_index(dir.path()).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_incremental_noop_is_idempotent() {
        let dir = project();
        let b = builder();
        b.build_index(dir.path()).unwrap();
        let changed = vec![dir.path().join("src/services/login.ts")];

        let first = b.update_index_for_files(dir.path(), &changed, &[]).unwrap();
        assert!(first.changed.is_empty());
        let index_bytes = std::fs::read(b.index_path(dir.path())).unwrap();
        let graph_bytes = std::fs::read(dir.path().join(".codefinder/pattern-graph.json")).unwrap();

        let second = b.update_index_for_files(dir.path(), &changed, &[]).unwrap();
        assert!(second.changed.is_empty());
        assert_eq!(std::fs::read(b.index_path(dir.path())).unwrap(), index_bytes);
        assert_eq!(
            std::fs::read(dir.path().join(".codefinder/pattern-graph.json")).unwrap(),
            graph_bytes
        );
    }

    #[test]
    fn test_mtime_only_change_keeps_entry() {
        let dir = project();
        let b = builder();
        let index = b.build_index(dir.path()).unwrap();
        let before = index.get("src/utils/http.ts").unwrap().clone();

        // rewrite identical bytes: mtime moves, content hash does not
        std::thread::sleep(std::time::Duration::from_millis(20));
        let path = write(
            dir.path(),
            "src/utils/http.ts",
            "export function http(url: string) {\n  return fetch(url)\n}\n",
        );

        let update = b.update_index_for_files(dir.path(), &[path], &[]).unwrap();
        assert!(update.changed.is_empty());
        assert_eq!(update.index.get("src/utils/http.ts").unwrap(), &before);

        let full = b.update_index(dir.path()).unwrap();
        assert_eq!(full.get("src/utils/http.ts").unwrap(), &before);
    }

    #[test]
    fn test_incremental_change_and_delete() {
        let dir = project();
        let b = builder();
        b.build_index(dir.path()).unwrap();

        let login = write(
            dir.path(),
            "src/services/login.ts",
            "import { http } from '../utils/http'\nexport async function login() {\n  return http('/login')\n}\nexport function logout() {}\n",
        );
        let http = dir.path().join("src/utils/http.ts");
        std::fs::remove_file(&http).unwrap();

        let update = b.update_index_for_files(dir.path(), &[login], &[http]).unwrap();
        assert_eq!(update.changed, vec!["src/services/login.ts", "src/utils/http.ts"]);
        assert!(update.index.get("src/utils/http.ts").is_none());
        let entry = update.index.get("src/services/login.ts").unwrap();
        assert!(entry.functions.contains(&"logout".to_string()));
        assert_eq!(update.index.metadata.project_hash, update.index.entries_hash());
    }

    #[test]
    fn test_full_update_short_circuits_and_reconciles() {
        let dir = project();
        let b = builder();
        let built = b.build_index(dir.path()).unwrap();

        let same = b.update_index(dir.path()).unwrap();
        assert_eq!(same, built);

        std::fs::remove_file(dir.path().join("src/utils/http.ts")).unwrap();
        write(
            dir.path(),
            "src/services/orders.ts",
            "export function listOrders() {\n  return []\n}\n",
        );
        let updated = b.update_index(dir.path()).unwrap();
        assert!(updated.get("src/utils/http.ts").is_none());
        assert!(updated.get("src/services/orders.ts").is_some());
        assert_eq!(updated.metadata.file_count, 2);
    }

    #[test]
    fn test_corrupt_index_triggers_rebuild() {
        let dir = project();
        let b = builder();
        std::fs::create_dir_all(dir.path().join(".codefinder")).unwrap();
        std::fs::write(b.index_path(dir.path()), "not json").unwrap();
        assert!(b.get_index(dir.path()).is_none());
        let index = b.get_or_build_index(dir.path()).unwrap();
        assert_eq!(index.files.len(), 2);
    }
}
