use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ProjectConfig;

/// A source file read during one scan pass
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Absolute (or root-joined) path on disk
    pub path: PathBuf,

    /// Forward-slash path relative to the workspace root
    pub relative_path: String,

    /// Full text content
    pub content: String,

    /// Content hash for change detection
    pub content_hash: String,

    /// Modification time, milliseconds since the epoch
    pub last_modified: u64,
}

/// Walks a workspace and applies the extension / exclusion policy
#[derive(Debug, Clone)]
pub struct Scanner {
    extensions: HashSet<String>,
    exclude_dirs: HashSet<String>,
}

impl Scanner {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
        }
    }

    /// Enumerate every candidate source file under `root`, sorted by relative path.
    pub fn scan(&self, root: &Path) -> Vec<ScannedFile> {
        let excluded = self.exclude_dirs.clone();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !excluded.contains(name.as_ref())
            })
            .build();

        let mut files = Vec::new();
        for entry in walker.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if !self.is_indexed_file(root, path) {
                continue;
            }
            if let Some(scanned) = self.scan_file(root, path) {
                files.push(scanned);
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!("Scanned {} candidate files under {}", files.len(), root.display());
        files
    }

    /// Read one file; unreadable or non-UTF-8 files yield `None`.
    pub fn scan_file(&self, root: &Path, path: &Path) -> Option<ScannedFile> {
        let relative_path = relative_path(root, path)?;
        let content = std::fs::read_to_string(path).ok()?;
        let last_modified = modified_millis(path);

        Some(ScannedFile {
            path: path.to_path_buf(),
            relative_path,
            content_hash: calculate_hash(&content),
            content,
            last_modified,
        })
    }

    /// The same extension and exclusion policy as `scan`, for a single path.
    pub fn is_indexed_file(&self, root: &Path, path: &Path) -> bool {
        let Some(rel) = relative_path(root, path) else {
            return false;
        };
        self.is_indexed_relative(&rel)
    }

    pub fn is_indexed_relative(&self, rel: &str) -> bool {
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        let Some((file_name, dirs)) = segments.split_last() else {
            return false;
        };

        for dir in dirs {
            if dir.starts_with('.') || self.exclude_dirs.contains(*dir) {
                return false;
            }
        }

        if is_generated_file(rel) {
            return false;
        }

        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                if !self.extensions.contains(&ext) {
                    return false;
                }
                // declaration bundles and minified output are build artifacts
                !(file_name.ends_with(".d.ts") || file_name.ends_with(".min.js"))
            }
            _ => false,
        }
    }
}

/// Generated protobuf / gRPC code is excluded from the index and graph.
pub fn is_generated_file(rel: &str) -> bool {
    if rel.split('/').any(|segment| segment == "pb") {
        return true;
    }
    let file_name = rel.rsplit('/').next().unwrap_or(rel);
    file_name.ends_with(".pb.go")
        || file_name.ends_with(".pb.ts")
        || file_name.ends_with(".pb.js")
        || file_name.ends_with("_pb.js")
        || file_name.ends_with("_pb.ts")
        || file_name.ends_with("_pb.d.ts")
        || file_name.ends_with("_pb2.py")
        || file_name.ends_with("_pb2_grpc.py")
}

/// Forward-slash path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() || path.starts_with(root) {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let normalized = rel
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches("./")
        .to_string();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn modified_millis(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Change fingerprint over (path, content hash, mtime) triples, order-independent.
pub fn compute_project_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str, u64)>,
{
    let mut entries: Vec<(&str, &str, u64)> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (path, hash, mtime) in entries {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
        hasher.update(b":");
        hasher.update(mtime.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Project hash of a scan result
pub fn scan_project_hash(files: &[ScannedFile]) -> String {
    compute_project_hash(
        files
            .iter()
            .map(|f| (f.relative_path.as_str(), f.content_hash.as_str(), f.last_modified)),
    )
}
