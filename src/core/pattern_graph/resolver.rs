use std::collections::{HashMap, HashSet};

/// Extensions tried after a relative specifier, in order
const PROBE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".vue",
    ".py",
    ".go",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
    "/index.vue",
    "/__init__.py",
];

/// Resolves import specifiers to indexed relative paths
pub struct ImportResolver {
    known: HashSet<String>,
    by_stem: HashMap<String, Vec<String>>,
}

impl ImportResolver {
    /// Build from the set of indexed relative paths; the first path seen per stem wins ties
    pub fn new<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut known = HashSet::new();
        let mut by_stem: HashMap<String, Vec<String>> = HashMap::new();
        for path in paths {
            known.insert(path.to_string());
            if let Some(stem) = path_stem(path) {
                by_stem.entry(stem).or_default().push(path.to_string());
            }
        }
        Self { known, by_stem }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    /// Resolve one specifier written in `from`. Unresolvable imports yield `None`.
    pub fn resolve(&self, from: &str, specifier: &str) -> Option<String> {
        let specifier = specifier.trim();
        if specifier.is_empty() {
            return None;
        }

        let resolved = if is_path_relative(specifier) {
            let base = join_relative(parent_dir(from), specifier)?;
            self.first_existing(&base)
        } else if specifier.starts_with('.') && from.ends_with(".py") {
            let base = python_relative(from, specifier)?;
            self.first_existing(&base)
        } else {
            self.resolve_bare(from, specifier)
        };

        resolved.filter(|target| target != from)
    }

    /// Lowercased stems that `specifier` could refer to, used to pre-filter importers
    pub fn specifier_stem(specifier: &str) -> Option<String> {
        let cleaned = specifier.trim_end_matches('/');
        let last = if cleaned.contains('/') {
            cleaned.rsplit('/').next()
        } else if cleaned.trim_start_matches('.').contains('.') {
            cleaned.rsplit('.').next()
        } else {
            Some(cleaned.trim_start_matches('.'))
        }?;
        let stem = last.split('.').next().unwrap_or(last).to_lowercase();
        if stem.is_empty() || stem == "index" || stem == "__init__" {
            // `./widgets/index` and `./widgets` both name the directory
            let mut segments = cleaned.rsplit('/');
            segments.next();
            return segments
                .next()
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .map(|s| s.to_lowercase());
        }
        Some(stem)
    }

    fn first_existing(&self, base: &str) -> Option<String> {
        PROBE_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{}", base, suffix))
            .find(|candidate| self.known.contains(candidate))
    }

    fn resolve_bare(&self, from: &str, specifier: &str) -> Option<String> {
        // `@/` and `~/` aliases conventionally point at src/
        for alias in ["@/", "~/"] {
            if let Some(rest) = specifier.strip_prefix(alias) {
                if let Some(hit) = self.first_existing(&format!("src/{}", rest)) {
                    return Some(hit);
                }
            }
        }

        let stem = Self::specifier_stem(specifier)?;
        self.by_stem
            .get(&stem)?
            .iter()
            .find(|candidate| candidate.as_str() != from)
            .cloned()
    }
}

fn is_path_relative(specifier: &str) -> bool {
    specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Apply `.` and `..` navigation; escaping the root fails
fn join_relative(dir: &str, specifier: &str) -> Option<String> {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// `from .models import X` / `from ..core.db import Y`
fn python_relative(from: &str, specifier: &str) -> Option<String> {
    let dots = specifier.chars().take_while(|c| *c == '.').count();
    let rest = &specifier[dots..];
    let mut segments: Vec<&str> = parent_dir(from).split('/').filter(|s| !s.is_empty()).collect();
    for _ in 1..dots {
        segments.pop()?;
    }
    let mut base = segments.join("/");
    if !rest.is_empty() {
        if !base.is_empty() {
            base.push('/');
        }
        base.push_str(&rest.replace('.', "/"));
    }
    if base.is_empty() {
        return None;
    }
    Some(base)
}

/// Lowercased file stem, or the directory name for index-style files
fn path_stem(path: &str) -> Option<String> {
    let mut segments = path.rsplit('/');
    let file = segments.next()?;
    let stem = file.split('.').next().unwrap_or(file).to_lowercase();
    if stem == "index" || stem == "__init__" {
        return segments.next().map(|dir| dir.to_lowercase());
    }
    Some(stem)
}
