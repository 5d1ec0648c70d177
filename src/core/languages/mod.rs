//! Language-specific symbol extractors
//!
//! Each language gets its own module behind the `SymbolExtractor` trait. All
//! of them are regex heuristics; a parser-backed extractor can replace any of
//! them without touching callers.

mod go;
mod python;
mod script;

pub use go::GoExtractor;
pub use python::PythonExtractor;
pub use script::ScriptExtractor;

use regex::Regex;

/// Symbols pulled out of one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedSymbols {
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub interfaces: Vec<String>,
    pub types: Vec<String>,
    pub hooks: Vec<String>,
}


/// Trait that all symbol extractors implement
pub trait SymbolExtractor: Send + Sync {
    /// Extract symbols; malformed input yields empty lists, never an error
    fn extract(&self, content: &str) -> ExtractedSymbols;

    /// File extensions handled by this extractor
    fn file_extensions(&self) -> &[&str];

    fn language_name(&self) -> &str;
}

/// Collect capture group 1 of every match, de-duplicated in first-seen order
pub(crate) fn collect_captures(re: &Regex, content: &str, out: &mut Vec<String>) {
    for caps in re.captures_iter(content) {
        if let Some(m) = caps.get(1) {
            push_unique(out, m.as_str().trim());
        }
    }
}

pub(crate) fn push_unique(out: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !out.iter().any(|existing| existing == value) {
        out.push(value.to_string());
    }
}

pub(crate) fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in extractor regex"))
        .collect()
}
