use regex::Regex;

use super::classifier::{HeuristicClassifier, PatternClassifier};
use super::index::{EntryMetadata, FileIndexEntry};
use super::languages::{ExtractedSymbols, GoExtractor, PythonExtractor, ScriptExtractor, SymbolExtractor};
use super::scanner::ScannedFile;

/// Turns scanned files into index entries
pub struct Extractor {
    classifier: Box<dyn PatternClassifier>,
    extractors: Vec<Box<dyn SymbolExtractor>>,
    tag_rules: Vec<(Regex, &'static str)>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::with_classifier(Box::new(HeuristicClassifier::new()))
    }

    /// Use a different role/domain classifier; symbol extraction is unchanged
    pub fn with_classifier(classifier: Box<dyn PatternClassifier>) -> Self {
        let rules: &[(&str, &'static str)] = &[
            (r#"from\s+['"]react['"]|require\(\s*['"]react['"]\s*\)"#, "react"),
            (r#"from\s+['"]vue['"]|defineComponent\s*\("#, "vue"),
            (r"\basync\s|\bawait\s|\bgo\s+func\b", "async"),
            (r"\bfetch\s*\(|\baxios\b|\bhttp\.(Get|Post|NewRequest)|\brequests\.(get|post)", "http"),
            (r"\b(useState|useReducer|defineStore|createSlice|reactive|ref)\s*\(", "state"),
            (r"\b(useRouter|useNavigate|createRouter|HandleFunc)\b|vue-router|react-router", "routing"),
            (r"\b(prisma|mongoose|sequelize|typeorm|gorm|sqlalchemy|sql\.DB)\b", "database"),
            (r"\b(describe|it|test)\s*\(\s*['`]|\bt \*testing\.T\b|\bpytest\b", "test"),
        ];

        Self {
            classifier,
            extractors: vec![
                Box::new(ScriptExtractor::new()),
                Box::new(PythonExtractor::new()),
                Box::new(GoExtractor::new()),
            ],
            tag_rules: rules
                .iter()
                .map(|(pattern, tag)| (Regex::new(pattern).expect("tag rule regex"), *tag))
                .collect(),
        }
    }

    pub fn classifier(&self) -> &dyn PatternClassifier {
        self.classifier.as_ref()
    }

    /// Build the index entry for one scanned file. Never fails.
    pub fn extract_entry(&self, file: &ScannedFile) -> FileIndexEntry {
        let rel = file.relative_path.as_str();
        let extension = rel.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()).unwrap_or_default();

        let symbols = self
            .extractors
            .iter()
            .find(|extractor| extractor.file_extensions().contains(&extension.as_str()))
            .map(|extractor| extractor.extract(&file.content))
            .unwrap_or_default();

        let lines = file.content.lines().count();
        let complexity = complexity_score(&symbols, lines);
        let tags = self.collect_tags(&extension, rel, &file.content);

        FileIndexEntry {
            file: file.path.to_string_lossy().replace('\\', "/"),
            relative_path: rel.to_string(),
            pattern: self.classifier.detect_pattern(rel, Some(&file.content)),
            domain: self.classifier.detect_domain(rel),
            imports: symbols.imports,
            exports: symbols.exports,
            functions: symbols.functions,
            classes: symbols.classes,
            interfaces: symbols.interfaces,
            types: symbols.types,
            hooks: symbols.hooks,
            tags,
            content_hash: file.content_hash.clone(),
            metadata: EntryMetadata {
                lines,
                complexity,
                last_modified: file.last_modified,
            },
        }
    }

    fn collect_tags(&self, extension: &str, rel: &str, content: &str) -> Vec<String> {
        let mut tags = Vec::new();
        let language = match extension {
            "ts" | "tsx" => Some("typescript"),
            "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
            "vue" => Some("vue"),
            "go" => Some("go"),
            "py" => Some("python"),
            _ => None,
        };
        if let Some(language) = language {
            tags.push(language.to_string());
        }
        if extension == "tsx" || extension == "jsx" {
            tags.push("jsx".to_string());
        }

        for (re, tag) in &self.tag_rules {
            if re.is_match(content) && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }

        let lower = rel.to_lowercase();
        if (lower.contains("/api/") || lower.starts_with("api/")) && !tags.iter().any(|t| t == "api") {
            tags.push("api".to_string());
        }
        tags
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Informational structure score:
/// 2·functions + 3·classes + 1.5·hooks + interfaces + types + 0.5·exports + 0.5·log2(max(1, lines))
pub fn complexity_score(symbols: &ExtractedSymbols, lines: usize) -> f64 {
    let score = 2.0 * symbols.functions.len() as f64
        + 3.0 * symbols.classes.len() as f64
        + 1.5 * symbols.hooks.len() as f64
        + symbols.interfaces.len() as f64
        + symbols.types.len() as f64
        + 0.5 * symbols.exports.len() as f64
        + 0.5 * (lines.max(1) as f64).log2();
    (score * 100.0).round() / 100.0
}
