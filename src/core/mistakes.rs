use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::info;

use crate::error::Result;

pub const MISTAKES_FILE: &str = "known-mistakes.md";

const HEADER: &str = "# Known mistakes\n\nErrors seen when validating earlier proposals. Avoid repeating them.\n";
const MAX_SUMMARY_CHARS: usize = 200;

/// Persisted log of validation failures, deduplicated by error shape
pub struct KnownMistakes {
    path: PathBuf,
    path_like: Regex,
    file_like: Regex,
    quoted: Regex,
    digits: Regex,
}

impl KnownMistakes {
    pub fn new(root: &Path, state_dir: &Path) -> Self {
        Self {
            path: root.join(state_dir).join(MISTAKES_FILE),
            path_like: Regex::new(r"(?:[A-Za-z]:)?[\w.@~-]*(?:[/\\][\w.@~-]+)+(?:[:(]\d+(?:[:,]\d+)?\)?)?")
                .expect("path regex"),
            file_like: Regex::new(r"\b[\w-]+\.(?:tsx?|jsx?|vue|go|py|mjs|cjs)(?:[:(]\d+(?:[:,]\d+)?\)?)?")
                .expect("file regex"),
            quoted: Regex::new(r#"'[^']*'|"[^"]*"|`[^`]*`"#).expect("quoted regex"),
            digits: Regex::new(r"\d+").expect("digits regex"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The log text, if any mistakes were recorded
    pub fn load(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        content.lines().any(|l| l.starts_with("- ")).then_some(content)
    }

    /// First meaningful error line of command output with file paths scrubbed
    pub fn summarize(&self, output: &str) -> Option<String> {
        let lines: Vec<&str> = output
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('>') && !l.starts_with('$'))
            .collect();
        let line = lines
            .iter()
            .find(|l| {
                let lower = l.to_lowercase();
                lower.contains("error") || lower.contains("failed") || lower.contains("cannot")
            })
            .or_else(|| lines.first())?;

        let scrubbed = self.path_like.replace_all(line, "<path>");
        let scrubbed = self.file_like.replace_all(&scrubbed, "<file>");
        let summary: String = scrubbed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_SUMMARY_CHARS)
            .collect();
        (!summary.is_empty()).then_some(summary)
    }

    /// Dedup key: the summary with literals and numbers erased
    pub fn shape_key(&self, summary: &str) -> String {
        let key = self.quoted.replace_all(summary, "_");
        let key = self.digits.replace_all(&key, "N");
        key.to_lowercase()
    }

    /// Append the failure unless one of the same shape is already logged.
    /// Returns whether a new line was written.
    pub fn record(&self, output: &str) -> Result<bool> {
        let Some(summary) = self.summarize(output) else {
            return Ok(false);
        };
        let key = self.shape_key(&summary);

        let existing = std::fs::read_to_string(&self.path).unwrap_or_default();
        let duplicate = existing
            .lines()
            .filter_map(|l| l.strip_prefix("- "))
            .any(|logged| self.shape_key(logged) == key);
        if duplicate {
            return Ok(false);
        }

        let mut content = if existing.trim().is_empty() {
            HEADER.to_string()
        } else {
            existing
        };
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("- {}\n", summary));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        info!("📝 Recorded known mistake: {}", summary);
        Ok(true)
    }
}
