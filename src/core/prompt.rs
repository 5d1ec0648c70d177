use std::path::Path;

use tracing::debug;

use crate::config::Config;
use super::context_composer::{truncate_chars, ContextComposer};
use super::mistakes::KnownMistakes;

/// Free-text user instructions kept in the state directory
pub const INSTRUCTIONS_FILE: &str = "instructions.md";

const MAX_INSTRUCTIONS_CHARS: usize = 4_000;

const BASE_PROMPT: &str = "You are a coding assistant working inside the user's project.
Use the tools to look around before answering: search_files and grep to find code, read_file to read it.
Prefer the project's existing patterns and neighbouring files over inventing new structure.
To change code, call propose_edits with the complete new content of every file you touch. The edits are
validated and shown to the user, who decides whether to apply them. If validation fails, fix the reported
errors and propose again.
Answer concisely once you have what you need.";

/// Builds the system prompt for one request
pub struct PromptBuilder {
    composer: ContextComposer,
    config: Config,
}

impl PromptBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            composer: ContextComposer::new(config),
            config: config.clone(),
        }
    }

    /// Base instructions followed by whichever project sections are available
    pub fn build(&self, root: Option<&Path>, active_file: Option<&str>, query: Option<&str>) -> String {
        let mut prompt = String::from(BASE_PROMPT);
        let Some(root) = root else {
            return prompt;
        };

        if let Some(context) = self.composer.get_finder_project_context(root, active_file, query) {
            prompt.push_str("\n\n# Project context\n\n");
            prompt.push_str(&context);
        }

        let state_dir = &self.config.project.state_dir;
        if let Some(instructions) = load_instructions(&root.join(state_dir).join(INSTRUCTIONS_FILE)) {
            prompt.push_str("\n\n# User instructions\n\n");
            prompt.push_str(&instructions);
        }

        if let Some(mistakes) = KnownMistakes::new(root, state_dir).load() {
            prompt.push_str("\n\n");
            prompt.push_str(mistakes.trim_end());
        }

        debug!("System prompt is {} chars", prompt.len());
        prompt
    }
}

fn load_instructions(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| truncate_chars(text, MAX_INSTRUCTIONS_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::IndexBuilder;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn test_base_prompt_without_workspace() {
        let prompt = PromptBuilder::new(&Config::default()).build(None, None, None);
        assert_eq!(prompt, BASE_PROMPT);
    }

    #[test]
    fn test_sections_are_added_when_present() {
        let temp = assert_fs::TempDir::new().unwrap();
        let builder = PromptBuilder::new(&Config::default());

        let bare = builder.build(Some(temp.path()), None, None);
        assert_eq!(bare, BASE_PROMPT);

        temp.child("src/services/auth.ts")
            .write_str("export async function login() {\n  return fetch('/login')\n}\n")
            .unwrap();
        IndexBuilder::new(&Config::default().project).build_index(temp.path()).unwrap();
        temp.child(".codefinder/instructions.md").write_str("\n  Use tabs.\n").unwrap();
        KnownMistakes::new(temp.path(), Path::new(".codefinder"))
            .record("src/a.ts(1,1): error TS2304: Cannot find name 'foo'.")
            .unwrap();

        let prompt = builder.build(Some(temp.path()), None, Some("auth login"));
        assert!(predicate::str::starts_with(BASE_PROMPT).eval(&prompt));
        assert!(predicate::str::contains("# Project context").eval(&prompt));
        assert!(predicate::str::contains("src/services/auth.ts").eval(&prompt));
        assert!(predicate::str::contains("# User instructions\n\nUse tabs.").eval(&prompt));
        assert!(predicate::str::ends_with("- <path>: error TS2304: Cannot find name 'foo'.").eval(&prompt));

        let context_at = prompt.find("# Project context").unwrap();
        let instructions_at = prompt.find("# User instructions").unwrap();
        let mistakes_at = prompt.find("# Known mistakes").unwrap();
        assert!(context_at < instructions_at && instructions_at < mistakes_at);
    }
}
