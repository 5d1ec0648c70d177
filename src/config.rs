use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FinderError, Result};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "CODEFINDER_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace layout and scan policy
    pub project: ProjectConfig,

    /// Index maintenance settings
    pub index: IndexConfig,

    /// Prompt context budgets
    pub context: ContextConfig,

    /// LLM endpoint settings
    pub llm: LlmConfig,

    /// Agent loop limits
    pub agent: AgentConfig,

    /// Proposed-edit validation settings
    pub validation: ValidationConfig,

    /// Built-in tool limits
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Workspace root
    pub root: PathBuf,

    /// Hidden directory (relative to root) holding index, graph and logs
    pub state_dir: PathBuf,

    /// File extensions that are scanned, without the dot
    pub extensions: Vec<String>,

    /// Directory names skipped anywhere in the tree
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Quiet period before a pending incremental update fires
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard cap on the composed project context
    pub max_chars: usize,

    /// Share of the budget for the active file itself
    pub active_file_chars: usize,

    /// Budget for each graph neighbour of the active file
    pub neighbor_chars: usize,

    /// Number of neighbours included
    pub max_neighbors: usize,

    /// Number of query matches listed
    pub max_query_matches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat-completions endpoint, e.g. "https://api.openai.com/v1/chat/completions"
    pub base_url: String,

    /// API key (falls back to CODEFINDER_API_KEY)
    pub api_key: Option<String>,

    /// Model name
    pub model: String,

    /// Maximum tokens for LLM responses
    pub max_tokens: u32,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: f32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for retryable transport failures
    pub max_retries: u32,

    /// Base delay for exponential backoff
    pub retry_base_delay_ms: u64,

    /// Token budget of the model's context window
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum LLM rounds per request
    pub max_rounds: usize,

    /// Validation attempts per logical edit proposal
    pub max_edit_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Commands run when a proposal does not name its own
    pub commands: Vec<String>,

    /// Timeout for a single validation command
    pub command_timeout_secs: u64,

    /// Cap on captured output per command
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Results returned by search_files
    pub search_limit: usize,

    /// Matches returned by grep
    pub grep_max_results: usize,

    /// Lines returned by read_file when no range is given
    pub read_max_lines: usize,

    /// Path segments ranked below everything else
    pub deprioritized_segments: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            state_dir: PathBuf::from(".codefinder"),
            extensions: ["ts", "tsx", "js", "jsx", "vue", "go", "py"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: [
                "node_modules",
                "dist",
                "build",
                "out",
                "target",
                "vendor",
                "coverage",
                "__pycache__",
                "venv",
                ".venv",
                ".git",
                ".next",
                ".nuxt",
                "generated",
                ".codefinder",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { debounce_ms: 1500 }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: 12_000,
            active_file_chars: 4_000,
            neighbor_chars: 1_500,
            max_neighbors: 4,
            max_query_matches: 8,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            context_window: 128_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            max_edit_attempts: 5,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            command_timeout_secs: 120,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_limit: 20,
            grep_max_results: 100,
            read_max_lines: 400,
            deprioritized_segments: [
                "legacy", "static", "dist", "build", "out", "vendor", "deprecated", "old",
                "backup", "generated",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl LlmConfig {
    /// The configured key, or the one from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| FinderError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| FinderError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = ["codefinder.toml", "Codefinder.toml", ".codefinder.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Absolute-or-relative path of the state directory for this workspace
    pub fn state_dir(&self) -> PathBuf {
        self.project.root.join(&self.project.state_dir)
    }

    fn check(&self) -> Result<()> {
        if self.agent.max_rounds == 0 {
            return Err(FinderError::Config("agent.max_rounds must be at least 1".to_string()));
        }
        if self.context.max_chars < 64 {
            return Err(FinderError::Config("context.max_chars is too small".to_string()));
        }
        if self.project.extensions.is_empty() {
            return Err(FinderError::Config("project.extensions must not be empty".to_string()));
        }
        Ok(())
    }
}
