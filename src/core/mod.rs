// Indexing pipeline
mod scanner;
mod classifier;
mod languages;
mod extractor;
mod storage;
mod index;
mod scheduler;

// Relationship graph and prompt context
mod pattern_graph;
mod paths;
mod context_composer;
mod prompt;

// Edit validation
mod validation;
mod mistakes;

// Model-facing tools and the agent loop
mod tools;
mod llm;

mod engine;

pub use scanner::{ScannedFile, Scanner};
pub use classifier::{HeuristicClassifier, PatternClassifier, DEFAULT_PATTERN, GLOBAL_DOMAIN};
pub use extractor::Extractor;
pub use index::{FileIndexEntry, IndexBuilder, IndexCache, IndexUpdate, INDEX_FILE};
pub use scheduler::{watch_project, FileEvent, IndexScheduler};
pub use pattern_graph::{PatternGraphBuilder, PatternGraphData, GRAPH_FILE};
pub use context_composer::ContextComposer;
pub use prompt::{PromptBuilder, INSTRUCTIONS_FILE};
pub use validation::{FileEdit, ValidationReport, ValidationRunner};
pub use mistakes::{KnownMistakes, MISTAKES_FILE};
pub use tools::{DiffPayload, FileDiff, ToolCall, ToolContext, ToolDefinition, ToolRegistry};
pub use llm::{chat_with_tools, AgentObserver, AgentResult, ChatMessage, ChatOptions, LlmProvider, OpenAiProvider};

// Export the main engine
pub use engine::Engine;
