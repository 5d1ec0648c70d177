//! LLM integration: the chat transport, the tool-calling agent loop and
//! token accounting.
//!
//! Providers sit behind the [`LlmProvider`] trait so the loop can be driven
//! by any chat-completions endpoint, or by a scripted double in tests.

mod agent;
mod providers;
mod tool_call_parser;
mod tracker;
mod types;

pub use agent::{chat_with_tools, AgentObserver, AgentResult, ChatOptions, MAX_ROUNDS};
pub use providers::{parse_response, LlmProvider, OpenAiProvider};
pub use tool_call_parser::InlineToolCallParser;
pub use tracker::{estimate_tokens, ContextTracker, CHARS_PER_TOKEN};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
