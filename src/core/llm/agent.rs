//! Tool-calling conversation loop.
//!
//! Each round sends the conversation to the model. Requested tools run one at
//! a time in the order given and their results are appended before the next
//! round. A reply without tool calls is the final answer. Proposed edits are
//! collected across rounds and surfaced once when the loop ends.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::FinderError;
use super::super::tools::{extract_thinking, DiffPayload, FileDiff, ToolCall, ToolContext, ToolOutput, ToolRegistry};
use super::providers::LlmProvider;
use super::tool_call_parser::InlineToolCallParser;
use super::tracker::ContextTracker;
use super::types::{ChatMessage, Usage};

pub const MAX_ROUNDS: usize = 20;

/// Callbacks for UI surfaces; every method defaults to a no-op
pub trait AgentObserver: Send + Sync {
    fn on_round(&self, _round: usize) {}

    fn on_tool_start(&self, _call: &ToolCall) {}

    /// Reasoning recorded through the `think` tool
    fn on_thinking(&self, _thought: &str) {}

    /// Consolidated proposals, called at most once per loop
    fn on_diff(&self, _diff: &DiffPayload) {}
}

pub struct ChatOptions {
    /// Workspace the tools act on; without one no tools are offered
    pub root: Option<PathBuf>,
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub cancel: CancellationToken,
    pub observer: Option<Arc<dyn AgentObserver>>,
}

impl ChatOptions {
    pub fn new(config: Arc<Config>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            root: None,
            config,
            registry,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn max_rounds(&self) -> usize {
        match self.config.agent.max_rounds {
            0 => MAX_ROUNDS,
            n => n,
        }
    }
}

/// Outcome of one loop. `content` is `None` on failure and on cancellation;
/// `cancelled` tells the two apart.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub content: Option<String>,
    pub error: Option<String>,
    pub cancelled: bool,
    pub usage: Usage,
    pub tools_used: Vec<String>,
    pub tracker: ContextTracker,
    pub diff: Option<DiffPayload>,
    pub hit_round_limit: bool,
}

struct LoopState<'a> {
    observer: Option<&'a dyn AgentObserver>,
    tracker: ContextTracker,
    tools_used: Vec<String>,
    /// Last proposal per path
    proposals: BTreeMap<String, FileDiff>,
    last_content: Option<String>,
}

impl<'a> LoopState<'a> {
    fn record_tool(&mut self, call: &ToolCall, output: &mut ToolOutput) {
        self.tools_used.push(call.name.clone());
        self.tracker.record_tool_call();

        if call.name == "think" {
            if let (Some(observer), Some(thought)) = (self.observer, extract_thinking(&output.result)) {
                observer.on_thinking(thought);
            }
        }
        if let Some(diff) = output.diff.take() {
            for file in diff.files {
                self.proposals.insert(file.path.clone(), file);
            }
        }
    }

    fn result(self) -> AgentResult {
        AgentResult {
            usage: self.tracker.usage,
            tracker: self.tracker,
            tools_used: self.tools_used,
            ..AgentResult::default()
        }
    }

    fn cancelled(self) -> AgentResult {
        info!("Agent loop cancelled after {} round(s)", self.tracker.rounds);
        AgentResult {
            cancelled: true,
            ..self.result()
        }
    }

    fn failed(self, message: String) -> AgentResult {
        AgentResult {
            error: Some(message),
            ..self.result()
        }
    }

    /// Flush the accumulated proposals exactly once
    fn finish(mut self, content: String, hit_round_limit: bool) -> AgentResult {
        let proposals = std::mem::take(&mut self.proposals);
        let diff = (!proposals.is_empty()).then(|| DiffPayload::from_latest(proposals));
        if let (Some(observer), Some(diff)) = (self.observer, diff.as_ref()) {
            observer.on_diff(diff);
        }
        info!("✅ Agent loop finished: {}", self.tracker.summary());
        AgentResult {
            content: Some(content),
            diff,
            hit_round_limit,
            ..self.result()
        }
    }
}

/// Run the tool-calling loop until a final answer, failure, cancellation or
/// the round limit. Never fails; see [`AgentResult`].
pub async fn chat_with_tools(
    provider: &dyn LlmProvider,
    mut messages: Vec<ChatMessage>,
    options: &ChatOptions,
) -> AgentResult {
    let ctx = options
        .root
        .as_deref()
        .map(|root| ToolContext::new(root, options.config.clone(), options.registry.clone()));
    let parser = InlineToolCallParser::new();
    let max_rounds = options.max_rounds();
    let cancel = &options.cancel;

    let mut state = LoopState {
        observer: options.observer.as_deref(),
        tracker: ContextTracker::new(options.config.llm.context_window),
        tools_used: Vec::new(),
        proposals: BTreeMap::new(),
        last_content: None,
    };

    for round in 1..=max_rounds {
        if cancel.is_cancelled() {
            return state.cancelled();
        }
        info!("🔄 Round {}/{} ({})", round, max_rounds, provider.model_name());
        if let Some(observer) = state.observer {
            observer.on_round(round);
        }

        // re-read each round so composites registered mid-loop are offered
        let tools = match ctx {
            Some(_) => options.registry.get_definitions(),
            None => Vec::new(),
        };

        let response = match provider.chat(&messages, &tools, cancel).await {
            Ok(response) => response,
            Err(FinderError::Cancelled) => return state.cancelled(),
            Err(e) => {
                warn!("❌ LLM call failed in round {}: {}", round, e);
                return state.failed(e.user_message());
            }
        };

        let content = response.trimmed_content().map(str::to_string);
        let reply_chars = response.content.as_deref().map_or(0, str::len)
            + response.tool_calls.iter().map(|c| c.arguments.len()).sum::<usize>();
        state.tracker.record_round(response.usage, &messages, reply_chars);

        let mut calls = response.tool_calls;
        if calls.is_empty() && ctx.is_some() {
            if let Some(text) = content.as_deref() {
                calls = parser.parse(text, &options.registry.names());
            }
        }

        if calls.is_empty() {
            return match content {
                Some(answer) => state.finish(answer, false),
                None => state.failed("The model returned an empty response.".to_string()),
            };
        }

        if content.is_some() {
            state.last_content = content;
        }
        messages.push(ChatMessage::assistant(response.content, calls.clone()));

        for call in &calls {
            if cancel.is_cancelled() {
                return state.cancelled();
            }
            if let Some(observer) = state.observer {
                observer.on_tool_start(call);
            }
            let mut output = match &ctx {
                Some(ctx) => options.registry.execute(call, ctx).await,
                None => ToolOutput::error("No workspace is open; tools are unavailable."),
            };
            state.record_tool(call, &mut output);
            messages.push(ChatMessage::tool(&call.id, output.result));
            if cancel.is_cancelled() {
                return state.cancelled();
            }
        }
    }

    warn!("Reached the {} round limit without a final answer", max_rounds);
    let content = state.last_content.take().unwrap_or_else(|| {
        format!(
            "I stopped after {} rounds without reaching a final answer. Ask me to continue if you want me to keep going.",
            max_rounds
        )
    });
    state.finish(content, true)
}

#[cfg(test)]
mod tests {
    use super::super::types::ChatResponse;
    use super::*;
    use crate::core::tools::ToolDefinition;
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays scripted replies, then repeats `fallback` forever
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ChatResponse>>>,
        fallback: Option<ChatResponse>,
        seen: Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ChatResponse>>, fallback: Option<ChatResponse>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                seen: Mutex::new(Vec::new()),
            }
        }

        /// (message count, tool count) per call
        fn seen(&self) -> Vec<(usize, usize)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolDefinition],
            _cancel: &CancellationToken,
        ) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push((messages.len(), tools.len()));
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => self
                    .fallback
                    .clone()
                    .ok_or_else(|| FinderError::transport(None, "script exhausted")),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct Recorder {
        thoughts: Mutex<Vec<String>>,
        diffs: Mutex<Vec<DiffPayload>>,
        cancel_on_tool: Option<CancellationToken>,
    }

    impl AgentObserver for Recorder {
        fn on_tool_start(&self, _call: &ToolCall) {
            if let Some(token) = &self.cancel_on_tool {
                token.cancel();
            }
        }

        fn on_thinking(&self, thought: &str) {
            self.thoughts.lock().unwrap().push(thought.to_string());
        }

        fn on_diff(&self, diff: &DiffPayload) {
            self.diffs.lock().unwrap().push(diff.clone());
        }
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    fn tool_reply(content: Option<&str>, calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: content.map(str::to_string),
            tool_calls: calls,
            usage: Some(Usage { prompt_tokens: 100, completion_tokens: 10 }),
        }
    }

    fn options(dir: &TempDir) -> ChatOptions {
        ChatOptions::new(Arc::new(Config::default()), Arc::new(ToolRegistry::with_builtin_tools()))
            .with_root(dir.path())
    }

    #[tokio::test]
    async fn test_always_calling_tools_stops_at_round_limit() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let provider = ScriptedProvider::new(
            vec![],
            Some(tool_reply(Some("still looking"), vec![call("t", "think", json!({"reasoning": "again"}))])),
        );

        let result = chat_with_tools(
            &provider,
            vec![ChatMessage::user("loop forever")],
            &options(&dir).with_observer(recorder.clone()),
        )
        .await;

        assert_eq!(provider.seen().len(), MAX_ROUNDS);
        assert!(result.hit_round_limit);
        assert_eq!(result.content.as_deref(), Some("still looking"));
        assert!(result.error.is_none());
        assert_eq!(result.tools_used.len(), MAX_ROUNDS);
        assert_eq!(result.tracker.rounds, MAX_ROUNDS);
        assert_eq!(result.usage.prompt_tokens, 100 * MAX_ROUNDS as u64);
        assert_eq!(recorder.thoughts.lock().unwrap().len(), MAX_ROUNDS);
    }

    #[tokio::test]
    async fn test_tool_round_then_final_answer() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let provider = ScriptedProvider::new(
            vec![
                Ok(tool_reply(None, vec![call("c1", "list_dir", json!({"path": "."}))])),
                Ok(ChatResponse::text("The project has a src folder.")),
            ],
            None,
        );

        let result = chat_with_tools(&provider, vec![ChatMessage::user("what is here?")], &options(&dir)).await;

        assert_eq!(result.content.as_deref(), Some("The project has a src folder."));
        assert_eq!(result.tools_used, vec!["list_dir"]);
        assert!(!result.hit_round_limit);
        assert!(result.diff.is_none());
        // user; then user + assistant call + tool result
        assert_eq!(provider.seen(), vec![(1, 10), (3, 10)]);
        assert!(result.tracker.estimated);
    }

    #[tokio::test]
    async fn test_transport_failure_returns_no_content() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new(
            vec![
                Ok(tool_reply(None, vec![call("c1", "think", json!({"reasoning": "x"}))])),
                Err(FinderError::transport(Some(504), "Gateway Timeout")),
            ],
            None,
        );

        let result = chat_with_tools(&provider, vec![ChatMessage::user("hi")], &options(&dir)).await;
        assert!(result.content.is_none());
        assert!(!result.cancelled);
        assert!(result.error.unwrap().contains("Increase the proxy timeout"));
        assert_eq!(result.tools_used, vec!["think"]);

        let empty = ScriptedProvider::new(vec![Ok(ChatResponse::default())], None);
        let result = chat_with_tools(&empty, vec![ChatMessage::user("hi")], &options(&dir)).await;
        assert!(result.content.is_none());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_checkpoints() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let provider = ScriptedProvider::new(vec![Ok(ChatResponse::text("never"))], None);
        let result = chat_with_tools(
            &provider,
            vec![ChatMessage::user("hi")],
            &options(&dir).with_cancel(token),
        )
        .await;
        assert!(result.cancelled);
        assert!(result.content.is_none());
        assert!(provider.seen().is_empty());

        // cancelled while the first of two tools runs
        let token = CancellationToken::new();
        let recorder = Arc::new(Recorder {
            cancel_on_tool: Some(token.clone()),
            ..Recorder::default()
        });
        let provider = ScriptedProvider::new(
            vec![Ok(tool_reply(
                None,
                vec![
                    call("a", "think", json!({"reasoning": "one"})),
                    call("b", "think", json!({"reasoning": "two"})),
                ],
            ))],
            None,
        );
        let result = chat_with_tools(
            &provider,
            vec![ChatMessage::user("hi")],
            &options(&dir).with_cancel(token).with_observer(recorder),
        )
        .await;
        assert!(result.cancelled);
        assert_eq!(result.tools_used, vec!["think"]);
        assert_eq!(provider.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_diffs_accumulate_and_flush_once() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "v0\n").unwrap();
        let recorder = Arc::new(Recorder::default());
        let edit = |files: serde_json::Value| call("e", "propose_edits", json!({ "edits": files }));
        let provider = ScriptedProvider::new(
            vec![
                Ok(tool_reply(None, vec![edit(json!([{"path": "src/a.ts", "content": "v1\n"}]))])),
                Ok(tool_reply(
                    None,
                    vec![edit(json!([
                        {"path": "src/a.ts", "content": "v2\n"},
                        {"path": "src/b.ts", "content": "b\n"}
                    ]))],
                )),
                Ok(ChatResponse::text("Proposed the change.")),
            ],
            None,
        );

        let result = chat_with_tools(
            &provider,
            vec![ChatMessage::user("change a")],
            &options(&dir).with_observer(recorder.clone()),
        )
        .await;

        assert_eq!(result.content.as_deref(), Some("Proposed the change."));
        let diffs = recorder.diffs.lock().unwrap();
        assert_eq!(diffs.len(), 1);
        let paths: Vec<&str> = diffs[0].files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/b.ts"]);
        assert_eq!(diffs[0].files[0].proposed, "v2\n");
        assert_eq!(diffs[0].files[0].original.as_deref(), Some("v0\n"));
        assert_eq!(result.diff.as_ref(), Some(&diffs[0]));
        assert_eq!(std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap(), "v0\n");
        assert!(!dir.path().join("src/b.ts").exists());
    }

    #[tokio::test]
    async fn test_inline_calls_and_no_workspace() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new(
            vec![
                Ok(ChatResponse::text("functions.think({\"reasoning\": \"check config\"})")),
                Ok(ChatResponse::text("Done.")),
            ],
            None,
        );
        let result = chat_with_tools(&provider, vec![ChatMessage::user("hi")], &options(&dir)).await;
        assert_eq!(result.tools_used, vec!["think"]);
        assert_eq!(result.content.as_deref(), Some("Done."));

        let bare = ScriptedProvider::new(vec![Ok(ChatResponse::text("functions.think({\"reasoning\": \"x\"})"))], None);
        let opts = ChatOptions::new(Arc::new(Config::default()), Arc::new(ToolRegistry::with_builtin_tools()));
        let result = chat_with_tools(&bare, vec![ChatMessage::user("hi")], &opts).await;
        assert_eq!(bare.seen(), vec![(1, 0)]);
        assert!(result.tools_used.is_empty());
        assert!(result.content.unwrap().starts_with("functions.think"));
    }
}
