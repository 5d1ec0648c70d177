use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{FinderError, Result};
use super::super::tools::{ToolCall, ToolDefinition};
use super::types::{ChatMessage, ChatResponse, Usage};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const ERROR_BODY_CHARS: usize = 500;

/// A chat-completions endpoint
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One model round. Tools are advertised only when `tools` is non-empty.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ChatResponse>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible provider over plain HTTP
pub struct OpenAiProvider {
    config: LlmConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(FinderError::Config("llm.base_url is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FinderError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            api_key: config.resolved_api_key(),
            client,
        })
    }

    pub fn build_payload(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });
        if !tools.is_empty() {
            payload["tools"] = json!(tools.iter().map(ToolDefinition::to_function_schema).collect::<Vec<_>>());
            payload["tool_choice"] = json!("auto");
        }
        payload
    }

    async fn send_once(&self, payload: &Value) -> Result<ChatResponse> {
        let mut request = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let error_text: String = error_text.chars().take(ERROR_BODY_CHARS).collect();
            return Err(FinderError::transport(Some(status.as_u16()), error_text));
        }

        // a body cut off mid-read is a network failure; a body that reads but does not parse is not
        let body = response.bytes().await.map_err(request_error)?;
        let response_data: Value = serde_json::from_slice(&body)
            .map_err(|e| FinderError::transport(None, format!("Failed to parse LLM response: {}", e)))?;

        parse_response(&response_data)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.retry_base_delay_ms);
        base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let payload = self.build_payload(messages, tools);
        let mut attempt = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FinderError::Cancelled),
                result = self.send_once(&payload) => result,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "LLM request failed ({}), retry {}/{} in {}ms",
                        e,
                        attempt,
                        self.config.max_retries,
                        delay.as_millis()
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FinderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Classify a reqwest failure by its kind and source chain, never by message text
fn request_error(e: reqwest::Error) -> FinderError {
    if e.is_timeout() {
        FinderError::network(format!("request timed out: {}", e), true)
    } else if e.is_connect() || e.is_request() || e.is_body() || is_connection_drop(&e) {
        FinderError::network(e.to_string(), false)
    } else {
        FinderError::transport(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

fn is_connection_drop(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

/// Extract content, tool calls and usage from a chat-completions body
pub fn parse_response(data: &Value) -> Result<ChatResponse> {
    let message = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| FinderError::transport(None, "LLM response has no choices"))?;

    let content = message.get("content").and_then(|c| c.as_str()).map(str::to_string);

    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = match function.get("arguments") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    };
                    let id = call
                        .get("id")
                        .and_then(|id| id.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", i + 1));
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = data.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
    });

    debug!(
        "LLM response: {} chars, {} tool call(s)",
        content.as_deref().map_or(0, str::len),
        message.get("tool_calls").and_then(|t| t.as_array()).map_or(0, Vec::len)
    );

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned (status, body) reply per connection, in order
    async fn serve(replies: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        serve_after_resets(0, replies).await
    }

    /// Reset the first `resets` connections after reading the request, then serve `replies`
    async fn serve_after_resets(resets: usize, replies: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for _ in 0..resets {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                // RST instead of FIN
                socket.set_linger(Some(Duration::ZERO)).unwrap();
                drop(socket);
            }
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (url, hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    return;
                }
            }
        }
    }

    fn provider(url: &str) -> OpenAiProvider {
        let config = LlmConfig {
            base_url: url.to_string(),
            api_key: Some("test-key".to_string()),
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..LlmConfig::default()
        };
        OpenAiProvider::new(&config).unwrap()
    }

    fn ok_body() -> String {
        json!({
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_retries_gateway_errors() {
        let (url, hits) = serve(vec![(503, "{}".into()), (502, "{}".into()), (200, ok_body())]).await;
        let response = provider(&url)
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.usage, Some(Usage { prompt_tokens: 12, completion_tokens: 3 }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_connection_reset() {
        let (url, hits) = serve_after_resets(1, vec![(200, ok_body())]).await;
        let response = provider(&url)
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_network_error() {
        // bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port();
        let config = LlmConfig {
            base_url: format!("http://127.0.0.1:{}/v1/chat/completions", port),
            max_retries: 0,
            ..LlmConfig::default()
        };
        let err = OpenAiProvider::new(&config)
            .unwrap()
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::Network { timed_out: false, .. }), "{:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let (url, hits) = serve(vec![(200, "not json".into()), (200, ok_body())]).await;
        let err = provider(&url)
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::Transport { status: None, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = serve(vec![(400, "{\"error\":\"bad\"}".into()), (200, ok_body())]).await;
        let err = provider(&url)
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::Transport { status: Some(400), .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling() {
        let (url, hits) = serve(vec![(504, "{}".into()), (504, "{}".into()), (504, "{}".into())]).await;
        let err = provider(&url)
            .chat(&[ChatMessage::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.user_message().contains("Increase the proxy timeout"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider("http://127.0.0.1:9/v1/chat/completions")
            .chat(&[ChatMessage::user("hi")], &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::Cancelled));
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let data = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "abc", "type": "function", "function": {"name": "grep", "arguments": "{\"pattern\":\"x\"}"}},
                    {"type": "function", "function": {"name": "list_dir", "arguments": {"path": "src"}}}
                ]
            }}]
        });
        let response = parse_response(&data).unwrap();
        assert_eq!(response.content, None);
        assert_eq!(response.usage, None);
        assert_eq!(response.tool_calls[0].id, "abc");
        assert_eq!(response.tool_calls[1].id, "call_2");
        assert_eq!(response.tool_calls[1].arguments, "{\"path\":\"src\"}");
        assert!(parse_response(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_payload_advertises_tools_only_when_present() {
        let provider = provider("http://localhost/v1/chat/completions");
        let bare = provider.build_payload(&[ChatMessage::user("hi")], &[]);
        assert!(bare.get("tools").is_none());
        assert_eq!(bare["messages"][0]["role"], "user");

        let tool = ToolDefinition {
            name: "think".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        };
        let with_tools = provider.build_payload(&[], &[tool]);
        assert_eq!(with_tools["tools"][0]["function"]["name"], "think");
        assert_eq!(with_tools["tool_choice"], "auto");
    }
}
