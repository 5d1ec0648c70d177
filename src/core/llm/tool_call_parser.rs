//! Recovers tool calls that a provider wrote into plain content instead of
//! the structured `tool_calls` field, e.g. `functions.read_file({"path": "a.ts"})`
//! or `to=functions.read_file <|message|>{"path": "a.ts"}`.

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::super::tools::ToolCall;

/// Max distance between the function marker and its argument object
const MAX_GAP: usize = 200;

pub struct InlineToolCallParser {
    marker: Regex,
}

impl InlineToolCallParser {
    pub fn new() -> Self {
        Self {
            marker: Regex::new(r"(?:to=)?functions\.([A-Za-z_][A-Za-z0-9_]*)").expect("marker regex"),
        }
    }

    /// Calls to tools in `allowed`, in order of appearance. Markers naming
    /// unknown tools or without a JSON object argument are ignored.
    pub fn parse(&self, content: &str, allowed: &[String]) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        let mut cursor = 0;

        for caps in self.marker.captures_iter(content) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else { continue };
            if whole.start() < cursor || !allowed.iter().any(|a| a == name.as_str()) {
                continue;
            }
            let tail = &content[whole.end()..];
            let Some(offset) = tail.find('{') else { continue };
            if offset > MAX_GAP || tail[..offset].contains("functions.") {
                continue;
            }
            let start = whole.end() + offset;
            let Some(object) = balanced_object(&content[start..]) else { continue };
            let Ok(args @ Value::Object(_)) = serde_json::from_str::<Value>(object) else { continue };

            cursor = start + object.len();
            debug!("Recovered inline call to {}", name.as_str());
            calls.push(ToolCall {
                id: format!("inline_{}", calls.len() + 1),
                name: name.as_str().to_string(),
                arguments: args.to_string(),
            });
        }
        calls
    }
}

impl Default for InlineToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

/// The `{...}` prefix of `text` with braces balanced outside string literals
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["read_file".to_string(), "grep".to_string()]
    }

    #[test]
    fn test_parses_call_syntax() {
        let parser = InlineToolCallParser::new();
        let calls = parser.parse(
            "Let me look.\nfunctions.read_file({\"path\": \"src/{a}.ts\"})\nfunctions.grep({\"pattern\": \"x\\\"}\"})",
            &allowed(),
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, r#"{"path":"src/{a}.ts"}"#);
        assert_eq!(calls[0].id, "inline_1");
        assert_eq!(calls[1].name, "grep");
        assert_eq!(calls[1].id, "inline_2");
    }

    #[test]
    fn test_parses_channel_syntax() {
        let parser = InlineToolCallParser::new();
        let calls = parser.parse(
            "<|channel|>commentary to=functions.grep <|constrain|>json<|message|>{\"pattern\":\"TODO\"}",
            &allowed(),
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "grep");
        assert_eq!(calls[0].arguments, r#"{"pattern":"TODO"}"#);
    }

    #[test]
    fn test_ignores_unknown_and_malformed() {
        let parser = InlineToolCallParser::new();
        assert!(parser.parse("functions.delete_all({\"x\": 1})", &allowed()).is_empty());
        assert!(parser.parse("functions.read_file({\"path\": ", &allowed()).is_empty());
        assert!(parser.parse("just an answer about functions.read_file usage", &allowed()).is_empty());
        assert!(parser.parse("functions.read_file([1, 2])", &allowed()).is_empty());
    }

    #[test]
    fn test_balanced_object() {
        assert_eq!(balanced_object("{\"a\": {\"b\": 1}} tail"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(balanced_object("{\"a\": \"}\"}"), Some("{\"a\": \"}\"}"));
        assert_eq!(balanced_object("{"), None);
    }
}
