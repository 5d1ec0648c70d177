use serde::Serialize;

use super::types::{ChatMessage, Usage};

/// Rough chars-per-token ratio used when the endpoint reports no usage
pub const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Token and activity accounting for one agent loop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextTracker {
    pub context_window: u64,
    pub usage: Usage,
    /// Size of the most recent prompt; the best proxy for window pressure
    pub last_prompt_tokens: u64,
    pub rounds: usize,
    pub tool_calls: usize,
    /// Whether any round fell back to the character estimate
    pub estimated: bool,
}

impl ContextTracker {
    pub fn new(context_window: u32) -> Self {
        Self {
            context_window: context_window as u64,
            ..Self::default()
        }
    }

    /// Account for one model round. Reported usage wins over the estimate.
    pub fn record_round(&mut self, reported: Option<Usage>, prompt: &[ChatMessage], reply_chars: usize) {
        self.rounds += 1;
        let usage = match reported {
            Some(usage) => usage,
            None => {
                self.estimated = true;
                Usage {
                    prompt_tokens: estimate_tokens(prompt.iter().map(ChatMessage::char_len).sum()),
                    completion_tokens: estimate_tokens(reply_chars),
                }
            }
        };
        self.last_prompt_tokens = usage.prompt_tokens;
        self.usage.add(usage);
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Tokens left in the window after the latest prompt
    pub fn remaining(&self) -> u64 {
        self.context_window.saturating_sub(self.last_prompt_tokens)
    }

    pub fn usage_percent(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        (self.last_prompt_tokens as f64 / self.context_window as f64 * 100.0).min(100.0)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} round(s), {} tool call(s), {} prompt + {} completion tokens{}, {:.0}% of context window",
            self.rounds,
            self.tool_calls,
            self.usage.prompt_tokens,
            self.usage.completion_tokens,
            if self.estimated { " (estimated)" } else { "" },
            self.usage_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_usage_and_estimates() {
        let mut tracker = ContextTracker::new(1000);
        tracker.record_round(Some(Usage { prompt_tokens: 400, completion_tokens: 50 }), &[], 0);
        assert_eq!(tracker.remaining(), 600);
        assert!(!tracker.estimated);

        tracker.record_round(None, &[ChatMessage::user("x".repeat(41))], 8);
        assert!(tracker.estimated);
        assert_eq!(tracker.last_prompt_tokens, 11);
        assert_eq!(tracker.usage, Usage { prompt_tokens: 411, completion_tokens: 52 });
        assert_eq!(tracker.rounds, 2);
        tracker.record_tool_call();
        assert!(tracker.summary().starts_with("2 round(s), 1 tool call(s), 411 prompt + 52 completion tokens (estimated)"));
    }

    #[test]
    fn test_zero_window() {
        let tracker = ContextTracker::new(0);
        assert_eq!(tracker.usage_percent(), 0.0);
        assert_eq!(tracker.remaining(), 0);
    }
}
