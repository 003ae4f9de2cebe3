//! Local token counting for responses that arrive without a usage block.
//!
//! Streaming responses and some proxies omit provider usage. In that case the
//! dispatcher fills in an estimate using the `cl100k_base` encoding before delivery
//! and marks the [`Usage`] as estimated so the backend can tell it apart from billed
//! counts. Estimation never runs on the instrumented call's own path.

use crate::event::{EventPayload, LogEvent};
use crate::llm::models::{CompletionRequest, CompletionResult, Usage};
use std::sync::LazyLock;
use tiktoken_rs::CoreBPE;

/// Per-message framing overhead used by chat formats (role marker and separators).
const TOKENS_PER_MESSAGE: u64 = 3;

static SHARED: LazyLock<Option<TokenCounter>> =
    LazyLock::new(|| match TokenCounter::new("cl100k_base") {
        Ok(counter) => Some(counter),
        Err(e) => {
            tracing::warn!(error = %e, "Tokenizer unavailable, usage estimation disabled");
            None
        }
    });

/// Counts tokens with a tiktoken encoding.
pub struct TokenCounter {
    tokenizer: CoreBPE,
}

impl TokenCounter {
    /// Creates a counter for the given encoding (`cl100k_base`, `p50k_base`, `r50k_base`).
    pub fn new(encoding: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let tokenizer = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base()?,
            "p50k_base" => tiktoken_rs::p50k_base()?,
            "r50k_base" => tiktoken_rs::r50k_base()?,
            _ => return Err(format!("Unsupported encoding model: {}", encoding).into()),
        };
        Ok(Self { tokenizer })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    /// Estimate usage for a completion from its input messages and output.
    pub fn estimate_usage(&self, messages: &[CompletionRequest], result: &CompletionResult) -> Usage {
        let prompt_tokens: u64 = messages
            .iter()
            .map(|m| self.count_tokens(&m.content) as u64 + TOKENS_PER_MESSAGE)
            .sum();

        let mut completion_tokens =
            result.text.as_deref().map(|t| self.count_tokens(t) as u64).unwrap_or(0);
        for call in &result.tool_calls {
            completion_tokens += self.count_tokens(&call.name) as u64;
            completion_tokens += self.count_tokens(&call.arguments) as u64;
        }

        Usage {
            estimated: true,
            ..Usage::new(prompt_tokens, completion_tokens)
        }
    }
}

/// Fill in `result.usage` from a local estimate when the provider did not report it.
pub fn fill_missing_usage(messages: &[CompletionRequest], result: &mut CompletionResult) {
    if result.usage.is_some() {
        return;
    }
    if let Some(counter) = SHARED.as_ref() {
        let usage = counter.estimate_usage(messages, result);
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Estimated usage for response without usage block"
        );
        result.usage = Some(usage);
    }
}

/// Whether `event` is a generation whose result still lacks usage.
pub fn needs_usage_estimate(event: &LogEvent) -> bool {
    event
        .as_generation()
        .and_then(|g| g.result.as_ref())
        .is_some_and(|result| result.usage.is_none())
}

/// Estimate usage for every generation in `events` that arrived without it.
///
/// CPU bound, and loads the encoding on first use; run it off the async workers.
pub fn estimate_missing_usage(events: &mut [LogEvent]) {
    for event in events {
        if let EventPayload::Generation(generation) = &mut event.payload {
            if let Some(result) = generation.result.as_mut() {
                fill_missing_usage(&generation.messages, result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::RequestedToolCall;

    #[test]
    fn test_count_tokens() {
        let counter = TokenCounter::new("cl100k_base").unwrap();
        let count = counter.count_tokens("What is the capital of France?");

        assert!(count > 5);
        assert!(count < 15);
        assert_eq!(counter.count_tokens(""), 0);
    }

    #[test]
    fn test_unsupported_encoding() {
        assert!(TokenCounter::new("o200k_unknown").is_err());
    }

    #[test]
    fn test_estimate_usage() {
        let counter = TokenCounter::new("cl100k_base").unwrap();
        let messages = vec![CompletionRequest::user("Say hi")];
        let result = CompletionResult::from_text("Ahoy there, matey!");

        let usage = counter.estimate_usage(&messages, &result);
        assert!(usage.estimated);
        assert!(usage.prompt_tokens > TOKENS_PER_MESSAGE);
        assert!(usage.completion_tokens > 0);
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }

    #[test]
    fn test_estimate_counts_tool_calls() {
        let counter = TokenCounter::new("cl100k_base").unwrap();
        let result = CompletionResult {
            tool_calls: vec![RequestedToolCall {
                id: None,
                name: "get_current_weather".to_string(),
                arguments: r#"{"location":"NYC"}"#.to_string(),
            }],
            ..Default::default()
        };

        let usage = counter.estimate_usage(&[], &result);
        assert_eq!(usage.prompt_tokens, 0);
        assert!(usage.completion_tokens > 0);
    }

    #[test]
    fn test_fill_missing_usage_keeps_reported_usage() {
        let mut result = CompletionResult::from_text("hi").with_usage(Usage::new(1, 1));
        fill_missing_usage(&[CompletionRequest::user("hello")], &mut result);
        assert_eq!(result.usage, Some(Usage::new(1, 1)));
    }

    #[test]
    fn test_estimate_missing_usage_only_touches_generations_without_usage() {
        use crate::event::{GenerationPayload, SpanPayload, Timestamps};
        use chrono::Utc;

        let generation = |usage: Option<Usage>| GenerationPayload {
            messages: vec![CompletionRequest::user("Say hi")],
            result: Some(CompletionResult {
                text: Some("Ahoy!".to_string()),
                usage,
                ..Default::default()
            }),
            ..Default::default()
        };
        let event = |id: &str, payload: EventPayload| {
            LogEvent::new(id, None, None, Timestamps { start: Utc::now(), end: Some(Utc::now()) }, payload)
        };
        let mut events = vec![
            event("g1", generation(None).into()),
            event("g2", generation(Some(Usage::new(9, 3))).into()),
            event("s1", SpanPayload::default().into()),
        ];

        assert!(needs_usage_estimate(&events[0]));
        assert!(!needs_usage_estimate(&events[1]));
        assert!(!needs_usage_estimate(&events[2]));

        estimate_missing_usage(&mut events);
        let usage = |e: &LogEvent| e.as_generation().and_then(|g| g.result.as_ref()).and_then(|r| r.usage);
        assert!(usage(&events[0]).is_some_and(|u| u.estimated && u.prompt_tokens > 0));
        assert_eq!(usage(&events[1]), Some(Usage::new(9, 3)));
    }

    #[test]
    fn test_fill_missing_usage_estimates() {
        let mut result = CompletionResult::from_text("hi");
        fill_missing_usage(&[CompletionRequest::user("hello")], &mut result);
        assert!(result.usage.map(|u| u.estimated).unwrap_or(false));
    }
}
