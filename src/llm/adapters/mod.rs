//! Provider adapters.
//!
//! An adapter turns one provider family's wire payloads into the canonical
//! [`CompletionRequest`] / [`CompletionResult`] records. Adapters report decode
//! failures as [`TracewireError::Decode`](crate::TracewireError::Decode); callers on the
//! instrumentation path record those on the event and carry on, so a payload the
//! adapter does not understand never breaks the provider call itself.

pub mod azure;
pub mod bedrock;
pub mod openai;

pub use azure::AzureOpenAiAdapter;
pub use bedrock::BedrockAdapter;
pub use openai::OpenAiAdapter;

use crate::error::{Result, TracewireError};
use crate::llm::models::{CompletionRequest, CompletionResult, Provider};
use crate::llm::tool_spec::ToolSpec;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

static AZURE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/openai/deployments/([^/]+)/(?:chat/)?completions").expect("valid regex")
});
// Only the buffered Converse call; `converse-stream` answers in AWS event-stream framing.
static BEDROCK_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/model/([^/]+)/converse$").expect("valid regex"));
static OPENAI_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/chat/completions$").expect("valid regex"));

/// Canonical view of an outgoing completion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRequest {
    pub model: Option<String>,
    pub messages: Vec<CompletionRequest>,
    pub model_parameters: Map<String, Value>,
    pub tools: Vec<ToolSpec>,
    /// Parts of the body that could not be decoded; everything else is kept.
    pub decode_errors: Vec<String>,
}

/// Translator from one provider's wire format to the canonical model
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Model identifier carried in the request path, for providers that route by URL.
    fn model_from_path(&self, _path: &str) -> Option<String> {
        None
    }

    /// Decode as much of the request as possible.
    ///
    /// Fails only when the body is not a JSON object at all.
    fn decode_request(&self, body: &[u8]) -> Result<DecodedRequest>;

    fn decode_response(&self, body: &[u8]) -> Result<CompletionResult>;
}

/// The adapter for a provider family.
pub fn adapter_for(provider: Provider) -> Arc<dyn ProviderAdapter> {
    match provider {
        Provider::OpenAI => Arc::new(OpenAiAdapter),
        Provider::AzureOpenAI => Arc::new(AzureOpenAiAdapter),
        Provider::Bedrock => Arc::new(BedrockAdapter),
    }
}

/// Pick an adapter from the request path, or `None` if the call is not a completion.
pub fn detect(path: &str) -> Option<Arc<dyn ProviderAdapter>> {
    if AZURE_PATH.is_match(path) {
        Some(adapter_for(Provider::AzureOpenAI))
    } else if BEDROCK_PATH.is_match(path) {
        Some(adapter_for(Provider::Bedrock))
    } else if OPENAI_PATH.is_match(path) {
        Some(adapter_for(Provider::OpenAI))
    } else {
        None
    }
}

pub(crate) fn parse_json(provider: Provider, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| TracewireError::decode(provider.as_str(), format!("invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_openai() {
        let adapter = detect("/v1/chat/completions").unwrap();
        assert_eq!(adapter.provider(), Provider::OpenAI);
    }

    #[test]
    fn test_detect_azure() {
        let path = "/openai/deployments/gpt-4o-prod/chat/completions";
        let adapter = detect(path).unwrap();
        assert_eq!(adapter.provider(), Provider::AzureOpenAI);
        assert_eq!(adapter.model_from_path(path), Some("gpt-4o-prod".to_string()));
    }

    #[test]
    fn test_detect_bedrock() {
        let path = "/model/anthropic.claude-3-5-sonnet-20240620-v1%3A0/converse";
        let adapter = detect(path).unwrap();
        assert_eq!(adapter.provider(), Provider::Bedrock);
        assert_eq!(
            adapter.model_from_path(path),
            Some("anthropic.claude-3-5-sonnet-20240620-v1:0".to_string())
        );
    }

    #[test]
    fn test_detect_non_completion() {
        assert!(detect("/v1/models").is_none());
        assert!(detect("/v1/embeddings").is_none());
    }

    #[test]
    fn test_detect_skips_bedrock_stream() {
        assert!(detect("/model/amazon.nova-lite-v1%3A0/converse-stream").is_none());
    }

    #[test]
    fn test_parse_json_reports_provider() {
        let err = parse_json(Provider::Bedrock, b"not json").unwrap_err();
        assert!(err.to_string().contains("bedrock"));
    }
}
