//! Adapter for Azure OpenAI deployments.
//!
//! Azure speaks the OpenAI chat JSON but routes by deployment name in the URL
//! (`/openai/deployments/{deployment}/chat/completions`) and usually leaves `model`
//! out of the request body, so the deployment name stands in for the model.

use super::openai::{decode_chat_request, decode_chat_response};
use super::{DecodedRequest, ProviderAdapter, AZURE_PATH};
use crate::error::Result;
use crate::llm::models::{CompletionResult, Provider};

#[derive(Debug, Clone, Copy, Default)]
pub struct AzureOpenAiAdapter;

impl ProviderAdapter for AzureOpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::AzureOpenAI
    }

    fn model_from_path(&self, path: &str) -> Option<String> {
        AZURE_PATH
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|deployment| deployment.as_str().to_string())
    }

    fn decode_request(&self, body: &[u8]) -> Result<DecodedRequest> {
        decode_chat_request(Provider::AzureOpenAI, body)
    }

    fn decode_response(&self, body: &[u8]) -> Result<CompletionResult> {
        decode_chat_response(Provider::AzureOpenAI, body)
    }
}
