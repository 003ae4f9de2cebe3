//! Adapter for the AWS Bedrock Converse API.
//!
//! Converse carries the model id in the URL (`/model/{modelId}/converse`), keeps system
//! prompts outside the message list, and represents message content as typed blocks
//! (`text`, `image`, `document`, `toolUse`, `toolResult`, ...).

use super::{parse_json, DecodedRequest, ProviderAdapter, BEDROCK_PATH};
use crate::error::{Result, TracewireError};
use crate::llm::models::{
    CompletionRequest, CompletionResult, MessageRole, Provider, RequestedToolCall, Usage,
};
use crate::llm::tool_spec::ToolSpec;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockAdapter;

impl ProviderAdapter for BedrockAdapter {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    fn model_from_path(&self, path: &str) -> Option<String> {
        let raw = BEDROCK_PATH.captures(path)?.get(1)?.as_str();
        match urlencoding::decode(raw) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => Some(raw.to_string()),
        }
    }

    fn decode_request(&self, body: &[u8]) -> Result<DecodedRequest> {
        let value = parse_json(Provider::Bedrock, body)?;
        if !value.is_object() {
            return Err(TracewireError::decode("bedrock", "request body is not an object"));
        }

        let mut messages = Vec::new();
        if let Some(system) = value["system"].as_array() {
            messages.extend(
                system
                    .iter()
                    .filter_map(|block| block["text"].as_str())
                    .map(CompletionRequest::system),
            );
        }

        let mut decode_errors = Vec::new();
        match value["messages"].as_array() {
            Some(conversation) => {
                for (index, message) in conversation.iter().enumerate() {
                    match decode_message(index, message) {
                        Ok(decoded) => messages.extend(decoded),
                        Err(e) => decode_errors.push(e.to_string()),
                    }
                }
            }
            None => decode_errors
                .push(TracewireError::decode("bedrock", "request has no messages").to_string()),
        }

        let tools = value["toolConfig"]["tools"]
            .as_array()
            .map(|tools| tools.iter().filter_map(ToolSpec::from_bedrock).collect())
            .unwrap_or_default();

        let mut model_parameters = Map::new();
        for key in ["inferenceConfig", "additionalModelRequestFields"] {
            if let Some(fields) = value[key].as_object() {
                model_parameters.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        debug!(
            messages = messages.len(),
            errors = decode_errors.len(),
            "Decoded Bedrock converse request"
        );

        Ok(DecodedRequest {
            model: value["modelId"].as_str().map(String::from),
            messages,
            model_parameters,
            tools,
            decode_errors,
        })
    }

    fn decode_response(&self, body: &[u8]) -> Result<CompletionResult> {
        let value = parse_json(Provider::Bedrock, body)?;
        let message = &value["output"]["message"];
        let blocks = message["content"]
            .as_array()
            .ok_or_else(|| TracewireError::decode("bedrock", "response has no output message"))?;

        let texts: Vec<&str> = blocks.iter().filter_map(|b| b["text"].as_str()).collect();
        let tool_calls = blocks.iter().filter_map(|b| tool_use(&b["toolUse"])).collect();

        let usage = value["usage"]["inputTokens"].as_u64().map(|input| {
            let output = value["usage"]["outputTokens"].as_u64().unwrap_or(0);
            Usage {
                total_tokens: value["usage"]["totalTokens"].as_u64().unwrap_or(input + output),
                ..Usage::new(input, output)
            }
        });

        Ok(CompletionResult {
            id: value["ResponseMetadata"]["RequestId"].as_str().map(String::from),
            model: None,
            text: (!texts.is_empty()).then(|| texts.join("\n")),
            tool_calls,
            finish_reason: value["stopReason"].as_str().map(String::from),
            usage,
            raw: value,
        })
    }
}

/// Decode one Converse message.
///
/// Each `toolResult` block becomes its own Tool message so parallel tool results keep
/// their ids. The rest of the turn is kept as one message in the original role.
fn decode_message(index: usize, message: &Value) -> Result<Vec<CompletionRequest>> {
    let role_name = message["role"]
        .as_str()
        .ok_or_else(|| TracewireError::decode("bedrock", format!("message {} has no role", index)))?;
    let role = MessageRole::parse(role_name).ok_or_else(|| {
        TracewireError::decode("bedrock", format!("message {} has unknown role '{}'", index, role_name))
    })?;

    let blocks = message["content"].as_array().map(Vec::as_slice).unwrap_or_default();
    let mut decoded = Vec::new();
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        if let Some(text) = block["text"].as_str() {
            parts.push(text.to_string());
        } else if let Some(call) = tool_use(&block["toolUse"]) {
            tool_calls.push(call);
        } else if block["toolResult"].is_object() {
            let result = &block["toolResult"];
            decoded.push(CompletionRequest {
                role: MessageRole::Tool,
                content: tool_result_text(result).join("\n"),
                tool_call_id: result["toolUseId"].as_str().map(String::from),
                tool_calls: Vec::new(),
            });
        } else if let Some(format) = block["image"]["format"].as_str() {
            parts.push(format!("[image: {}]", format));
        } else if let Some(name) = block["document"]["name"].as_str() {
            parts.push(format!("[document: {}]", name));
        }
    }

    if decoded.is_empty() || !parts.is_empty() || !tool_calls.is_empty() {
        decoded.push(CompletionRequest {
            role,
            content: parts.join("\n"),
            tool_call_id: None,
            tool_calls,
        });
    }
    Ok(decoded)
}

fn tool_use(block: &Value) -> Option<RequestedToolCall> {
    let name = block["name"].as_str()?;
    Some(RequestedToolCall {
        id: block["toolUseId"].as_str().map(String::from),
        name: name.to_string(),
        arguments: block["input"].to_string(),
    })
}

fn tool_result_text(result: &Value) -> Vec<String> {
    result["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    b["text"].as_str().map(String::from).or_else(|| {
                        b.get("json").map(|json| json.to_string())
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn converse_request() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "system": [{"text": "You are a helpful assistant"}],
            "messages": [
                {"role": "user", "content": [{"text": "What's the current weather in New York?"}]},
                {"role": "assistant", "content": [
                    {"toolUse": {"toolUseId": "tu-1", "name": "get_current_weather", "input": {"location": "NYC"}}}
                ]},
                {"role": "user", "content": [
                    {"toolResult": {"toolUseId": "tu-1", "content": [{"json": {"temp": 72}}]}}
                ]}
            ],
            "inferenceConfig": {"temperature": 0.2, "maxTokens": 512},
            "toolConfig": {"tools": [{
                "toolSpec": {
                    "name": "get_current_weather",
                    "description": "Get current weather data for location",
                    "inputSchema": {"json": {"type": "object", "properties": {"location": {"type": "string"}}}}
                }
            }]}
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_request_blocks() {
        let decoded = BedrockAdapter.decode_request(&converse_request()).unwrap();

        assert_eq!(decoded.messages.len(), 4);
        assert_eq!(decoded.messages[0].role, MessageRole::System);
        assert_eq!(decoded.messages[0].content, "You are a helpful assistant");
        assert_eq!(decoded.messages[1].role, MessageRole::User);
        assert_eq!(decoded.messages[1].content, "What's the current weather in New York?");
        assert_eq!(decoded.messages[2].role, MessageRole::Assistant);
        assert_eq!(decoded.messages[2].tool_calls[0].arguments, r#"{"location":"NYC"}"#);
        assert_eq!(decoded.messages[3].role, MessageRole::Tool);
        assert_eq!(decoded.messages[3].content, r#"{"temp":72}"#);
        assert_eq!(decoded.messages[3].tool_call_id.as_deref(), Some("tu-1"));
    }

    #[test]
    fn test_decode_request_parameters_and_tools() {
        let decoded = BedrockAdapter.decode_request(&converse_request()).unwrap();

        assert!(decoded.model.is_none());
        assert_eq!(decoded.model_parameters.get("temperature"), Some(&json!(0.2)));
        assert_eq!(decoded.model_parameters.get("maxTokens"), Some(&json!(512)));
        assert_eq!(decoded.tools.len(), 1);
        assert_eq!(decoded.tools[0].name, "get_current_weather");
    }

    #[test]
    fn test_decode_request_media_blocks() {
        let body = serde_json::to_vec(&json!({
            "messages": [{"role": "user", "content": [
                {"text": "Summarise"},
                {"document": {"name": "report", "format": "pdf", "source": {"bytes": "AAAA"}}},
                {"image": {"format": "png", "source": {"bytes": "AAAA"}}}
            ]}]
        }))
        .unwrap();

        let decoded = BedrockAdapter.decode_request(&body).unwrap();
        assert_eq!(decoded.messages[0].content, "Summarise\n[document: report]\n[image: png]");
    }

    #[test]
    fn test_decode_request_parallel_tool_results() {
        let body = serde_json::to_vec(&json!({
            "messages": [{"role": "user", "content": [
                {"toolResult": {"toolUseId": "tu-1", "content": [{"text": "72F"}]}},
                {"toolResult": {"toolUseId": "tu-2", "content": [{"text": "55F"}]}}
            ]}]
        }))
        .unwrap();

        let decoded = BedrockAdapter.decode_request(&body).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert!(decoded.messages.iter().all(|m| m.role == MessageRole::Tool));
        assert_eq!(decoded.messages[0].tool_call_id.as_deref(), Some("tu-1"));
        assert_eq!(decoded.messages[0].content, "72F");
        assert_eq!(decoded.messages[1].tool_call_id.as_deref(), Some("tu-2"));
        assert_eq!(decoded.messages[1].content, "55F");
    }

    #[test]
    fn test_decode_request_keeps_valid_messages() {
        let body = serde_json::to_vec(&json!({
            "system": [{"text": "You are a helpful assistant"}],
            "messages": [
                {"role": "user", "content": [{"text": "Say hi"}]},
                {"role": "narrator", "content": [{"text": "x"}]}
            ],
            "inferenceConfig": {"temperature": 0.2}
        }))
        .unwrap();

        let decoded = BedrockAdapter.decode_request(&body).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[1].content, "Say hi");
        assert_eq!(decoded.model_parameters.get("temperature"), Some(&json!(0.2)));
        assert_eq!(decoded.decode_errors.len(), 1);
        assert!(decoded.decode_errors[0].contains("narrator"));
    }

    #[test]
    fn test_decode_request_missing_messages() {
        let decoded = BedrockAdapter.decode_request(br#"{"system": []}"#).unwrap();
        assert!(decoded.messages.is_empty());
        assert!(decoded.decode_errors[0].contains("no messages"));
    }

    #[test]
    fn test_decode_request_not_an_object() {
        assert!(BedrockAdapter.decode_request(b"[]").is_err());
    }

    #[test]
    fn test_decode_response() {
        let body = serde_json::to_vec(&json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "It is 72F in New York."}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 20, "outputTokens": 8, "totalTokens": 28},
            "metrics": {"latencyMs": 512}
        }))
        .unwrap();

        let result = BedrockAdapter.decode_response(&body).unwrap();
        assert_eq!(result.text.as_deref(), Some("It is 72F in New York."));
        assert_eq!(result.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(result.usage, Some(Usage::new(20, 8)));
        assert_eq!(result.raw["metrics"]["latencyMs"], 512);
    }

    #[test]
    fn test_decode_response_tool_use() {
        let body = serde_json::to_vec(&json!({
            "output": {"message": {"role": "assistant", "content": [
                {"toolUse": {"toolUseId": "tu-9", "name": "get_current_weather", "input": {"location": "NYC"}}}
            ]}},
            "stopReason": "tool_use"
        }))
        .unwrap();

        let result = BedrockAdapter.decode_response(&body).unwrap();
        assert!(result.text.is_none());
        assert_eq!(result.tool_calls[0].id.as_deref(), Some("tu-9"));
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_decode_response_without_output() {
        let err = BedrockAdapter.decode_response(br#"{"message":"ThrottlingException"}"#).unwrap_err();
        assert!(matches!(err, TracewireError::Decode { .. }));
    }
}
