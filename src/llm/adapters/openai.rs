//! Adapter for the OpenAI chat completions wire format.
//!
//! Also used by the Azure OpenAI adapter, which speaks the same JSON.

use super::{parse_json, DecodedRequest, ProviderAdapter};
use crate::error::{Result, TracewireError};
use crate::llm::models::{
    CompletionRequest, CompletionResult, MessageRole, Provider, RequestedToolCall, Usage,
};
use crate::llm::tool_spec::ToolSpec;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Request keys that are not model parameters.
const NON_PARAMETER_KEYS: &[&str] = &["model", "messages", "tools", "functions", "user"];

/// Adapter for api.openai.com and compatible endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn decode_request(&self, body: &[u8]) -> Result<DecodedRequest> {
        decode_chat_request(Provider::OpenAI, body)
    }

    fn decode_response(&self, body: &[u8]) -> Result<CompletionResult> {
        decode_chat_response(Provider::OpenAI, body)
    }
}

pub(crate) fn decode_chat_request(provider: Provider, body: &[u8]) -> Result<DecodedRequest> {
    let value = parse_json(provider, body)?;
    let object = value
        .as_object()
        .ok_or_else(|| TracewireError::decode(provider.as_str(), "request body is not an object"))?;

    let mut decode_errors = Vec::new();
    let mut messages = Vec::new();
    match object.get("messages").and_then(Value::as_array) {
        Some(entries) => {
            for (index, message) in entries.iter().enumerate() {
                match decode_message(provider, index, message) {
                    Ok(message) => messages.push(message),
                    Err(e) => decode_errors.push(e.to_string()),
                }
            }
        }
        None => decode_errors
            .push(TracewireError::decode(provider.as_str(), "request has no messages").to_string()),
    }

    let mut tools: Vec<ToolSpec> = Vec::new();
    for key in ["tools", "functions"] {
        if let Some(entries) = object.get(key).and_then(Value::as_array) {
            tools.extend(entries.iter().filter_map(ToolSpec::from_openai));
        }
    }

    let model_parameters: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !NON_PARAMETER_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    debug!(
        provider = %provider,
        messages = messages.len(),
        tools = tools.len(),
        errors = decode_errors.len(),
        "Decoded chat completion request"
    );

    Ok(DecodedRequest {
        model: object.get("model").and_then(Value::as_str).map(String::from),
        messages,
        model_parameters,
        tools,
        decode_errors,
    })
}

fn decode_message(provider: Provider, index: usize, message: &Value) -> Result<CompletionRequest> {
    let role_name = message["role"].as_str().ok_or_else(|| {
        TracewireError::decode(provider.as_str(), format!("message {} has no role", index))
    })?;
    let role = MessageRole::parse(role_name).ok_or_else(|| {
        TracewireError::decode(
            provider.as_str(),
            format!("message {} has unknown role '{}'", index, role_name),
        )
    })?;

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| convert_tool_calls(calls))
        .unwrap_or_default();

    Ok(CompletionRequest {
        role,
        content: content_text(&message["content"]),
        tool_call_id: message["tool_call_id"].as_str().map(String::from),
        tool_calls,
    })
}

/// Flatten string or multi-part content into display text.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part["type"].as_str() {
                Some("text") => part["text"].as_str().unwrap_or_default().to_string(),
                Some("refusal") => part["refusal"].as_str().unwrap_or_default().to_string(),
                Some("image_url") => "[image]".to_string(),
                Some(other) => format!("[{}]", other),
                None => part.as_str().unwrap_or_default().to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Convert tool calls from OpenAI format, keeping the argument JSON verbatim.
fn convert_tool_calls(tool_calls: &[Value]) -> Vec<RequestedToolCall> {
    tool_calls
        .iter()
        .filter_map(|tc| {
            let name = tc["function"]["name"].as_str()?.to_string();
            Some(RequestedToolCall {
                id: tc["id"].as_str().map(String::from),
                name,
                arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
            })
        })
        .collect()
}

fn convert_usage(usage: &Value) -> Option<Usage> {
    let prompt = usage["prompt_tokens"].as_u64()?;
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    Some(Usage {
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(prompt + completion),
        ..Usage::new(prompt, completion)
    })
}

pub(crate) fn decode_chat_response(provider: Provider, body: &[u8]) -> Result<CompletionResult> {
    if is_event_stream(body) {
        return decode_event_stream(provider, body);
    }

    let value = parse_json(provider, body)?;
    let choice = value["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| TracewireError::decode(provider.as_str(), "response has no choices"))?;
    let message = &choice["message"];

    Ok(CompletionResult {
        id: value["id"].as_str().map(String::from),
        model: value["model"].as_str().map(String::from),
        text: message["content"].as_str().map(String::from),
        tool_calls: message["tool_calls"]
            .as_array()
            .map(|calls| convert_tool_calls(calls))
            .unwrap_or_default(),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage: convert_usage(&value["usage"]),
        raw: value,
    })
}

fn is_event_stream(body: &[u8]) -> bool {
    let trimmed = body.iter().position(|b| !b.is_ascii_whitespace()).map(|i| &body[i..]);
    matches!(trimmed, Some(rest) if rest.starts_with(b"data:"))
}

/// Accumulates streamed tool call fragments, keyed by their index.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Aggregate a server-sent-events body into one result.
fn decode_event_stream(provider: Provider, body: &[u8]) -> Result<CompletionResult> {
    let text = std::str::from_utf8(body)
        .map_err(|e| TracewireError::decode(provider.as_str(), format!("stream is not UTF-8: {}", e)))?;

    let mut result = CompletionResult::default();
    let mut content = String::new();
    let mut saw_content = false;
    let mut accumulators: BTreeMap<u64, ToolCallAccumulator> = BTreeMap::new();
    let mut chunks = Vec::new();

    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }

        let chunk: Value = serde_json::from_str(data).map_err(|e| {
            TracewireError::decode(provider.as_str(), format!("invalid stream chunk: {}", e))
        })?;

        if result.id.is_none() {
            result.id = chunk["id"].as_str().map(String::from);
        }
        if result.model.is_none() {
            result.model = chunk["model"].as_str().filter(|m| !m.is_empty()).map(String::from);
        }
        if let Some(usage) = convert_usage(&chunk["usage"]) {
            result.usage = Some(usage);
        }

        let first_choice = chunk["choices"]
            .as_array()
            .and_then(|choices| choices.iter().find(|c| c["index"].as_u64().unwrap_or(0) == 0));
        if let Some(choice) = first_choice {
            let delta = &choice["delta"];
            if let Some(fragment) = delta["content"].as_str() {
                content.push_str(fragment);
                saw_content = true;
            }
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    let index = call["index"].as_u64().unwrap_or(0);
                    let acc = accumulators.entry(index).or_default();
                    if let Some(id) = call["id"].as_str() {
                        acc.id = Some(id.to_string());
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        acc.name = Some(name.to_string());
                    }
                    if let Some(args) = call["function"]["arguments"].as_str() {
                        acc.arguments.push_str(args);
                    }
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                result.finish_reason = Some(reason.to_string());
            }
        }

        chunks.push(chunk);
    }

    if chunks.is_empty() {
        return Err(TracewireError::decode(provider.as_str(), "stream contained no chunks"));
    }

    result.text = saw_content.then_some(content);
    result.tool_calls = accumulators
        .into_values()
        .filter_map(|acc| {
            Some(RequestedToolCall {
                id: acc.id,
                name: acc.name?,
                arguments: acc.arguments,
            })
        })
        .collect();
    result.raw = Value::Array(chunks);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_request_all_roles() {
        let request = body(json!({
            "model": "gpt-4o",
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": "You are a helpful assistant"},
                {"role": "user", "content": "What is the temperature in New York?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "get_current_weather", "arguments": "{\"location\":\"NYC\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "{\"temp\":72}"}
            ]
        }));

        let decoded = OpenAiAdapter.decode_request(&request).unwrap();
        assert_eq!(decoded.model.as_deref(), Some("gpt-4o"));
        assert_eq!(decoded.messages.len(), 4);

        let roles: Vec<MessageRole> = decoded.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant, MessageRole::Tool]
        );
        assert_eq!(decoded.messages[1].content, "What is the temperature in New York?");
        assert_eq!(decoded.messages[2].tool_calls[0].arguments, "{\"location\":\"NYC\"}");
        assert_eq!(decoded.messages[3].content, "{\"temp\":72}");
        assert_eq!(decoded.messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(decoded.model_parameters.get("temperature"), Some(&json!(0.2)));
        assert!(!decoded.model_parameters.contains_key("messages"));
    }

    #[test]
    fn test_decode_request_tools() {
        let request = body(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_current_weather",
                    "description": "Get the current weather in a given location",
                    "parameters": {"type": "object", "properties": {}}
                }
            }],
            "tool_choice": "auto"
        }));

        let decoded = OpenAiAdapter.decode_request(&request).unwrap();
        assert_eq!(decoded.tools.len(), 1);
        assert_eq!(decoded.tools[0].name, "get_current_weather");
        assert_eq!(decoded.model_parameters.get("tool_choice"), Some(&json!("auto")));
        assert!(!decoded.model_parameters.contains_key("tools"));
    }

    #[test]
    fn test_decode_request_multipart_content() {
        let request = body(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Describe this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ]}]
        }));

        let decoded = OpenAiAdapter.decode_request(&request).unwrap();
        assert_eq!(decoded.messages[0].content, "Describe this\n[image]");
    }

    #[test]
    fn test_decode_request_unknown_role() {
        let request = body(json!({"messages": [{"role": "narrator", "content": "x"}]}));
        let decoded = OpenAiAdapter.decode_request(&request).unwrap();
        assert!(decoded.messages.is_empty());
        assert_eq!(decoded.decode_errors.len(), 1);
        assert!(decoded.decode_errors[0].contains("narrator"));
    }

    #[test]
    fn test_decode_request_keeps_valid_messages() {
        let request = body(json!({
            "model": "gpt-4o",
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": "You are a helpful assistant"},
                {"role": "user", "content": "Say hi"},
                {"content": "who said this?"}
            ]
        }));

        let decoded = OpenAiAdapter.decode_request(&request).unwrap();
        assert_eq!(decoded.model.as_deref(), Some("gpt-4o"));
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[1].content, "Say hi");
        assert_eq!(decoded.model_parameters.get("temperature"), Some(&json!(0.3)));
        assert_eq!(decoded.decode_errors.len(), 1);
        assert!(decoded.decode_errors[0].contains("message 2 has no role"));
    }

    #[test]
    fn test_decode_request_missing_messages() {
        let decoded = OpenAiAdapter.decode_request(br#"{"model":"gpt-4o"}"#).unwrap();
        assert_eq!(decoded.model.as_deref(), Some("gpt-4o"));
        assert!(decoded.messages.is_empty());
        assert!(decoded.decode_errors[0].contains("no messages"));
    }

    #[test]
    fn test_decode_request_not_json() {
        let err = OpenAiAdapter.decode_request(b"not json").unwrap_err();
        assert!(matches!(err, TracewireError::Decode { .. }));
    }

    #[test]
    fn test_decode_response() {
        let response = body(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Ahoy!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        }));

        let result = OpenAiAdapter.decode_response(&response).unwrap();
        assert_eq!(result.text.as_deref(), Some("Ahoy!"));
        assert_eq!(result.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage, Some(Usage::new(10, 3)));
        assert_eq!(result.raw["model"], "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_decode_response_tool_calls() {
        let response = body(json!({
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_9", "type": "function",
                     "function": {"name": "get_current_weather", "arguments": "{\"location\":\"NYC\"}"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        }));

        let result = OpenAiAdapter.decode_response(&response).unwrap();
        assert!(result.text.is_none());
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id.as_deref(), Some("call_9"));
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_decode_response_without_choices() {
        let err = OpenAiAdapter.decode_response(br#"{"object":"list"}"#).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn test_decode_event_stream() {
        let stream = concat!(
            "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Ah\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"oy!\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
            "data: [DONE]\n\n"
        );

        let result = OpenAiAdapter.decode_response(stream.as_bytes()).unwrap();
        assert_eq!(result.text.as_deref(), Some("Ahoy!"));
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage, Some(Usage::new(5, 2)));
        assert_eq!(result.raw.as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_decode_event_stream_tool_call_fragments() {
        let stream = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_current_weather\",\"arguments\":\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"location\\\":\"}}]}}]}\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"NYC\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n",
            "data: [DONE]\n"
        );

        let result = OpenAiAdapter.decode_response(stream.as_bytes()).unwrap();
        assert!(result.text.is_none());
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "get_current_weather");
        assert_eq!(result.tool_calls[0].arguments, "{\"location\":\"NYC\"}");
    }
}
