//! Canonical tool definitions.
//!
//! Providers describe the tools offered to a model in different shapes: OpenAI and Azure
//! wrap them as `{"type": "function", "function": {...}}`, Bedrock Converse as
//! `{"toolSpec": {"inputSchema": {"json": ...}}}`. Both are normalised into [`ToolSpec`]
//! for logging, and can be rendered back without loss of name, description or schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-independent description of a tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool's parameters
    #[serde(default)]
    pub parameters: Value,
}

/// OpenAI-style tool descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// Bedrock Converse tool entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockTool {
    pub tool_spec: BedrockToolSpecification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockToolSpecification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: BedrockInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockInputSchema {
    #[serde(default)]
    pub json: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: Option<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }

    /// Parse an OpenAI tool entry. Accepts both the wrapped `tools[]` form and the
    /// legacy bare `functions[]` form.
    pub fn from_openai(value: &Value) -> Option<Self> {
        if let Ok(descriptor) = serde_json::from_value::<ToolDescriptor>(value.clone()) {
            return Some(descriptor.into());
        }
        serde_json::from_value::<FunctionDescriptor>(value.clone()).ok().map(|f| Self {
            name: f.name,
            description: f.description,
            parameters: f.parameters,
        })
    }

    /// Parse a Bedrock Converse `toolConfig.tools[]` entry.
    pub fn from_bedrock(value: &Value) -> Option<Self> {
        serde_json::from_value::<BedrockTool>(value.clone()).ok().map(Into::into)
    }

    pub fn to_openai(&self) -> ToolDescriptor {
        ToolDescriptor {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.clone(),
            },
        }
    }

    pub fn to_bedrock(&self) -> BedrockTool {
        BedrockTool {
            tool_spec: BedrockToolSpecification {
                name: self.name.clone(),
                description: self.description.clone(),
                input_schema: BedrockInputSchema {
                    json: self.parameters.clone(),
                },
            },
        }
    }
}

impl From<ToolDescriptor> for ToolSpec {
    fn from(descriptor: ToolDescriptor) -> Self {
        Self {
            name: descriptor.function.name,
            description: descriptor.function.description,
            parameters: descriptor.function.parameters,
        }
    }
}

impl From<BedrockTool> for ToolSpec {
    fn from(tool: BedrockTool) -> Self {
        Self {
            name: tool.tool_spec.name,
            description: tool.tool_spec.description,
            parameters: tool.tool_spec.input_schema.json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city or location to get weather information for"
                }
            },
            "required": ["location"]
        })
    }

    #[test]
    fn test_from_openai_tool() {
        let tool = json!({
            "type": "function",
            "function": {
                "name": "get_current_weather",
                "description": "Get the current weather in a given location",
                "parameters": weather_schema()
            }
        });

        let spec = ToolSpec::from_openai(&tool).unwrap();
        assert_eq!(spec.name, "get_current_weather");
        assert_eq!(
            spec.description.as_deref(),
            Some("Get the current weather in a given location")
        );
        assert_eq!(spec.parameters, weather_schema());
    }

    #[test]
    fn test_from_openai_legacy_function() {
        let function = json!({"name": "lookup", "parameters": {"type": "object"}});
        let spec = ToolSpec::from_openai(&function).unwrap();
        assert_eq!(spec.name, "lookup");
        assert!(spec.description.is_none());
    }

    #[test]
    fn test_from_bedrock_tool() {
        let tool = json!({
            "toolSpec": {
                "name": "get_current_weather",
                "description": "Get current weather data for location",
                "inputSchema": {"json": weather_schema()}
            }
        });

        let spec = ToolSpec::from_bedrock(&tool).unwrap();
        assert_eq!(spec.name, "get_current_weather");
        assert_eq!(spec.parameters, weather_schema());
    }

    #[test]
    fn test_openai_round_trip() {
        let original = json!({
            "type": "function",
            "function": {
                "name": "get_current_weather",
                "description": "Get the current weather",
                "parameters": weather_schema()
            }
        });

        let spec = ToolSpec::from_openai(&original).unwrap();
        let rendered = serde_json::to_value(spec.to_openai()).unwrap();
        assert_eq!(rendered, original);
    }

    #[test]
    fn test_bedrock_round_trip_through_openai() {
        let bedrock = json!({
            "toolSpec": {
                "name": "get_current_weather",
                "description": "Get current weather data for location",
                "inputSchema": {"json": weather_schema()}
            }
        });

        let spec = ToolSpec::from_bedrock(&bedrock).unwrap();
        let via_openai = ToolSpec::from(spec.to_openai());
        assert_eq!(via_openai, spec);
        assert_eq!(serde_json::to_value(via_openai.to_bedrock()).unwrap(), bedrock);
    }

    #[test]
    fn test_invalid_tool_is_rejected() {
        assert!(ToolSpec::from_openai(&json!({"type": "function"})).is_none());
        assert!(ToolSpec::from_bedrock(&json!({"cachePoint": {}})).is_none());
    }
}
