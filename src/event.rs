//! Canonical wire events shipped to the logging backend.
//!
//! Every closed entity (session, trace, span, generation, tool call) is flattened into
//! exactly one [`LogEvent`]. The tree shape is preserved only through `parent_id`, so
//! the backend can reassemble it regardless of the order in which events arrive.
//!
//! # Examples
//!
//! ```
//! use tracewire::event::EntityKind;
//!
//! assert_eq!(EntityKind::ToolCall.to_string(), "toolcall");
//! assert_eq!(serde_json::to_string(&EntityKind::Generation).unwrap(), "\"generation\"");
//! ```

use crate::llm::models::{CompletionRequest, CompletionResult, Provider};
use crate::llm::tool_spec::ToolSpec;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of entity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Session,
    Trace,
    Span,
    Generation,
    ToolCall,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Session => "session",
            EntityKind::Trace => "trace",
            EntityKind::Span => "span",
            EntityKind::Generation => "generation",
            EntityKind::ToolCall => "toolcall",
        };
        f.write_str(name)
    }
}

/// Start and end of an entity's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Rating attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(score: i64) -> Self {
        Self {
            score,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Failure recorded on a generation or tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            error_type: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

/// A point-in-time event recorded inside a trace or span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEvent {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<NamedEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanPayload {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<NamedEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPayload {
    pub provider: Provider,
    pub model: String,
    pub messages: Vec<CompletionRequest>,
    pub model_parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CompletionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
    /// Problems met while decoding provider payloads; the event is still shipped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decode_errors: Vec<String>,
    /// Request body as sent, kept when it could not be decoded at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
}

/// Kind-specific body of a [`LogEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Session(SessionPayload),
    Trace(TracePayload),
    Span(SpanPayload),
    Generation(GenerationPayload),
    ToolCall(ToolCallPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            EventPayload::Session(_) => EntityKind::Session,
            EventPayload::Trace(_) => EntityKind::Trace,
            EventPayload::Span(_) => EntityKind::Span,
            EventPayload::Generation(_) => EntityKind::Generation,
            EventPayload::ToolCall(_) => EntityKind::ToolCall,
        }
    }
}

impl From<SessionPayload> for EventPayload {
    fn from(p: SessionPayload) -> Self {
        EventPayload::Session(p)
    }
}

impl From<TracePayload> for EventPayload {
    fn from(p: TracePayload) -> Self {
        EventPayload::Trace(p)
    }
}

impl From<SpanPayload> for EventPayload {
    fn from(p: SpanPayload) -> Self {
        EventPayload::Span(p)
    }
}

impl From<GenerationPayload> for EventPayload {
    fn from(p: GenerationPayload) -> Self {
        EventPayload::Generation(p)
    }
}

impl From<ToolCallPayload> for EventPayload {
    fn from(p: ToolCallPayload) -> Self {
        EventPayload::ToolCall(p)
    }
}

/// One flattened entity, as delivered to the backend sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub kind: EntityKind,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamps: Timestamps,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub payload: EventPayload,
}

impl LogEvent {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        name: Option<String>,
        timestamps: Timestamps,
        payload: EventPayload,
    ) -> Self {
        Self {
            kind: payload.kind(),
            id: id.into(),
            parent_id,
            name,
            timestamps,
            tags: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn as_generation(&self) -> Option<&GenerationPayload> {
        match &self.payload {
            EventPayload::Generation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPayload> {
        match &self.payload {
            EventPayload::ToolCall(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_trace(&self) -> Option<&TracePayload> {
        match &self.payload {
            EventPayload::Trace(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_session(&self) -> Option<&SessionPayload> {
        match &self.payload {
            EventPayload::Session(p) => Some(p),
            _ => None,
        }
    }

    /// Wall-clock duration in milliseconds, if the entity was closed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.timestamps.end.map(|end| (end - self.timestamps.start).num_milliseconds())
    }

    /// Human-readable one-block summary, used by the in-memory event store.
    pub fn printable_summary(&self) -> String {
        let time_str =
            self.timestamps.start.with_timezone(&Local).format("%H:%M:%S%.3f").to_string();

        let mut summary = format!("[{}] {} {}", time_str, self.kind, self.id);

        if let Some(name) = &self.name {
            summary.push_str(&format!(" ({})", name));
        }
        if let Some(parent) = &self.parent_id {
            summary.push_str(&format!("\n   Parent: {}", parent));
        }

        match &self.payload {
            EventPayload::Generation(g) => {
                summary.push_str(&format!("\n   Model: {} ({})", g.model, g.provider));
                let msg_count = g.messages.len();
                let plural = if msg_count != 1 { "s" } else { "" };
                summary.push_str(&format!("\n   Messages: {} message{}", msg_count, plural));
                if let Some(text) = g.result.as_ref().and_then(|r| r.text.as_deref()) {
                    summary.push_str(&format!("\n   Content: {}", preview(text)));
                }
                if let Some(error) = &g.error {
                    summary.push_str(&format!("\n   Error: {}", error.message));
                }
            }
            EventPayload::ToolCall(t) => {
                if let Some(args) = &t.args {
                    summary.push_str(&format!("\n   Arguments: {}", preview(args)));
                }
                if let Some(result) = &t.result {
                    summary.push_str(&format!("\n   Result: {}", preview(result)));
                }
                if let Some(error) = &t.error {
                    summary.push_str(&format!("\n   Error: {}", error.message));
                }
            }
            EventPayload::Session(s) => {
                if let Some(feedback) = &s.feedback {
                    summary.push_str(&format!("\n   Feedback: {}", feedback.score));
                }
            }
            EventPayload::Trace(_) | EventPayload::Span(_) => {}
        }

        if let Some(duration) = self.duration_ms() {
            summary.push_str(&format!("\n   Duration: {}ms", duration));
        }

        summary
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 100 {
        let cut: String = text.chars().take(100).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::MessageRole;
    use serde_json::json;

    fn timestamps() -> Timestamps {
        let start = Utc::now();
        Timestamps {
            start,
            end: Some(start + chrono::Duration::milliseconds(250)),
        }
    }

    #[test]
    fn test_entity_kind_serialization() {
        assert_eq!(serde_json::to_string(&EntityKind::Session).unwrap(), "\"session\"");
        assert_eq!(serde_json::to_string(&EntityKind::ToolCall).unwrap(), "\"toolcall\"");
        assert_eq!(EntityKind::Span.to_string(), "span");
    }

    #[test]
    fn test_generation_event_wire_shape() {
        let payload = GenerationPayload {
            provider: Provider::OpenAI,
            model: "gpt-4o".to_string(),
            messages: vec![CompletionRequest::new(MessageRole::User, "Say hi")],
            ..Default::default()
        };
        let event = LogEvent::new(
            "gen-1",
            Some("span-1".to_string()),
            Some("chat".to_string()),
            timestamps(),
            payload.into(),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "generation");
        assert_eq!(value["id"], "gen-1");
        assert_eq!(value["parentId"], "span-1");
        assert_eq!(value["payload"]["provider"], "openai");
        assert_eq!(value["payload"]["model"], "gpt-4o");
        assert_eq!(value["payload"]["messages"][0]["role"], "user");
        assert_eq!(value["payload"]["modelParameters"], json!({}));
        assert!(value["payload"].get("result").is_none());
        assert!(value["timestamps"]["end"].is_string());
    }

    #[test]
    fn test_kind_follows_payload() {
        let event = LogEvent::new(
            "tc-1",
            None,
            None,
            timestamps(),
            ToolCallPayload::default().into(),
        );
        assert_eq!(event.kind, EntityKind::ToolCall);
        assert!(event.as_tool_call().is_some());
        assert!(event.as_generation().is_none());
    }

    #[test]
    fn test_tags_omitted_when_empty() {
        let event = LogEvent::new("t", None, None, timestamps(), TracePayload::default().into());
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("tags").is_none());

        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let value = serde_json::to_value(event.with_tags(tags)).unwrap();
        assert_eq!(value["tags"]["env"], "prod");
    }

    #[test]
    fn test_duration_ms() {
        let event = LogEvent::new("s", None, None, timestamps(), SpanPayload::default().into());
        assert_eq!(event.duration_ms(), Some(250));
    }

    #[test]
    fn test_printable_summary() {
        let payload = ToolCallPayload {
            args: Some(r#"{"location":"NYC"}"#.to_string()),
            result: Some(r#"{"temp":72}"#.to_string()),
            ..Default::default()
        };
        let event = LogEvent::new(
            "tc-9",
            Some("span-1".to_string()),
            Some("get_current_weather".to_string()),
            timestamps(),
            payload.into(),
        );

        let summary = event.printable_summary();
        assert!(summary.contains("toolcall tc-9"));
        assert!(summary.contains("get_current_weather"));
        assert!(summary.contains("NYC"));
        assert!(summary.contains("Duration: 250ms"));
    }

    #[test]
    fn test_feedback_builder() {
        let feedback = Feedback::new(3).with_comment("fine");
        assert_eq!(feedback.score, 3);
        assert_eq!(feedback.comment.as_deref(), Some("fine"));
    }

    #[test]
    fn test_generation_error_serialization() {
        let err = GenerationError::new("boom").with_code("503").with_type("transport");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value, json!({"message": "boom", "code": "503", "type": "transport"}));
    }
}
