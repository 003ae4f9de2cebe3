//! Session, Trace, Span, Generation and ToolCall handles.
//!
//! Each handle is a cheap `Clone` around shared state, so it can be passed down a call
//! chain or stored in a [`CallContext`](crate::context::CallContext). An entity is open
//! from creation until its terminal call (`end`, `set_result` or `set_error`); that call
//! turns it into exactly one [`LogEvent`] on the owning [`Logger`]'s queue.
//!
//! Mutating a closed entity fails with [`TracewireError::AlreadyClosed`] and leaves its
//! state unchanged. Closing it again fails with [`TracewireError::DoubleClose`], which is
//! also logged at warn level.

use super::Logger;
use crate::error::{Result, TracewireError};
use crate::event::{
    EntityKind, EventPayload, Feedback, GenerationError, GenerationPayload, LogEvent, NamedEvent,
    SessionPayload, SpanPayload, Timestamps, ToolCallPayload, TracePayload,
};
use crate::llm::models::{CompletionRequest, CompletionResult, Provider};
use crate::llm::tool_spec::ToolSpec;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

struct EntityState<P> {
    closed: bool,
    tags: BTreeMap<String, String>,
    payload: P,
}

struct EntityCore<P> {
    kind: EntityKind,
    id: String,
    name: Option<String>,
    parent_id: Option<String>,
    start: DateTime<Utc>,
    logger: Logger,
    state: Mutex<EntityState<P>>,
}

impl<P> EntityCore<P>
where
    P: Clone + Into<EventPayload>,
{
    fn open(
        kind: EntityKind,
        id: Option<String>,
        name: Option<String>,
        parent_id: Option<String>,
        tags: BTreeMap<String, String>,
        payload: P,
        logger: Logger,
    ) -> Arc<Self> {
        let id = id.unwrap_or_else(new_id);
        debug!(kind = %kind, id = %id, parent_id = ?parent_id, "Opened entity");
        Arc::new(Self {
            kind,
            id,
            name,
            parent_id,
            start: Utc::now(),
            logger,
            state: Mutex::new(EntityState {
                closed: false,
                tags,
                payload,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EntityState<P>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn already_closed(&self) -> TracewireError {
        TracewireError::AlreadyClosed {
            kind: self.kind,
            id: self.id.clone(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock().closed {
            return Err(self.already_closed());
        }
        Ok(())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R> {
        let mut state = self.lock();
        if state.closed {
            return Err(self.already_closed());
        }
        Ok(f(&mut state.payload))
    }

    fn add_tag(&self, key: String, value: String) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(self.already_closed());
        }
        state.tags.insert(key, value);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn snapshot(&self) -> P {
        self.lock().payload.clone()
    }

    /// Apply the final update, mark closed and emit the event.
    fn close(&self, finish: impl FnOnce(&mut P)) -> Result<()> {
        let event = {
            let mut state = self.lock();
            if state.closed {
                warn!(kind = %self.kind, id = %self.id, "Entity closed more than once");
                return Err(TracewireError::DoubleClose {
                    kind: self.kind,
                    id: self.id.clone(),
                });
            }
            finish(&mut state.payload);
            state.closed = true;

            LogEvent::new(
                self.id.clone(),
                self.parent_id.clone(),
                self.name.clone(),
                Timestamps {
                    start: self.start,
                    end: Some(Utc::now()),
                },
                state.payload.clone().into(),
            )
            .with_tags(state.tags.clone())
        };

        debug!(kind = %self.kind, id = %self.id, "Closed entity");
        self.logger.emit(event);
        Ok(())
    }
}

impl<P> Drop for EntityCore<P> {
    fn drop(&mut self) {
        let closed = self.state.get_mut().map(|s| s.closed).unwrap_or(true);
        if !closed && self.logger.is_enabled() {
            warn!(kind = %self.kind, id = %self.id, "Entity dropped without being closed");
        }
    }
}

impl<P> fmt::Debug for EntityCore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent_id", &self.parent_id)
            .finish()
    }
}

macro_rules! entity_accessors {
    ($handle:ident) => {
        impl $handle {
            pub fn id(&self) -> &str {
                &self.core.id
            }

            pub fn name(&self) -> Option<&str> {
                self.core.name.as_deref()
            }

            pub fn parent_id(&self) -> Option<&str> {
                self.core.parent_id.as_deref()
            }

            pub fn is_closed(&self) -> bool {
                self.core.is_closed()
            }

            /// Attach a string tag; tags are shipped with the closing event.
            pub fn add_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
                self.core.add_tag(key.into(), value.into())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Configuration objects
// ---------------------------------------------------------------------------

/// Options for a new [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl SessionConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Options for a new [`Trace`].
#[derive(Debug, Clone, Default)]
pub struct TraceConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl TraceConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Options for a new [`Span`].
#[derive(Debug, Clone, Default)]
pub struct SpanConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl SpanConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Options for a new [`Generation`].
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub provider: Provider,
    pub model: String,
    pub messages: Vec<CompletionRequest>,
    pub model_parameters: Map<String, Value>,
    pub tools: Vec<ToolSpec>,
    pub tags: BTreeMap<String, String>,
    /// Problems met while building this config from a provider payload
    pub decode_errors: Vec<String>,
    pub raw_request: Option<String>,
}

impl GenerationConfig {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<CompletionRequest>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<CompletionRequest>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_model_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model_parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// Options for a new [`ToolCall`].
#[derive(Debug, Clone, Default)]
pub struct ToolCallConfig {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub args: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl ToolCallConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Arguments are kept verbatim, typically the model's JSON argument string.
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Top-level grouping of related traces, optionally rated with feedback.
#[derive(Debug, Clone)]
pub struct Session {
    core: Arc<EntityCore<SessionPayload>>,
}

entity_accessors!(Session);

impl Session {
    pub(crate) fn open(logger: Logger, config: SessionConfig) -> Self {
        Self {
            core: EntityCore::open(
                EntityKind::Session,
                config.id,
                config.name,
                None,
                BTreeMap::new(),
                SessionPayload::default(),
                logger,
            ),
        }
    }

    /// Start a trace that belongs to this session.
    pub fn add_trace(&self, config: TraceConfig) -> Result<Trace> {
        self.core.ensure_open()?;
        Ok(Trace::open(self.core.logger.clone(), Some(self.core.id.clone()), config))
    }

    /// Rate the session. Feedback can be set once, before the session ends.
    pub fn set_feedback(&self, feedback: Feedback) -> Result<()> {
        let session_id = self.core.id.clone();
        self.core.mutate(|payload| {
            if payload.feedback.is_some() {
                return Err(TracewireError::FeedbackAlreadySet(session_id));
            }
            payload.feedback = Some(feedback);
            Ok(())
        })?
    }

    pub fn feedback(&self) -> Option<Feedback> {
        self.core.snapshot().feedback
    }

    pub fn end(&self) -> Result<()> {
        self.core.close(|_| {})
    }
}

// ---------------------------------------------------------------------------
// Trace and Span
// ---------------------------------------------------------------------------

fn named_event(name: String, metadata: Map<String, Value>) -> NamedEvent {
    NamedEvent {
        id: new_id(),
        name,
        timestamp: Utc::now(),
        metadata,
    }
}

/// One logical top-level operation.
#[derive(Debug, Clone)]
pub struct Trace {
    core: Arc<EntityCore<TracePayload>>,
}

entity_accessors!(Trace);

impl Trace {
    pub(crate) fn open(logger: Logger, session_id: Option<String>, config: TraceConfig) -> Self {
        Self {
            core: EntityCore::open(
                EntityKind::Trace,
                config.id,
                config.name,
                session_id,
                config.tags,
                TracePayload::default(),
                logger,
            ),
        }
    }

    pub fn add_span(&self, config: SpanConfig) -> Result<Span> {
        self.core.ensure_open()?;
        Ok(Span::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    pub fn add_generation(&self, config: GenerationConfig) -> Result<Generation> {
        self.core.ensure_open()?;
        Ok(Generation::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    pub fn add_tool_call(&self, config: ToolCallConfig) -> Result<ToolCall> {
        self.core.ensure_open()?;
        Ok(ToolCall::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    /// Record a point-in-time event and return its id.
    pub fn event(&self, name: impl Into<String>, metadata: Map<String, Value>) -> Result<String> {
        let event = named_event(name.into(), metadata);
        let id = event.id.clone();
        self.core.mutate(|payload| payload.events.push(event))?;
        Ok(id)
    }

    pub fn set_input(&self, input: impl Into<String>) -> Result<()> {
        let input = input.into();
        self.core.mutate(|payload| payload.input = Some(input))
    }

    pub fn set_output(&self, output: impl Into<String>) -> Result<()> {
        let output = output.into();
        self.core.mutate(|payload| payload.output = Some(output))
    }

    pub fn end(&self) -> Result<()> {
        self.core.close(|_| {})
    }
}

/// A named unit of work inside a trace or another span.
#[derive(Debug, Clone)]
pub struct Span {
    core: Arc<EntityCore<SpanPayload>>,
}

entity_accessors!(Span);

impl Span {
    fn open(logger: Logger, parent_id: String, config: SpanConfig) -> Self {
        Self {
            core: EntityCore::open(
                EntityKind::Span,
                config.id,
                config.name,
                Some(parent_id),
                config.tags,
                SpanPayload::default(),
                logger,
            ),
        }
    }

    /// Open a nested span.
    pub fn add_span(&self, config: SpanConfig) -> Result<Span> {
        self.core.ensure_open()?;
        Ok(Span::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    pub fn add_generation(&self, config: GenerationConfig) -> Result<Generation> {
        self.core.ensure_open()?;
        Ok(Generation::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    pub fn add_tool_call(&self, config: ToolCallConfig) -> Result<ToolCall> {
        self.core.ensure_open()?;
        Ok(ToolCall::open(self.core.logger.clone(), self.core.id.clone(), config))
    }

    /// Record a point-in-time event and return its id.
    pub fn event(&self, name: impl Into<String>, metadata: Map<String, Value>) -> Result<String> {
        let event = named_event(name.into(), metadata);
        let id = event.id.clone();
        self.core.mutate(|payload| payload.events.push(event))?;
        Ok(id)
    }

    pub fn end(&self) -> Result<()> {
        self.core.close(|_| {})
    }
}

/// A trace or span that generations and tool calls can be attached to.
#[derive(Debug, Clone)]
pub enum Parent {
    Trace(Trace),
    Span(Span),
}

impl Parent {
    pub fn id(&self) -> &str {
        match self {
            Parent::Trace(trace) => trace.id(),
            Parent::Span(span) => span.id(),
        }
    }

    pub fn add_generation(&self, config: GenerationConfig) -> Result<Generation> {
        match self {
            Parent::Trace(trace) => trace.add_generation(config),
            Parent::Span(span) => span.add_generation(config),
        }
    }

    pub fn add_tool_call(&self, config: ToolCallConfig) -> Result<ToolCall> {
        match self {
            Parent::Trace(trace) => trace.add_tool_call(config),
            Parent::Span(span) => span.add_tool_call(config),
        }
    }
}

impl From<Trace> for Parent {
    fn from(trace: Trace) -> Self {
        Parent::Trace(trace)
    }
}

impl From<Span> for Parent {
    fn from(span: Span) -> Self {
        Parent::Span(span)
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// One LLM completion call.
#[derive(Debug, Clone)]
pub struct Generation {
    core: Arc<EntityCore<GenerationPayload>>,
}

entity_accessors!(Generation);

impl Generation {
    fn open(logger: Logger, parent_id: String, config: GenerationConfig) -> Self {
        let payload = GenerationPayload {
            provider: config.provider,
            model: config.model,
            messages: config.messages,
            model_parameters: config.model_parameters,
            tools: config.tools,
            decode_errors: config.decode_errors,
            raw_request: config.raw_request,
            ..Default::default()
        };
        Self {
            core: EntityCore::open(
                EntityKind::Generation,
                config.id,
                config.name,
                Some(parent_id),
                config.tags,
                payload,
                logger,
            ),
        }
    }

    pub fn add_message(&self, message: impl Into<CompletionRequest>) -> Result<()> {
        let message = message.into();
        self.core.mutate(|payload| payload.messages.push(message))
    }

    pub fn set_model_parameter(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.core.mutate(|payload| {
            payload.model_parameters.insert(key, value);
        })
    }

    pub fn add_tool(&self, tool: ToolSpec) -> Result<()> {
        self.core.mutate(|payload| payload.tools.push(tool))
    }

    /// Note a payload decoding problem; the generation is still shipped.
    pub fn add_decode_error(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.core.mutate(|payload| payload.decode_errors.push(message))
    }

    /// Record the completion and close the generation.
    pub fn set_result(&self, result: CompletionResult) -> Result<()> {
        self.core.close(|payload| payload.result = Some(result))
    }

    /// Record a failure and close the generation.
    pub fn set_error(&self, error: GenerationError) -> Result<()> {
        self.core.close(|payload| payload.error = Some(error))
    }

    /// Close without a result.
    pub fn end(&self) -> Result<()> {
        self.core.close(|_| {})
    }

    pub fn provider(&self) -> Provider {
        self.core.lock().payload.provider
    }

    pub fn model(&self) -> String {
        self.core.lock().payload.model.clone()
    }

    pub fn messages(&self) -> Vec<CompletionRequest> {
        self.core.lock().payload.messages.clone()
    }

    pub fn result(&self) -> Option<CompletionResult> {
        self.core.lock().payload.result.clone()
    }

    pub fn error(&self) -> Option<GenerationError> {
        self.core.lock().payload.error.clone()
    }
}

// ---------------------------------------------------------------------------
// ToolCall
// ---------------------------------------------------------------------------

/// One tool or function invocation.
#[derive(Debug, Clone)]
pub struct ToolCall {
    core: Arc<EntityCore<ToolCallPayload>>,
}

entity_accessors!(ToolCall);

impl ToolCall {
    fn open(logger: Logger, parent_id: String, config: ToolCallConfig) -> Self {
        let payload = ToolCallPayload {
            description: config.description,
            args: config.args,
            ..Default::default()
        };
        Self {
            core: EntityCore::open(
                EntityKind::ToolCall,
                config.id,
                Some(config.name),
                Some(parent_id),
                config.tags,
                payload,
                logger,
            ),
        }
    }

    /// Record the tool's output and close the tool call.
    pub fn set_result(&self, result: impl Into<String>) -> Result<()> {
        let result = result.into();
        self.core.close(|payload| payload.result = Some(result))
    }

    /// Record a failure and close the tool call.
    pub fn set_error(&self, error: GenerationError) -> Result<()> {
        self.core.close(|payload| payload.error = Some(error))
    }

    pub fn end(&self) -> Result<()> {
        self.core.close(|_| {})
    }

    pub fn args(&self) -> Option<String> {
        self.core.lock().payload.args.clone()
    }
}
