//! Transparent observability for LLM provider calls.
//!
//! `tracewire` records provider calls as a tree of sessions, traces, spans, generations
//! and tool calls. It ships each closed entity to a logging backend from a background
//! task. Calls are recorded either by hand through the entity API, or automatically by
//! wrapping the HTTP transport or the SDK call with an interceptor.

pub mod async_dispatcher;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod interceptor;
pub mod llm;
pub mod sink;
pub mod tracer;

pub use error::{Result, TracewireError};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::{DispatcherConfig, LoggerConfig, ManualPrecedence};
    pub use crate::context::{ActiveHandle, CallContext};
    pub use crate::error::{Result, TracewireError};
    pub use crate::event::{Feedback, GenerationError, LogEvent};
    pub use crate::interceptor::{
        InstrumentedTransport, Middleware, ObservableRequest, ObservableResponse, ReqwestTransport,
        ToolInvocation, Transport,
    };
    pub use crate::llm::{
        CompletionRequest, CompletionResult, MessageRole, MessageVariant, Provider, ToolSpec, Usage,
    };
    pub use crate::sink::{EventSink, EventStore, HttpSink};
    pub use crate::tracer::{
        Generation, GenerationConfig, Logger, Session, SessionConfig, Span, SpanConfig, ToolCall,
        ToolCallConfig, Trace, TraceConfig,
    };
}
