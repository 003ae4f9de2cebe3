//! Entity model and the instrumentation handle.
//!
//! # Architecture
//!
//! - **Logger**: explicitly constructed handle owning the background dispatcher
//! - **Session / Trace / Span**: grouping entities, opened and ended by the caller
//! - **Generation / ToolCall**: leaf entities, opened under a trace or span and closed
//!   exactly once with a result or an error
//!
//! Closing an entity flattens it into one [`LogEvent`](crate::event::LogEvent) keyed by
//! its parent id; the tree itself is never shipped.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use tracewire::prelude::*;
//!
//! let logger = Logger::from_env()?;
//! let trace = logger.trace(TraceConfig::named("t1"));
//! let span = trace.add_span(SpanConfig::named("s1"))?;
//! let generation = span.add_generation(
//!     GenerationConfig::new(Provider::OpenAI, "gpt-4o").with_message(CompletionRequest::user("Say hi")),
//! )?;
//! generation.set_result(CompletionResult::from_text("Ahoy!"))?;
//! span.end()?;
//! trace.end()?;
//! logger.flush().await?;
//! ```

pub mod entities;
pub mod logger;

pub use entities::{
    Generation, GenerationConfig, Parent, Session, SessionConfig, Span, SpanConfig, ToolCall,
    ToolCallConfig, Trace, TraceConfig,
};
pub use logger::Logger;
