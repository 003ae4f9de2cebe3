//! Backend sinks that receive batches of closed entities.
//!
//! The dispatcher owns delivery; a sink only has to ship one batch and report whether
//! a failure is worth retrying (see [`TracewireError::is_retryable`](crate::TracewireError::is_retryable)).

pub mod event_store;
pub mod http;

pub use event_store::{EventCallback, EventStore};
pub use http::HttpSink;

use crate::error::Result;
use crate::event::LogEvent;
use async_trait::async_trait;

/// Destination for batches of [`LogEvent`]s.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, events: &[LogEvent]) -> Result<()>;
}
