//! Automatic recording of provider calls.
//!
//! Two equivalent forms are offered:
//!
//! - [`InstrumentedTransport`] wraps a byte-level [`Transport`] and decodes the wire
//!   payloads with a provider adapter.
//! - [`Middleware`] wraps a typed SDK call whose request and response already expose
//!   canonical data through [`ObservableRequest`] / [`ObservableResponse`].
//!
//! Both open the Generation (or ToolCall) before the wrapped call is issued and close it
//! after it returns. The wrapped call's result, including its error type, is handed
//! back untouched. If the call is cancelled or panics, the entity is still closed with
//! an error.

pub mod middleware;
pub mod transport;

pub use middleware::{Middleware, ObservableRequest, ObservableResponse};
pub use transport::{InstrumentedTransport, ReqwestTransport, ToolInvocation, Transport};

use crate::error::Result;
use crate::event::GenerationError;
use crate::tracer::{Generation, ToolCall, Trace};
use tracing::warn;

pub(crate) const CANCELLED: &str = "cancelled";
pub(crate) const PANICKED: &str = "panicked";

/// An open leaf entity the interceptor is responsible for closing.
pub(crate) trait Closable {
    fn id(&self) -> &str;
    fn is_closed(&self) -> bool;
    fn set_error(&self, error: GenerationError) -> Result<()>;
}

impl Closable for Generation {
    fn id(&self) -> &str {
        Generation::id(self)
    }

    fn is_closed(&self) -> bool {
        Generation::is_closed(self)
    }

    fn set_error(&self, error: GenerationError) -> Result<()> {
        Generation::set_error(self, error)
    }
}

impl Closable for ToolCall {
    fn id(&self) -> &str {
        ToolCall::id(self)
    }

    fn is_closed(&self) -> bool {
        ToolCall::is_closed(self)
    }

    fn set_error(&self, error: GenerationError) -> Result<()> {
        ToolCall::set_error(self, error)
    }
}

/// Closes the entity with a `cancelled` error if it is still open when dropped, and
/// ends any trace opened just for this call.
pub(crate) struct CloseGuard<E: Closable> {
    entity: E,
    owned_trace: Option<Trace>,
}

impl<E: Closable> CloseGuard<E> {
    pub(crate) fn new(entity: E, owned_trace: Option<Trace>) -> Self {
        Self { entity, owned_trace }
    }

    pub(crate) fn entity(&self) -> &E {
        &self.entity
    }

    pub(crate) fn fail(&self, error: GenerationError) {
        if let Err(e) = self.entity.set_error(error) {
            warn!(id = %self.entity.id(), error = %e, "Could not record call failure");
        }
    }
}

impl<E: Closable> Drop for CloseGuard<E> {
    fn drop(&mut self) {
        if !self.entity.is_closed() {
            warn!(id = %self.entity.id(), "Call ended before its result was recorded");
            self.fail(GenerationError::new(CANCELLED).with_type(CANCELLED));
        }
        if let Some(trace) = self.owned_trace.take() {
            if let Err(e) = trace.end() {
                warn!(id = %trace.id(), error = %e, "Could not end implicit trace");
            }
        }
    }
}
