//! Active-context resolution.
//!
//! Decides which trace or span an intercepted call is recorded under. The order is:
//! an explicit handle from the call site, then the handle carried by the
//! [`CallContext`], then (if `auto_trace` is enabled) a fresh implicit trace. When
//! nothing resolves the call is simply not recorded.

pub mod call_context;

pub use call_context::{ActiveHandle, CallContext};

use crate::error::Result;
use crate::tracer::{Logger, Parent, Trace, TraceConfig};
use tracing::debug;

/// Where an intercepted call will be recorded.
#[derive(Debug)]
pub struct Resolved {
    pub parent: Parent,
    /// A trace opened just for this call; the interceptor ends it after the call.
    pub owned_trace: Option<Trace>,
}

/// Resolve the parent for one call.
///
/// A session handle gets a per-call trace inside that session. Fails only when the
/// resolved handle is already closed.
pub fn resolve_parent(
    explicit: Option<&ActiveHandle>,
    ctx: &CallContext,
    logger: &Logger,
    call_name: &str,
) -> Result<Option<Resolved>> {
    let resolved = match ctx.resolve(explicit) {
        Some(ActiveHandle::Span(span)) => Resolved {
            parent: Parent::Span(span.clone()),
            owned_trace: None,
        },
        Some(ActiveHandle::Trace(trace)) => Resolved {
            parent: Parent::Trace(trace.clone()),
            owned_trace: None,
        },
        Some(ActiveHandle::Session(session)) => {
            let trace = session.add_trace(TraceConfig::named(call_name))?;
            owned(trace)
        }
        None if logger.config().auto_trace => {
            debug!(call = call_name, "Opening implicit trace");
            owned(logger.trace(TraceConfig::named(call_name)))
        }
        None => return Ok(None),
    };
    Ok(Some(resolved))
}

fn owned(trace: Trace) -> Resolved {
    Resolved {
        parent: Parent::Trace(trace.clone()),
        owned_trace: Some(trace),
    }
}
