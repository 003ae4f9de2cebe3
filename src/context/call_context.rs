//! Immutable call context carrying the active trace handle down a call chain.
//!
//! [`CallContext`] is a persistent linked list: [`attach`](CallContext::attach),
//! [`with_tag`](CallContext::with_tag) and [`manual`](CallContext::manual) return a new
//! context that shares every older entry with its parent. Nothing is ever mutated in
//! place, so unrelated call chains holding different contexts cannot see each other.
//!
//! # Examples
//!
//! ```
//! use tracewire::context::CallContext;
//!
//! let root = CallContext::new().with_tag("tenant", "acme");
//! let child = root.with_tag("attempt", "2").manual();
//!
//! assert!(child.is_manual());
//! assert!(!root.is_manual());
//! assert_eq!(child.tags().len(), 2);
//! assert_eq!(root.tags().get("tenant").map(String::as_str), Some("acme"));
//! ```

use crate::tracer::{Session, Span, Trace};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A handle that calls can be attached under.
#[derive(Debug, Clone)]
pub enum ActiveHandle {
    Session(Session),
    Trace(Trace),
    Span(Span),
}

impl ActiveHandle {
    pub fn id(&self) -> &str {
        match self {
            ActiveHandle::Session(session) => session.id(),
            ActiveHandle::Trace(trace) => trace.id(),
            ActiveHandle::Span(span) => span.id(),
        }
    }
}

impl From<Session> for ActiveHandle {
    fn from(session: Session) -> Self {
        ActiveHandle::Session(session)
    }
}

impl From<Trace> for ActiveHandle {
    fn from(trace: Trace) -> Self {
        ActiveHandle::Trace(trace)
    }
}

impl From<Span> for ActiveHandle {
    fn from(span: Span) -> Self {
        ActiveHandle::Span(span)
    }
}

#[derive(Debug)]
enum Entry {
    Handle(ActiveHandle),
    Tag(String, String),
    Manual,
}

#[derive(Debug)]
struct Frame {
    entry: Entry,
    next: Option<Arc<Frame>>,
}

/// Per-call context value. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    head: Option<Arc<Frame>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Entry) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                entry,
                next: self.head.clone(),
            })),
        }
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.head.as_deref(), |frame| frame.next.as_deref())
    }

    /// Derive a context whose calls attach under `handle`.
    pub fn attach(&self, handle: impl Into<ActiveHandle>) -> Self {
        self.push(Entry::Handle(handle.into()))
    }

    /// Derive a context that tags every generation opened under it.
    pub fn with_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Entry::Tag(key.into(), value.into()))
    }

    /// Derive a context marking calls as traced by hand at the call site.
    pub fn manual(&self) -> Self {
        self.push(Entry::Manual)
    }

    /// The most recently attached handle.
    pub fn handle(&self) -> Option<&ActiveHandle> {
        self.frames().find_map(|frame| match &frame.entry {
            Entry::Handle(handle) => Some(handle),
            _ => None,
        })
    }

    /// All tags, the most recent value winning for repeated keys.
    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        for frame in self.frames() {
            if let Entry::Tag(key, value) = &frame.entry {
                tags.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        tags
    }

    pub fn is_manual(&self) -> bool {
        self.frames().any(|frame| matches!(frame.entry, Entry::Manual))
    }

    /// Pick the handle a call should attach under: the explicit one if given,
    /// otherwise the one carried by this context.
    pub fn resolve<'a>(&'a self, explicit: Option<&'a ActiveHandle>) -> Option<&'a ActiveHandle> {
        explicit.or_else(|| self.handle())
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        // Unlink uniquely owned frames iteratively so long chains cannot overflow the stack.
        let mut next = self.head.take();
        while let Some(frame) = next {
            match Arc::try_unwrap(frame) {
                Ok(mut frame) => next = frame.next.take(),
                Err(_) => break,
            }
        }
    }
}
