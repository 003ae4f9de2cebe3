//! The instrumentation handle.
//!
//! A [`Logger`] is constructed once at startup and passed to whatever needs to record:
//! entity factories, the transport interceptor and the middleware. It owns the
//! background [`AsyncDispatcher`]; callers own its lifecycle and must flush before
//! the process exits, which [`Logger::run_scoped`] does on every exit path.

use super::entities::{Session, SessionConfig, Trace, TraceConfig};
use crate::async_dispatcher::{AsyncDispatcher, DispatcherStats};
use crate::config::LoggerConfig;
use crate::error::Result;
use crate::event::LogEvent;
use crate::sink::{EventSink, HttpSink};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct LoggerInner {
    config: LoggerConfig,
    dispatcher: Option<AsyncDispatcher>,
    enabled: AtomicBool,
}

/// Shared handle to the event pipeline.
///
/// Cloning is cheap; every clone feeds the same dispatcher.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// Create a logger delivering to `sink`. Must be called inside a tokio runtime.
    pub fn new(config: LoggerConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let dispatcher = AsyncDispatcher::start(sink, config.dispatcher.clone())?;
        info!(repository_id = ?config.repository_id, "Logger initialized");
        Ok(Self {
            inner: Arc::new(LoggerInner {
                config,
                dispatcher: Some(dispatcher),
                enabled: AtomicBool::new(true),
            }),
        })
    }

    /// Create a logger shipping to the HTTP backend named in `config`.
    ///
    /// Fails with a configuration error if the API key or repository id is missing.
    pub fn from_config(config: LoggerConfig) -> Result<Self> {
        let sink = HttpSink::from_config(&config)?;
        Self::new(config, Arc::new(sink))
    }

    /// Create a logger from `TRACEWIRE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_config(LoggerConfig::from_env())
    }

    /// A logger that records nothing.
    ///
    /// Entities created from it still enforce their lifecycle rules, but closing them
    /// ships nothing and interceptors pass every call straight through.
    pub fn null() -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                config: LoggerConfig::default(),
                dispatcher: None,
                enabled: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    /// Check if the logger is recording
    pub fn is_enabled(&self) -> bool {
        self.inner.dispatcher.is_some() && self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn session(&self, config: SessionConfig) -> Session {
        Session::open(self.clone(), config)
    }

    /// Start a top-level trace that belongs to no session.
    pub fn trace(&self, config: TraceConfig) -> Trace {
        Trace::open(self.clone(), None, config)
    }

    pub(crate) fn emit(&self, event: LogEvent) {
        if !self.is_enabled() {
            return;
        }
        let Some(dispatcher) = &self.inner.dispatcher else {
            return;
        };

        if self.inner.config.debug {
            match serde_json::to_string(&event) {
                Ok(json) => debug!(kind = %event.kind, id = %event.id, event = %json, "Queued event"),
                Err(e) => warn!(id = %event.id, error = %e, "Event is not serializable"),
            }
        }
        dispatcher.enqueue(event);
    }

    /// Wait until every event closed before this call has been delivered or failed.
    pub async fn flush(&self) -> Result<()> {
        match &self.inner.dispatcher {
            Some(dispatcher) => dispatcher.flush().await,
            None => Ok(()),
        }
    }

    /// Flush, giving up after `timeout`. Returns `false` on timeout.
    pub async fn flush_timeout(&self, timeout: Duration) -> Result<bool> {
        match &self.inner.dispatcher {
            Some(dispatcher) => dispatcher.flush_timeout(timeout).await,
            None => Ok(true),
        }
    }

    /// Flush and stop the background sender. Later events are dropped and counted as failed.
    pub async fn cleanup(&self) -> Result<()> {
        if let Some(dispatcher) = &self.inner.dispatcher {
            dispatcher.stop().await?;
            let stats = dispatcher.stats();
            info!(
                delivered = stats.delivered,
                failed = stats.failed,
                "Logger cleaned up"
            );
        }
        Ok(())
    }

    /// Run `future` and flush afterwards, whether it returns or panics.
    ///
    /// A panic is resumed unchanged once the flush has finished.
    pub async fn run_scoped<F, T>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(future).catch_unwind().await;
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Flush on scope exit failed");
        }
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.inner.dispatcher.as_ref().map(AsyncDispatcher::stats).unwrap_or_default()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("repository_id", &self.inner.config.repository_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
