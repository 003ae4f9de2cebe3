//! Configuration for the instrumentation handle and its background sender.

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://app.tracewire.dev";

/// What the interceptor does with a call the caller is already tracing by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManualPrecedence {
    /// Calls marked manual are passed through without opening a generation.
    #[default]
    Defer,
    /// Record the call automatically even when it is also traced manually.
    Both,
}

/// Tuning for the background event sender.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Maximum number of events shipped in one delivery
    pub batch_size: usize,
    /// Partial batches are shipped at least this often
    pub flush_interval: Duration,
    /// Delivery attempts per batch before it is counted as failed
    pub max_attempts: u32,
    /// Wait before the first retry; doubled on every further attempt
    pub initial_backoff: Duration,
    /// Pending-event count past which enqueueing logs a warning
    pub queue_warn_threshold: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            flush_interval: Duration::from_secs(1),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            queue_warn_threshold: 10_000,
        }
    }
}

/// Configuration for a [`Logger`](crate::tracer::Logger).
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub repository_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    /// Mirror every shipped event to the `tracing` output at debug level
    pub debug: bool,
    /// Open an implicit trace for calls that resolve to no parent
    pub auto_trace: bool,
    pub manual_precedence: ManualPrecedence,
    pub dispatcher: DispatcherConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            repository_id: None,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            debug: false,
            auto_trace: false,
            manual_precedence: ManualPrecedence::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl LoggerConfig {
    /// Build a configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present. Reads
    /// `TRACEWIRE_API_KEY`, `TRACEWIRE_LOG_REPO_ID`, `TRACEWIRE_BASE_URL` and
    /// `TRACEWIRE_DEBUG`.
    pub fn from_env() -> Self {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!(error = %e, "No .env file loaded");
        }

        Self {
            repository_id: non_empty_var("TRACEWIRE_LOG_REPO_ID"),
            api_key: non_empty_var("TRACEWIRE_API_KEY"),
            base_url: non_empty_var("TRACEWIRE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            debug: non_empty_var("TRACEWIRE_DEBUG").is_some_and(|v| parse_flag(&v)),
            ..Default::default()
        }
    }

    pub fn with_repository_id(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = Some(repository_id.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auto_trace(mut self, auto_trace: bool) -> Self {
        self.auto_trace = auto_trace;
        self
    }

    pub fn with_manual_precedence(mut self, precedence: ManualPrecedence) -> Self {
        self.manual_precedence = precedence;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_logger_defaults() {
        let config = LoggerConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.manual_precedence, ManualPrecedence::Defer);
        assert!(!config.auto_trace);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = LoggerConfig::default()
            .with_repository_id("repo-1")
            .with_api_key("key")
            .with_base_url("http://localhost:9000")
            .with_auto_trace(true)
            .with_manual_precedence(ManualPrecedence::Both);

        assert_eq!(config.repository_id.as_deref(), Some("repo-1"));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.base_url, "http://localhost:9000");
        assert!(config.auto_trace);
        assert_eq!(config.manual_precedence, ManualPrecedence::Both);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("YES"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
    }
}
