//! Error types and result aliases for the Tracewire library.
//!
//! This module defines the core error type [`TracewireError`] and the [`Result`] type alias
//! used throughout the library. Instrumentation errors are reported to the caller of the
//! instrumentation API (or logged) but never replace the error of an instrumented call.

use crate::event::EntityKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracewireError {
    #[error("{kind} {id} is already closed")]
    AlreadyClosed { kind: EntityKind, id: String },

    #[error("{kind} {id} was closed more than once")]
    DoubleClose { kind: EntityKind, id: String },

    #[error("Feedback already set on session {0}")]
    FeedbackAlreadySet(String),

    #[error("Decode error ({provider}): {message}")]
    Decode { provider: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Sink error: {message}")]
    Sink { message: String, retryable: bool },

    #[error("Dispatcher error: {0}")]
    DispatcherError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TracewireError {
    pub(crate) fn decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether a sink delivery failure may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sink { retryable, .. } => *retryable,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TracewireError>;
