//! Middleware-level interception for typed SDK calls.
//!
//! When a client exposes structured request and response objects instead of wire
//! bytes, implement [`ObservableRequest`] and [`ObservableResponse`] for them and route
//! the call through [`Middleware::observe`]. Recording follows the same rules as
//! the transport form.

use super::{CloseGuard, PANICKED};
use crate::config::ManualPrecedence;
use crate::context::{resolve_parent, ActiveHandle, CallContext, Resolved};
use crate::error::Result as TracewireResult;
use crate::event::GenerationError;
use crate::llm::models::{CompletionRequest, CompletionResult, MessageVariant, Provider};
use crate::llm::tool_spec::ToolSpec;
use crate::tracer::{GenerationConfig, Logger, ToolCallConfig};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// A typed completion request that can describe itself canonically.
pub trait ObservableRequest {
    fn provider(&self) -> Provider;

    fn model(&self) -> String;

    fn messages(&self) -> Vec<MessageVariant>;

    fn model_parameters(&self) -> Map<String, Value> {
        Map::new()
    }

    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

/// A typed completion response that can be converted to a [`CompletionResult`].
pub trait ObservableResponse {
    fn completion_result(&self) -> TracewireResult<CompletionResult>;
}

impl ObservableResponse for CompletionResult {
    fn completion_result(&self) -> TracewireResult<CompletionResult> {
        Ok(self.clone())
    }
}

/// Records typed provider and tool calls.
#[derive(Debug, Clone)]
pub struct Middleware {
    logger: Logger,
}

impl Middleware {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    fn resolve(&self, ctx: &CallContext, explicit: Option<&ActiveHandle>, name: &str) -> Option<Resolved> {
        if !self.logger.is_enabled() {
            return None;
        }
        if ctx.is_manual() && self.logger.config().manual_precedence == ManualPrecedence::Defer {
            debug!(call = name, "Call is traced manually, not recording");
            return None;
        }
        match resolve_parent(explicit, ctx, &self.logger, name) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Could not resolve trace for call, not recording");
                None
            }
        }
    }

    /// Run `call` as a recorded completion.
    ///
    /// The generation is opened before `call` is invoked and closed after its future
    /// completes; `call`'s output is returned unchanged.
    pub async fn observe<Req, Resp, E, F, Fut>(
        &self,
        ctx: &CallContext,
        explicit: Option<&ActiveHandle>,
        request: &Req,
        call: F,
    ) -> Result<Resp, E>
    where
        Req: ObservableRequest,
        Resp: ObservableResponse,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Resp, E>>,
    {
        let provider = request.provider();
        let Some(resolved) = self.resolve(ctx, explicit, &format!("{} completion", provider)) else {
            return call().await;
        };

        let messages: Vec<CompletionRequest> =
            request.messages().into_iter().map(CompletionRequest::from).collect();
        let mut config = GenerationConfig::new(provider, request.model())
            .with_messages(messages)
            .with_tools(request.tools())
            .with_tags(ctx.tags());
        config.model_parameters = request.model_parameters();

        let generation = match resolved.parent.add_generation(config) {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "Could not open generation, not recording");
                return call().await;
            }
        };
        let guard = CloseGuard::new(generation, resolved.owned_trace);

        let outcome = match AssertUnwindSafe(call()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                guard.fail(GenerationError::new(PANICKED).with_type(PANICKED));
                drop(guard);
                std::panic::resume_unwind(panic);
            }
        };

        let generation = guard.entity();
        let closed = match &outcome {
            Ok(response) => match response.completion_result() {
                Ok(result) => generation.set_result(result),
                Err(e) => {
                    warn!(id = %generation.id(), error = %e, "Could not convert SDK response");
                    let _ = generation.add_decode_error(e.to_string());
                    generation.end()
                }
            },
            Err(e) => generation.set_error(GenerationError::new(e.to_string())),
        };
        if let Err(e) = closed {
            warn!(id = %generation.id(), error = %e, "Could not close generation");
        }

        outcome
    }

    /// Run `call` as a recorded tool invocation; the result is stored as JSON.
    pub async fn observe_tool<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        explicit: Option<&ActiveHandle>,
        config: ToolCallConfig,
        call: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(resolved) = self.resolve(ctx, explicit, &config.name) else {
            return call().await;
        };

        let tool_call = match resolved.parent.add_tool_call(config.with_tags(ctx.tags())) {
            Ok(tool_call) => tool_call,
            Err(e) => {
                warn!(error = %e, "Could not open tool call, not recording");
                return call().await;
            }
        };
        let guard = CloseGuard::new(tool_call, resolved.owned_trace);

        let outcome = match AssertUnwindSafe(call()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                guard.fail(GenerationError::new(PANICKED).with_type(PANICKED));
                drop(guard);
                std::panic::resume_unwind(panic);
            }
        };

        match &outcome {
            Ok(value) => match serde_json::to_string(value) {
                Ok(json) => {
                    if let Err(e) = guard.entity().set_result(json) {
                        warn!(error = %e, "Could not close tool call");
                    }
                }
                Err(e) => guard.fail(GenerationError::new(format!("Unserializable result: {}", e))),
            },
            Err(e) => guard.fail(GenerationError::new(e.to_string())),
        }

        outcome
    }
}
