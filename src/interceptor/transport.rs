//! Transport-level interception.
//!
//! [`InstrumentedTransport`] wraps any [`Transport`] and records each provider call it
//! forwards. Call-site information travels in the request's extensions:
//!
//! - a [`CallContext`] carrying the ambient handle, tags and the manual marker
//! - an explicit [`ActiveHandle`], which wins over the context
//! - a [`ToolInvocation`], which records the call as a tool call instead of a generation
//!
//! Requests and responses are forwarded byte for byte.

use super::{CloseGuard, PANICKED};
use crate::config::ManualPrecedence;
use crate::context::{resolve_parent, ActiveHandle, CallContext, Resolved};
use crate::event::GenerationError;
use crate::llm::adapters::{adapter_for, detect, ProviderAdapter};
use crate::llm::models::{CompletionResult, Provider};
use crate::tracer::{GenerationConfig, Logger, ToolCallConfig};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use http::{Request, Response};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum number of response body characters copied into an error message.
const ERROR_BODY_PREVIEW: usize = 512;

/// A raw send-and-receive capability.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Self::Error>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Error = reqwest::Error;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Request extension marking a call as a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub description: Option<String>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Wraps a [`Transport`] and records every call it forwards.
pub struct InstrumentedTransport<T> {
    inner: T,
    logger: Logger,
    adapter: Option<Arc<dyn ProviderAdapter>>,
}

impl<T: Transport> InstrumentedTransport<T> {
    /// Wrap `inner`, picking the provider adapter from each request's URL.
    pub fn new(inner: T, logger: Logger) -> Self {
        Self {
            inner,
            logger,
            adapter: None,
        }
    }

    /// Always decode with this provider's adapter.
    pub fn with_provider(self, provider: Provider) -> Self {
        self.with_adapter(adapter_for(provider))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_record(&self, ctx: &CallContext) -> bool {
        if !self.logger.is_enabled() {
            return false;
        }
        if ctx.is_manual() && self.logger.config().manual_precedence == ManualPrecedence::Defer {
            debug!("Call is traced manually, not recording");
            return false;
        }
        true
    }

    fn resolve(&self, explicit: Option<&ActiveHandle>, ctx: &CallContext, name: &str) -> Option<Resolved> {
        match resolve_parent(explicit, ctx, &self.logger, name) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Could not resolve trace for call, not recording");
                None
            }
        }
    }

    async fn send_generation(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        resolved: Resolved,
        ctx: &CallContext,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, T::Error> {
        let config = generation_config(adapter.as_ref(), &request, ctx);
        let generation = match resolved.parent.add_generation(config) {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "Could not open generation, not recording");
                return self.inner.send(request).await;
            }
        };
        let guard = CloseGuard::new(generation, resolved.owned_trace);

        let response = match AssertUnwindSafe(self.inner.send(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                guard.fail(GenerationError::new(e.to_string()).with_type("transport"));
                return Err(e);
            }
            Err(panic) => {
                guard.fail(GenerationError::new(PANICKED).with_type(PANICKED));
                drop(guard);
                std::panic::resume_unwind(panic);
            }
        };

        let generation = guard.entity();
        let status = response.status();
        let closed = if !status.is_success() {
            generation.set_error(
                GenerationError::new(body_preview(response.body()))
                    .with_code(status.as_u16().to_string())
                    .with_type("http"),
            )
        } else {
            match adapter.decode_response(response.body()) {
                Ok(mut result) => {
                    if result.model.is_none() {
                        result.model = Some(generation.model());
                    }
                    generation.set_result(result)
                }
                Err(e) => {
                    warn!(id = %generation.id(), error = %e, "Could not decode provider response");
                    let _ = generation.add_decode_error(e.to_string());
                    generation.set_result(CompletionResult {
                        raw: Value::String(String::from_utf8_lossy(response.body()).into_owned()),
                        ..Default::default()
                    })
                }
            }
        };
        if let Err(e) = closed {
            warn!(id = %generation.id(), error = %e, "Could not close generation");
        }

        Ok(response)
    }

    async fn send_tool_call(
        &self,
        tool: ToolInvocation,
        resolved: Resolved,
        ctx: &CallContext,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, T::Error> {
        let mut config = ToolCallConfig::new(tool.name)
            .with_args(String::from_utf8_lossy(request.body()))
            .with_tags(ctx.tags());
        config.description = tool.description;

        let tool_call = match resolved.parent.add_tool_call(config) {
            Ok(tool_call) => tool_call,
            Err(e) => {
                warn!(error = %e, "Could not open tool call, not recording");
                return self.inner.send(request).await;
            }
        };
        let guard = CloseGuard::new(tool_call, resolved.owned_trace);

        let response = match AssertUnwindSafe(self.inner.send(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                guard.fail(GenerationError::new(e.to_string()).with_type("transport"));
                return Err(e);
            }
            Err(panic) => {
                guard.fail(GenerationError::new(PANICKED).with_type(PANICKED));
                drop(guard);
                std::panic::resume_unwind(panic);
            }
        };

        let status = response.status();
        if status.is_success() {
            let body = String::from_utf8_lossy(response.body()).into_owned();
            if let Err(e) = guard.entity().set_result(body) {
                warn!(error = %e, "Could not close tool call");
            }
        } else {
            guard.fail(
                GenerationError::new(body_preview(response.body()))
                    .with_code(status.as_u16().to_string())
                    .with_type("http"),
            );
        }

        Ok(response)
    }
}

#[async_trait]
impl<T: Transport> Transport for InstrumentedTransport<T> {
    type Error = T::Error;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        let ctx = request.extensions().get::<CallContext>().cloned().unwrap_or_default();
        if !self.should_record(&ctx) {
            return self.inner.send(request).await;
        }
        let explicit = request.extensions().get::<ActiveHandle>().cloned();

        if let Some(tool) = request.extensions().get::<ToolInvocation>().cloned() {
            return match self.resolve(explicit.as_ref(), &ctx, &tool.name) {
                Some(resolved) => self.send_tool_call(tool, resolved, &ctx, request).await,
                None => self.inner.send(request).await,
            };
        }

        let path = request.uri().path();
        let Some(adapter) = self.adapter.clone().or_else(|| detect(path)) else {
            debug!(path, "Not a completion call, not recording");
            return self.inner.send(request).await;
        };

        let call_name = format!("{} completion", adapter.provider());
        match self.resolve(explicit.as_ref(), &ctx, &call_name) {
            Some(resolved) => self.send_generation(adapter, resolved, &ctx, request).await,
            None => self.inner.send(request).await,
        }
    }
}

/// Build the generation config from the outgoing request.
///
/// Decode problems are carried on the config rather than failing the call.
fn generation_config(
    adapter: &dyn ProviderAdapter,
    request: &Request<Bytes>,
    ctx: &CallContext,
) -> GenerationConfig {
    let path_model = adapter.model_from_path(request.uri().path());
    let mut config = GenerationConfig::new(adapter.provider(), "").with_tags(ctx.tags());

    match adapter.decode_request(request.body()) {
        Ok(decoded) => {
            if !decoded.decode_errors.is_empty() {
                warn!(
                    provider = %adapter.provider(),
                    errors = decoded.decode_errors.len(),
                    "Parts of the provider request could not be decoded"
                );
            }
            config.model = path_model.or(decoded.model).unwrap_or_default();
            config.messages = decoded.messages;
            config.model_parameters = decoded.model_parameters;
            config.tools = decoded.tools;
            config.decode_errors = decoded.decode_errors;
        }
        Err(e) => {
            warn!(provider = %adapter.provider(), error = %e, "Could not decode provider request");
            config.model = path_model.unwrap_or_default();
            config.decode_errors.push(e.to_string());
            config.raw_request = Some(String::from_utf8_lossy(request.body()).into_owned());
        }
    }
    config
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > ERROR_BODY_PREVIEW {
        let cut: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
        format!("{}...", cut)
    } else {
        text.into_owned()
    }
}
