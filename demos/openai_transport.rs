//! Recording an OpenAI chat completion by wrapping the HTTP transport.
//!
//! The call itself is plain HTTP; the wrapped transport decodes request and response
//! and records a Generation under the span carried in the request's extensions.
//!
//! # Running the example
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! export TRACEWIRE_API_KEY=...
//! export TRACEWIRE_LOG_REPO_ID=...
//! cargo run --example openai_transport
//! ```

use anyhow::Context;
use bytes::Bytes;
use serde_json::{json, Value};
use tracewire::prelude::*;

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let openai_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
    let logger = Logger::from_env()?;
    let transport = InstrumentedTransport::new(ReqwestTransport::default(), logger.clone());

    let outcome = logger.run_scoped(greet(&logger, &transport, &openai_key)).await;
    logger.cleanup().await?;
    outcome
}

async fn greet(
    logger: &Logger,
    transport: &InstrumentedTransport<ReqwestTransport>,
    openai_key: &str,
) -> anyhow::Result<()> {
    let trace = logger.trace(TraceConfig::named("openai transport demo"));
    let span = trace.add_span(SpanConfig::named("greeting"))?;
    let ctx = CallContext::new().attach(span.clone()).with_tag("demo", "openai_transport");

    let body = json!({
        "model": "gpt-4o-mini",
        "temperature": 0.7,
        "messages": [
            {"role": "system", "content": "You are a pirate. Answer in pirate speak."},
            {"role": "user", "content": "Say hi"}
        ]
    });
    let mut request = http::Request::builder()
        .method("POST")
        .uri(CHAT_URL)
        .header("authorization", format!("Bearer {}", openai_key))
        .header("content-type", "application/json")
        .body(Bytes::from(serde_json::to_vec(&body)?))?;
    request.extensions_mut().insert(ctx);

    let response = transport.send(request).await?;
    let reply: Value = serde_json::from_slice(response.body())?;
    match reply["choices"][0]["message"]["content"].as_str() {
        Some(text) => println!("{}", text),
        None => println!("HTTP {}: {}", response.status(), reply),
    }

    span.end()?;
    trace.end()?;
    Ok(())
}
