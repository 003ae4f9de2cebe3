//! Manual tracing: session → trace → span → generation, recorded by hand.
//!
//! Events go to the backend named by `TRACEWIRE_*` environment variables when they
//! are set, otherwise to an in-memory store whose contents are printed at the end.
//!
//! # Running the example
//!
//! ```bash
//! RUST_LOG=tracewire=debug cargo run --example manual_tracing
//! ```

use serde_json::json;
use std::sync::Arc;
use tracewire::prelude::*;

fn demo_logger() -> Result<(Logger, Option<Arc<EventStore>>)> {
    let config = LoggerConfig::from_env();
    if config.api_key.is_some() && config.repository_id.is_some() {
        return Ok((Logger::from_config(config)?, None));
    }
    println!("TRACEWIRE_API_KEY / TRACEWIRE_LOG_REPO_ID not set, recording in memory\n");
    let store = Arc::new(EventStore::default());
    Ok((Logger::new(config, store.clone())?, Some(store)))
}

async fn log_trace(logger: &Logger, session: Option<&Session>) -> Result<()> {
    let config = TraceConfig::named("test trace");
    let trace = match session {
        Some(session) => session.add_trace(config)?,
        None => logger.trace(config),
    };
    trace.set_input("Hello, world!")?;

    let span = trace.add_span(SpanConfig::named("test span"))?;
    let generation = span.add_generation(
        GenerationConfig::new(Provider::OpenAI, "gpt-4o")
            .with_name("test generation")
            .with_message(CompletionRequest::user("Hello, world!"))
            .with_model_parameter("temperature", 0.5),
    )?;

    // Stand-in for the real provider call.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result = CompletionResult {
        id: Some(uuid::Uuid::new_v4().to_string()),
        model: Some("gpt-4o".to_string()),
        text: Some("Hello, world!".to_string()),
        finish_reason: Some("stop".to_string()),
        usage: Some(Usage::new(10, 10)),
        raw: json!({"choices": [{"message": {"role": "assistant", "content": "Hello, world!"}}]}),
        ..Default::default()
    };
    generation.set_result(result)?;

    span.end()?;
    trace.set_output("Hello, world!")?;
    trace.end()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (logger, store) = demo_logger()?;

    let outcome = logger
        .run_scoped(async {
            let session = logger.session(SessionConfig::named("test session"));
            log_trace(&logger, Some(&session)).await?;
            session.set_feedback(Feedback::new(3).with_comment("This is a test feedback"))?;
            session.end()
        })
        .await;

    if let Some(store) = store {
        for summary in store.get_event_summaries(None) {
            println!("{}\n", summary);
        }
    }

    logger.cleanup().await?;
    outcome
}
