//! Recording a tool invocation under a span with the middleware.
//!
//! # Running the example
//!
//! ```bash
//! cargo run --example tool_call
//! ```

use serde::Serialize;
use std::sync::Arc;
use tracewire::prelude::*;

#[derive(Debug, Serialize)]
struct Weather {
    location: String,
    temp: i32,
}

async fn get_current_weather(location: &str) -> std::result::Result<Weather, String> {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(Weather {
        location: location.to_string(),
        temp: 72,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(EventStore::default());
    let logger = Logger::new(LoggerConfig::default(), store.clone())?;
    let middleware = Middleware::new(logger.clone());

    let outcome = logger
        .run_scoped(async {
            let trace = logger.trace(TraceConfig::named("toolCall"));
            let span = trace.add_span(SpanConfig::named("toolCall"))?;
            let ctx = CallContext::new().attach(span.clone()).with_tag("demo", "tool_call");

            let config = ToolCallConfig::new("get_current_weather")
                .with_description("Get current weather data for location")
                .with_args(r#"{"location":"NYC"}"#);
            match middleware
                .observe_tool(&ctx, None, config, || get_current_weather("NYC"))
                .await
            {
                Ok(weather) => println!("Tool returned: {:?}", weather),
                Err(e) => println!("Tool failed: {}", e),
            }

            span.end()?;
            trace.end()
        })
        .await;

    for summary in store.get_last_n_summaries(3, None) {
        println!("{}\n", summary);
    }
    logger.cleanup().await?;
    outcome
}
