use std::time::Duration;

use otel_plane::re_exports::{Context, KeyValue, TraceContextExt};
use otel_plane::{Protocol, TelemetryHandle, TelemetryOptions, Verbosity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let endpoint = std::env::args().nth(1);
    let protocol = match std::env::args().nth(2).as_deref() {
        Some("grpc") => Protocol::Grpc,
        _ => Protocol::HttpProtobuf,
    };

    let mut builder = TelemetryOptions::builder()
        .protocol(protocol)
        .service_version("1.0.0")
        .service_namespace("demo")
        .resource_attributes([("deployment.environment", "demo")])
        .verbosity(Verbosity::Warnings);

    if let Some(ref url) = endpoint {
        builder = builder.endpoint(url);
    }

    let telemetry = otel_plane::setup_telemetry("otel-plane-demo", Some(builder.build()))?;
    telemetry.install_subscriber()?;

    tracing::info!("Demo application started");

    fetch_user(&telemetry, "user-42").await;
    process_order(&telemetry, "order-123", 3).await;

    // Raise verbosity at runtime; info records now reach the sinks too.
    telemetry.set_verbosity(Verbosity::Verbose);
    process_order(&telemetry, "order-124", 1).await;

    let stats = telemetry.logger().stats();
    tracing::info!(
        emitted = stats.emitted(),
        suppressed = stats.suppressed(),
        "Demo application finished"
    );

    telemetry.shutdown(Duration::from_secs(10))?;
    Ok(())
}

#[tracing::instrument(skip(telemetry))]
async fn fetch_user(telemetry: &TelemetryHandle, user_id: &str) {
    let attrs = [KeyValue::new("user.id", user_id.to_owned())];
    telemetry
        .logger()
        .log_in_current_span(otel_plane::Severity::Info, "Fetching user from database", None, &attrs);
    simulate_work(Duration::from_millis(50)).await;
}

async fn process_order(telemetry: &TelemetryHandle, order_id: &str, item_count: u32) {
    let span = telemetry.start_span(
        "process_order",
        vec![KeyValue::new("order.id", order_id.to_owned())],
    );
    let cx = Context::current_with_span(span);
    let logger = telemetry
        .logger()
        .with_group("order")
        .with_attributes(&[KeyValue::new("id", order_id.to_owned())]);

    logger.info(&cx, "Processing order", &[KeyValue::new("items", i64::from(item_count))]);

    for item in 1..=item_count {
        if let Err(err) = process_item(item).await {
            logger.error(&cx, "Item failed", Some(&err), &[KeyValue::new("item", i64::from(item))]);
            continue;
        }
        telemetry
            .operations()
            .add(1, &[KeyValue::new("operation", "process_item")]);
    }

    logger.warn(&cx, "Order processed with retries", &[]);
    cx.span().end();
}

async fn process_item(item_number: u32) -> Result<(), std::io::Error> {
    simulate_work(Duration::from_millis(30)).await;
    if item_number == 2 {
        return Err(std::io::Error::other("inventory service timed out"));
    }
    Ok(())
}

async fn simulate_work(duration: Duration) {
    tokio::time::sleep(duration).await;
}
